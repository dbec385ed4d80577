//! TOML flow definitions.
//!
//! ```toml
//! name = "daily"
//! entry = "publish"
//!
//! [[step]]
//! name = "extract"
//! resource = "odps"
//! [[step.job]]
//! name = "dump"
//! type = "shell"
//! [step.job.prop]
//! cmd = "echo ok"
//!
//! [[step]]
//! name = "publish"
//! dep = ["extract"]
//! ```
//!
//! Steps reference their dependencies by name. A job without an explicit
//! `id` gets `<flow>.<step>.<job>`, which stays stable between runs as long
//! as the definition does.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{GraphError, HpipeError, Result};
use crate::flow::{Flow, Job, Step, StepId, Stmt};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub name: String,
    pub entry: String,
    #[serde(default)]
    pub var: BTreeMap<String, String>,
    #[serde(default)]
    pub prop: BTreeMap<String, String>,
    #[serde(default, rename = "step")]
    pub steps: Vec<StepDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    pub name: String,
    #[serde(default)]
    pub dep: Vec<String>,
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub var: BTreeMap<String, String>,
    #[serde(default, rename = "job")]
    pub jobs: Vec<JobDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinition {
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub job_type: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub var: BTreeMap<String, String>,
    #[serde(default)]
    pub prop: BTreeMap<String, String>,
}

impl FlowDefinition {
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| HpipeError::Definition(e.to_string()))
    }

    /// Read, parse and validate a flow file.
    pub fn load(path: &Path) -> Result<Flow> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            HpipeError::Definition(format!("cannot read {}: {}", path.display(), e))
        })?;
        let flow = Self::parse(&text)?.into_flow()?;
        debug!(path = %path.display(), flow = %flow.name, steps = flow.steps().len(), "Flow loaded");
        Ok(flow)
    }

    /// Build the step graph and check it.
    pub fn into_flow(self) -> Result<Flow> {
        let mut flow = Flow::new(&self.name);
        flow.vars = to_vars(self.var);
        flow.props = self.prop;

        let mut ids: HashMap<String, StepId> = HashMap::new();
        let mut pending_deps = Vec::with_capacity(self.steps.len());

        for step_def in self.steps {
            if ids.contains_key(&step_def.name) {
                return Err(GraphError::DuplicateStep(step_def.name).into());
            }
            let mut step = Step::new(&step_def.name);
            step.vars = to_vars(step_def.var);
            step.resource = step_def.resource;
            for job_def in step_def.jobs {
                let instance_id = job_def
                    .id
                    .unwrap_or_else(|| format!("{}.{}.{}", self.name, step_def.name, job_def.name));
                let mut job = Job::new(job_def.name, instance_id, job_def.job_type);
                job.file = job_def.file;
                job.vars = to_vars(job_def.var);
                job.props = job_def.prop;
                step.jobs.push(job);
            }
            let id = flow.add_step(step);
            ids.insert(step_def.name.clone(), id);
            pending_deps.push((id, step_def.name, step_def.dep));
        }

        for (id, step_name, deps) in pending_deps {
            for dep in deps {
                let dep_id = ids.get(&dep).copied().ok_or_else(|| {
                    GraphError::UnknownDependency {
                        step: step_name.clone(),
                        dependency: dep.clone(),
                    }
                })?;
                flow.step_mut(id).deps.push(dep_id);
            }
        }

        let entry = ids.get(&self.entry).copied().ok_or_else(|| {
            HpipeError::Definition(format!("entry step '{}' is not defined", self.entry))
        })?;
        flow.set_entry(entry);

        flow.validate()?;
        Ok(flow)
    }
}

fn to_vars(raw: BTreeMap<String, String>) -> BTreeMap<String, Stmt> {
    raw.into_iter().map(|(k, v)| (k, Stmt(v))).collect()
}
