//! Flow / Step / Job graph model.
//!
//! Steps live in an arena owned by the [`Flow`] and refer to their
//! dependencies by [`StepId`], so one step may be a dependency of several
//! others without shared ownership. Variable and property maps are
//! `BTreeMap`s: every rendering iterates them in key order.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::status::Status;

/// An unevaluated variable statement, carried verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Stmt(pub String);

impl Stmt {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub type Vars = BTreeMap<String, Stmt>;
pub type Props = BTreeMap<String, String>;

/// Index of a step inside its flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepId(pub usize);

/// Location of a job: owning step plus position in its job list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobRef {
    pub step: StepId,
    pub index: usize,
}

/// Leaf unit of execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub name: String,
    /// Resume key. Stable across retries and restarts.
    pub instance_id: String,
    /// Selects the executor.
    pub job_type: String,
    pub vars: Vars,
    pub file: Option<String>,
    pub props: Props,
    pub status: Status,
    /// Exit code of the most recent attempt.
    pub exit_code: Option<i32>,
}

impl Job {
    pub fn new(
        name: impl Into<String>,
        instance_id: impl Into<String>,
        job_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            instance_id: instance_id.into(),
            job_type: job_type.into(),
            vars: Vars::new(),
            file: None,
            props: Props::new(),
            status: Status::Todo,
            exit_code: None,
        }
    }

    pub fn with_prop(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }

    pub fn with_var(mut self, key: impl Into<String>, stmt: Stmt) -> Self {
        self.vars.insert(key.into(), stmt);
        self
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    fn write_debug(&self, out: &mut String, depth: usize) {
        let indent = "\t".repeat(depth);
        out.push_str(&format!("{indent}{}:{{\n", self.name));
        out.push_str(&format!("{indent}\tid:{}\n", self.instance_id));
        out.push_str(&format!("{indent}\ttype:{}\n", self.job_type));
        out.push_str(&format!("{indent}\tstatus:{}\n", self.status));
        if let Some(file) = &self.file {
            out.push_str(&format!("{indent}\tfile:{}\n", file));
        }
        write_map(out, &indent, "var", &self.vars);
        write_map(out, &indent, "prop", &self.props);
        out.push_str(&format!("{indent}}}"));
    }
}

/// One-line form used in log lines.
impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "job:{{name:{},type:{},id:{},status:{},file:{},var:{},prop:{}}}",
            self.name,
            self.job_type,
            self.instance_id,
            self.status,
            self.file.as_deref().unwrap_or(""),
            inline_map(&self.vars),
            inline_map(&self.props),
        )
    }
}

/// A sequencing node: waits for `deps`, then runs `jobs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub name: String,
    pub deps: Vec<StepId>,
    pub jobs: Vec<Job>,
    pub vars: Vars,
    /// Concurrency group for this step's jobs.
    pub resource: Option<String>,
    pub status: Status,
}

impl Step {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            deps: Vec::new(),
            jobs: Vec::new(),
            vars: Vars::new(),
            resource: None,
            status: Status::Todo,
        }
    }

    pub fn with_dep(mut self, dep: StepId) -> Self {
        self.deps.push(dep);
        self
    }

    pub fn with_job(mut self, job: Job) -> Self {
        self.jobs.push(job);
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_var(mut self, key: impl Into<String>, stmt: Stmt) -> Self {
        self.vars.insert(key.into(), stmt);
        self
    }

    /// Aggregate status of this step's own jobs: `Fail` if any failed,
    /// `Done` if all are done, `Doing` if any is in flight.
    pub fn jobs_status(&self) -> Status {
        if self.jobs.iter().any(|j| j.status == Status::Fail) {
            Status::Fail
        } else if self.jobs.iter().all(|j| j.status == Status::Done) {
            Status::Done
        } else if self.jobs.iter().any(|j| j.status == Status::Doing) {
            Status::Doing
        } else {
            Status::Todo
        }
    }
}

/// Top-level unit of work for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Flow {
    pub name: String,
    pub vars: Vars,
    pub props: Props,
    entry: Option<StepId>,
    steps: Vec<Step>,
}

impl Flow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Add a step to the arena and return its id.
    pub fn add_step(&mut self, step: Step) -> StepId {
        self.steps.push(step);
        StepId(self.steps.len() - 1)
    }

    pub fn set_entry(&mut self, id: StepId) {
        self.entry = Some(id);
    }

    pub fn entry(&self) -> Option<StepId> {
        self.entry
    }

    pub fn step(&self, id: StepId) -> &Step {
        &self.steps[id.0]
    }

    pub fn step_mut(&mut self, id: StepId) -> &mut Step {
        &mut self.steps[id.0]
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn step_by_name(&self, name: &str) -> Option<StepId> {
        self.steps.iter().position(|s| s.name == name).map(StepId)
    }

    pub fn job(&self, r: JobRef) -> &Job {
        &self.steps[r.step.0].jobs[r.index]
    }

    pub fn job_mut(&mut self, r: JobRef) -> &mut Job {
        &mut self.steps[r.step.0].jobs[r.index]
    }

    /// Steps reachable from the entry, each once, in discovery order.
    ///
    /// Uses an explicit worklist so deep graphs do not grow the call stack.
    pub fn reachable(&self) -> Vec<StepId> {
        let Some(entry) = self.entry else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut worklist = vec![entry];
        while let Some(id) = worklist.pop() {
            if id.0 >= self.steps.len() || !seen.insert(id) {
                continue;
            }
            order.push(id);
            worklist.extend(self.steps[id.0].deps.iter().rev().copied());
        }
        order
    }

    /// Every job of every reachable step.
    pub fn jobs(&self) -> impl Iterator<Item = &Job> + '_ {
        self.reachable()
            .into_iter()
            .flat_map(move |id| self.steps[id.0].jobs.iter())
    }

    /// Locations of every job of every reachable step.
    pub fn job_refs(&self) -> Vec<JobRef> {
        self.reachable()
            .into_iter()
            .flat_map(|id| {
                (0..self.steps[id.0].jobs.len()).map(move |index| JobRef { step: id, index })
            })
            .collect()
    }

    /// Reachable steps that list `id` among their dependencies.
    pub fn dependents(&self, id: StepId) -> Vec<StepId> {
        self.reachable()
            .into_iter()
            .filter(|s| self.steps[s.0].deps.contains(&id))
            .collect()
    }

    /// Check the structural invariants the scheduler relies on.
    pub fn validate(&self) -> Result<(), GraphError> {
        let entry = self.entry.ok_or(GraphError::MissingEntry)?;
        if entry.0 >= self.steps.len() {
            return Err(GraphError::MissingEntry);
        }

        let mut names = HashSet::new();
        for step in &self.steps {
            if !names.insert(step.name.as_str()) {
                return Err(GraphError::DuplicateStep(step.name.clone()));
            }
        }

        for (idx, step) in self.steps.iter().enumerate() {
            for dep in &step.deps {
                if dep.0 >= self.steps.len() {
                    return Err(GraphError::UnknownDependency {
                        step: step.name.clone(),
                        dependency: format!("#{}", dep.0),
                    });
                }
                if dep.0 == idx {
                    return Err(GraphError::SelfDependency {
                        step: step.name.clone(),
                    });
                }
            }
        }

        if let Some(cycle) = self.find_cycle() {
            return Err(GraphError::CycleDetected {
                steps: cycle
                    .into_iter()
                    .map(|id| self.steps[id.0].name.clone())
                    .collect(),
            });
        }

        let mut ids = HashSet::new();
        for id in self.reachable() {
            let step = &self.steps[id.0];
            for job in &step.jobs {
                if job.instance_id.is_empty() {
                    return Err(GraphError::EmptyInstanceId {
                        step: step.name.clone(),
                        job: job.name.clone(),
                    });
                }
                if !ids.insert(job.instance_id.as_str()) {
                    return Err(GraphError::DuplicateInstanceId(job.instance_id.clone()));
                }
            }
        }

        Ok(())
    }

    /// Iterative three-colour DFS. Returns the steps on the first cycle found.
    fn find_cycle(&self) -> Option<Vec<StepId>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Grey,
            Black,
        }

        let mut marks = vec![Mark::White; self.steps.len()];
        for root in 0..self.steps.len() {
            if marks[root] != Mark::White {
                continue;
            }
            // (step, index of the next dependency to visit)
            let mut path: Vec<(usize, usize)> = vec![(root, 0)];
            marks[root] = Mark::Grey;

            while let Some(top) = path.last_mut() {
                let (node, next) = *top;
                match self.steps[node].deps.get(next) {
                    Some(dep) => {
                        top.1 += 1;
                        match marks[dep.0] {
                            Mark::White => {
                                marks[dep.0] = Mark::Grey;
                                path.push((dep.0, 0));
                            }
                            Mark::Grey => {
                                let start = path.iter().position(|(n, _)| *n == dep.0)?;
                                return Some(
                                    path[start..].iter().map(|(n, _)| StepId(*n)).collect(),
                                );
                            }
                            Mark::Black => {}
                        }
                    }
                    None => {
                        marks[node] = Mark::Black;
                        path.pop();
                    }
                }
            }
        }
        None
    }

    /// Nested, deterministic dump of the graph rooted at the entry step.
    pub fn debug_string(&self) -> String {
        match self.entry {
            Some(entry) if entry.0 < self.steps.len() => {
                let mut out = String::new();
                self.write_step(&mut out, entry, 0);
                out
            }
            _ => format!("{}:{{}}", self.name),
        }
    }

    fn write_step(&self, out: &mut String, id: StepId, depth: usize) {
        let step = &self.steps[id.0];
        let indent = "\t".repeat(depth);
        out.push_str(&format!("{indent}{}:{{\n", step.name));
        out.push_str(&format!("{indent}\tstatus:{}\n", step.status));
        if let Some(resource) = &step.resource {
            out.push_str(&format!("{indent}\tresource:{}\n", resource));
        }
        write_map(out, &indent, "var", &step.vars);

        out.push_str(&format!("{indent}\tdep:{{"));
        if step.deps.is_empty() {
            out.push_str("}\n");
        } else {
            out.push('\n');
            for dep in &step.deps {
                self.write_step(out, *dep, depth + 2);
                out.push('\n');
            }
            out.push_str(&format!("{indent}\t}}\n"));
        }

        out.push_str(&format!("{indent}\tdo:{{"));
        if step.jobs.is_empty() {
            out.push_str("}\n");
        } else {
            out.push('\n');
            for job in &step.jobs {
                job.write_debug(out, depth + 2);
                out.push('\n');
            }
            out.push_str(&format!("{indent}\t}}\n"));
        }

        out.push_str(&format!("{indent}}}"));
    }
}

fn write_map<V: fmt::Display>(
    out: &mut String,
    indent: &str,
    label: &str,
    map: &BTreeMap<String, V>,
) {
    out.push_str(&format!("{indent}\t{label}:{{"));
    if map.is_empty() {
        out.push_str("}\n");
        return;
    }
    out.push('\n');
    for (k, v) in map {
        out.push_str(&format!("{indent}\t\t{k}={v}\n"));
    }
    out.push_str(&format!("{indent}\t}}\n"));
}

fn inline_map<V: fmt::Display>(map: &BTreeMap<String, V>) -> String {
    let body = map
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",");
    format!("{{{}}}", body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> Flow {
        let mut flow = Flow::new("diamond");
        let base = flow.add_step(Step::new("base").with_job(Job::new("j0", "d.base.j0", "shell")));
        let left = flow.add_step(
            Step::new("left")
                .with_dep(base)
                .with_job(Job::new("j1", "d.left.j1", "shell")),
        );
        let right = flow.add_step(
            Step::new("right")
                .with_dep(base)
                .with_job(Job::new("j2", "d.right.j2", "shell")),
        );
        let top = flow.add_step(Step::new("top").with_dep(left).with_dep(right));
        flow.set_entry(top);
        flow
    }

    #[test]
    fn test_constructors_start_empty() {
        let job = Job::new("j", "id", "odps");
        assert_eq!(job.status, Status::Todo);
        assert!(job.vars.is_empty());
        assert!(job.props.is_empty());
        assert!(job.exit_code.is_none());

        let step = Step::new("s");
        assert_eq!(step.status, Status::Todo);
        assert!(step.deps.is_empty());
        assert!(step.vars.is_empty());
        assert!(step.resource.is_none());
    }

    #[test]
    fn test_reachable_visits_shared_step_once() {
        let flow = diamond();
        let names: Vec<&str> = flow
            .reachable()
            .into_iter()
            .map(|id| flow.step(id).name.as_str())
            .collect();
        assert_eq!(names, vec!["top", "left", "base", "right"]);
        assert_eq!(flow.jobs().count(), 3);
        assert_eq!(flow.job_refs().len(), 3);
    }

    #[test]
    fn test_unreachable_steps_are_ignored() {
        let mut flow = diamond();
        flow.add_step(Step::new("orphan").with_job(Job::new("j9", "d.base.j0", "shell")));
        // duplicate id lives only in the unreachable step
        assert!(flow.validate().is_ok());
        assert!(flow.jobs().all(|j| j.name != "j9"));
    }

    #[test]
    fn test_dependents() {
        let flow = diamond();
        let base = flow.step_by_name("base").unwrap();
        let mut names: Vec<String> = flow
            .dependents(base)
            .into_iter()
            .map(|id| flow.step(id).name.clone())
            .collect();
        names.sort();
        assert_eq!(names, vec!["left", "right"]);
    }

    #[test]
    fn test_validate_missing_entry() {
        let mut flow = Flow::new("empty");
        flow.add_step(Step::new("a"));
        assert_eq!(flow.validate(), Err(GraphError::MissingEntry));
    }

    #[test]
    fn test_validate_detects_cycle() {
        let mut flow = Flow::new("cyclic");
        let a = flow.add_step(Step::new("a"));
        let b = flow.add_step(Step::new("b").with_dep(a));
        let c = flow.add_step(Step::new("c").with_dep(b));
        flow.step_mut(a).deps.push(c);
        flow.set_entry(c);

        match flow.validate() {
            Err(GraphError::CycleDetected { steps }) => {
                assert_eq!(steps.len(), 3);
                for name in ["a", "b", "c"] {
                    assert!(steps.contains(&name.to_string()));
                }
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_self_dependency() {
        let mut flow = Flow::new("self");
        let a = flow.add_step(Step::new("a"));
        flow.step_mut(a).deps.push(a);
        flow.set_entry(a);
        assert_eq!(
            flow.validate(),
            Err(GraphError::SelfDependency { step: "a".into() })
        );
    }

    #[test]
    fn test_validate_unknown_dependency() {
        let mut flow = Flow::new("dangling");
        let a = flow.add_step(Step::new("a").with_dep(StepId(7)));
        flow.set_entry(a);
        assert!(matches!(
            flow.validate(),
            Err(GraphError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn test_validate_duplicate_instance_id() {
        let mut flow = Flow::new("dup");
        let a = flow.add_step(
            Step::new("a")
                .with_job(Job::new("x", "same", "shell"))
                .with_job(Job::new("y", "same", "shell")),
        );
        flow.set_entry(a);
        assert_eq!(
            flow.validate(),
            Err(GraphError::DuplicateInstanceId("same".into()))
        );
    }

    #[test]
    fn test_jobs_status() {
        let mut step = Step::new("s")
            .with_job(Job::new("a", "a", "shell"))
            .with_job(Job::new("b", "b", "shell"));
        assert_eq!(step.jobs_status(), Status::Todo);
        step.jobs[0].status = Status::Done;
        step.jobs[1].status = Status::Doing;
        assert_eq!(step.jobs_status(), Status::Doing);
        step.jobs[1].status = Status::Done;
        assert_eq!(step.jobs_status(), Status::Done);
        step.jobs[0].status = Status::Fail;
        assert_eq!(step.jobs_status(), Status::Fail);
        assert_eq!(Step::new("empty").jobs_status(), Status::Done);
    }

    #[test]
    fn test_debug_string_is_sorted_and_nested() {
        let mut flow = Flow::new("f");
        let dep = flow.add_step(
            Step::new("extract").with_job(
                Job::new("dump", "f.extract.dump", "odps")
                    .with_prop("project", "p1")
                    .with_prop("cmd", "select 1")
                    .with_prop("access_id", "ak"),
            ),
        );
        let root = flow.add_step(
            Step::new("publish")
                .with_dep(dep)
                .with_var("zeta", Stmt::new("1"))
                .with_var("alpha", Stmt::new("2")),
        );
        flow.set_entry(root);

        let expected = "publish:{\n\
\tstatus:TODO\n\
\tvar:{\n\
\t\talpha=2\n\
\t\tzeta=1\n\
\t}\n\
\tdep:{\n\
\t\textract:{\n\
\t\t\tstatus:TODO\n\
\t\t\tvar:{}\n\
\t\t\tdep:{}\n\
\t\t\tdo:{\n\
\t\t\t\tdump:{\n\
\t\t\t\t\tid:f.extract.dump\n\
\t\t\t\t\ttype:odps\n\
\t\t\t\t\tstatus:TODO\n\
\t\t\t\t\tvar:{}\n\
\t\t\t\t\tprop:{\n\
\t\t\t\t\t\taccess_id=ak\n\
\t\t\t\t\t\tcmd=select 1\n\
\t\t\t\t\t\tproject=p1\n\
\t\t\t\t\t}\n\
\t\t\t\t}\n\
\t\t\t}\n\
\t\t}\n\
\t}\n\
\tdo:{}\n\
}";
        assert_eq!(flow.debug_string(), expected);
        // rendering twice gives the same bytes
        assert_eq!(flow.debug_string(), flow.debug_string());
    }

    #[test]
    fn test_job_one_line_form() {
        let job = Job::new("dump", "id-1", "shell")
            .with_prop("cmd", "echo hi")
            .with_prop("a", "b")
            .with_file("run.sh");
        assert_eq!(
            job.to_string(),
            "job:{name:dump,type:shell,id:id-1,status:TODO,file:run.sh,var:{},prop:{a=b,cmd=echo hi}}"
        );
    }
}
