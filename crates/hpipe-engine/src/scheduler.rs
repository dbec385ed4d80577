use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use hpipe_core::config::AppConfig;
use hpipe_core::error::{GraphError, HpipeError, Result};
use hpipe_core::flow::{Flow, JobRef, StepId};
use hpipe_core::status::Status;
use hpipe_core::traits::StatusStore;
use hpipe_exec::ExecutorRegistry;

use crate::job::run_job;
use crate::report::{JobReport, RunReport};
use crate::state::RunState;

/// Knobs for one run. Immutable once the run starts.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Attempts per job, counting the first one.
    pub max_retry: u32,
    /// Ignore persisted `DONE` records.
    pub rerun: bool,
    /// Jobs running at once across the flow.
    pub pool_size: usize,
    /// Resource label -> jobs running at once for steps with that label.
    pub resources: BTreeMap<String, usize>,
    /// Delay before the second attempt, doubled for each further one.
    pub retry_backoff: Duration,
    pub work_dir: PathBuf,
    pub log_dir: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_retry: 3,
            rerun: false,
            pool_size: 8,
            resources: BTreeMap::new(),
            retry_backoff: Duration::ZERO,
            work_dir: PathBuf::from("."),
            log_dir: None,
        }
    }
}

impl SchedulerConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            max_retry: config.run.max_retry,
            rerun: config.run.rerun,
            pool_size: config.run.pool_size,
            resources: config.resources.clone(),
            retry_backoff: Duration::from_millis(config.run.retry_backoff_ms),
            work_dir: config.work_dir(),
            log_dir: config.job_log_dir(),
        }
    }
}

/// Drives a flow to completion.
///
/// Steps run as soon as every dependency is `DONE`; independent steps and
/// the jobs inside a step run concurrently under the configured quotas.
/// A failed step fails every dependent that has not started while
/// unrelated branches carry on. Each status change is persisted before the
/// scheduler moves on.
pub struct Scheduler {
    registry: Arc<ExecutorRegistry>,
    store: Arc<dyn StatusStore>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        registry: ExecutorRegistry,
        store: Arc<dyn StatusStore>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            store,
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run every step reachable from the entry.
    ///
    /// Returns `Err` for a malformed flow (before anything runs) or when
    /// the status store fails, which abandons the run. A flow that finished
    /// with failed jobs is still `Ok`; see `RunReport::status`.
    pub async fn run(&self, mut flow: Flow) -> Result<RunReport> {
        let start = Instant::now();
        flow.validate()?;
        let entry = flow.entry().ok_or(GraphError::MissingEntry)?;
        let reachable = flow.reachable();

        // Must happen before the first save rewrites the flow's records.
        let restored = if self.config.rerun {
            0
        } else {
            restore_done(&mut flow, self.store.as_ref())?
        };

        info!(
            flow = %flow.name,
            steps = reachable.len(),
            jobs = flow.jobs().count(),
            restored,
            rerun = self.config.rerun,
            max_retry = self.config.max_retry,
            "Starting flow"
        );

        let flow_name = flow.name.clone();
        let state = Arc::new(RunState::new(
            flow,
            self.store.clone(),
            self.registry.clone(),
            self.config.clone(),
        ));

        let mut pending: BTreeSet<StepId> = reachable.into_iter().collect();
        let mut running: JoinSet<(StepId, Result<Vec<JobReport>>)> = JoinSet::new();
        let mut reports: BTreeMap<String, JobReport> = BTreeMap::new();

        loop {
            let ready: Vec<StepId> = state.read(|flow| {
                pending
                    .iter()
                    .copied()
                    .filter(|id| {
                        flow.step(*id)
                            .deps
                            .iter()
                            .all(|d| flow.step(*d).status == Status::Done)
                    })
                    .collect()
            })?;

            for id in ready {
                pending.remove(&id);
                let name = state.transition(|flow| {
                    let step = flow.step_mut(id);
                    step.status = Status::Doing;
                    step.name.clone()
                })?;
                debug!(step = %name, "Step started");

                let state = state.clone();
                running.spawn(async move { (id, run_step(state, id).await) });
            }

            // Dropping `running` on an early return aborts in-flight steps.
            let Some(joined) = running.join_next().await else {
                break;
            };
            let (id, result) =
                joined.map_err(|e| HpipeError::Scheduler(format!("step task failed: {}", e)))?;
            for report in result? {
                reports.insert(report.instance_id.clone(), report);
            }

            let (name, status) = state.transition(|flow| {
                let step = flow.step_mut(id);
                step.status = step.jobs_status();
                (step.name.clone(), step.status)
            })?;

            if status == Status::Done {
                info!(step = %name, "Step done");
            } else {
                warn!(step = %name, status = %status, "Step failed");
                let blocked = state.transition(|flow| fail_dependents(flow, id, &mut pending))?;
                for step in blocked {
                    warn!(step = %step, failed_dependency = %name, "Step not started");
                }
            }
        }

        if !pending.is_empty() {
            // Only reachable with a graph `validate` should have rejected.
            let stuck = state.transition(|flow| {
                pending
                    .iter()
                    .map(|id| {
                        let step = flow.step_mut(*id);
                        step.status = Status::Fail;
                        step.name.clone()
                    })
                    .collect::<Vec<_>>()
            })?;
            warn!(steps = ?stuck, "Steps never became ready");
        }

        let flow = state.read(|flow| flow.clone())?;
        let report = build_report(&flow, flow_name, entry, reports, start.elapsed());
        if report.succeeded() {
            info!(summary = %report, "Flow finished");
        } else {
            warn!(summary = %report, "Flow finished with failures");
        }
        Ok(report)
    }
}

/// Mark every reachable job whose ledger record is `DONE` as `Done`.
fn restore_done(flow: &mut Flow, store: &dyn StatusStore) -> Result<usize> {
    let mut restored = 0;
    for r in flow.job_refs() {
        let job = flow.job_mut(r);
        if store.status_of(&job.instance_id)? == Some(Status::Done) {
            job.status = Status::Done;
            restored += 1;
        }
    }
    Ok(restored)
}

/// Run every job of a step concurrently and collect their reports.
///
/// The step turns `FAIL` with its first failed job, while siblings still
/// run to completion.
async fn run_step(state: Arc<RunState>, id: StepId) -> Result<Vec<JobReport>> {
    let refs: Vec<JobRef> = state.read(|flow| {
        (0..flow.step(id).jobs.len())
            .map(|index| JobRef { step: id, index })
            .collect()
    })?;

    let mut jobs = JoinSet::new();
    for r in refs {
        jobs.spawn(run_job(state.clone(), r));
    }

    let mut reports = Vec::with_capacity(jobs.len());
    while let Some(joined) = jobs.join_next().await {
        let report =
            joined.map_err(|e| HpipeError::Scheduler(format!("job task failed: {}", e)))??;
        if report.status == Status::Fail {
            state.transition(|flow| {
                let step = flow.step_mut(id);
                if step.status == Status::Doing {
                    step.status = Status::Fail;
                }
            })?;
        }
        reports.push(report);
    }
    Ok(reports)
}

/// Mark every pending step that transitively depends on `failed` as `FAIL`
/// and drop it from `pending`. Returns their names.
fn fail_dependents(flow: &mut Flow, failed: StepId, pending: &mut BTreeSet<StepId>) -> Vec<String> {
    let mut blocked = Vec::new();
    let mut worklist = vec![failed];
    while let Some(id) = worklist.pop() {
        for dependent in flow.dependents(id) {
            if pending.remove(&dependent) {
                let step = flow.step_mut(dependent);
                step.status = Status::Fail;
                blocked.push(step.name.clone());
                worklist.push(dependent);
            }
        }
    }
    blocked
}

fn build_report(
    flow: &Flow,
    name: String,
    entry: StepId,
    mut reports: BTreeMap<String, JobReport>,
    elapsed: Duration,
) -> RunReport {
    let reachable = flow.reachable();
    let steps = reachable
        .iter()
        .map(|id| {
            let step = flow.step(*id);
            (step.name.clone(), step.status)
        })
        .collect();
    let jobs = reachable
        .iter()
        .flat_map(|id| {
            let step = flow.step(*id);
            step.jobs.iter().map(move |job| (step, job))
        })
        .map(|(step, job)| {
            reports
                .remove(&job.instance_id)
                .unwrap_or_else(|| JobReport::new(job, &step.name))
        })
        .collect();

    RunReport {
        flow: name,
        status: flow.step(entry).status,
        steps,
        jobs,
        elapsed,
    }
}
