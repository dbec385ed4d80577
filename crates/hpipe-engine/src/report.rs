use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use hpipe_core::flow::Job;
use hpipe_core::status::Status;

/// What happened to one job during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub instance_id: String,
    /// Name of the owning step.
    pub step: String,
    pub status: Status,
    /// Attempts dispatched in this run. Zero when skipped or never reached.
    pub attempts: u32,
    /// Persisted `DONE` from an earlier run, nothing was launched.
    pub skipped: bool,
    /// Exit code of the last attempt.
    pub exit_code: Option<i32>,
    /// Error of the last attempt, rendered.
    pub error: Option<String>,
}

impl JobReport {
    pub fn new(job: &Job, step: &str) -> Self {
        Self {
            instance_id: job.instance_id.clone(),
            step: step.to_string(),
            status: job.status,
            attempts: 0,
            skipped: false,
            exit_code: job.exit_code,
            error: None,
        }
    }
}

/// Outcome of `Scheduler::run`.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub flow: String,
    /// Status of the entry step, which decides the outcome of the run.
    pub status: Status,
    /// Final status of every reachable step, by name.
    pub steps: BTreeMap<String, Status>,
    /// Every reachable job in discovery order.
    pub jobs: Vec<JobReport>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.status == Status::Done
    }

    pub fn job(&self, instance_id: &str) -> Option<&JobReport> {
        self.jobs.iter().find(|j| j.instance_id == instance_id)
    }

    pub fn step_status(&self, name: &str) -> Option<Status> {
        self.steps.get(name).copied()
    }

    pub fn skipped(&self) -> impl Iterator<Item = &JobReport> {
        self.jobs.iter().filter(|j| j.skipped)
    }

    pub fn failed(&self) -> impl Iterator<Item = &JobReport> {
        self.jobs.iter().filter(|j| j.status == Status::Fail)
    }

    pub fn total_attempts(&self) -> u32 {
        self.jobs.iter().map(|j| j.attempts).sum()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "flow {}: {} ({} jobs, {} failed, {} skipped, {} attempts) in {:.1}s",
            self.flow,
            self.status,
            self.jobs.len(),
            self.failed().count(),
            self.skipped().count(),
            self.total_attempts(),
            self.elapsed.as_secs_f64()
        )
    }
}
