use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use hpipe_core::error::Result;
use hpipe_core::flow::JobRef;
use hpipe_core::status::Status;
use hpipe_exec::ExecContext;

use crate::report::JobReport;
use crate::state::RunState;

const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Run one job to a terminal status: skip it when the ledger already had it
/// `DONE`, otherwise up to `max_retry` attempts, each on a fresh executor.
/// Only a persistence failure is an `Err`.
pub(crate) async fn run_job(state: Arc<RunState>, r: JobRef) -> Result<JobReport> {
    let (job, step, resource) = state.read(|flow| {
        let step = flow.step(r.step);
        (
            step.jobs[r.index].clone(),
            step.name.clone(),
            step.resource.clone(),
        )
    })?;
    let config = state.config();
    let mut report = JobReport::new(&job, &step);

    // Set before the run started, from the ledger.
    if !config.rerun && job.status == Status::Done {
        info!(instance_id = %job.instance_id, step = %step, "Job already done, skipping");
        report.status = Status::Done;
        report.skipped = true;
        return Ok(report);
    }

    let _permits = state.limits().acquire(resource.as_deref()).await?;

    let max_retry = config.max_retry.max(1);
    for attempt in 1..=max_retry {
        state.transition(|flow| flow.job_mut(r).status = Status::Doing)?;

        let ctx = ExecContext {
            work_dir: config.work_dir.clone(),
            log_dir: config.log_dir.clone(),
            attempt,
        };
        let outcome = state.registry().dispatch(&job, &ctx).await;

        state.transition(|flow| {
            let job = flow.job_mut(r);
            job.status = outcome.status;
            job.exit_code = outcome.exit_code;
        })?;
        report.attempts = attempt;
        report.status = outcome.status;
        report.exit_code = outcome.exit_code;
        report.error = outcome.error.as_ref().map(|e| e.to_string());

        match &outcome.error {
            None => {
                info!(instance_id = %job.instance_id, attempt, "Job done");
                return Ok(report);
            }
            Some(e) if outcome.is_retryable() && attempt < max_retry => {
                let backoff = retry_backoff(attempt, config.retry_backoff);
                warn!(
                    instance_id = %job.instance_id,
                    attempt,
                    max_retry,
                    exit_code = ?outcome.exit_code,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Job attempt failed, retrying"
                );
                if !backoff.is_zero() {
                    tokio::time::sleep(backoff).await;
                }
            }
            Some(e) => {
                error!(
                    instance_id = %job.instance_id,
                    attempt,
                    exit_code = ?outcome.exit_code,
                    error = %e,
                    "Job failed"
                );
                return Ok(report);
            }
        }
    }
    Ok(report)
}

/// Delay after failed attempt `attempt` (1-based): `base`, then doubling.
fn retry_backoff(attempt: u32, base: Duration) -> Duration {
    let factor = 1u32 << attempt.saturating_sub(1).min(16);
    base.saturating_mul(factor).min(MAX_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_backoff() {
        let base = Duration::from_millis(100);
        assert_eq!(retry_backoff(1, base), Duration::from_millis(100));
        assert_eq!(retry_backoff(2, base), Duration::from_millis(200));
        assert_eq!(retry_backoff(4, base), Duration::from_millis(800));
        assert_eq!(retry_backoff(40, base), MAX_BACKOFF);
        assert!(retry_backoff(3, Duration::ZERO).is_zero());
    }
}
