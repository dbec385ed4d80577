use std::path::PathBuf;

use futures::future::BoxFuture;
use tracing::info;

use hpipe_core::error::{HpipeError, Result};
use hpipe_core::flow::Job;
use hpipe_core::status::Status;

use crate::args::{missing_props, prepare_arg_list, render_command, ArgSpec};
use crate::process::run_command;

/// Everything an attempt needs besides the job itself.
#[derive(Debug, Clone)]
pub struct ExecContext {
    /// Current directory for launched commands.
    pub work_dir: PathBuf,
    /// Where per-job output logs go, if anywhere.
    pub log_dir: Option<PathBuf>,
    /// 1-based attempt number.
    pub attempt: u32,
}

/// Turns a job description into one external command invocation.
///
/// Executors carry configuration only; the job is passed to every call, so
/// one instance never holds state from a particular job.
pub trait Executor: Send + Sync + 'static {
    /// Job type this executor serves.
    fn job_type(&self) -> &str;

    /// Properties a job must carry before anything is launched.
    fn required_props(&self) -> &[&'static str];

    /// Run one attempt. `Ok` means the command exited 0 and carries that code.
    fn run<'a>(&'a self, job: &'a Job, ctx: &'a ExecContext) -> BoxFuture<'a, Result<i32>>;

    /// Fail fast on a malformed job description.
    fn validate(&self, job: &Job) -> Result<()> {
        let missing = missing_props(&job.props, self.required_props());
        if missing.is_empty() {
            Ok(())
        } else {
            Err(HpipeError::JobValidation {
                job: job.instance_id.clone(),
                missing,
            })
        }
    }
}

/// Outcome of a single attempt.
#[derive(Debug)]
pub struct Attempt {
    pub status: Status,
    pub exit_code: Option<i32>,
    pub error: Option<HpipeError>,
}

impl Attempt {
    pub fn from_result(result: Result<i32>) -> Self {
        match result {
            Ok(code) => Self {
                status: Status::Done,
                exit_code: Some(code),
                error: None,
            },
            Err(e) => Self {
                status: Status::Fail,
                exit_code: e.exit_code(),
                error: Some(e),
            },
        }
    }

    /// Whether another attempt could change the outcome.
    pub fn is_retryable(&self) -> bool {
        self.error.as_ref().is_some_and(HpipeError::is_retryable)
    }
}

/// Executor driven by a declarative flag table: validate, build the
/// argument list, log it, launch `program`.
pub struct CommandExecutor {
    job_type: String,
    program: String,
    required: &'static [&'static str],
    table: &'static [ArgSpec],
}

impl CommandExecutor {
    pub fn new(
        job_type: impl Into<String>,
        program: impl Into<String>,
        required: &'static [&'static str],
        table: &'static [ArgSpec],
    ) -> Self {
        Self {
            job_type: job_type.into(),
            program: program.into(),
            required,
            table,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Argument vector for `job`, without validation.
    pub fn build_args(&self, job: &Job) -> Vec<String> {
        prepare_arg_list(&job.props, self.table)
    }
}

impl Executor for CommandExecutor {
    fn job_type(&self) -> &str {
        &self.job_type
    }

    fn required_props(&self) -> &[&'static str] {
        self.required
    }

    fn run<'a>(&'a self, job: &'a Job, ctx: &'a ExecContext) -> BoxFuture<'a, Result<i32>> {
        Box::pin(async move {
            self.validate(job)?;

            let args = self.build_args(job);
            info!(
                instance_id = %job.instance_id,
                attempt = ctx.attempt,
                command = %render_command(&self.program, &args),
                "Launching job"
            );

            let code = run_command(&job.instance_id, &self.program, &args, ctx).await?;
            if code == 0 {
                Ok(code)
            } else {
                Err(HpipeError::CommandFailed {
                    program: self.program.clone(),
                    exit_code: code,
                })
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &[ArgSpec] = &[ArgSpec::separate("cmd", "-c")];

    fn ctx() -> ExecContext {
        ExecContext {
            work_dir: std::env::temp_dir(),
            log_dir: None,
            attempt: 1,
        }
    }

    #[tokio::test]
    async fn test_missing_property_is_not_retryable() {
        let exec = CommandExecutor::new("shell", "bash", &["cmd"], TABLE);
        let job = Job::new("j", "id-1", "shell");
        let attempt = Attempt::from_result(exec.run(&job, &ctx()).await);
        assert_eq!(attempt.status, Status::Fail);
        assert!(!attempt.is_retryable());
        assert!(matches!(
            attempt.error,
            Some(HpipeError::JobValidation { ref missing, .. }) if missing == &vec!["cmd".to_string()]
        ));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_retryable() {
        let exec = CommandExecutor::new("shell", "bash", &["cmd"], TABLE);
        let job = Job::new("j", "id-2", "shell").with_prop("cmd", "exit 3");
        let attempt = Attempt::from_result(exec.run(&job, &ctx()).await);
        assert_eq!(attempt.status, Status::Fail);
        assert_eq!(attempt.exit_code, Some(3));
        assert!(attempt.is_retryable());
    }

    #[tokio::test]
    async fn test_zero_exit_is_done() {
        let exec = CommandExecutor::new("shell", "bash", &["cmd"], TABLE);
        let job = Job::new("j", "id-3", "shell").with_prop("cmd", "true");
        let attempt = Attempt::from_result(exec.run(&job, &ctx()).await);
        assert_eq!(attempt.status, Status::Done);
        assert_eq!(attempt.exit_code, Some(0));
        assert!(attempt.error.is_none());
    }
}
