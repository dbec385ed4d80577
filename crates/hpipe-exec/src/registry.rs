use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use hpipe_core::config::AppConfig;
use hpipe_core::error::HpipeError;
use hpipe_core::flow::Job;

use crate::builtin;
use crate::executor::{Attempt, ExecContext, Executor};

/// Produces a fresh executor for every attempt.
pub type ExecutorFactory = Arc<dyn Fn() -> Box<dyn Executor> + Send + Sync>;

/// Registry of job type -> executor factory.
#[derive(Clone)]
pub struct ExecutorRegistry {
    factories: HashMap<String, ExecutorFactory>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a factory for a job type, replacing any previous one.
    pub fn register<F, E>(&mut self, job_type: impl Into<String>, factory: F)
    where
        F: Fn() -> E + Send + Sync + 'static,
        E: Executor,
    {
        self.factories.insert(
            job_type.into(),
            Arc::new(move || Box::new(factory()) as Box<dyn Executor>),
        );
    }

    /// Unregister a job type.
    pub fn unregister(&mut self, job_type: &str) -> bool {
        self.factories.remove(job_type).is_some()
    }

    /// Build a new executor for `job_type`.
    pub fn create(&self, job_type: &str) -> Option<Box<dyn Executor>> {
        self.factories.get(job_type).map(|f| f())
    }

    /// Registered job types, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(|s| s.as_str()).collect();
        types.sort_unstable();
        types
    }

    /// Run one attempt of `job` on a freshly created executor.
    pub async fn dispatch(&self, job: &Job, ctx: &ExecContext) -> Attempt {
        let Some(executor) = self.create(&job.job_type) else {
            warn!(instance_id = %job.instance_id, job_type = %job.job_type, "No executor for job type");
            return Attempt::from_result(Err(HpipeError::UnknownExecutor {
                job: job.instance_id.clone(),
                job_type: job.job_type.clone(),
            }));
        };
        Attempt::from_result(executor.run(job, ctx).await)
    }

    /// Registry with the built-in executors, honouring program overrides.
    pub fn with_builtins(config: &AppConfig) -> Self {
        let mut registry = Self::new();

        let odps_program = config.program_for(builtin::odps::JOB_TYPE).map(String::from);
        registry.register(builtin::odps::JOB_TYPE, move || {
            builtin::odps::executor(odps_program.as_deref())
        });

        let shell_program = config.program_for(builtin::shell::JOB_TYPE).map(String::from);
        registry.register(builtin::shell::JOB_TYPE, move || {
            builtin::shell::executor(shell_program.as_deref())
        });

        registry
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hpipe_core::status::Status;

    fn ctx() -> ExecContext {
        ExecContext {
            work_dir: std::env::temp_dir(),
            log_dir: None,
            attempt: 1,
        }
    }

    #[test]
    fn test_builtins_registered() {
        let registry = ExecutorRegistry::with_builtins(&AppConfig::default());
        assert_eq!(registry.list(), vec!["odps", "shell"]);
        let exec = registry.create("odps").unwrap();
        assert_eq!(exec.job_type(), "odps");
        assert_eq!(exec.required_props().len(), 5);
        assert!(registry.create("hive").is_none());
    }

    #[test]
    fn test_unregister() {
        let mut registry = ExecutorRegistry::with_builtins(&AppConfig::default());
        assert!(registry.unregister("odps"));
        assert!(!registry.unregister("odps"));
        assert_eq!(registry.list(), vec!["shell"]);
    }

    #[tokio::test]
    async fn test_dispatch_unknown_type_fails_without_retry() {
        let registry = ExecutorRegistry::new();
        let job = Job::new("j", "id", "hive");
        let attempt = registry.dispatch(&job, &ctx()).await;
        assert_eq!(attempt.status, Status::Fail);
        assert!(!attempt.is_retryable());
        assert!(matches!(attempt.error, Some(HpipeError::UnknownExecutor { .. })));
    }

    #[tokio::test]
    async fn test_program_override_is_used() {
        let config: AppConfig = toml::from_str(
            r#"
[executors.shell]
program = "/nonexistent/bash"
"#,
        )
        .unwrap();
        let registry = ExecutorRegistry::with_builtins(&config);
        let job = Job::new("j", "id", "shell").with_prop("cmd", "true");
        let attempt = registry.dispatch(&job, &ctx()).await;
        assert!(matches!(
            attempt.error,
            Some(HpipeError::CommandLaunch { ref program, .. }) if program == "/nonexistent/bash"
        ));
        assert!(attempt.is_retryable());
    }
}
