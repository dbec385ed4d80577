use thiserror::Error;

/// Structural problems in a flow graph. Always fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("flow has no entry step")]
    MissingEntry,

    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("step '{step}' cannot depend on itself")]
    SelfDependency { step: String },

    #[error("cycle detected involving steps: {steps:?}")]
    CycleDetected { steps: Vec<String> },

    #[error("duplicate step name: {0}")]
    DuplicateStep(String),

    #[error("job '{job}' in step '{step}' has an empty instance id")]
    EmptyInstanceId { step: String, job: String },

    #[error("duplicate job instance id: {0}")]
    DuplicateInstanceId(String),
}

#[derive(Debug, Error)]
pub enum HpipeError {
    // Graph errors
    #[error("Malformed flow: {0}")]
    Graph(#[from] GraphError),

    #[error("Flow definition error: {0}")]
    Definition(String),

    // Job errors
    #[error("Job validation failed: {job}: missing properties {missing:?}")]
    JobValidation { job: String, missing: Vec<String> },

    #[error("Unknown executor type '{job_type}' for job {job}")]
    UnknownExecutor { job: String, job_type: String },

    #[error("Command launch failed: {program}: {message}")]
    CommandLaunch { program: String, message: String },

    #[error("Command exited with code {exit_code}: {program}")]
    CommandFailed { program: String, exit_code: i32 },

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Status store error: {0}")]
    Database(String),

    // Engine errors
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HpipeError {
    /// Execution errors are worth another attempt; a malformed job
    /// description or a broken ledger is not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HpipeError::CommandLaunch { .. } | HpipeError::CommandFailed { .. }
        )
    }

    /// Exit code reported by the failed attempt, if the command ran at all.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            HpipeError::CommandFailed { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, HpipeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let failed = HpipeError::CommandFailed {
            program: "odpscmd".into(),
            exit_code: 1,
        };
        assert!(failed.is_retryable());
        assert_eq!(failed.exit_code(), Some(1));

        let launch = HpipeError::CommandLaunch {
            program: "odpscmd".into(),
            message: "No such file or directory".into(),
        };
        assert!(launch.is_retryable());
        assert_eq!(launch.exit_code(), None);

        let invalid = HpipeError::JobValidation {
            job: "j1".into(),
            missing: vec!["cmd".into()],
        };
        assert!(!invalid.is_retryable());
        assert!(!HpipeError::Database("locked".into()).is_retryable());
    }

    #[test]
    fn test_graph_error_display() {
        let err = HpipeError::from(GraphError::CycleDetected {
            steps: vec!["a".into(), "b".into()],
        });
        assert_eq!(
            err.to_string(),
            "Malformed flow: cycle detected involving steps: [\"a\", \"b\"]"
        );
    }
}
