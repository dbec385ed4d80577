use std::fs::OpenOptions;
use std::process::Stdio;

use tracing::debug;

use hpipe_core::error::{HpipeError, Result};

use crate::executor::ExecContext;

/// Launch `program` and wait for it. Returns the exit code.
///
/// Output goes to `<log_dir>/<instance_id>.log` (appended across attempts)
/// when a log directory is configured, otherwise to the parent's stdio.
pub async fn run_command(
    instance_id: &str,
    program: &str,
    args: &[String],
    ctx: &ExecContext,
) -> Result<i32> {
    let launch_err = |message: String| HpipeError::CommandLaunch {
        program: program.to_string(),
        message,
    };

    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args)
        .current_dir(&ctx.work_dir)
        .stdin(Stdio::null())
        .env("HPIPE_INSTANCE_ID", instance_id)
        .env("HPIPE_ATTEMPT", ctx.attempt.to_string());

    if let Some(dir) = &ctx.log_dir {
        std::fs::create_dir_all(dir)
            .map_err(|e| launch_err(format!("cannot create log dir: {}", e)))?;
        let path = dir.join(format!("{}.log", instance_id));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| launch_err(format!("cannot open {}: {}", path.display(), e)))?;
        let stderr = file
            .try_clone()
            .map_err(|e| launch_err(e.to_string()))?;
        cmd.stdout(Stdio::from(file)).stderr(Stdio::from(stderr));
    }

    let status = cmd.status().await.map_err(|e| launch_err(e.to_string()))?;
    debug!(instance_id, program, status = %status, "Command exited");

    // No exit code means the process was killed by a signal.
    status
        .code()
        .ok_or_else(|| launch_err(format!("terminated without exit code ({})", status)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(log_dir: Option<std::path::PathBuf>) -> ExecContext {
        ExecContext {
            work_dir: std::env::temp_dir(),
            log_dir,
            attempt: 1,
        }
    }

    #[tokio::test]
    async fn test_exit_codes() {
        let ok = run_command("t1", "bash", &["-c".into(), "exit 0".into()], &ctx(None))
            .await
            .unwrap();
        assert_eq!(ok, 0);

        let failed = run_command("t2", "bash", &["-c".into(), "exit 7".into()], &ctx(None))
            .await
            .unwrap();
        assert_eq!(failed, 7);
    }

    #[tokio::test]
    async fn test_launch_error() {
        let err = run_command("t3", "/nonexistent/hpipe-binary", &[], &ctx(None))
            .await
            .unwrap_err();
        assert!(matches!(err, HpipeError::CommandLaunch { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_output_appended_to_job_log() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("logs");
        for _ in 0..2 {
            run_command(
                "job-x",
                "bash",
                &["-c".into(), "echo attempt-$HPIPE_ATTEMPT".into()],
                &ctx(Some(logs.clone())),
            )
            .await
            .unwrap();
        }
        let content = std::fs::read_to_string(logs.join("job-x.log")).unwrap();
        assert_eq!(content, "attempt-1\nattempt-1\n");
    }
}
