use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HpipeError, Result};

/// Top-level hpipe configuration.
///
/// Every section is optional; a missing config file behaves like an empty one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub run: RunConfig,
    /// Resource label -> maximum concurrently running jobs for steps with that label.
    #[serde(default)]
    pub resources: BTreeMap<String, usize>,
    /// Per executor type overrides, keyed by job type.
    #[serde(default)]
    pub executors: BTreeMap<String, ExecutorConfig>,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Root of the flow; commands run here and relative paths resolve against it.
    #[serde(default = "default_work_path")]
    pub work_path: String,
    /// Directory holding the status ledger.
    #[serde(default = "default_meta_path")]
    pub meta_path: String,
    /// Entry flow definition, relative to `work_path`.
    #[serde(default)]
    pub flow: Option<String>,
    /// Ignore persisted `DONE` records and run every job.
    #[serde(default)]
    pub rerun: bool,
    /// Attempts per job before it is marked `FAIL`.
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,
    /// Delay before the second attempt in milliseconds, doubled for each
    /// further attempt. Zero retries immediately.
    #[serde(default)]
    pub retry_backoff_ms: u64,
    /// Jobs allowed to run at once across the whole flow.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            work_path: default_work_path(),
            meta_path: default_meta_path(),
            flow: None,
            rerun: false,
            max_retry: default_max_retry(),
            retry_backoff_ms: 0,
            pool_size: default_pool_size(),
        }
    }
}

fn default_work_path() -> String { "./".to_string() }
fn default_meta_path() -> String { "./".to_string() }
fn default_max_retry() -> u32 { 3 }
fn default_pool_size() -> usize { 8 }

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Program to launch instead of the executor's built-in default.
    #[serde(default)]
    pub program: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// `tracing` filter directives, e.g. `hpipe=debug,warn`.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    /// Append each job's stdout/stderr to `<meta_path>/logs/<instance_id>.log`.
    #[serde(default = "default_job_output")]
    pub job_output: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            job_output: default_job_output(),
        }
    }
}

fn default_log_filter() -> String { "hpipe=info,warn".to_string() }
fn default_job_output() -> bool { true }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| HpipeError::ConfigNotFound(path.display().to_string()))?;

        let expanded = expand_env_vars(&content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| HpipeError::Config(e.to_string()))?;
        config.check()?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Reject values the scheduler cannot work with.
    pub fn check(&self) -> Result<()> {
        if self.run.max_retry == 0 {
            return Err(HpipeError::Config("run.max_retry must be at least 1".into()));
        }
        if self.run.pool_size == 0 {
            return Err(HpipeError::Config("run.pool_size must be at least 1".into()));
        }
        if let Some((label, _)) = self.resources.iter().find(|(_, limit)| **limit == 0) {
            return Err(HpipeError::Config(format!(
                "resources.{} must allow at least one job",
                label
            )));
        }
        Ok(())
    }

    pub fn work_dir(&self) -> PathBuf {
        expand_home(&self.run.work_path)
    }

    pub fn meta_dir(&self) -> PathBuf {
        expand_home(&self.run.meta_path)
    }

    /// Path of the SQLite status ledger.
    pub fn ledger_path(&self) -> PathBuf {
        self.meta_dir().join("hpipe.db")
    }

    /// Directory for per-job output logs, if enabled.
    pub fn job_log_dir(&self) -> Option<PathBuf> {
        self.log.job_output.then(|| self.meta_dir().join("logs"))
    }

    /// Entry flow file resolved against the work path.
    pub fn flow_path(&self) -> Option<PathBuf> {
        self.run.flow.as_ref().map(|f| {
            let p = expand_home(f);
            if p.is_absolute() {
                p
            } else {
                self.work_dir().join(p)
            }
        })
    }

    /// Program override for an executor type.
    pub fn program_for(&self, job_type: &str) -> Option<&str> {
        self.executors
            .get(job_type)
            .and_then(|e| e.program.as_deref())
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

/// Replace each `${NAME}` with the value of environment variable `NAME`.
/// Unset variables and an unclosed `${` are kept as written.
fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(open) = rest.find("${") {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        let Some(close) = tail.find('}') else {
            rest = tail;
            break;
        };
        match std::env::var(&tail[2..close]) {
            Ok(value) => out.push_str(&value),
            Err(_) => out.push_str(&tail[..=close]),
        }
        rest = &tail[close + 1..];
    }
    // `rest` starts at an unclosed `${`, or holds the text after the last one.
    out.push_str(rest);
    out
}
