mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use hpipe_core::config::{AppConfig, LogConfig};

#[derive(Parser)]
#[command(name = "hpipe", version, about = "Run DAG workflows of external jobs with retry and resume")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "hpipe.toml", global = true)]
    config: PathBuf,

    /// Work path: commands run here and the flow file resolves against it
    #[arg(short, long, env = "HPIPE_WORK", global = true)]
    work: Option<String>,

    /// Meta path holding the status ledger and job logs
    #[arg(short, long, env = "HPIPE_META", global = true)]
    meta: Option<String>,

    /// Entry flow definition (TOML)
    #[arg(short, long, global = true)]
    flow: Option<String>,

    /// Run every job, ignoring persisted DONE records
    #[arg(long, global = true)]
    rerun: bool,

    /// Attempts per job before it is marked FAIL
    #[arg(long, global = true)]
    max_retry: Option<u32>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the flow (default)
    Run,
    /// Show the status ledger, annotated onto the flow when one is given
    Status {
        /// Print the ledger as JSON
        #[arg(long)]
        json: bool,
    },
    /// Load and validate the flow without running anything
    Check,
    /// Forget ledger records so those jobs run again
    Reset {
        /// Job instance ids
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

impl Cli {
    /// Command-line values win over the config file.
    fn apply(&self, config: &mut AppConfig) {
        if let Some(work) = &self.work {
            config.run.work_path = work.clone();
        }
        if let Some(meta) = &self.meta {
            config.run.meta_path = meta.clone();
        }
        if let Some(flow) = &self.flow {
            config.run.flow = Some(flow.clone());
        }
        if self.rerun {
            config.run.rerun = true;
        }
        if let Some(max_retry) = self.max_retry {
            config.run.max_retry = max_retry;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Fatal error");
            eprintln!("hpipe: {:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config = AppConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading config {}", cli.config.display()))?;
    cli.apply(&mut config);
    config.check()?;

    init_logging(&config.log, cli.verbose);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => commands::run_flow(&config).await,
        Commands::Status { json } => commands::show_status(&config, json),
        Commands::Check => commands::check_flow(&config),
        Commands::Reset { ids } => commands::reset(&config, &ids),
    }
}

/// Install the process logger: `RUST_LOG` wins, then `log.filter`; `-v`
/// forces debug for hpipe crates.
fn init_logging(log: &LogConfig, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("hpipe=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.filter))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::parse_from([
            "hpipe", "-w", "/srv/flows", "-m", "/var/lib/hpipe", "-f", "daily.toml", "--rerun",
            "--max-retry", "5", "run",
        ]);
        let mut config = AppConfig::default();
        cli.apply(&mut config);

        assert_eq!(config.run.work_path, "/srv/flows");
        assert_eq!(config.run.meta_path, "/var/lib/hpipe");
        assert_eq!(config.run.flow.as_deref(), Some("daily.toml"));
        assert!(config.run.rerun);
        assert_eq!(config.run.max_retry, 5);
        assert!(matches!(cli.command, Some(Commands::Run)));
    }

    #[test]
    fn test_defaults_keep_config() {
        let cli = Cli::parse_from(["hpipe"]);
        let mut config = AppConfig::default();
        config.run.max_retry = 7;
        cli.apply(&mut config);

        assert_eq!(config.run.max_retry, 7);
        assert!(!config.run.rerun);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_reset_requires_ids() {
        assert!(Cli::try_parse_from(["hpipe", "reset"]).is_err());
        let cli = Cli::parse_from(["hpipe", "reset", "a.b.c", "a.b.d"]);
        assert!(matches!(cli.command, Some(Commands::Reset { ref ids }) if ids.len() == 2));
    }
}
