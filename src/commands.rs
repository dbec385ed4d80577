use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use hpipe_core::config::AppConfig;
use hpipe_core::definition::FlowDefinition;
use hpipe_core::flow::Flow;
use hpipe_core::traits::StatusStore;
use hpipe_engine::{Scheduler, SchedulerConfig};
use hpipe_exec::{Executor, ExecutorRegistry};
use hpipe_store::SqliteStatusStore;

fn load_flow(config: &AppConfig) -> anyhow::Result<Flow> {
    let path = config
        .flow_path()
        .context("no flow given (use -f/--flow or run.flow in the config)")?;
    let flow = FlowDefinition::load(&path)
        .with_context(|| format!("loading flow {}", path.display()))?;
    Ok(flow)
}

fn open_store(config: &AppConfig) -> anyhow::Result<SqliteStatusStore> {
    let path = config.ledger_path();
    SqliteStatusStore::open(&path).with_context(|| format!("opening ledger {}", path.display()))
}

/// `hpipe run`: exit 0 when the entry step is DONE, 1 otherwise.
pub async fn run_flow(config: &AppConfig) -> anyhow::Result<ExitCode> {
    let flow = load_flow(config)?;
    let store = Arc::new(open_store(config)?);
    let registry = ExecutorRegistry::with_builtins(config);
    info!(
        ledger = %config.ledger_path().display(),
        executors = ?registry.list(),
        "Ready"
    );

    let scheduler = Scheduler::new(registry, store, SchedulerConfig::from_app(config));
    let report = scheduler.run(flow).await?;

    println!("{}", report);
    for job in report.failed() {
        println!(
            "  FAIL {} (step {}, {} attempts): {}",
            job.instance_id,
            job.step,
            job.attempts,
            job.error.as_deref().unwrap_or("not run")
        );
    }

    Ok(if report.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

/// `hpipe status`: the ledger, or the flow dump with persisted statuses.
pub fn show_status(config: &AppConfig, json: bool) -> anyhow::Result<ExitCode> {
    let store = open_store(config)?;
    let ledger = store.snapshot()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ledger)?);
        return Ok(ExitCode::SUCCESS);
    }

    if config.run.flow.is_some() {
        let mut flow = load_flow(config)?;
        let steps = store.step_statuses(&flow.name)?;
        for r in flow.job_refs() {
            let job = flow.job_mut(r);
            if let Some(status) = ledger.get(&job.instance_id) {
                job.status = *status;
            }
        }
        for id in flow.reachable() {
            let step = flow.step_mut(id);
            if let Some(status) = steps.get(&step.name) {
                step.status = *status;
            }
        }
        println!("{}", flow.debug_string());
        return Ok(ExitCode::SUCCESS);
    }

    if ledger.is_empty() {
        println!("Ledger is empty.");
    }
    for (id, status) in &ledger {
        println!("{}\t{}", id, status);
    }
    Ok(ExitCode::SUCCESS)
}

/// `hpipe check`: graph validation plus per-job executor validation.
pub fn check_flow(config: &AppConfig) -> anyhow::Result<ExitCode> {
    let flow = load_flow(config)?;
    let registry = ExecutorRegistry::with_builtins(config);

    println!("{}", flow.debug_string());

    let mut problems = Vec::new();
    for job in flow.jobs() {
        match registry.create(&job.job_type) {
            Some(executor) => {
                if let Err(e) = executor.validate(job) {
                    problems.push(e.to_string());
                }
            }
            None => problems.push(format!(
                "job {}: unknown type '{}' (known: {})",
                job.instance_id,
                job.job_type,
                registry.list().join(", ")
            )),
        }
    }

    let steps = flow.reachable().len();
    let jobs = flow.jobs().count();
    if problems.is_empty() {
        println!("flow {}: {} steps, {} jobs, OK", flow.name, steps, jobs);
        Ok(ExitCode::SUCCESS)
    } else {
        for p in &problems {
            println!("  {}", p);
        }
        println!(
            "flow {}: {} steps, {} jobs, {} problem(s)",
            flow.name,
            steps,
            jobs,
            problems.len()
        );
        Ok(ExitCode::from(1))
    }
}

/// `hpipe reset <ids..>`
pub fn reset(config: &AppConfig, ids: &[String]) -> anyhow::Result<ExitCode> {
    let store = open_store(config)?;
    let removed = store.reset(ids)?;
    info!(removed, requested = ids.len(), "Ledger records reset");
    println!("Removed {} of {} record(s).", removed, ids.len());
    Ok(ExitCode::SUCCESS)
}
