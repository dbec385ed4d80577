use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;

use hpipe_core::error::{HpipeError, Result};
use hpipe_core::flow::Job;
use hpipe_exec::{ExecContext, Executor, ExecutorRegistry};

/// Something a scripted executor observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Start { instance_id: String, attempt: u32 },
    End { instance_id: String, exit_code: i32 },
}

#[derive(Default)]
struct Inner {
    scripts: Mutex<HashMap<String, VecDeque<i32>>>,
    events: Mutex<Vec<Event>>,
    active: Mutex<(usize, usize)>,
}

/// Shared controller for `ScriptedExecutor`s: hands out exit codes per
/// instance id and records every launch.
///
/// Unscripted jobs exit 0. A script's last code repeats once the others are
/// used up, so `script(id, &[1])` fails forever and `script(id, &[1, 0])`
/// fails once then succeeds.
#[derive(Clone, Default)]
pub struct ScriptedRunner {
    inner: Arc<Inner>,
    delay: Duration,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep every launch busy for `delay`, making overlap observable.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn script(&self, instance_id: &str, codes: &[i32]) {
        self.inner
            .scripts
            .lock()
            .unwrap()
            .insert(instance_id.to_string(), codes.iter().copied().collect());
    }

    pub fn events(&self) -> Vec<Event> {
        self.inner.events.lock().unwrap().clone()
    }

    /// Instance ids in launch order, one entry per attempt.
    pub fn launches(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Start { instance_id, .. } => Some(instance_id),
                Event::End { .. } => None,
            })
            .collect()
    }

    pub fn launch_count(&self, instance_id: &str) -> usize {
        self.launches().iter().filter(|id| *id == instance_id).count()
    }

    /// Position of the first start / last end of `instance_id` in the event log.
    pub fn started_at(&self, instance_id: &str) -> Option<usize> {
        self.events().iter().position(
            |e| matches!(e, Event::Start { instance_id: id, .. } if id == instance_id),
        )
    }

    pub fn ended_at(&self, instance_id: &str) -> Option<usize> {
        self.events().iter().rposition(
            |e| matches!(e, Event::End { instance_id: id, .. } if id == instance_id),
        )
    }

    /// Most launches that were in flight at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.inner.active.lock().unwrap().1
    }

    pub fn executor(&self, job_type: &str) -> ScriptedExecutor {
        ScriptedExecutor {
            job_type: job_type.to_string(),
            required: &[],
            runner: self.clone(),
        }
    }

    /// Registry serving every listed job type with this runner.
    pub fn registry(&self, job_types: &[&str]) -> ExecutorRegistry {
        let mut registry = ExecutorRegistry::new();
        for job_type in job_types {
            let runner = self.clone();
            let job_type = job_type.to_string();
            registry.register(job_type.clone(), move || runner.executor(&job_type));
        }
        registry
    }

    fn next_code(&self, instance_id: &str) -> i32 {
        let mut scripts = self.inner.scripts.lock().unwrap();
        match scripts.get_mut(instance_id) {
            Some(codes) if codes.len() > 1 => codes.pop_front().unwrap_or(0),
            Some(codes) => codes.front().copied().unwrap_or(0),
            None => 0,
        }
    }

    fn record(&self, event: Event) {
        self.inner.events.lock().unwrap().push(event);
    }

    fn enter(&self) {
        let mut active = self.inner.active.lock().unwrap();
        active.0 += 1;
        active.1 = active.1.max(active.0);
    }

    fn leave(&self) {
        self.inner.active.lock().unwrap().0 -= 1;
    }
}

/// Executor that launches nothing and answers from a `ScriptedRunner`.
pub struct ScriptedExecutor {
    job_type: String,
    required: &'static [&'static str],
    runner: ScriptedRunner,
}

impl ScriptedExecutor {
    pub fn with_required(mut self, required: &'static [&'static str]) -> Self {
        self.required = required;
        self
    }
}

impl Executor for ScriptedExecutor {
    fn job_type(&self) -> &str {
        &self.job_type
    }

    fn required_props(&self) -> &[&'static str] {
        self.required
    }

    fn run<'a>(&'a self, job: &'a Job, ctx: &'a ExecContext) -> BoxFuture<'a, Result<i32>> {
        Box::pin(async move {
            self.validate(job)?;

            let id = job.instance_id.clone();
            self.runner.record(Event::Start {
                instance_id: id.clone(),
                attempt: ctx.attempt,
            });
            self.runner.enter();
            if !self.runner.delay.is_zero() {
                tokio::time::sleep(self.runner.delay).await;
            }
            let code = self.runner.next_code(&id);
            self.runner.leave();
            self.runner.record(Event::End {
                instance_id: id,
                exit_code: code,
            });

            if code == 0 {
                Ok(0)
            } else {
                Err(HpipeError::CommandFailed {
                    program: "scripted".into(),
                    exit_code: code,
                })
            }
        })
    }
}
