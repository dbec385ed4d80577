use std::sync::{Arc, Mutex};

use hpipe_core::error::{HpipeError, Result};
use hpipe_core::flow::Flow;
use hpipe_core::traits::StatusStore;
use hpipe_exec::ExecutorRegistry;

use crate::limits::ConcurrencyLimits;
use crate::scheduler::SchedulerConfig;

/// Everything the tasks of one run share.
///
/// The flow and the store sit behind the same lock: a status change and the
/// save that records it happen together, so every persisted snapshot is
/// consistent and saves never overlap.
pub(crate) struct RunState {
    flow: Mutex<Flow>,
    store: Arc<dyn StatusStore>,
    registry: Arc<ExecutorRegistry>,
    limits: ConcurrencyLimits,
    config: SchedulerConfig,
}

impl RunState {
    pub fn new(
        flow: Flow,
        store: Arc<dyn StatusStore>,
        registry: Arc<ExecutorRegistry>,
        config: SchedulerConfig,
    ) -> Self {
        let limits = ConcurrencyLimits::new(config.pool_size, &config.resources);
        Self {
            flow: Mutex::new(flow),
            store,
            registry,
            limits,
            config,
        }
    }

    /// Apply a change to the in-memory flow and persist the result.
    pub fn transition<T>(&self, change: impl FnOnce(&mut Flow) -> T) -> Result<T> {
        let mut flow = self.lock()?;
        let out = change(&mut flow);
        self.store.save(&flow)?;
        Ok(out)
    }

    pub fn read<T>(&self, f: impl FnOnce(&Flow) -> T) -> Result<T> {
        let flow = self.lock()?;
        Ok(f(&flow))
    }

    pub fn registry(&self) -> &ExecutorRegistry {
        &self.registry
    }

    pub fn limits(&self) -> &ConcurrencyLimits {
        &self.limits
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Flow>> {
        self.flow
            .lock()
            .map_err(|e| HpipeError::Scheduler(format!("flow state poisoned: {}", e)))
    }
}
