//! Concurrency quotas: one global pool plus optional per-resource pools.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use hpipe_core::error::{HpipeError, Result};

/// Slots held by a running job. Released on drop.
#[derive(Debug)]
pub struct Permits {
    _resource: Option<OwnedSemaphorePermit>,
    _global: OwnedSemaphorePermit,
}

#[derive(Debug, Clone)]
pub struct ConcurrencyLimits {
    global: Arc<Semaphore>,
    resources: HashMap<String, Arc<Semaphore>>,
}

impl ConcurrencyLimits {
    pub fn new(pool_size: usize, resources: &BTreeMap<String, usize>) -> Self {
        Self {
            global: Arc::new(Semaphore::new(pool_size.max(1))),
            resources: resources
                .iter()
                .map(|(label, limit)| (label.clone(), Arc::new(Semaphore::new((*limit).max(1)))))
                .collect(),
        }
    }

    /// Wait for a slot in `resource`'s pool (if it has one), then in the
    /// global pool. Labels without a configured quota share only the global pool.
    pub async fn acquire(&self, resource: Option<&str>) -> Result<Permits> {
        let resource = match resource.and_then(|label| self.resources.get(label)) {
            Some(sem) => Some(sem.clone().acquire_owned().await.map_err(closed)?),
            None => None,
        };
        let global = self.global.clone().acquire_owned().await.map_err(closed)?;
        Ok(Permits {
            _resource: resource,
            _global: global,
        })
    }

    pub fn available(&self) -> usize {
        self.global.available_permits()
    }

    pub fn available_for(&self, resource: &str) -> Option<usize> {
        self.resources.get(resource).map(|s| s.available_permits())
    }
}

fn closed(e: tokio::sync::AcquireError) -> HpipeError {
    HpipeError::Scheduler(format!("concurrency pool closed: {}", e))
}
