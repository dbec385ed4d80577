use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use hpipe_core::error::{HpipeError, Result};
use hpipe_core::flow::Flow;
use hpipe_core::status::Status;
use hpipe_core::traits::StatusStore;

/// What one successful `save` wrote.
#[derive(Debug, Clone, Default)]
pub struct SavedFlow {
    pub jobs: BTreeMap<String, Status>,
    pub steps: BTreeMap<String, Status>,
}

/// In-memory `StatusStore` that can be told to start failing. Every
/// successful save is kept in order, see `history`.
pub struct MemoryStore {
    records: Mutex<BTreeMap<String, Status>>,
    history: Mutex<Vec<SavedFlow>>,
    saves: AtomicUsize,
    fail_after: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
            history: Mutex::new(Vec::new()),
            saves: AtomicUsize::new(0),
            fail_after: None,
        }
    }

    /// Accept `n` saves, then reject every further one.
    pub fn failing_after(n: usize) -> Self {
        Self {
            fail_after: Some(n),
            ..Self::new()
        }
    }

    /// Pretend an earlier run left `status` for `instance_id`.
    pub fn seed(&self, instance_id: &str, status: Status) {
        self.records
            .lock()
            .unwrap()
            .insert(instance_id.to_string(), status);
    }

    /// Successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Successful saves so far, oldest first.
    pub fn history(&self) -> Vec<SavedFlow> {
        self.history.lock().unwrap().clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusStore for MemoryStore {
    fn save(&self, flow: &Flow) -> Result<()> {
        if self.fail_after.is_some_and(|n| self.save_count() >= n) {
            return Err(HpipeError::Database("disk I/O error".into()));
        }
        let mut saved = SavedFlow::default();
        let mut records = self.records.lock().unwrap();
        for job in flow.jobs() {
            records.insert(job.instance_id.clone(), job.status);
            saved.jobs.insert(job.instance_id.clone(), job.status);
        }
        for id in flow.reachable() {
            let step = flow.step(id);
            saved.steps.insert(step.name.clone(), step.status);
        }
        self.history.lock().unwrap().push(saved);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn status_of(&self, instance_id: &str) -> Result<Option<Status>> {
        Ok(self.records.lock().unwrap().get(instance_id).copied())
    }

    fn snapshot(&self) -> Result<BTreeMap<String, Status>> {
        Ok(self.records.lock().unwrap().clone())
    }

    fn reset(&self, instance_ids: &[String]) -> Result<usize> {
        let mut records = self.records.lock().unwrap();
        Ok(instance_ids
            .iter()
            .filter(|id| records.remove(id.as_str()).is_some())
            .count())
    }
}
