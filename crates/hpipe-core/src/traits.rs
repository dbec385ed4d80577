use std::collections::BTreeMap;

use crate::error::Result;
use crate::flow::Flow;
use crate::status::Status;

/// Status ledger: durable instance id -> last known status.
///
/// Implementations are not expected to tolerate overlapping `save` calls;
/// the scheduler funnels every save through a single writer.
pub trait StatusStore: Send + Sync + 'static {
    /// Persist the status of every reachable job of `flow` atomically.
    /// On error nothing of this snapshot is kept.
    fn save(&self, flow: &Flow) -> Result<()>;

    /// Persisted status for one instance id, if any.
    fn status_of(&self, instance_id: &str) -> Result<Option<Status>>;

    /// The whole ledger, ordered by instance id.
    fn snapshot(&self) -> Result<BTreeMap<String, Status>>;

    /// Forget the given instance ids. Returns how many records were removed.
    fn reset(&self, instance_ids: &[String]) -> Result<usize>;
}
