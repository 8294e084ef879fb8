//! Swap-out of queue overflow to durable storage.
//!
//! The queue hands batches of records to a [`SwapManager`] when its
//! in-memory footprint crosses the swap threshold, and asks for them back
//! (oldest batch first) when the active heap drains. Locations are opaque
//! to the queue; the only contract is that [`SwapManager::recover_swap_locations`]
//! returns them in the order they were produced.

use std::fmt::{self, Display};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::accounting::QueueSize;
use crate::config::FlowFileId;
use crate::error::QueueResult;
use crate::flowfile::FlowFileRecord;

mod codec;
mod file;

pub use file::FileSwapManager;

/// Opaque handle to one persisted batch of records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SwapLocation(String);

impl SwapLocation {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SwapLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persists and restores batches of flow file records.
///
/// Implementations must not call back into the queue: every method here is
/// invoked while the queue's write lock is held.
///
/// After `swap_in` returns `Ok`, the location is consumed; the queue
/// forgets it and the manager is free to reclaim the storage.
pub trait SwapManager: Send + Sync {
    /// Persists `records` as one batch and returns its location.
    /// On failure the records remain owned by the queue.
    fn swap_out(
        &self,
        records: &[Arc<FlowFileRecord>],
        queue_identifier: &str,
    ) -> QueueResult<SwapLocation>;

    /// Restores the batch at `location`, consuming it.
    fn swap_in(
        &self,
        location: &SwapLocation,
        queue_identifier: &str,
    ) -> QueueResult<Vec<Arc<FlowFileRecord>>>;

    /// Returns the record and byte counts of the batch at `location`
    /// without restoring it.
    fn swap_size(&self, location: &SwapLocation) -> QueueResult<QueueSize>;

    /// Returns the greatest record id within the batch at `location`, used
    /// to reseed the host's id generator after a restart.
    fn max_record_id(&self, location: &SwapLocation) -> QueueResult<Option<FlowFileId>>;

    /// Enumerates the locations persisted for `queue_identifier`, in the
    /// order they were originally produced by [`SwapManager::swap_out`].
    fn recover_swap_locations(&self, queue_identifier: &str) -> QueueResult<Vec<SwapLocation>>;

    /// Removes all persisted batches for every queue. Administrative.
    fn purge(&self);
}
