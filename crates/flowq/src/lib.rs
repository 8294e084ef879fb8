//! Prioritized, expirable, disk-overflowing FIFO for dataflow graphs.
//!
//! This crate provides the queue that buffers flow files between two
//! processing stages: a concurrent priority queue that spills overflow to
//! durable swap files under memory pressure, applies backpressure to the
//! upstream stage, expires overaged records, defers penalized records, and
//! supports cancellable bulk drops with full provenance.
//!
//! ## Architecture Overview
//!
//! - **Queue core**: an in-memory priority heap plus a swap staging
//!   buffer, guarded by a single fair reader-writer lock. Getters never
//!   touch the lock.
//! - **Size accounting**: six counters (active/swapped/unacknowledged,
//!   count and bytes) held in one immutable tuple behind an atomic
//!   pointer, updated by compare-and-swap so readers always see a
//!   consistent total.
//! - **Swap manager**: batches of the lowest-priority records are handed
//!   to a [`SwapManager`] when memory pressure builds and recalled in FIFO
//!   order as the heap drains. [`FileSwapManager`] persists batches as
//!   checksummed files that survive restarts.
//! - **Drop request engine**: a background worker per request empties the
//!   queue (active, staged and persisted records) with progress reporting
//!   and cancellation.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use flowq::{FlowFileQueue, QueueConfig, QueueCollaborators};
//!
//! let queue = FlowFileQueue::new(QueueConfig::new("conn-1"), endpoints, collaborators)?;
//! queue.put(record);
//!
//! let mut expired = Vec::new();
//! if let Some(record) = queue.poll(&mut expired) {
//!     // process, then:
//!     queue.acknowledge(&record);
//! }
//! ```
//!
//! ## Thread Safety
//!
//! All public APIs are thread-safe. Mutating operations serialize on the
//! queue's write lock; `size`, `is_full` and the other getters read only
//! atomics and immutable fields. Scheduler wakeups are emitted strictly
//! after the lock is released, so a scheduler callback may safely call
//! back into the queue.

pub mod accounting;
pub mod config;
pub mod drop_request;
pub mod error;
pub mod events;
pub mod flowfile;
pub mod metrics;
pub mod prioritizer;
pub mod queue;
pub mod repository;
pub mod swap;
pub mod test_support;

pub use accounting::{FlowFileQueueSize, QueueSize};
pub use config::{
    CorruptSwapPolicy, FlowFileId, MAX_EXPIRED_RECORDS_PER_ITERATION, QueueConfig,
    SWAP_RECORD_BATCH_SIZE, parse_data_size, parse_duration_millis,
};
pub use drop_request::{DropFlowFileRequest, DropFlowFileState};
pub use error::{QueueError, QueueResult};
pub use events::{
    ConnectionEndpoints, EventReporter, ProcessScheduler, SchedulingStrategy, Severity,
};
pub use flowfile::{ContentClaim, FlowFileRecord, FlowFileRecordBuilder, ResourceClaim};
pub use metrics::{QueueMetrics, QueueMetricsSnapshot};
pub use prioritizer::FlowFilePrioritizer;
pub use queue::{FlowFileFilterResult, FlowFileQueue, QueueCollaborators};
pub use repository::{
    FlowFileRepository, PreviousContentClaim, ProvenanceEvent, ProvenanceEventBuilder,
    ProvenanceEventRepository, ProvenanceEventType, RepositoryRecord, RepositoryRecordType,
    ResourceClaimManager,
};
pub use swap::{FileSwapManager, SwapLocation, SwapManager};
