use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::thread;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use tracing::{debug, error, info, warn};

use crate::accounting::{QueueSize, SizeAccounting, SizeDelta};
use crate::config::{
    CorruptSwapPolicy, FlowFileId, MAX_EXPIRED_RECORDS_PER_ITERATION, QueueConfig,
    SWAP_RECORD_BATCH_SIZE, parse_data_size, parse_duration_millis,
};
use crate::drop_request::{DropFlowFileRequest, DropFlowFileState, DropRequestMap};
use crate::error::QueueResult;
use crate::events::{
    ConnectionEndpoints, EventReporter, ProcessScheduler, SchedulingStrategy, Severity,
};
use crate::flowfile::{FlowFileRecord, now_millis};
use crate::metrics::{QueueMetrics, QueueMetricsSnapshot};
use crate::prioritizer::{FlowFilePrioritizer, HeapEntry, QueueOrdering};
use crate::repository::{
    FlowFileRepository, ProvenanceEvent, ProvenanceEventRepository, ProvenanceEventType,
    RepositoryRecord, ResourceClaimManager,
};
use crate::swap::{SwapLocation, SwapManager};

/// Write-lock acquisitions slower than this are reported for diagnostics.
const LOCK_CONTENTION_WARN: Duration = Duration::from_millis(100);

const EVENT_CATEGORY_SWAP: &str = "FlowFile Swapping";
const EVENT_CATEGORY_OVERFLOW: &str = "Failed to Overflow to Disk";
const EVENT_CATEGORY_ACCOUNTING: &str = "Queue Accounting";

/// Verdict returned by a poll filter for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowFileFilterResult {
    AcceptAndContinue,
    AcceptAndTerminate,
    RejectAndContinue,
    RejectAndTerminate,
}

impl FlowFileFilterResult {
    pub fn accepts(self) -> bool {
        matches!(self, Self::AcceptAndContinue | Self::AcceptAndTerminate)
    }

    pub fn continues(self) -> bool {
        matches!(self, Self::AcceptAndContinue | Self::RejectAndContinue)
    }
}

/// The external services a queue is wired to.
#[derive(Clone)]
pub struct QueueCollaborators {
    pub swap_manager: Arc<dyn SwapManager>,
    pub flowfile_repository: Arc<dyn FlowFileRepository>,
    pub provenance_repository: Arc<dyn ProvenanceEventRepository>,
    pub claim_manager: Arc<dyn ResourceClaimManager>,
    pub scheduler: Arc<dyn ProcessScheduler>,
    pub event_reporter: Arc<dyn EventReporter>,
}

/// One persisted batch the queue still owes to consumers. The size is
/// remembered so accounting can be corrected if the batch is ever lost.
struct SwappedBatch {
    location: SwapLocation,
    size: Option<QueueSize>,
}

/// Mutable queue state guarded by the write lock.
struct QueueGuts {
    active: BinaryHeap<HeapEntry>,
    swap_buffer: Vec<Arc<FlowFileRecord>>,
    swap_locations: VecDeque<SwappedBatch>,
    swap_mode: bool,
    ordering: Arc<QueueOrdering>,
}

struct QueueInner {
    identifier: String,
    swap_threshold: usize,
    corrupt_swap_policy: CorruptSwapPolicy,
    endpoints: ConnectionEndpoints,

    swap_manager: Arc<dyn SwapManager>,
    flowfile_repository: Arc<dyn FlowFileRepository>,
    provenance_repository: Arc<dyn ProvenanceEventRepository>,
    claim_manager: Arc<dyn ResourceClaimManager>,
    scheduler: Arc<dyn ProcessScheduler>,
    event_reporter: Arc<dyn EventReporter>,

    guts: RwLock<QueueGuts>,
    ordering: ArcSwap<QueueOrdering>,
    size: SizeAccounting,
    queue_full: AtomicBool,
    max_object_count: AtomicU64,
    max_byte_count: AtomicU64,
    data_size_expression: Mutex<String>,
    expiration_ms: AtomicU64,
    expiration_expression: Mutex<String>,
    metrics: QueueMetrics,
    drop_requests: DropRequestMap,
}

/// A prioritized, expirable FIFO that buffers flow files between two
/// components, spilling overflow to a swap manager under memory pressure.
///
/// One fair reader-writer lock guards the active heap, the staging buffer,
/// the swap-location list and the swap-mode flag; every mutating operation
/// serializes on it. `size`, `is_empty`, `is_full` and the other getters
/// consult only atomics or immutable fields and never block.
///
/// Scheduler wakeups are always emitted after the write lock is released.
#[derive(Clone)]
pub struct FlowFileQueue {
    inner: Arc<QueueInner>,
}

impl FlowFileQueue {
    pub fn new(
        config: QueueConfig,
        endpoints: ConnectionEndpoints,
        collaborators: QueueCollaborators,
    ) -> QueueResult<Self> {
        let (max_bytes, expiration_ms) = config.validated()?;
        let ordering = Arc::new(QueueOrdering::new(Vec::new()));
        Ok(Self {
            inner: Arc::new(QueueInner {
                identifier: config.identifier,
                swap_threshold: config.swap_threshold,
                corrupt_swap_policy: config.corrupt_swap_policy,
                endpoints,
                swap_manager: collaborators.swap_manager,
                flowfile_repository: collaborators.flowfile_repository,
                provenance_repository: collaborators.provenance_repository,
                claim_manager: collaborators.claim_manager,
                scheduler: collaborators.scheduler,
                event_reporter: collaborators.event_reporter,
                guts: RwLock::new(QueueGuts {
                    active: BinaryHeap::new(),
                    swap_buffer: Vec::new(),
                    swap_locations: VecDeque::new(),
                    swap_mode: false,
                    ordering: ordering.clone(),
                }),
                ordering: ArcSwap::from(ordering),
                size: SizeAccounting::new(),
                queue_full: AtomicBool::new(false),
                max_object_count: AtomicU64::new(config.backpressure_object_threshold),
                max_byte_count: AtomicU64::new(max_bytes),
                data_size_expression: Mutex::new(config.backpressure_data_size),
                expiration_ms: AtomicU64::new(expiration_ms),
                expiration_expression: Mutex::new(config.expiration_period),
                metrics: QueueMetrics::default(),
                drop_requests: DropRequestMap::default(),
            }),
        })
    }

    pub fn identifier(&self) -> &str {
        &self.inner.identifier
    }

    /// Total visible size: active + swapped + unacknowledged.
    pub fn size(&self) -> QueueSize {
        self.inner.size.load().total()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.size.load().is_empty()
    }

    pub fn is_active_queue_empty(&self) -> bool {
        self.inner.size.load().active_count == 0
    }

    pub fn active_queue_size(&self) -> QueueSize {
        self.inner.size.load().active()
    }

    pub fn swapped_size(&self) -> QueueSize {
        self.inner.size.load().swapped()
    }

    pub fn unacknowledged_size(&self) -> QueueSize {
        self.inner.size.load().unacknowledged()
    }

    pub fn is_full(&self) -> bool {
        self.inner.queue_full.load(AtomicOrdering::Acquire)
    }

    pub fn priorities(&self) -> Vec<Arc<dyn FlowFilePrioritizer>> {
        self.inner.ordering.load().prioritizers().to_vec()
    }

    pub fn backpressure_object_threshold(&self) -> u64 {
        self.inner.max_object_count.load(AtomicOrdering::Acquire)
    }

    pub fn backpressure_data_size_threshold(&self) -> String {
        self.inner.data_size_expression.lock().clone()
    }

    pub fn expiration_period(&self) -> String {
        self.inner.expiration_expression.lock().clone()
    }

    pub fn metrics(&self) -> QueueMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Replaces the prioritizer list and rebuilds the active heap under it.
    pub fn set_priorities(&self, prioritizers: Vec<Arc<dyn FlowFilePrioritizer>>) {
        let mut guts = self.write_lock("set_priorities");
        let ordering = Arc::new(QueueOrdering::new(prioritizers));
        let previous = std::mem::take(&mut guts.active);
        let mut rebuilt = BinaryHeap::with_capacity(previous.len());
        for entry in previous {
            rebuilt.push(HeapEntry::new(entry.into_record(), ordering.clone()));
        }
        guts.active = rebuilt;
        guts.ordering = ordering.clone();
        self.inner.ordering.store(ordering);
    }

    pub fn set_backpressure_object_threshold(&self, threshold: u64) {
        let _guts = self.write_lock("set_backpressure_object_threshold");
        self.inner
            .max_object_count
            .store(threshold, AtomicOrdering::Release);
        self.refresh_queue_full();
    }

    pub fn set_backpressure_data_size_threshold(&self, expression: &str) -> QueueResult<()> {
        let max_bytes = parse_data_size(expression)?;
        let _guts = self.write_lock("set_backpressure_data_size_threshold");
        self.inner
            .max_byte_count
            .store(max_bytes, AtomicOrdering::Release);
        *self.inner.data_size_expression.lock() = expression.to_string();
        self.refresh_queue_full();
        Ok(())
    }

    pub fn set_expiration_period(&self, expression: &str) -> QueueResult<()> {
        let expiration_ms = parse_duration_millis(expression)?;
        self.inner
            .expiration_ms
            .store(expiration_ms, AtomicOrdering::Release);
        *self.inner.expiration_expression.lock() = expression.to_string();
        Ok(())
    }

    /// Enqueues one record. Never fails; under memory pressure the record
    /// is staged for swap-out instead of entering the active heap.
    pub fn put(&self, record: Arc<FlowFileRecord>) {
        {
            let mut guts = self.write_lock("put");
            let bytes = record.size() as i64;
            if guts.swap_mode || guts.active.len() >= self.inner.swap_threshold {
                guts.swap_buffer.push(record);
                self.apply_size(SizeDelta::swapped(1, bytes));
                guts.swap_mode = true;
                self.write_swap_files_if_needed(&mut guts);
            } else {
                self.apply_size(SizeDelta::active(1, bytes));
                let ordering = guts.ordering.clone();
                guts.active.push(HeapEntry::new(record, ordering));
            }
            self.refresh_queue_full();
        }
        self.notify_destination();
    }

    /// Enqueues a batch. The accounting update covers the whole batch, so
    /// `size()` never exposes a partially applied batch.
    pub fn put_all(&self, records: Vec<Arc<FlowFileRecord>>) {
        if records.is_empty() {
            return;
        }
        let count = records.len() as i64;
        let bytes: i64 = records.iter().map(|record| record.size() as i64).sum();
        {
            let mut guts = self.write_lock("put_all");
            let headroom = self.inner.swap_threshold as i64 - count;
            if guts.swap_mode || guts.active.len() as i64 >= headroom {
                guts.swap_buffer.extend(records);
                self.apply_size(SizeDelta::swapped(count, bytes));
                guts.swap_mode = true;
                self.write_swap_files_if_needed(&mut guts);
            } else {
                self.apply_size(SizeDelta::active(count, bytes));
                let ordering = guts.ordering.clone();
                for record in records {
                    guts.active.push(HeapEntry::new(record, ordering.clone()));
                }
            }
            self.refresh_queue_full();
        }
        self.notify_destination();
    }

    /// Returns the next deliverable record, or `None` when the queue is
    /// drained, every remaining head is penalized, or this call spent its
    /// budget expiring records.
    ///
    /// Expired records are drained into `expired` (up to
    /// [`MAX_EXPIRED_RECORDS_PER_ITERATION`]) so the caller can emit EXPIRE
    /// provenance and release their content.
    pub fn poll(&self, expired: &mut Vec<Arc<FlowFileRecord>>) -> Option<Arc<FlowFileRecord>> {
        let expiration_ms = self.inner.expiration_ms.load(AtomicOrdering::Acquire);
        let polled = {
            let mut guts = self.write_lock("poll");
            self.do_poll(&mut guts, expired, expiration_ms)
        };
        if let Some(record) = &polled {
            self.apply_size(SizeDelta::unacknowledged(1, record.size() as i64));
        }
        polled
    }

    fn do_poll(
        &self,
        guts: &mut QueueGuts,
        expired: &mut Vec<Arc<FlowFileRecord>>,
        expiration_ms: u64,
    ) -> Option<Arc<FlowFileRecord>> {
        self.migrate_swap_to_active(guts);
        let full_at_start = self.inner.queue_full.load(AtomicOrdering::Acquire);
        let now = now_millis();

        let mut expired_count = 0_i64;
        let mut expired_bytes = 0_i64;
        let mut polled = None;
        while let Some(entry) = guts.active.pop() {
            let record = entry.into_record();
            if is_expired(&record, expiration_ms, now) {
                expired_count += 1;
                expired_bytes += record.size() as i64;
                expired.push(record);
                if expired.len() >= MAX_EXPIRED_RECORDS_PER_ITERATION {
                    break;
                }
                continue;
            }
            if record.is_penalized() {
                // The head is the earliest to come off penalty; everything
                // behind it is no sooner.
                let ordering = guts.ordering.clone();
                guts.active.push(HeapEntry::new(record, ordering));
                break;
            }
            polled = Some(record);
            break;
        }

        let mut delta = SizeDelta::default();
        if expired_count > 0 {
            delta = delta.and_active(-expired_count, -expired_bytes);
        }
        if let Some(record) = &polled {
            delta = delta.and_active(-1, -(record.size() as i64));
        }
        if !delta.is_noop() {
            self.apply_size(delta);
        }
        self.inner.metrics.add_expired(expired_count as u64);
        if full_at_start && expired_count > 0 {
            self.refresh_queue_full();
        }
        polled
    }

    /// Returns up to `max_results` deliverable records. Stops early at the
    /// first penalized head, which is pushed back.
    pub fn poll_batch(
        &self,
        max_results: usize,
        expired: &mut Vec<Arc<FlowFileRecord>>,
    ) -> Vec<Arc<FlowFileRecord>> {
        let expiration_ms = self.inner.expiration_ms.load(AtomicOrdering::Acquire);
        let mut records = Vec::with_capacity(max_results.min(1_024));

        let mut guts = self.write_lock("poll_batch");
        self.migrate_swap_to_active(&mut guts);
        let full_at_start = self.inner.queue_full.load(AtomicOrdering::Acquire);
        let now = now_millis();

        let mut selected_bytes = 0_i64;
        let mut expired_count = 0_i64;
        let mut expired_bytes = 0_i64;
        while records.len() < max_results {
            let Some(entry) = guts.active.pop() else {
                break;
            };
            let record = entry.into_record();
            if is_expired(&record, expiration_ms, now) {
                expired_count += 1;
                expired_bytes += record.size() as i64;
                expired.push(record);
                if expired.len() >= MAX_EXPIRED_RECORDS_PER_ITERATION {
                    break;
                }
                continue;
            }
            if record.is_penalized() {
                let ordering = guts.ordering.clone();
                guts.active.push(HeapEntry::new(record, ordering));
                break;
            }
            selected_bytes += record.size() as i64;
            records.push(record);
        }

        let delta = SizeDelta::active(
            -(records.len() as i64 + expired_count),
            -(selected_bytes + expired_bytes),
        )
        .and_unacknowledged(records.len() as i64, selected_bytes);
        if !delta.is_noop() {
            self.apply_size(delta);
        }
        self.inner.metrics.add_expired(expired_count as u64);
        if full_at_start && expired_count > 0 {
            self.refresh_queue_full();
        }
        records
    }

    /// Walks the queue in priority order, letting `filter` select records.
    /// Rejected records keep their place; the scan stops when the filter
    /// says so or at the first penalized head.
    pub fn poll_filter<F>(
        &self,
        mut filter: F,
        expired: &mut Vec<Arc<FlowFileRecord>>,
    ) -> Vec<Arc<FlowFileRecord>>
    where
        F: FnMut(&FlowFileRecord) -> FlowFileFilterResult,
    {
        let expiration_ms = self.inner.expiration_ms.load(AtomicOrdering::Acquire);

        let mut guts = self.write_lock("poll_filter");
        self.migrate_swap_to_active(&mut guts);
        let full_at_start = self.inner.queue_full.load(AtomicOrdering::Acquire);
        let now = now_millis();

        let mut selected = Vec::new();
        let mut rejected = Vec::new();
        let mut selected_bytes = 0_i64;
        let mut expired_count = 0_i64;
        let mut expired_bytes = 0_i64;
        loop {
            let Some(entry) = guts.active.pop() else {
                break;
            };
            let record = entry.into_record();
            if is_expired(&record, expiration_ms, now) {
                expired_count += 1;
                expired_bytes += record.size() as i64;
                expired.push(record);
                if expired.len() >= MAX_EXPIRED_RECORDS_PER_ITERATION {
                    break;
                }
                continue;
            }
            if record.is_penalized() {
                let ordering = guts.ordering.clone();
                guts.active.push(HeapEntry::new(record, ordering));
                break;
            }

            let verdict = filter(&record);
            if verdict.accepts() {
                selected_bytes += record.size() as i64;
                selected.push(record);
            } else {
                rejected.push(record);
            }
            if !verdict.continues() {
                break;
            }
        }

        let ordering = guts.ordering.clone();
        for record in rejected {
            guts.active.push(HeapEntry::new(record, ordering.clone()));
        }

        let delta = SizeDelta::active(
            -(selected.len() as i64 + expired_count),
            -(selected_bytes + expired_bytes),
        )
        .and_unacknowledged(selected.len() as i64, selected_bytes);
        if !delta.is_noop() {
            self.apply_size(delta);
        }
        self.inner.metrics.add_expired(expired_count as u64);
        if full_at_start && expired_count > 0 {
            self.refresh_queue_full();
        }
        selected
    }

    /// Finalizes a previously polled record.
    pub fn acknowledge(&self, record: &FlowFileRecord) {
        self.apply_size(SizeDelta::unacknowledged(-1, -(record.size() as i64)));
        self.post_acknowledge();
    }

    /// Finalizes a batch of previously polled records.
    pub fn acknowledge_batch(&self, records: &[Arc<FlowFileRecord>]) {
        if records.is_empty() {
            return;
        }
        let bytes: i64 = records.iter().map(|record| record.size() as i64).sum();
        self.apply_size(SizeDelta::unacknowledged(-(records.len() as i64), -bytes));
        self.post_acknowledge();
    }

    fn post_acknowledge(&self) {
        if !self.inner.queue_full.load(AtomicOrdering::Acquire) {
            return;
        }
        let became_not_full = {
            let _guts = self.write_lock("acknowledge");
            let now_full = self.determine_if_full();
            let was_full = self.inner.queue_full.swap(now_full, AtomicOrdering::AcqRel);
            was_full && !now_full
        };
        if became_not_full {
            // Back pressure from this queue just lifted; the upstream
            // component may be runnable again.
            self.notify_source();
        }
    }

    /// Starts a background worker that removes every record the queue
    /// holds, including persisted batches, and returns the request handle
    /// immediately. The worker owns the write lock for its whole run, so
    /// no record can enter or leave the queue while it drops.
    pub fn drop_flow_files(
        &self,
        request_identifier: &str,
        requestor: &str,
    ) -> Arc<DropFlowFileRequest> {
        info!(
            queue = %self.inner.identifier,
            request = request_identifier,
            requestor,
            "initiating drop of all queued FlowFiles"
        );
        self.inner.drop_requests.prune();

        let request = Arc::new(DropFlowFileRequest::new(request_identifier, requestor));
        request.set_current_size(self.size());
        self.inner.drop_requests.insert(request.clone());

        let queue = self.clone();
        let worker_request = request.clone();
        let requestor = requestor.to_string();
        let spawned = thread::Builder::new()
            .name(format!("drop-flowfiles-{}", self.inner.identifier))
            .spawn(move || queue.run_drop_worker(worker_request, requestor));
        if let Err(err) = spawned {
            request.fail(format!("failed to spawn drop worker: {err}"));
        }
        request
    }

    /// Cancels a drop request, removing it from the registry. The worker
    /// stops before its next phase; work already done is not rolled back.
    pub fn cancel_drop(&self, request_identifier: &str) -> Option<Arc<DropFlowFileRequest>> {
        let request = self.inner.drop_requests.remove(request_identifier)?;
        request.cancel();
        Some(request)
    }

    pub fn drop_request_status(
        &self,
        request_identifier: &str,
    ) -> Option<Arc<DropFlowFileRequest>> {
        self.inner.drop_requests.get(request_identifier)
    }

    fn run_drop_worker(&self, request: Arc<DropFlowFileRequest>, requestor: String) {
        let mut guts = self.write_lock("drop_flow_files");
        if request.is_canceled() {
            info!(queue = %self.inner.identifier, request = request.identifier(), "drop request canceled before it began");
            return;
        }
        request.set_state(DropFlowFileState::Dropping);
        request.set_original_size(self.size());

        // Active heap first.
        let active_records: Vec<_> = guts
            .active
            .iter()
            .map(|entry| entry.record().clone())
            .collect();
        match self.drop_batch(&active_records, &requestor) {
            Ok(dropped) => {
                guts.active.clear();
                self.apply_size(SizeDelta::active(
                    -(dropped.object_count as i64),
                    -(dropped.byte_count as i64),
                ));
                request.add_dropped(dropped);
                request.set_current_size(self.size());
            }
            Err(err) => {
                error!(queue = %self.inner.identifier, error = %err, "failed to drop FlowFiles from the active queue");
                request.fail(format!("Failed to drop FlowFiles due to {err}"));
                return;
            }
        }

        if request.is_canceled() {
            info!(queue = %self.inner.identifier, request = request.identifier(), "drop request canceled");
            return;
        }

        // Then the staging buffer.
        let staged_records = guts.swap_buffer.clone();
        match self.drop_batch(&staged_records, &requestor) {
            Ok(dropped) => {
                guts.swap_buffer.clear();
                guts.swap_mode = false;
                self.apply_size(SizeDelta::swapped(
                    -(dropped.object_count as i64),
                    -(dropped.byte_count as i64),
                ));
                request.add_dropped(dropped);
                request.set_current_size(self.size());
            }
            Err(err) => {
                error!(queue = %self.inner.identifier, error = %err, "failed to drop FlowFiles from the swap staging buffer");
                request.fail(format!("Failed to drop FlowFiles due to {err}"));
                return;
            }
        }

        // Finally every persisted batch, oldest first.
        while let Some(batch) = guts.swap_locations.front() {
            if request.is_canceled() {
                info!(queue = %self.inner.identifier, request = request.identifier(), "drop request canceled");
                return;
            }
            let location = batch.location.clone();
            let swapped_in = match self
                .inner
                .swap_manager
                .swap_in(&location, &self.inner.identifier)
            {
                Ok(records) => {
                    self.inner.metrics.record_swap_in(records.len() as u64);
                    records
                }
                Err(err) => {
                    self.inner.metrics.incr_swap_in_failures();
                    error!(
                        queue = %self.inner.identifier,
                        location = %location,
                        error = %err,
                        "failed to swap in FlowFiles while dropping the queue"
                    );
                    self.report_event(
                        Severity::Error,
                        EVENT_CATEGORY_SWAP,
                        &format!(
                            "Failed to swap in FlowFiles from Swap File {location} in order to drop them; see logs for more information"
                        ),
                    );
                    request.fail(format!(
                        "Failed to swap in FlowFiles from Swap File {location} due to {err}"
                    ));
                    return;
                }
            };

            let count = swapped_in.len() as i64;
            let bytes: i64 = swapped_in.iter().map(|record| record.size() as i64).sum();
            match self.drop_batch(&swapped_in, &requestor) {
                Ok(dropped) => {
                    guts.swap_locations.pop_front();
                    self.apply_size(SizeDelta::swapped(
                        -(dropped.object_count as i64),
                        -(dropped.byte_count as i64),
                    ));
                    request.add_dropped(dropped);
                    request.set_current_size(self.size());
                }
                Err(err) => {
                    // The batch is already off disk; keep it reachable in
                    // the active heap rather than lose it.
                    guts.swap_locations.pop_front();
                    let ordering = guts.ordering.clone();
                    for record in swapped_in {
                        guts.active.push(HeapEntry::new(record, ordering.clone()));
                    }
                    self.apply_size(SizeDelta::swapped(-count, -bytes).and_active(count, bytes));
                    error!(queue = %self.inner.identifier, error = %err, "failed to drop swapped-in FlowFiles; records were returned to the queue");
                    request.fail(format!("Failed to drop FlowFiles due to {err}"));
                    return;
                }
            }
        }

        info!(
            queue = %self.inner.identifier,
            request = request.identifier(),
            dropped = %request.dropped_size(),
            requestor = request.requestor(),
            "drop request completed"
        );
        if !request.is_canceled() {
            request.set_state(DropFlowFileState::Complete);
        }
    }

    fn drop_batch(
        &self,
        records: &[Arc<FlowFileRecord>],
        requestor: &str,
    ) -> std::io::Result<QueueSize> {
        if records.is_empty() {
            return Ok(QueueSize::default());
        }

        let mut events = Vec::with_capacity(records.len());
        let mut repo_records = Vec::with_capacity(records.len());
        let mut bytes = 0_u64;
        for record in records {
            events.push(self.build_drop_event(record, requestor));
            repo_records.push(RepositoryRecord::delete(
                self.inner.identifier.as_str(),
                record.clone(),
            ));
            bytes += record.size();
        }
        self.inner.provenance_repository.register_events(events)?;
        self.inner.flowfile_repository.update_repository(repo_records)?;

        // Only now are the records gone. Releasing claims any earlier
        // double-decrements when a failed batch is returned to the queue
        // and dropped again.
        for record in records {
            if let Some(claim) = record.content_claim() {
                self.inner
                    .claim_manager
                    .decrement_claimant_count(&claim.resource_claim);
            }
        }

        self.inner.metrics.add_dropped(records.len() as u64);
        Ok(QueueSize::new(records.len() as u64, bytes))
    }

    fn build_drop_event(&self, record: &FlowFileRecord, requestor: &str) -> ProvenanceEvent {
        ProvenanceEvent::builder(ProvenanceEventType::Drop)
            .from_flowfile(record)
            .component_id(self.inner.identifier.as_str())
            .component_type("Connection")
            .source_queue_identifier(self.inner.identifier.as_str())
            .details(format!("FlowFile Queue emptied by {requestor}"))
            .build()
    }

    /// Re-registers swap files that survived a restart. Must run before
    /// the queue serves traffic. Returns the greatest record id seen
    /// across the recovered batches so the host can reseed its generator.
    pub fn recover_swapped_files(&self) -> Option<FlowFileId> {
        let mut guts = self.write_lock("recover_swapped_files");
        let locations = match self
            .inner
            .swap_manager
            .recover_swap_locations(&self.inner.identifier)
        {
            Ok(locations) => locations,
            Err(err) => {
                error!(
                    queue = %self.inner.identifier,
                    error = %err,
                    "failed to determine whether any swap files exist"
                );
                self.report_event(
                    Severity::Error,
                    EVENT_CATEGORY_SWAP,
                    &format!(
                        "Failed to determine whether or not any Swap Files exist for FlowFile Queue {}; see logs for more details",
                        self.inner.identifier
                    ),
                );
                return None;
            }
        };

        let mut max_id: Option<FlowFileId> = None;
        let mut recovered_count = 0_i64;
        let mut recovered_bytes = 0_i64;
        for location in locations {
            let summary = self.inner.swap_manager.swap_size(&location).and_then(|size| {
                let location_max = self.inner.swap_manager.max_record_id(&location)?;
                Ok((size, location_max))
            });
            match summary {
                Ok((size, location_max)) => {
                    recovered_count += size.object_count as i64;
                    recovered_bytes += size.byte_count as i64;
                    if let Some(id) = location_max {
                        max_id = Some(max_id.map_or(id, |current| current.max(id)));
                    }
                    guts.swap_locations.push_back(SwappedBatch {
                        location,
                        size: Some(size),
                    });
                }
                Err(err) => {
                    error!(
                        queue = %self.inner.identifier,
                        location = %location,
                        error = %err,
                        "failed to read swap file summary; the file appears to be corrupt"
                    );
                    self.report_event(
                        Severity::Error,
                        EVENT_CATEGORY_SWAP,
                        &format!(
                            "Failed to recover FlowFiles from Swap File {location}; the file appears to be corrupt. See logs for more details"
                        ),
                    );
                    guts.swap_locations.push_back(SwappedBatch {
                        location,
                        size: None,
                    });
                }
            }
        }

        if recovered_count > 0 {
            self.apply_size(SizeDelta::swapped(recovered_count, recovered_bytes));
        }
        if !guts.swap_locations.is_empty() {
            // New puts must stage behind the recovered backlog.
            guts.swap_mode = true;
        }
        debug!(
            queue = %self.inner.identifier,
            locations = guts.swap_locations.len(),
            records = recovered_count,
            "recovered swap files"
        );
        max_id
    }

    /// Administrative: removes every persisted swap file the swap manager
    /// holds. Intended for use before the queue serves traffic.
    pub fn purge_swap_files(&self) {
        self.inner.swap_manager.purge();
    }

    /// Refills the active heap from staged and persisted overflow, oldest
    /// persisted batch first so records come back in the order they left.
    ///
    /// Must be called with the write lock held.
    fn migrate_swap_to_active(&self, guts: &mut QueueGuts) {
        // Saturating: a threshold below the persist batch size must still
        // migrate once the heap drains, or buffered records are stranded.
        let headroom = self
            .inner
            .swap_threshold
            .saturating_sub(SWAP_RECORD_BATCH_SIZE);
        if guts.active.len() > headroom {
            // Enough work in memory already.
            return;
        }

        // Persisted batches take precedence over the staging buffer so that
        // the oldest swapped-out records are served first.
        if let Some(batch) = guts.swap_locations.front() {
            let location = batch.location.clone();
            let known_size = batch.size;
            match self
                .inner
                .swap_manager
                .swap_in(&location, &self.inner.identifier)
            {
                Ok(records) => {
                    guts.swap_locations.pop_front();
                    let count = records.len() as i64;
                    let bytes: i64 = records.iter().map(|record| record.size() as i64).sum();
                    let ordering = guts.ordering.clone();
                    for record in records {
                        guts.active.push(HeapEntry::new(record, ordering.clone()));
                    }
                    self.apply_size(SizeDelta::swapped(-count, -bytes).and_active(count, bytes));
                    self.inner.metrics.record_swap_in(count as u64);
                }
                Err(err) if err.is_not_found() => {
                    guts.swap_locations.pop_front();
                    self.inner.metrics.incr_swap_in_failures();
                    error!(
                        queue = %self.inner.identifier,
                        location = %location,
                        "failed to swap in FlowFiles because the swap file can no longer be found"
                    );
                    self.report_event(
                        Severity::Error,
                        EVENT_CATEGORY_SWAP,
                        &format!(
                            "Failed to swap in FlowFiles from Swap File {location} because the Swap File can no longer be found"
                        ),
                    );
                    self.forget_swapped_batch(known_size);
                }
                Err(err) => {
                    self.inner.metrics.incr_swap_in_failures();
                    error!(
                        queue = %self.inner.identifier,
                        location = %location,
                        error = %err,
                        "failed to swap in FlowFiles; the swap file appears to be corrupt"
                    );
                    match self.inner.corrupt_swap_policy {
                        CorruptSwapPolicy::Discard => {
                            guts.swap_locations.pop_front();
                            self.report_event(
                                Severity::Error,
                                EVENT_CATEGORY_SWAP,
                                &format!(
                                    "Failed to swap in FlowFiles from Swap File {location}; the Swap File appears to be corrupt and was discarded. Some FlowFiles in the queue may not be accessible. See logs for more information."
                                ),
                            );
                            self.forget_swapped_batch(known_size);
                        }
                        CorruptSwapPolicy::Retain => {
                            if let Some(batch) = guts.swap_locations.pop_front() {
                                guts.swap_locations.push_back(batch);
                            }
                            self.report_event(
                                Severity::Error,
                                EVENT_CATEGORY_SWAP,
                                &format!(
                                    "Failed to swap in FlowFiles from Swap File {location}; the Swap File appears to be corrupt and will be retried later. See logs for more information."
                                ),
                            );
                        }
                    }
                }
            }
            self.maybe_leave_swap_mode(guts);
            return;
        }

        // Common case: nothing is swapped at all.
        let sizes = self.inner.size.load();
        if sizes.swapped_count == 0 && guts.swap_buffer.is_empty() {
            return;
        }
        if sizes.swapped_count > guts.swap_buffer.len() as u64 {
            // Records are persisted beyond what the buffer holds; wait for
            // them to swap back in before migrating newer arrivals.
            return;
        }

        let take = (self.inner.swap_threshold - guts.active.len()).min(guts.swap_buffer.len());
        if take > 0 {
            let mut migrated_bytes = 0_i64;
            let ordering = guts.ordering.clone();
            for record in guts.swap_buffer.drain(..take) {
                migrated_bytes += record.size() as i64;
                guts.active.push(HeapEntry::new(record, ordering.clone()));
            }
            self.apply_size(
                SizeDelta::swapped(-(take as i64), -migrated_bytes)
                    .and_active(take as i64, migrated_bytes),
            );
        }
        self.maybe_leave_swap_mode(guts);
    }

    /// Flushes full batches of staged records to the swap manager,
    /// choosing the lowest-priority records across the active heap and the
    /// buffer as victims so the best records stay in memory.
    ///
    /// Must be called with the write lock held.
    fn write_swap_files_if_needed(&self, guts: &mut QueueGuts) {
        if guts.swap_buffer.len() < SWAP_RECORD_BATCH_SIZE {
            return;
        }
        let num_files = guts.swap_buffer.len() / SWAP_RECORD_BATCH_SIZE;
        let original_buffer_count = guts.swap_buffer.len();
        let original_buffer_bytes: i64 = guts
            .swap_buffer
            .iter()
            .map(|record| record.size() as i64)
            .sum();

        // Merge the heap and the buffer into one worst-first heap.
        let ordering = guts.ordering.clone();
        let mut merged: BinaryHeap<Reverse<HeapEntry>> =
            BinaryHeap::with_capacity(guts.active.len() + guts.swap_buffer.len());
        for entry in std::mem::take(&mut guts.active) {
            merged.push(Reverse(entry));
        }
        for record in guts.swap_buffer.drain(..) {
            merged.push(Reverse(HeapEntry::new(record, ordering.clone())));
        }

        let mut swapped_out_count = 0_i64;
        let mut swapped_out_bytes = 0_i64;
        let mut new_batches = Vec::with_capacity(num_files);
        for _ in 0..num_files {
            let mut batch = Vec::with_capacity(SWAP_RECORD_BATCH_SIZE);
            let mut batch_bytes = 0_u64;
            for _ in 0..SWAP_RECORD_BATCH_SIZE {
                let Some(Reverse(entry)) = merged.pop() else {
                    break;
                };
                let record = entry.into_record();
                batch_bytes += record.size();
                batch.push(record);
            }
            // The merged heap yields worst-first; persist in priority order.
            batch.reverse();

            match self.inner.swap_manager.swap_out(&batch, &self.inner.identifier) {
                Ok(location) => {
                    swapped_out_count += batch.len() as i64;
                    swapped_out_bytes += batch_bytes as i64;
                    self.inner.metrics.record_swap_out(batch.len() as u64);
                    new_batches.push(SwappedBatch {
                        location,
                        size: Some(QueueSize::new(batch.len() as u64, batch_bytes)),
                    });
                }
                Err(err) => {
                    // The records stay in memory; the next staging event
                    // will try again.
                    for record in batch {
                        merged.push(Reverse(HeapEntry::new(record, ordering.clone())));
                    }
                    self.inner.metrics.incr_swap_out_failures();
                    error!(
                        queue = %self.inner.identifier,
                        error = %err,
                        "failed to write a swap file; records remain in memory"
                    );
                    self.report_event(
                        Severity::Error,
                        EVENT_CATEGORY_OVERFLOW,
                        &format!(
                            "FlowFile Queue with identifier {} has {} FlowFiles queued up. Attempted to spill FlowFile information over to disk in order to avoid exhausting memory but failed to write the information to disk. See logs for more information.",
                            self.inner.identifier,
                            self.size().object_count
                        ),
                    );
                    break;
                }
            }
        }

        // Whatever exceeds the threshold stays staged in memory; the rest
        // refills the active heap.
        let mut staged = Vec::new();
        let mut staged_bytes = 0_i64;
        while merged.len() > self.inner.swap_threshold {
            let Some(Reverse(entry)) = merged.pop() else {
                break;
            };
            let record = entry.into_record();
            staged_bytes += record.size() as i64;
            staged.push(record);
        }
        staged.reverse();
        guts.swap_buffer = staged;

        let mut active_bytes = 0_u64;
        let mut active = BinaryHeap::with_capacity(merged.len());
        for Reverse(entry) in merged {
            active_bytes += entry.record().size();
            active.push(entry);
        }
        guts.active = active;

        let staged_count_delta = guts.swap_buffer.len() as i64 - original_buffer_count as i64;
        let staged_bytes_delta = staged_bytes - original_buffer_bytes;
        let (_, clamped) = self.inner.size.commit_swap_shuffle(
            guts.active.len() as u64,
            active_bytes,
            staged_count_delta + swapped_out_count,
            staged_bytes_delta + swapped_out_bytes,
        );
        if clamped {
            self.report_accounting_correction();
        }
        guts.swap_locations.extend(new_batches);
    }

    fn maybe_leave_swap_mode(&self, guts: &mut QueueGuts) {
        if guts.swap_buffer.is_empty()
            && guts.swap_locations.is_empty()
            && self.inner.size.load().swapped_count == 0
        {
            guts.swap_mode = false;
        }
    }

    fn forget_swapped_batch(&self, size: Option<QueueSize>) {
        match size {
            Some(size) => {
                self.apply_size(SizeDelta::swapped(
                    -(size.object_count as i64),
                    -(size.byte_count as i64),
                ));
            }
            None => {
                warn!(
                    queue = %self.inner.identifier,
                    "discarded a swap file of unknown size; the queue size may be overstated until restart"
                );
            }
        }
    }

    /// Must be called with the write lock held.
    fn determine_if_full(&self) -> bool {
        let max_count = self.inner.max_object_count.load(AtomicOrdering::Acquire);
        let max_bytes = self.inner.max_byte_count.load(AtomicOrdering::Acquire);
        if max_count == 0 && max_bytes == 0 {
            return false;
        }
        let size = self.inner.size.load().total();
        (max_count > 0 && size.object_count >= max_count)
            || (max_bytes > 0 && size.byte_count >= max_bytes)
    }

    fn refresh_queue_full(&self) {
        self.inner
            .queue_full
            .store(self.determine_if_full(), AtomicOrdering::Release);
    }

    fn notify_destination(&self) {
        if self.inner.endpoints.destination_strategy == SchedulingStrategy::EventDriven {
            self.inner
                .scheduler
                .register_event(&self.inner.endpoints.destination_id);
        }
    }

    fn notify_source(&self) {
        if self.inner.endpoints.source_strategy == SchedulingStrategy::EventDriven {
            self.inner
                .scheduler
                .register_event(&self.inner.endpoints.source_id);
        }
    }

    fn apply_size(&self, delta: SizeDelta) {
        let (_, clamped) = self.inner.size.apply(delta);
        if clamped {
            self.report_accounting_correction();
        }
    }

    fn report_accounting_correction(&self) {
        self.inner.metrics.incr_accounting_corrections();
        warn!(
            queue = %self.inner.identifier,
            "queue accounting would have gone negative and was clamped to zero"
        );
        self.report_event(
            Severity::Warning,
            EVENT_CATEGORY_ACCOUNTING,
            &format!(
                "Size accounting for FlowFile Queue {} was corrected after an impossible decrement; this indicates a bug in a collaborating component",
                self.inner.identifier
            ),
        );
    }

    fn report_event(&self, severity: Severity, category: &str, message: &str) {
        self.inner
            .event_reporter
            .report_event(severity, category, message);
    }

    fn write_lock(&self, operation: &'static str) -> RwLockWriteGuard<'_, QueueGuts> {
        let start = Instant::now();
        let guard = self.inner.guts.write();
        let waited = start.elapsed();
        if waited >= LOCK_CONTENTION_WARN {
            self.inner.metrics.incr_lock_contention();
            warn!(
                queue = %self.inner.identifier,
                operation,
                waited_ms = waited.as_millis() as u64,
                "queue write lock was contended"
            );
        }
        guard
    }
}

impl std::fmt::Debug for FlowFileQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowFileQueue")
            .field("identifier", &self.inner.identifier)
            .field("size", &self.size())
            .finish()
    }
}

fn is_expired(record: &FlowFileRecord, expiration_ms: u64, now: i64) -> bool {
    if expiration_ms == 0 {
        return false;
    }
    now >= record.entry_date_ms() + expiration_ms as i64
}
