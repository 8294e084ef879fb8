//! Deterministic collaborator fixtures shared by unit and integration
//! tests.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::accounting::QueueSize;
use crate::config::{FlowFileId, QueueConfig};
use crate::drop_request::{DropFlowFileRequest, DropFlowFileState};
use crate::error::{QueueError, QueueResult};
use crate::events::{
    ConnectionEndpoints, EventReporter, ProcessScheduler, SchedulingStrategy, Severity,
};
use crate::flowfile::{ContentClaim, FlowFileRecord, ResourceClaim};
use crate::queue::{FlowFileQueue, QueueCollaborators};
use crate::repository::{
    FlowFileRepository, ProvenanceEvent, ProvenanceEventRepository, RepositoryRecord,
    ResourceClaimManager,
};
use crate::swap::{SwapLocation, SwapManager};

pub fn record(id: u64, size: u64) -> Arc<FlowFileRecord> {
    Arc::new(FlowFileRecord::builder(FlowFileId::new(id)).size(size).build())
}

pub fn record_with_entry_date(id: u64, size: u64, entry_date_ms: i64) -> Arc<FlowFileRecord> {
    Arc::new(
        FlowFileRecord::builder(FlowFileId::new(id))
            .entry_date_ms(entry_date_ms)
            .size(size)
            .build(),
    )
}

pub fn record_with_penalty(id: u64, size: u64, penalty_expiration_ms: i64) -> Arc<FlowFileRecord> {
    Arc::new(
        FlowFileRecord::builder(FlowFileId::new(id))
            .penalty_expiration_ms(penalty_expiration_ms)
            .size(size)
            .build(),
    )
}

pub fn record_with_claim(id: u64, size: u64, resource_id: &str) -> Arc<FlowFileRecord> {
    let claim = ContentClaim::new(Arc::new(ResourceClaim::new("default", "1", resource_id)), 0);
    Arc::new(
        FlowFileRecord::builder(FlowFileId::new(id))
            .size(size)
            .content_claim(claim, 0)
            .build(),
    )
}

/// Scheduler that records every wakeup it receives.
#[derive(Default)]
pub struct RecordingScheduler {
    events: Mutex<Vec<String>>,
}

impl RecordingScheduler {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn events_for(&self, component_id: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|id| id.as_str() == component_id)
            .count()
    }
}

impl ProcessScheduler for RecordingScheduler {
    fn register_event(&self, component_id: &str) {
        self.events.lock().push(component_id.to_string());
    }
}

/// Event reporter that records every report it receives.
#[derive(Default)]
pub struct RecordingEventReporter {
    events: Mutex<Vec<(Severity, String, String)>>,
}

impl RecordingEventReporter {
    pub fn count(&self, severity: Severity) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|(s, _, _)| *s == severity)
            .count()
    }

    pub fn messages(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .map(|(_, _, message)| message.clone())
            .collect()
    }
}

impl EventReporter for RecordingEventReporter {
    fn report_event(&self, severity: Severity, category: &str, message: &str) {
        self.events
            .lock()
            .push((severity, category.to_string(), message.to_string()));
    }
}

/// Provenance repository that retains registered events.
#[derive(Default)]
pub struct RecordingProvenanceRepository {
    events: Mutex<Vec<ProvenanceEvent>>,
}

impl RecordingProvenanceRepository {
    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }

    pub fn events(&self) -> Vec<ProvenanceEvent> {
        self.events.lock().clone()
    }
}

impl ProvenanceEventRepository for RecordingProvenanceRepository {
    fn register_events(&self, events: Vec<ProvenanceEvent>) -> io::Result<()> {
        self.events.lock().extend(events);
        Ok(())
    }
}

/// Flow file repository that retains updates and can fail on demand.
#[derive(Default)]
pub struct RecordingFlowFileRepository {
    records: Mutex<Vec<RepositoryRecord>>,
    fail_next_update: AtomicBool,
}

impl RecordingFlowFileRepository {
    /// Makes the next `update_repository` call fail.
    pub fn inject_failure(&self) {
        self.fail_next_update.store(true, Ordering::Release);
    }

    pub fn deleted_count(&self) -> usize {
        self.records.lock().len()
    }
}

impl FlowFileRepository for RecordingFlowFileRepository {
    fn update_repository(&self, records: Vec<RepositoryRecord>) -> io::Result<()> {
        if self.fail_next_update.swap(false, Ordering::AcqRel) {
            return Err(io::Error::other("injected repository failure"));
        }
        self.records.lock().extend(records);
        Ok(())
    }
}

/// Claim manager that counts decrements per resource claim id.
#[derive(Default)]
pub struct CountingClaimManager {
    decrements: Mutex<HashMap<String, u64>>,
}

impl CountingClaimManager {
    pub fn decrements_for(&self, resource_id: &str) -> u64 {
        self.decrements.lock().get(resource_id).copied().unwrap_or(0)
    }

    pub fn total_decrements(&self) -> u64 {
        self.decrements.lock().values().sum()
    }
}

impl ResourceClaimManager for CountingClaimManager {
    fn decrement_claimant_count(&self, claim: &ResourceClaim) {
        *self.decrements.lock().entry(claim.id.clone()).or_insert(0) += 1;
    }
}

#[derive(Default)]
struct SwapState {
    batches: HashMap<String, Vec<Arc<FlowFileRecord>>>,
    order: HashMap<String, Vec<SwapLocation>>,
    corrupt: HashSet<String>,
    swap_in_log: Vec<SwapLocation>,
}

/// In-memory [`SwapManager`] with call recording and failure injection.
///
/// An optional gate lets a test hold a swap-in mid-flight: with the gate
/// enabled, each `swap_in` consumes one permit and blocks until a permit is
/// granted. The call counter is bumped before blocking, so a test can
/// observe a worker parked inside a swap-in.
#[derive(Default)]
pub struct InMemorySwapManager {
    state: Mutex<SwapState>,
    sequence: AtomicU64,
    swap_out_calls: AtomicU64,
    swap_in_calls: AtomicU64,
    fail_next_swap_out: AtomicBool,
    gate_enabled: AtomicBool,
    permits: Mutex<u64>,
    permit_granted: Condvar,
}

impl InMemorySwapManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn swap_out_calls(&self) -> u64 {
        self.swap_out_calls.load(Ordering::Acquire)
    }

    pub fn swap_in_calls(&self) -> u64 {
        self.swap_in_calls.load(Ordering::Acquire)
    }

    pub fn swap_in_log(&self) -> Vec<SwapLocation> {
        self.state.lock().swap_in_log.clone()
    }

    /// Makes the next `swap_out` call fail with an I/O error.
    pub fn fail_next_swap_out(&self) {
        self.fail_next_swap_out.store(true, Ordering::Release);
    }

    /// Marks a stored batch as corrupt: `swap_in` will fail, the data
    /// stays.
    pub fn mark_corrupt(&self, location: &SwapLocation) {
        self.state.lock().corrupt.insert(location.as_str().to_string());
    }

    pub fn clear_corrupt(&self, location: &SwapLocation) {
        self.state.lock().corrupt.remove(location.as_str());
    }

    /// Forgets a stored batch, as if the file disappeared out from under
    /// the queue.
    pub fn mark_missing(&self, location: &SwapLocation) {
        let mut state = self.state.lock();
        state.batches.remove(location.as_str());
        for locations in state.order.values_mut() {
            locations.retain(|known| known != location);
        }
    }

    /// Turns on the swap-in gate. Until permits are granted, every
    /// `swap_in` blocks after bumping the call counter.
    pub fn enable_swap_in_gate(&self) {
        self.gate_enabled.store(true, Ordering::Release);
    }

    pub fn grant_swap_in_permits(&self, permits: u64) {
        *self.permits.lock() += permits;
        self.permit_granted.notify_all();
    }

    fn acquire_permit(&self) {
        if !self.gate_enabled.load(Ordering::Acquire) {
            return;
        }
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.permit_granted.wait(&mut permits);
        }
        *permits -= 1;
    }
}

impl SwapManager for InMemorySwapManager {
    fn swap_out(
        &self,
        records: &[Arc<FlowFileRecord>],
        queue_identifier: &str,
    ) -> QueueResult<SwapLocation> {
        self.swap_out_calls.fetch_add(1, Ordering::AcqRel);
        if self.fail_next_swap_out.swap(false, Ordering::AcqRel) {
            return Err(QueueError::Io(io::Error::other("injected swap-out failure")));
        }

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let location = SwapLocation::new(format!("mem://{queue_identifier}/{sequence:020}"));
        let mut state = self.state.lock();
        state
            .batches
            .insert(location.as_str().to_string(), records.to_vec());
        state
            .order
            .entry(queue_identifier.to_string())
            .or_default()
            .push(location.clone());
        Ok(location)
    }

    fn swap_in(
        &self,
        location: &SwapLocation,
        _queue_identifier: &str,
    ) -> QueueResult<Vec<Arc<FlowFileRecord>>> {
        self.swap_in_calls.fetch_add(1, Ordering::AcqRel);
        self.acquire_permit();

        let mut state = self.state.lock();
        if state.corrupt.contains(location.as_str()) {
            return Err(QueueError::corrupt(format!(
                "injected corruption for {location}"
            )));
        }
        let Some(records) = state.batches.remove(location.as_str()) else {
            return Err(QueueError::SwapFileNotFound(location.to_string()));
        };
        for locations in state.order.values_mut() {
            locations.retain(|known| known != location);
        }
        state.swap_in_log.push(location.clone());
        Ok(records)
    }

    fn swap_size(&self, location: &SwapLocation) -> QueueResult<QueueSize> {
        let state = self.state.lock();
        if state.corrupt.contains(location.as_str()) {
            return Err(QueueError::corrupt(format!(
                "injected corruption for {location}"
            )));
        }
        let Some(records) = state.batches.get(location.as_str()) else {
            return Err(QueueError::SwapFileNotFound(location.to_string()));
        };
        Ok(QueueSize::new(
            records.len() as u64,
            records.iter().map(|record| record.size()).sum(),
        ))
    }

    fn max_record_id(&self, location: &SwapLocation) -> QueueResult<Option<FlowFileId>> {
        let state = self.state.lock();
        let Some(records) = state.batches.get(location.as_str()) else {
            return Err(QueueError::SwapFileNotFound(location.to_string()));
        };
        Ok(records.iter().map(|record| record.id()).max())
    }

    fn recover_swap_locations(&self, queue_identifier: &str) -> QueueResult<Vec<SwapLocation>> {
        Ok(self
            .state
            .lock()
            .order
            .get(queue_identifier)
            .cloned()
            .unwrap_or_default())
    }

    fn purge(&self) {
        let mut state = self.state.lock();
        state.batches.clear();
        state.order.clear();
        state.corrupt.clear();
    }
}

/// A queue wired to recording fixtures.
pub struct TestQueue {
    pub queue: FlowFileQueue,
    pub swap_manager: Arc<InMemorySwapManager>,
    pub scheduler: Arc<RecordingScheduler>,
    pub event_reporter: Arc<RecordingEventReporter>,
    pub provenance: Arc<RecordingProvenanceRepository>,
    pub repository: Arc<RecordingFlowFileRepository>,
    pub claim_manager: Arc<CountingClaimManager>,
}

impl TestQueue {
    pub fn new(identifier: &str) -> Self {
        Self::with_config(QueueConfig::new(identifier))
    }

    pub fn with_config(config: QueueConfig) -> Self {
        Self::with_swap_manager(config, InMemorySwapManager::new())
    }

    pub fn with_swap_manager(config: QueueConfig, swap_manager: Arc<InMemorySwapManager>) -> Self {
        let scheduler = Arc::new(RecordingScheduler::default());
        let event_reporter = Arc::new(RecordingEventReporter::default());
        let provenance = Arc::new(RecordingProvenanceRepository::default());
        let repository = Arc::new(RecordingFlowFileRepository::default());
        let claim_manager = Arc::new(CountingClaimManager::default());

        let endpoints = ConnectionEndpoints::new(
            format!("{}-source", config.identifier),
            SchedulingStrategy::EventDriven,
            format!("{}-destination", config.identifier),
            SchedulingStrategy::EventDriven,
        );
        let queue = FlowFileQueue::new(
            config,
            endpoints,
            QueueCollaborators {
                swap_manager: swap_manager.clone(),
                flowfile_repository: repository.clone(),
                provenance_repository: provenance.clone(),
                claim_manager: claim_manager.clone(),
                scheduler: scheduler.clone(),
                event_reporter: event_reporter.clone(),
            },
        )
        .expect("valid test queue config");

        Self {
            queue,
            swap_manager,
            scheduler,
            event_reporter,
            provenance,
            repository,
            claim_manager,
        }
    }

    pub fn source_events(&self) -> usize {
        self.scheduler
            .events_for(&format!("{}-source", self.queue.identifier()))
    }

    pub fn destination_events(&self) -> usize {
        self.scheduler
            .events_for(&format!("{}-destination", self.queue.identifier()))
    }
}

/// Spins until the request reaches a terminal state or the timeout lapses,
/// returning the last state observed.
pub fn await_terminal(request: &DropFlowFileRequest, timeout: Duration) -> DropFlowFileState {
    let deadline = Instant::now() + timeout;
    loop {
        let state = request.state();
        if state.is_terminal() || Instant::now() >= deadline {
            return state;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// Spins until `predicate` holds or the timeout lapses. Returns whether the
/// predicate held.
pub fn await_condition(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if predicate() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}
