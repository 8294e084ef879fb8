use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::accounting::QueueSize;
use crate::flowfile::now_millis;

/// Terminal-state retention before a finished request is evicted from the
/// request map.
const COMPLETED_REQUEST_TTL_MS: i64 = 5 * 60 * 1_000;

/// Map occupancy above which eviction is attempted at all.
const REQUEST_MAP_PRUNE_THRESHOLD: usize = 10;

/// Lifecycle of a drop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropFlowFileState {
    /// Created; the worker has not yet acquired the queue lock.
    Waiting,
    /// The worker is removing records.
    Dropping,
    /// Every record the request saw has been dropped.
    Complete,
    /// Canceled by the caller; progress counters reflect partial work.
    Canceled,
    /// The worker hit an unrecoverable error; see the failure reason.
    Failure,
}

impl DropFlowFileState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Canceled | Self::Failure)
    }

    fn encode(self) -> u8 {
        match self {
            Self::Waiting => 0,
            Self::Dropping => 1,
            Self::Complete => 2,
            Self::Canceled => 3,
            Self::Failure => 4,
        }
    }

    fn decode(raw: u8) -> Self {
        match raw {
            0 => Self::Waiting,
            1 => Self::Dropping,
            2 => Self::Complete,
            3 => Self::Canceled,
            _ => Self::Failure,
        }
    }
}

impl Display for DropFlowFileState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "Waiting for Queue Lock"),
            Self::Dropping => write!(f, "Dropping FlowFiles"),
            Self::Complete => write!(f, "Complete"),
            Self::Canceled => write!(f, "Canceled"),
            Self::Failure => write!(f, "Failed"),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct DropProgress {
    original: QueueSize,
    current: QueueSize,
    dropped: QueueSize,
}

/// A cancellable request to empty the queue.
///
/// The owning worker is the only writer of the progress fields; the cancel
/// caller only flips the state. Readers may snapshot any field at any time.
#[derive(Debug)]
pub struct DropFlowFileRequest {
    identifier: String,
    requestor: String,
    state: AtomicU8,
    progress: Mutex<DropProgress>,
    failure_reason: Mutex<Option<String>>,
    last_updated_ms: AtomicU64,
}

impl DropFlowFileRequest {
    pub(crate) fn new(identifier: impl Into<String>, requestor: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            requestor: requestor.into(),
            state: AtomicU8::new(DropFlowFileState::Waiting.encode()),
            progress: Mutex::new(DropProgress::default()),
            failure_reason: Mutex::new(None),
            last_updated_ms: AtomicU64::new(now_millis() as u64),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn requestor(&self) -> &str {
        &self.requestor
    }

    pub fn state(&self) -> DropFlowFileState {
        DropFlowFileState::decode(self.state.load(Ordering::Acquire))
    }

    /// Size of the queue when the worker began dropping.
    pub fn original_size(&self) -> QueueSize {
        self.progress.lock().original
    }

    /// Size of the queue as of the last progress update.
    pub fn current_size(&self) -> QueueSize {
        self.progress.lock().current
    }

    /// Records removed so far.
    pub fn dropped_size(&self) -> QueueSize {
        self.progress.lock().dropped
    }

    pub fn failure_reason(&self) -> Option<String> {
        self.failure_reason.lock().clone()
    }

    /// Millisecond timestamp of the last state or progress change.
    pub fn last_updated_ms(&self) -> u64 {
        self.last_updated_ms.load(Ordering::Acquire)
    }

    pub(crate) fn set_state(&self, state: DropFlowFileState) {
        self.state.store(state.encode(), Ordering::Release);
        self.touch();
    }

    pub(crate) fn fail(&self, reason: impl Into<String>) {
        *self.failure_reason.lock() = Some(reason.into());
        self.set_state(DropFlowFileState::Failure);
    }

    /// Flips the request to `Canceled` unless it already finished. Returns
    /// whether the cancellation took effect.
    pub(crate) fn cancel(&self) -> bool {
        loop {
            let current = self.state.load(Ordering::Acquire);
            if DropFlowFileState::decode(current).is_terminal() {
                return false;
            }
            if self
                .state
                .compare_exchange(
                    current,
                    DropFlowFileState::Canceled.encode(),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                self.touch();
                return true;
            }
        }
    }

    pub(crate) fn is_canceled(&self) -> bool {
        self.state() == DropFlowFileState::Canceled
    }

    pub(crate) fn set_original_size(&self, size: QueueSize) {
        self.progress.lock().original = size;
        self.touch();
    }

    pub(crate) fn set_current_size(&self, size: QueueSize) {
        self.progress.lock().current = size;
        self.touch();
    }

    pub(crate) fn add_dropped(&self, size: QueueSize) {
        let mut progress = self.progress.lock();
        progress.dropped = progress.dropped.add(size);
        drop(progress);
        self.touch();
    }

    fn touch(&self) {
        self.last_updated_ms
            .store(now_millis() as u64, Ordering::Release);
    }
}

/// Registry of in-flight and recently finished drop requests.
#[derive(Debug, Default)]
pub(crate) struct DropRequestMap {
    requests: Mutex<HashMap<String, Arc<DropFlowFileRequest>>>,
}

impl DropRequestMap {
    /// Evicts terminal requests that have been idle past their retention,
    /// once the map is big enough to bother.
    pub fn prune(&self) {
        let mut requests = self.requests.lock();
        if requests.len() <= REQUEST_MAP_PRUNE_THRESHOLD {
            return;
        }
        let now = now_millis();
        requests.retain(|_, request| {
            !(request.state().is_terminal()
                && now - request.last_updated_ms() as i64 > COMPLETED_REQUEST_TTL_MS)
        });
    }

    pub fn insert(&self, request: Arc<DropFlowFileRequest>) {
        self.requests
            .lock()
            .insert(request.identifier().to_string(), request);
    }

    pub fn get(&self, identifier: &str) -> Option<Arc<DropFlowFileRequest>> {
        self.requests.lock().get(identifier).cloned()
    }

    pub fn remove(&self, identifier: &str) -> Option<Arc<DropFlowFileRequest>> {
        self.requests.lock().remove(identifier)
    }
}
