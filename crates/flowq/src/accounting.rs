use std::fmt::{self, Display};
use std::sync::Arc;

use arc_swap::ArcSwap;

/// An object count paired with a byte count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueSize {
    pub object_count: u64,
    pub byte_count: u64,
}

impl QueueSize {
    pub const fn new(object_count: u64, byte_count: u64) -> Self {
        Self {
            object_count,
            byte_count,
        }
    }

    pub const fn is_empty(&self) -> bool {
        self.object_count == 0
    }

    pub fn add(self, other: QueueSize) -> QueueSize {
        QueueSize {
            object_count: self.object_count + other.object_count,
            byte_count: self.byte_count + other.byte_count,
        }
    }
}

impl Display for QueueSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} FlowFiles ({} bytes)", self.object_count, self.byte_count)
    }
}

/// The six queue counters, observed as one immutable value.
///
/// Every record the queue knows about is in exactly one of the three
/// partitions: active (in the in-memory heap), swapped (staged in the
/// overflow buffer or persisted to a swap file), or unacknowledged (handed
/// to a consumer and not yet acknowledged).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowFileQueueSize {
    pub active_count: u64,
    pub active_bytes: u64,
    pub swapped_count: u64,
    pub swapped_bytes: u64,
    pub unacknowledged_count: u64,
    pub unacknowledged_bytes: u64,
}

impl FlowFileQueueSize {
    pub fn total(&self) -> QueueSize {
        QueueSize::new(
            self.active_count + self.swapped_count + self.unacknowledged_count,
            self.active_bytes + self.swapped_bytes + self.unacknowledged_bytes,
        )
    }

    pub fn active(&self) -> QueueSize {
        QueueSize::new(self.active_count, self.active_bytes)
    }

    pub fn swapped(&self) -> QueueSize {
        QueueSize::new(self.swapped_count, self.swapped_bytes)
    }

    pub fn unacknowledged(&self) -> QueueSize {
        QueueSize::new(self.unacknowledged_count, self.unacknowledged_bytes)
    }

    pub fn is_empty(&self) -> bool {
        self.active_count == 0 && self.swapped_count == 0 && self.unacknowledged_count == 0
    }
}

/// Signed adjustment applied to the counters as one unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct SizeDelta {
    pub active_count: i64,
    pub active_bytes: i64,
    pub swapped_count: i64,
    pub swapped_bytes: i64,
    pub unacknowledged_count: i64,
    pub unacknowledged_bytes: i64,
}

impl SizeDelta {
    pub fn active(count: i64, bytes: i64) -> Self {
        Self {
            active_count: count,
            active_bytes: bytes,
            ..Self::default()
        }
    }

    pub fn swapped(count: i64, bytes: i64) -> Self {
        Self {
            swapped_count: count,
            swapped_bytes: bytes,
            ..Self::default()
        }
    }

    pub fn unacknowledged(count: i64, bytes: i64) -> Self {
        Self {
            unacknowledged_count: count,
            unacknowledged_bytes: bytes,
            ..Self::default()
        }
    }

    pub fn and_active(mut self, count: i64, bytes: i64) -> Self {
        self.active_count += count;
        self.active_bytes += bytes;
        self
    }

    pub fn and_unacknowledged(mut self, count: i64, bytes: i64) -> Self {
        self.unacknowledged_count += count;
        self.unacknowledged_bytes += bytes;
        self
    }

    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

fn apply_field(value: u64, delta: i64, clamped: &mut bool) -> u64 {
    if delta >= 0 {
        value.saturating_add(delta as u64)
    } else {
        let decrement = delta.unsigned_abs();
        if decrement > value {
            *clamped = true;
            0
        } else {
            value - decrement
        }
    }
}

/// Lock-free accounting for the queue counters.
///
/// The six counters live in one immutable tuple behind an atomic pointer.
/// Every mutation loads the current tuple, builds a new one with the delta
/// applied, and commits it with compare-and-swap, retrying on contention.
/// Readers always observe a consistent tuple, so
/// `total = active + swapped + unacknowledged` holds at every observation.
///
/// A delta that would push a counter below zero indicates a collaborator
/// bug (for example acknowledging a record the queue never handed out); the
/// counter is pinned at zero and the caller is told so it can report it.
#[derive(Debug)]
pub(crate) struct SizeAccounting {
    current: ArcSwap<FlowFileQueueSize>,
}

impl SizeAccounting {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(FlowFileQueueSize::default()),
        }
    }

    pub fn load(&self) -> FlowFileQueueSize {
        **self.current.load()
    }

    /// Applies `delta` atomically. Returns the new value and whether any
    /// counter had to be clamped at zero.
    pub fn apply(&self, delta: SizeDelta) -> (FlowFileQueueSize, bool) {
        let mut current = self.current.load_full();
        loop {
            let mut clamped = false;
            let next = FlowFileQueueSize {
                active_count: apply_field(current.active_count, delta.active_count, &mut clamped),
                active_bytes: apply_field(current.active_bytes, delta.active_bytes, &mut clamped),
                swapped_count: apply_field(
                    current.swapped_count,
                    delta.swapped_count,
                    &mut clamped,
                ),
                swapped_bytes: apply_field(
                    current.swapped_bytes,
                    delta.swapped_bytes,
                    &mut clamped,
                ),
                unacknowledged_count: apply_field(
                    current.unacknowledged_count,
                    delta.unacknowledged_count,
                    &mut clamped,
                ),
                unacknowledged_bytes: apply_field(
                    current.unacknowledged_bytes,
                    delta.unacknowledged_bytes,
                    &mut clamped,
                ),
            };
            let previous = self.current.compare_and_swap(&current, Arc::new(next));
            if Arc::ptr_eq(&*previous, &current) {
                return (next, clamped);
            }
            current = arc_swap::Guard::into_inner(previous);
        }
    }

    /// Replaces the active counters with absolute values while adjusting
    /// the swapped counters by a delta, in a single commit. Used after a
    /// swap-out pass, which redistributes records between the active heap,
    /// the staging buffer and disk in one motion.
    pub fn commit_swap_shuffle(
        &self,
        active_count: u64,
        active_bytes: u64,
        swapped_count_delta: i64,
        swapped_bytes_delta: i64,
    ) -> (FlowFileQueueSize, bool) {
        let mut current = self.current.load_full();
        loop {
            let mut clamped = false;
            let next = FlowFileQueueSize {
                active_count,
                active_bytes,
                swapped_count: apply_field(current.swapped_count, swapped_count_delta, &mut clamped),
                swapped_bytes: apply_field(current.swapped_bytes, swapped_bytes_delta, &mut clamped),
                unacknowledged_count: current.unacknowledged_count,
                unacknowledged_bytes: current.unacknowledged_bytes,
            };
            let previous = self.current.compare_and_swap(&current, Arc::new(next));
            if Arc::ptr_eq(&*previous, &current) {
                return (next, clamped);
            }
            current = arc_swap::Guard::into_inner(previous);
        }
    }
}
