use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time snapshot of a queue's operational counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct QueueMetricsSnapshot {
    pub records_swapped_out: u64,
    pub swap_files_written: u64,
    pub swap_out_failures: u64,
    pub records_swapped_in: u64,
    pub swap_files_read: u64,
    pub swap_in_failures: u64,
    pub records_expired: u64,
    pub records_dropped: u64,
    pub lock_contention_events: u64,
    pub accounting_corrections: u64,
}

/// Thread-safe operational counters for a queue.
///
/// All counters are lock-free and may be bumped from any thread, including
/// while the queue's write lock is held.
#[derive(Debug, Default)]
pub struct QueueMetrics {
    records_swapped_out: AtomicU64,
    swap_files_written: AtomicU64,
    swap_out_failures: AtomicU64,
    records_swapped_in: AtomicU64,
    swap_files_read: AtomicU64,
    swap_in_failures: AtomicU64,
    records_expired: AtomicU64,
    records_dropped: AtomicU64,
    lock_contention_events: AtomicU64,
    accounting_corrections: AtomicU64,
}

impl QueueMetrics {
    pub(crate) fn record_swap_out(&self, records: u64) {
        self.records_swapped_out.fetch_add(records, Ordering::Relaxed);
        self.swap_files_written.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_swap_out_failures(&self) {
        self.swap_out_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_swap_in(&self, records: u64) {
        self.records_swapped_in.fetch_add(records, Ordering::Relaxed);
        self.swap_files_read.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_swap_in_failures(&self) {
        self.swap_in_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_expired(&self, records: u64) {
        if records > 0 {
            self.records_expired.fetch_add(records, Ordering::Relaxed);
        }
    }

    pub(crate) fn add_dropped(&self, records: u64) {
        if records > 0 {
            self.records_dropped.fetch_add(records, Ordering::Relaxed);
        }
    }

    pub(crate) fn incr_lock_contention(&self) {
        self.lock_contention_events.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_accounting_corrections(&self) {
        self.accounting_corrections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> QueueMetricsSnapshot {
        QueueMetricsSnapshot {
            records_swapped_out: self.records_swapped_out.load(Ordering::Relaxed),
            swap_files_written: self.swap_files_written.load(Ordering::Relaxed),
            swap_out_failures: self.swap_out_failures.load(Ordering::Relaxed),
            records_swapped_in: self.records_swapped_in.load(Ordering::Relaxed),
            swap_files_read: self.swap_files_read.load(Ordering::Relaxed),
            swap_in_failures: self.swap_in_failures.load(Ordering::Relaxed),
            records_expired: self.records_expired.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            lock_contention_events: self.lock_contention_events.load(Ordering::Relaxed),
            accounting_corrections: self.accounting_corrections.load(Ordering::Relaxed),
        }
    }
}
