use std::cmp::Ordering;
use std::sync::Arc;

use crate::flowfile::FlowFileRecord;

/// User-supplied ordering over flow file records.
///
/// Prioritizers are consulted in configuration order; the first one to
/// return a non-equal ordering decides.
pub trait FlowFilePrioritizer: Send + Sync {
    fn compare(&self, a: &FlowFileRecord, b: &FlowFileRecord) -> Ordering;
}

/// The queue's composed total order over records. `Ordering::Less` means
/// the left record is served first.
///
/// Comparison rungs, first non-equal wins:
/// 1. non-penalized before penalized;
/// 2. between penalized records, earlier penalty expiry first;
/// 3. the configured prioritizers, in order;
/// 4. records without a content claim first, then claim identity and
///    offsets ascending, so records sharing a container slice drain in
///    sequential-read order;
/// 5. ascending record id.
pub(crate) struct QueueOrdering {
    prioritizers: Vec<Arc<dyn FlowFilePrioritizer>>,
}

impl QueueOrdering {
    pub fn new(prioritizers: Vec<Arc<dyn FlowFilePrioritizer>>) -> Self {
        Self { prioritizers }
    }

    pub fn prioritizers(&self) -> &[Arc<dyn FlowFilePrioritizer>] {
        &self.prioritizers
    }

    pub fn compare(&self, a: &FlowFileRecord, b: &FlowFileRecord) -> Ordering {
        let a_penalized = a.is_penalized();
        let b_penalized = b.is_penalized();
        match (a_penalized, b_penalized) {
            (true, false) => return Ordering::Greater,
            (false, true) => return Ordering::Less,
            (true, true) => {
                let by_expiry = a.penalty_expiration_ms().cmp(&b.penalty_expiration_ms());
                if by_expiry != Ordering::Equal {
                    return by_expiry;
                }
            }
            (false, false) => {}
        }

        for prioritizer in &self.prioritizers {
            let ordering = prioritizer.compare(a, b);
            if ordering != Ordering::Equal {
                return ordering;
            }
        }

        match (a.content_claim(), b.content_claim()) {
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(claim_a), Some(claim_b)) => {
                let by_resource = claim_a.resource_claim.id.cmp(&claim_b.resource_claim.id);
                if by_resource != Ordering::Equal {
                    return by_resource;
                }
                let by_claim_offset = claim_a.offset.cmp(&claim_b.offset);
                if by_claim_offset != Ordering::Equal {
                    return by_claim_offset;
                }
                let by_content_offset = a.content_claim_offset().cmp(&b.content_claim_offset());
                if by_content_offset != Ordering::Equal {
                    return by_content_offset;
                }
            }
            (None, None) => {}
        }

        a.id().cmp(&b.id())
    }
}

/// Heap entry binding a record to the ordering it was enqueued under.
///
/// `BinaryHeap` pops its greatest element, so the comparison is inverted:
/// the heap's maximum is the record the queue serves next. Wrapping an
/// entry in [`std::cmp::Reverse`] flips the heap into worst-first order,
/// which is how swap-out selects its victims.
#[derive(Clone)]
pub(crate) struct HeapEntry {
    record: Arc<FlowFileRecord>,
    ordering: Arc<QueueOrdering>,
}

impl HeapEntry {
    pub fn new(record: Arc<FlowFileRecord>, ordering: Arc<QueueOrdering>) -> Self {
        Self { record, ordering }
    }

    pub fn record(&self) -> &Arc<FlowFileRecord> {
        &self.record
    }

    pub fn into_record(self) -> Arc<FlowFileRecord> {
        self.record
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ordering.compare(&other.record, &self.record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;
    use std::sync::Arc;

    use crate::config::FlowFileId;
    use crate::flowfile::{now_millis, ContentClaim, FlowFileRecord, ResourceClaim};

    fn record(id: u64) -> FlowFileRecord {
        FlowFileRecord::builder(FlowFileId::new(id)).build()
    }

    fn penalized(id: u64, expiration_offset_ms: i64) -> FlowFileRecord {
        FlowFileRecord::builder(FlowFileId::new(id))
            .penalty_expiration_ms(now_millis() + expiration_offset_ms)
            .build()
    }

    fn claimed(id: u64, resource_id: &str, claim_offset: u64, content_offset: u64) -> FlowFileRecord {
        let claim = ContentClaim::new(
            Arc::new(ResourceClaim::new("default", "1", resource_id)),
            claim_offset,
        );
        FlowFileRecord::builder(FlowFileId::new(id))
            .content_claim(claim, content_offset)
            .build()
    }

    fn bare_ordering() -> QueueOrdering {
        QueueOrdering::new(Vec::new())
    }

    struct LargestFirst;

    impl FlowFilePrioritizer for LargestFirst {
        fn compare(&self, a: &FlowFileRecord, b: &FlowFileRecord) -> Ordering {
            b.size().cmp(&a.size())
        }
    }

    #[test]
    fn penalized_records_sort_last() {
        let ordering = bare_ordering();
        let ready = record(10);
        let deferred = penalized(1, 60_000);
        assert_eq!(ordering.compare(&ready, &deferred), Ordering::Less);
        assert_eq!(ordering.compare(&deferred, &ready), Ordering::Greater);
    }

    #[test]
    fn earlier_penalty_expiry_wins_between_penalized() {
        let ordering = bare_ordering();
        let soon = penalized(2, 30_000);
        let later = penalized(1, 60_000);
        assert_eq!(ordering.compare(&soon, &later), Ordering::Less);
    }

    #[test]
    fn user_prioritizers_run_in_order() {
        let ordering =
            QueueOrdering::new(vec![Arc::new(LargestFirst) as Arc<dyn FlowFilePrioritizer>]);
        let small = FlowFileRecord::builder(FlowFileId::new(1)).size(10).build();
        let large = FlowFileRecord::builder(FlowFileId::new(2)).size(100).build();
        assert_eq!(ordering.compare(&large, &small), Ordering::Less);
    }

    #[test]
    fn claimless_records_come_first() {
        let ordering = bare_ordering();
        let unclaimed = record(5);
        let with_claim = claimed(1, "rc-1", 0, 0);
        assert_eq!(ordering.compare(&unclaimed, &with_claim), Ordering::Less);
    }

    #[test]
    fn claim_locality_orders_sequential_reads() {
        let ordering = bare_ordering();
        let first = claimed(9, "rc-1", 0, 0);
        let second = claimed(3, "rc-1", 0, 4_096);
        let other_resource = claimed(1, "rc-2", 0, 0);
        assert_eq!(ordering.compare(&first, &second), Ordering::Less);
        assert_eq!(ordering.compare(&second, &other_resource), Ordering::Less);
    }

    #[test]
    fn id_breaks_remaining_ties() {
        let ordering = bare_ordering();
        assert_eq!(ordering.compare(&record(1), &record(2)), Ordering::Less);
        assert_eq!(ordering.compare(&record(2), &record(1)), Ordering::Greater);
    }

    #[test]
    fn heap_pops_in_queue_order() {
        let ordering = Arc::new(bare_ordering());
        let mut heap = BinaryHeap::new();
        for id in [3_u64, 1, 2] {
            heap.push(HeapEntry::new(Arc::new(record(id)), ordering.clone()));
        }

        let drained: Vec<u64> = std::iter::from_fn(|| heap.pop())
            .map(|entry| entry.record().id().as_u64())
            .collect();
        assert_eq!(drained, vec![1, 2, 3]);
    }

    #[test]
    fn reversed_heap_pops_victims_first() {
        let ordering = Arc::new(bare_ordering());
        let mut heap = BinaryHeap::new();
        for id in [3_u64, 1, 2] {
            heap.push(std::cmp::Reverse(HeapEntry::new(
                Arc::new(record(id)),
                ordering.clone(),
            )));
        }

        let drained: Vec<u64> = std::iter::from_fn(|| heap.pop())
            .map(|std::cmp::Reverse(entry)| entry.record().id().as_u64())
            .collect();
        assert_eq!(drained, vec![3, 2, 1]);
    }
}
