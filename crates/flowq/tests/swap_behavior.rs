use std::sync::Arc;

use flowq::test_support::{
    CountingClaimManager, RecordingEventReporter, RecordingFlowFileRepository,
    RecordingProvenanceRepository, RecordingScheduler, TestQueue, record,
};
use flowq::{
    ConnectionEndpoints, CorruptSwapPolicy, FileSwapManager, FlowFileId, FlowFileQueue,
    QueueCollaborators, QueueConfig, QueueSize, SchedulingStrategy, Severity, SwapManager,
};

fn swap_scale_config(identifier: &str) -> QueueConfig {
    let mut config = QueueConfig::new(identifier);
    config.swap_threshold = 10_000;
    config
}

#[test]
fn staging_begins_at_the_swap_threshold() {
    let harness = TestQueue::with_config(swap_scale_config("conn-1"));
    for id in 1..=10_005_u64 {
        harness.queue.put(record(id, 1));
    }

    assert_eq!(harness.queue.active_queue_size(), QueueSize::new(10_000, 10_000));
    assert_eq!(harness.queue.swapped_size(), QueueSize::new(5, 5));
    assert_eq!(harness.swap_manager.swap_out_calls(), 0);

    for id in 10_006..=20_005_u64 {
        harness.queue.put(record(id, 1));
    }

    // The staging buffer crossed a full batch exactly once.
    assert_eq!(harness.swap_manager.swap_out_calls(), 1);
    assert_eq!(harness.queue.size().object_count, 20_005);
    assert_eq!(harness.queue.active_queue_size(), QueueSize::new(10_000, 10_000));
    assert_eq!(harness.queue.swapped_size(), QueueSize::new(10_005, 10_005));
    assert_eq!(harness.queue.metrics().records_swapped_out, 10_000);
}

#[test]
fn swap_out_failure_keeps_records_and_retries() {
    let harness = TestQueue::with_config(swap_scale_config("conn-1"));
    for id in 1..=10_000_u64 {
        harness.queue.put(record(id, 1));
    }
    harness.swap_manager.fail_next_swap_out();
    for id in 10_001..=20_000_u64 {
        harness.queue.put(record(id, 1));
    }

    // The write failed; every record is still in memory and accounted.
    assert_eq!(harness.swap_manager.swap_out_calls(), 1);
    assert_eq!(harness.queue.metrics().swap_out_failures, 1);
    assert_eq!(harness.queue.size().object_count, 20_000);
    assert!(harness.event_reporter.count(Severity::Error) >= 1);

    // The next staging event retries and succeeds.
    harness.queue.put(record(20_001, 1));
    assert_eq!(harness.swap_manager.swap_out_calls(), 2);
    assert_eq!(harness.queue.size().object_count, 20_001);
    assert_eq!(harness.queue.metrics().records_swapped_out, 10_000);
}

#[test]
fn small_threshold_buffer_migrates_when_the_heap_drains() {
    let mut config = QueueConfig::new("conn-1");
    config.swap_threshold = 1_000;
    let harness = TestQueue::with_config(config);
    for id in 1..=1_001_u64 {
        harness.queue.put(record(id, 1));
    }
    assert_eq!(harness.queue.active_queue_size().object_count, 1_000);
    assert_eq!(harness.queue.swapped_size().object_count, 1);

    // The buffered record never reaches a full persist batch; it must
    // still come back once the heap drains.
    let mut expired = Vec::new();
    let mut order = Vec::new();
    while let Some(polled) = harness.queue.poll(&mut expired) {
        order.push(polled.id().as_u64());
        harness.queue.acknowledge(&polled);
    }
    assert_eq!(order.len(), 1_001);
    assert_eq!(order.last().copied(), Some(1_001));
    assert_eq!(harness.queue.size(), QueueSize::new(0, 0));

    // Swap mode ended with the buffer; a new put goes straight to the heap.
    harness.queue.put(record(2_000, 1));
    assert_eq!(harness.queue.active_queue_size().object_count, 1);
    assert_eq!(harness.queue.swapped_size().object_count, 0);
}

#[test]
fn persisted_batches_swap_in_oldest_first() {
    let swap_manager = flowq::test_support::InMemorySwapManager::new();
    let batch_one: Vec<_> = (1..=5_u64).map(|id| record(id, 1)).collect();
    let batch_two: Vec<_> = (6..=10_u64).map(|id| record(id, 1)).collect();
    let first = swap_manager.swap_out(&batch_one, "conn-1").expect("swap out");
    let second = swap_manager.swap_out(&batch_two, "conn-1").expect("swap out");

    let harness = TestQueue::with_swap_manager(QueueConfig::new("conn-1"), swap_manager.clone());
    let max_id = harness.queue.recover_swapped_files();
    assert_eq!(max_id, Some(FlowFileId::new(10)));
    assert_eq!(harness.queue.size(), QueueSize::new(10, 10));

    let mut expired = Vec::new();
    let mut order = Vec::new();
    while let Some(polled) = harness.queue.poll(&mut expired) {
        order.push(polled.id().as_u64());
        harness.queue.acknowledge(&polled);
    }

    assert_eq!(order, (1..=10).collect::<Vec<_>>());
    assert_eq!(swap_manager.swap_in_log(), vec![first, second]);
    assert_eq!(harness.queue.size(), QueueSize::new(0, 0));
}

#[test]
fn puts_stage_behind_a_recovered_backlog() {
    let swap_manager = flowq::test_support::InMemorySwapManager::new();
    let batch: Vec<_> = (1..=3_u64).map(|id| record(id, 1)).collect();
    swap_manager.swap_out(&batch, "conn-1").expect("swap out");

    let harness = TestQueue::with_swap_manager(QueueConfig::new("conn-1"), swap_manager);
    harness.queue.recover_swapped_files();

    // A fresh put must not jump ahead of the recovered records.
    harness.queue.put(record(99, 1));
    assert_eq!(harness.queue.active_queue_size().object_count, 0);
    assert_eq!(harness.queue.swapped_size().object_count, 4);

    let mut expired = Vec::new();
    let first = harness.queue.poll(&mut expired).expect("record");
    assert_eq!(first.id().as_u64(), 1);
}

#[test]
fn missing_swap_file_is_dropped_with_corrected_accounting() {
    let swap_manager = flowq::test_support::InMemorySwapManager::new();
    let batch_one: Vec<_> = (1..=3_u64).map(|id| record(id, 10)).collect();
    let batch_two: Vec<_> = (4..=6_u64).map(|id| record(id, 10)).collect();
    let first = swap_manager.swap_out(&batch_one, "conn-1").expect("swap out");
    swap_manager.swap_out(&batch_two, "conn-1").expect("swap out");

    let harness = TestQueue::with_swap_manager(QueueConfig::new("conn-1"), swap_manager.clone());
    harness.queue.recover_swapped_files();
    assert_eq!(harness.queue.size(), QueueSize::new(6, 60));

    swap_manager.mark_missing(&first);

    // The lost batch is reported, forgotten, and subtracted from the size.
    let mut expired = Vec::new();
    assert!(harness.queue.poll(&mut expired).is_none());
    assert_eq!(harness.queue.size(), QueueSize::new(3, 30));
    assert!(harness.event_reporter.count(Severity::Error) >= 1);
    assert_eq!(harness.queue.metrics().swap_in_failures, 1);

    // The remaining batch is still served.
    let polled = harness.queue.poll(&mut expired).expect("record");
    assert_eq!(polled.id().as_u64(), 4);
}

#[test]
fn corrupt_swap_file_is_discarded_by_default() {
    let swap_manager = flowq::test_support::InMemorySwapManager::new();
    let batch_one: Vec<_> = (1..=3_u64).map(|id| record(id, 10)).collect();
    let batch_two: Vec<_> = (4..=6_u64).map(|id| record(id, 10)).collect();
    let first = swap_manager.swap_out(&batch_one, "conn-1").expect("swap out");
    swap_manager.swap_out(&batch_two, "conn-1").expect("swap out");

    let harness = TestQueue::with_swap_manager(QueueConfig::new("conn-1"), swap_manager.clone());
    harness.queue.recover_swapped_files();
    swap_manager.mark_corrupt(&first);

    let mut expired = Vec::new();
    assert!(harness.queue.poll(&mut expired).is_none());
    assert_eq!(harness.queue.size(), QueueSize::new(3, 30));

    let polled = harness.queue.poll(&mut expired).expect("record");
    assert_eq!(polled.id().as_u64(), 4);
}

#[test]
fn corrupt_swap_file_can_be_retained_for_retry() {
    let swap_manager = flowq::test_support::InMemorySwapManager::new();
    let batch_one: Vec<_> = (1..=3_u64).map(|id| record(id, 10)).collect();
    let batch_two: Vec<_> = (4..=6_u64).map(|id| record(id, 10)).collect();
    let first = swap_manager.swap_out(&batch_one, "conn-1").expect("swap out");
    swap_manager.swap_out(&batch_two, "conn-1").expect("swap out");

    let mut config = QueueConfig::new("conn-1");
    config.corrupt_swap_policy = CorruptSwapPolicy::Retain;
    let harness = TestQueue::with_swap_manager(config, swap_manager.clone());
    harness.queue.recover_swapped_files();
    swap_manager.mark_corrupt(&first);

    // The corrupt batch is rotated to the back; nothing is forgotten.
    let mut expired = Vec::new();
    assert!(harness.queue.poll(&mut expired).is_none());
    assert_eq!(harness.queue.size(), QueueSize::new(6, 60));

    // The second batch drains while the corrupt one waits.
    for expected in 4..=6_u64 {
        let polled = harness.queue.poll(&mut expired).expect("record");
        assert_eq!(polled.id().as_u64(), expected);
        harness.queue.acknowledge(&polled);
    }

    // Once the file heals, its records are delivered after all.
    swap_manager.clear_corrupt(&first);
    for expected in 1..=3_u64 {
        let polled = harness.queue.poll(&mut expired).expect("record");
        assert_eq!(polled.id().as_u64(), expected);
        harness.queue.acknowledge(&polled);
    }
    assert_eq!(harness.queue.size(), QueueSize::new(0, 0));
}

#[test]
fn recovery_through_real_swap_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let swap_manager = Arc::new(FileSwapManager::new(dir.path()).expect("swap manager"));

    let batch_one: Vec<_> = (1..=4_u64).map(|id| record(id, 25)).collect();
    let batch_two: Vec<_> = (5..=8_u64).map(|id| record(id, 25)).collect();
    swap_manager.swap_out(&batch_one, "conn-1").expect("swap out");
    swap_manager.swap_out(&batch_two, "conn-1").expect("swap out");

    let scheduler = Arc::new(RecordingScheduler::default());
    let queue = FlowFileQueue::new(
        QueueConfig::new("conn-1"),
        ConnectionEndpoints::new(
            "conn-1-source",
            SchedulingStrategy::EventDriven,
            "conn-1-destination",
            SchedulingStrategy::EventDriven,
        ),
        QueueCollaborators {
            swap_manager: swap_manager.clone(),
            flowfile_repository: Arc::new(RecordingFlowFileRepository::default()),
            provenance_repository: Arc::new(RecordingProvenanceRepository::default()),
            claim_manager: Arc::new(CountingClaimManager::default()),
            scheduler,
            event_reporter: Arc::new(RecordingEventReporter::default()),
        },
    )
    .expect("queue");

    let max_id = queue.recover_swapped_files();
    assert_eq!(max_id, Some(FlowFileId::new(8)));
    assert_eq!(queue.size(), QueueSize::new(8, 200));

    let mut expired = Vec::new();
    let mut order = Vec::new();
    while let Some(polled) = queue.poll(&mut expired) {
        order.push(polled.id().as_u64());
        queue.acknowledge(&polled);
    }
    assert_eq!(order, (1..=8).collect::<Vec<_>>());
    assert_eq!(queue.size(), QueueSize::new(0, 0));

    // Everything was consumed; nothing is left to recover.
    assert!(swap_manager
        .recover_swap_locations("conn-1")
        .expect("recover")
        .is_empty());
}

#[test]
fn purge_discards_persisted_state() {
    let swap_manager = flowq::test_support::InMemorySwapManager::new();
    let batch: Vec<_> = (1..=3_u64).map(|id| record(id, 1)).collect();
    swap_manager.swap_out(&batch, "conn-1").expect("swap out");

    let harness = TestQueue::with_swap_manager(QueueConfig::new("conn-1"), swap_manager.clone());
    harness.queue.purge_swap_files();
    assert!(swap_manager
        .recover_swap_locations("conn-1")
        .expect("recover")
        .is_empty());
}
