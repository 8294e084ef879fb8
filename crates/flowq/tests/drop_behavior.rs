use std::time::Duration;

use flowq::test_support::{
    InMemorySwapManager, TestQueue, await_condition, await_terminal, record, record_with_claim,
};
use flowq::{DropFlowFileState, QueueConfig, QueueSize, SwapManager};

#[test]
fn drop_empties_active_staged_and_persisted_records() {
    let swap_manager = InMemorySwapManager::new();
    let batch_one: Vec<_> = (1..=3_u64).map(|id| record_with_claim(id, 10, "rc-swap")).collect();
    let batch_two: Vec<_> = (4..=6_u64).map(|id| record(id, 10)).collect();
    swap_manager.swap_out(&batch_one, "conn-1").expect("swap out");
    swap_manager.swap_out(&batch_two, "conn-1").expect("swap out");

    let harness = TestQueue::with_swap_manager(QueueConfig::new("conn-1"), swap_manager);
    harness.queue.recover_swapped_files();
    // Recovery put the queue in swap mode, so these stage in memory.
    for id in 7..=9_u64 {
        harness.queue.put(record_with_claim(id, 10, "rc-staged"));
    }
    assert_eq!(harness.queue.size(), QueueSize::new(9, 90));

    let request = harness.queue.drop_flow_files("req-1", "admin");
    let state = await_terminal(&request, Duration::from_secs(5));

    assert_eq!(state, DropFlowFileState::Complete);
    assert_eq!(request.original_size(), QueueSize::new(9, 90));
    assert_eq!(request.dropped_size(), QueueSize::new(9, 90));
    assert_eq!(request.current_size(), QueueSize::new(0, 0));
    assert_eq!(harness.queue.size(), QueueSize::new(0, 0));

    // One provenance DROP event and one repository delete per record.
    assert_eq!(harness.provenance.event_count(), 9);
    assert_eq!(harness.repository.deleted_count(), 9);
    let details_ok = harness
        .provenance
        .events()
        .iter()
        .all(|event| event.details == "FlowFile Queue emptied by admin");
    assert!(details_ok);

    // Claims released exactly once per record holding one.
    assert_eq!(harness.claim_manager.decrements_for("rc-swap"), 3);
    assert_eq!(harness.claim_manager.decrements_for("rc-staged"), 3);
    assert_eq!(harness.claim_manager.total_decrements(), 6);
    assert_eq!(harness.queue.metrics().records_dropped, 9);
}

#[test]
fn drop_of_an_empty_queue_completes_immediately() {
    let harness = TestQueue::new("conn-1");
    let request = harness.queue.drop_flow_files("req-1", "admin");
    let state = await_terminal(&request, Duration::from_secs(5));

    assert_eq!(state, DropFlowFileState::Complete);
    assert_eq!(request.original_size(), QueueSize::new(0, 0));
    assert_eq!(request.dropped_size(), QueueSize::new(0, 0));
    assert_eq!(harness.provenance.event_count(), 0);
}

#[test]
fn cancel_between_swap_files_stops_new_work() {
    let swap_manager = InMemorySwapManager::new();
    for batch_index in 0..10_u64 {
        let batch: Vec<_> = (0..1_000_u64)
            .map(|i| record(batch_index * 1_000 + i + 1, 1))
            .collect();
        swap_manager.swap_out(&batch, "conn-1").expect("swap out");
    }

    let mut config = QueueConfig::new("conn-1");
    config.swap_threshold = 1_000;
    let harness = TestQueue::with_swap_manager(config, swap_manager.clone());
    harness.queue.recover_swapped_files();
    assert_eq!(harness.queue.size().object_count, 10_000);

    // Allow three swap-ins, then hold the fourth mid-flight.
    swap_manager.enable_swap_in_gate();
    swap_manager.grant_swap_in_permits(3);

    let request = harness.queue.drop_flow_files("req-1", "admin");
    assert!(await_condition(Duration::from_secs(5), || {
        swap_manager.swap_in_calls() == 4
    }));

    let canceled = harness.queue.cancel_drop("req-1").expect("request exists");
    assert_eq!(canceled.state(), DropFlowFileState::Canceled);

    // Release the in-flight batch; it completes, then the worker stops.
    swap_manager.grant_swap_in_permits(1);
    let state = await_terminal(&request, Duration::from_secs(5));
    assert_eq!(state, DropFlowFileState::Canceled);

    // The in-flight batch was not rolled back, and no new work began.
    assert_eq!(swap_manager.swap_in_calls(), 4);
    let dropped = request.dropped_size();
    assert_eq!(dropped.object_count, 4_000);
    assert_eq!(
        harness.queue.size().object_count,
        request.original_size().object_count - dropped.object_count
    );
    // Canceled requests are removed from the registry.
    assert!(harness.queue.drop_request_status("req-1").is_none());
}

#[test]
fn swap_in_failure_fails_the_request() {
    let swap_manager = InMemorySwapManager::new();
    let batch_one: Vec<_> = (1..=3_u64).map(|id| record(id, 10)).collect();
    let batch_two: Vec<_> = (4..=6_u64).map(|id| record(id, 10)).collect();
    let first = swap_manager.swap_out(&batch_one, "conn-1").expect("swap out");
    swap_manager.swap_out(&batch_two, "conn-1").expect("swap out");

    let harness = TestQueue::with_swap_manager(QueueConfig::new("conn-1"), swap_manager.clone());
    harness.queue.recover_swapped_files();
    swap_manager.mark_corrupt(&first);

    let request = harness.queue.drop_flow_files("req-1", "admin");
    let state = await_terminal(&request, Duration::from_secs(5));

    assert_eq!(state, DropFlowFileState::Failure);
    let reason = request.failure_reason().expect("failure reason");
    assert!(reason.contains(first.as_str()));
    // Nothing was dropped; both batches still count toward the queue.
    assert_eq!(request.dropped_size(), QueueSize::new(0, 0));
    assert_eq!(harness.queue.size(), QueueSize::new(6, 60));
}

#[test]
fn repository_failure_returns_swapped_in_records_to_the_queue() {
    let swap_manager = InMemorySwapManager::new();
    let batch: Vec<_> = (1..=3_u64).map(|id| record_with_claim(id, 10, "rc-held")).collect();
    swap_manager.swap_out(&batch, "conn-1").expect("swap out");

    let harness = TestQueue::with_swap_manager(QueueConfig::new("conn-1"), swap_manager);
    harness.queue.recover_swapped_files();
    harness.repository.inject_failure();

    let request = harness.queue.drop_flow_files("req-1", "admin");
    let state = await_terminal(&request, Duration::from_secs(5));

    assert_eq!(state, DropFlowFileState::Failure);
    let reason = request.failure_reason().expect("failure reason");
    assert!(reason.contains("injected repository failure"));

    // The swapped-in records were re-added to the active heap, not lost,
    // and their claims were not released for a drop that never happened.
    assert_eq!(harness.queue.size(), QueueSize::new(3, 30));
    assert_eq!(harness.queue.active_queue_size(), QueueSize::new(3, 30));
    assert_eq!(harness.claim_manager.total_decrements(), 0);

    let mut expired = Vec::new();
    let polled = harness.queue.poll(&mut expired).expect("record survived");
    assert_eq!(polled.id().as_u64(), 1);
    harness.queue.put(polled.clone());
    harness.queue.acknowledge(&polled);

    // A later drop of the same records releases each claim exactly once.
    let retry = harness.queue.drop_flow_files("req-2", "admin");
    assert_eq!(
        await_terminal(&retry, Duration::from_secs(5)),
        DropFlowFileState::Complete
    );
    assert_eq!(harness.queue.size(), QueueSize::new(0, 0));
    assert_eq!(harness.claim_manager.decrements_for("rc-held"), 3);
    assert_eq!(harness.claim_manager.total_decrements(), 3);
}

#[test]
fn drop_requests_are_queryable_until_cancelled() {
    let harness = TestQueue::new("conn-1");
    let request = harness.queue.drop_flow_files("req-1", "admin");
    await_terminal(&request, Duration::from_secs(5));

    let status = harness.queue.drop_request_status("req-1").expect("status");
    assert_eq!(status.state(), DropFlowFileState::Complete);
    assert_eq!(status.requestor(), "admin");

    // Cancel after completion removes the entry but cannot change state.
    let removed = harness.queue.cancel_drop("req-1").expect("removed");
    assert_eq!(removed.state(), DropFlowFileState::Complete);
    assert!(harness.queue.drop_request_status("req-1").is_none());
    assert!(harness.queue.cancel_drop("req-1").is_none());
}
