//! Conflict-resolve and reset commit paths.

use uuid::Uuid;
use windlass_core::{
    ChildExecutionInfo, ExecutionStats, ReplicationState, TimerTask, TimerTaskKind, TransferTask,
    TransferTaskKind, WorkflowState,
};
use windlass_history::testing::{
    history_replication_task, sample_event_batch, sample_execution_info, sample_execution_state,
    sample_get_response, sample_snapshot, FakeMutableState, TestHarness,
};
use windlass_history::{Clock, HistoryError, ResetWorkflowTransaction, TransactionPolicy};

fn execution() -> windlass_core::WorkflowExecution {
    windlass_core::WorkflowExecution::new("order-1", Uuid::from_u128(0x11))
}

fn domain_id() -> Uuid {
    Uuid::from_u128(0xD0)
}

fn replication(current_version: i64) -> ReplicationState {
    ReplicationState {
        current_version,
        start_version: 1,
        last_write_version: current_version,
        last_write_event_id: 1,
    }
}

#[tokio::test]
async fn conflict_resolve_installs_authoritative_state() {
    let harness = TestHarness::new();

    let mut authoritative = sample_snapshot(20);
    authoritative.execution_info.run_id = execution().run_id;
    authoritative.transfer_tasks = vec![TransferTask::new(TransferTaskKind::DecisionTask, 19)];
    let info = sample_execution_info(domain_id(), "order-1", execution().run_id, 20);
    let mut reset_state =
        FakeMutableState::new(info.clone()).with_snapshot(authoritative, vec![]);
    let probe = reset_state.probe();

    // The reload after the resolve observes the authoritative image.
    harness
        .execution_store
        .expect_get(Ok(sample_get_response(sample_execution_state(info))));

    let context = harness.context(domain_id(), &execution());
    let mut guard = context.lock(harness.cancellation()).await.unwrap();

    let resolved = guard
        .conflict_resolve_workflow_execution(
            harness.clock.now(),
            Uuid::from_u128(0x77),
            5,
            WorkflowState::Completed,
            &mut reset_state,
            777,
        )
        .await
        .unwrap();
    assert_eq!(resolved.next_event_id(), 20);

    let requests = harness.shard.conflict_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].prev_run_id, Uuid::from_u128(0x77));
    assert_eq!(requests[0].prev_last_write_version, 5);
    assert_eq!(requests[0].prev_state, WorkflowState::Completed);
    assert_eq!(
        requests[0].reset_workflow_snapshot.execution_stats,
        ExecutionStats { history_size: 777 }
    );

    // The resolver closes under Passive and never generates events.
    assert_eq!(probe.close_policies(), vec![TransactionPolicy::Passive]);

    assert_eq!(guard.update_condition(), 20);
    assert_eq!(harness.execution_store.get_calls(), 1);
    assert_eq!(harness.metrics.snapshot().contexts_cleared, 1);

    let recorded = harness.engine.recorded();
    assert_eq!(recorded.transfer_tasks.len(), 1);
    assert_eq!(recorded.transfer_tasks[0].kind, TransferTaskKind::DecisionTask);
}

#[tokio::test]
async fn conflict_resolve_rejects_generated_events() {
    let harness = TestHarness::new();

    let authoritative = sample_snapshot(20);
    let batch = sample_event_batch(domain_id(), "order-1", execution().run_id, None, 20, 1);
    let info = sample_execution_info(domain_id(), "order-1", execution().run_id, 20);
    let mut reset_state = FakeMutableState::new(info).with_snapshot(authoritative, vec![batch]);

    let context = harness.context(domain_id(), &execution());
    let mut guard = context.lock(harness.cancellation()).await.unwrap();

    let err = guard
        .conflict_resolve_workflow_execution(
            harness.clock.now(),
            Uuid::from_u128(0x77),
            5,
            WorkflowState::Completed,
            &mut reset_state,
            777,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, HistoryError::InvariantViolated(_)));
    assert!(harness.shard.conflict_requests().is_empty());
}

#[tokio::test]
async fn reset_closes_current_and_installs_new_run() {
    let harness = TestHarness::new();

    // Load so the guard observes update_condition = 10 and history size 120.
    let loaded_info = sample_execution_info(domain_id(), "order-1", execution().run_id, 10);
    let mut loaded_state = sample_execution_state(loaded_info);
    loaded_state.execution_stats = ExecutionStats { history_size: 120 };
    harness
        .execution_store
        .expect_get(Ok(sample_get_response(loaded_state)));

    let current_info = sample_execution_info(domain_id(), "order-1", execution().run_id, 10);
    let mut current_state = FakeMutableState::new(current_info)
        .with_replication(replication(3))
        .with_pending_events(
            sample_event_batch(domain_id(), "order-1", execution().run_id, None, 8, 2).events,
        );
    let current_probe = current_state.probe();

    let new_run_id = Uuid::from_u128(0x22);
    let new_info = sample_execution_info(domain_id(), "order-1", new_run_id, 5);
    let mut new_snapshot = sample_snapshot(5);
    new_snapshot.execution_info.run_id = new_run_id;
    let new_batch = sample_event_batch(domain_id(), "order-1", new_run_id, None, 4, 1);
    let mut new_state = FakeMutableState::new(new_info)
        .with_replication(replication(4))
        .with_snapshot(new_snapshot, vec![new_batch]);
    let new_probe = new_state.probe();

    // First append extends the current run, second persists the new batch.
    harness.shard.expect_append_events(Ok(50));
    harness.shard.expect_append_events(Ok(300));

    let context = harness.context(domain_id(), &execution());
    let mut guard = context.lock(harness.cancellation()).await.unwrap();
    guard.load().await.unwrap();

    guard
        .reset_workflow_execution(ResetWorkflowTransaction {
            current_mutable_state: &mut current_state,
            update_current: true,
            close_task: Some(TransferTask::new(TransferTaskKind::CloseExecution, 10)),
            cleanup_task: Some(TimerTask::new(TimerTaskKind::DeleteHistoryEvent, 10)),
            new_mutable_state: &mut new_state,
            new_history_size: 100,
            new_transfer_tasks: vec![TransferTask::new(TransferTaskKind::DecisionTask, 4)],
            new_timer_tasks: vec![],
            current_replication_tasks: vec![history_replication_task(8, 10, None, 2)],
            new_replication_tasks: vec![history_replication_task(1, 5, None, 2)],
            base_run_id: Uuid::from_u128(0x33),
            base_run_next_event_id: 8,
        })
        .await
        .unwrap();

    let resets = harness.shard.reset_requests();
    assert_eq!(resets.len(), 1);
    let request = &resets[0];
    assert_eq!(request.base_run_id, Uuid::from_u128(0x33));
    assert_eq!(request.base_run_next_event_id, 8);
    assert_eq!(request.current_run_id, execution().run_id);
    assert_eq!(request.current_run_next_event_id, 10);

    let mutation = request.current_workflow_mutation.as_ref().unwrap();
    assert_eq!(mutation.condition, 10);
    assert_eq!(mutation.execution_stats, ExecutionStats { history_size: 170 });
    assert!(mutation.upsert_activity_infos.is_empty());
    assert!(mutation.upsert_signal_infos.is_empty());
    assert_eq!(mutation.transfer_tasks.len(), 1);
    assert_eq!(mutation.transfer_tasks[0].kind, TransferTaskKind::CloseExecution);
    assert_eq!(mutation.transfer_tasks[0].version, 3);
    assert_eq!(mutation.transfer_tasks[0].visibility_time, Some(harness.clock.now()));
    assert_eq!(mutation.timer_tasks.len(), 1);
    assert_eq!(mutation.timer_tasks[0].kind, TimerTaskKind::DeleteHistoryEvent);
    assert_eq!(mutation.replication_tasks.len(), 1);

    let snapshot = &request.new_workflow_snapshot;
    assert_eq!(snapshot.execution_stats, ExecutionStats { history_size: 400 });
    assert_eq!(snapshot.transfer_tasks.len(), 1);
    assert_eq!(snapshot.transfer_tasks[0].kind, TransferTaskKind::DecisionTask);
    assert_eq!(snapshot.transfer_tasks[0].version, 4);
    assert_eq!(snapshot.replication_tasks.len(), 1);

    // Both states were flushed; the new run closed under Passive.
    assert_eq!(current_probe.flush_count(), 1);
    assert_eq!(new_probe.flush_count(), 1);
    assert_eq!(new_probe.close_policies(), vec![TransactionPolicy::Passive]);

    // The current run's history got extended by the pending events.
    let appends = harness.shard.append_event_requests();
    assert_eq!(appends.len(), 2);
    assert_eq!(appends[0].first_event_id, 8);
    assert_eq!(guard.history_size(), 170);

    // Both task fans were issued.
    let recorded = harness.engine.recorded();
    assert_eq!(recorded.transfer_tasks.len(), 2);
    assert_eq!(recorded.timer_tasks.len(), 1);
    assert_eq!(recorded.replication_tasks.len(), 2);
}

#[tokio::test]
async fn reset_can_leave_current_run_untouched() {
    let harness = TestHarness::new();

    let current_info = sample_execution_info(domain_id(), "order-1", execution().run_id, 10);
    let mut current_state = FakeMutableState::new(current_info);

    let new_run_id = Uuid::from_u128(0x22);
    let new_info = sample_execution_info(domain_id(), "order-1", new_run_id, 5);
    let mut new_snapshot = sample_snapshot(5);
    new_snapshot.execution_info.run_id = new_run_id;
    let new_batch = sample_event_batch(domain_id(), "order-1", new_run_id, None, 4, 1);
    let mut new_state = FakeMutableState::new(new_info).with_snapshot(new_snapshot, vec![new_batch]);

    harness.shard.expect_append_events(Ok(300));

    let context = harness.context(domain_id(), &execution());
    let mut guard = context.lock(harness.cancellation()).await.unwrap();

    guard
        .reset_workflow_execution(ResetWorkflowTransaction {
            current_mutable_state: &mut current_state,
            update_current: false,
            close_task: None,
            cleanup_task: None,
            new_mutable_state: &mut new_state,
            new_history_size: 0,
            new_transfer_tasks: vec![TransferTask::new(TransferTaskKind::DecisionTask, 4)],
            new_timer_tasks: vec![],
            current_replication_tasks: vec![],
            new_replication_tasks: vec![],
            base_run_id: Uuid::from_u128(0x33),
            base_run_next_event_id: 8,
        })
        .await
        .unwrap();

    let resets = harness.shard.reset_requests();
    assert_eq!(resets.len(), 1);
    assert!(resets[0].current_workflow_mutation.is_none());
    assert_eq!(
        resets[0].new_workflow_snapshot.execution_stats,
        ExecutionStats { history_size: 300 }
    );
    assert_eq!(harness.shard.append_event_requests().len(), 1);

    let recorded = harness.engine.recorded();
    assert_eq!(recorded.transfer_tasks.len(), 1);
}

#[tokio::test]
async fn reset_rejects_buffered_events_on_new_run() {
    let harness = TestHarness::new();

    let current_info = sample_execution_info(domain_id(), "order-1", execution().run_id, 10);
    let mut current_state = FakeMutableState::new(current_info);

    let new_info = sample_execution_info(domain_id(), "order-1", Uuid::from_u128(0x22), 5);
    let mut new_state = FakeMutableState::new(new_info).with_buffered_events();
    let new_probe = new_state.probe();

    let context = harness.context(domain_id(), &execution());
    let mut guard = context.lock(harness.cancellation()).await.unwrap();

    let err = guard
        .reset_workflow_execution(ResetWorkflowTransaction {
            current_mutable_state: &mut current_state,
            update_current: false,
            close_task: None,
            cleanup_task: None,
            new_mutable_state: &mut new_state,
            new_history_size: 0,
            new_transfer_tasks: vec![],
            new_timer_tasks: vec![],
            current_replication_tasks: vec![],
            new_replication_tasks: vec![],
            base_run_id: Uuid::from_u128(0x33),
            base_run_next_event_id: 8,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, HistoryError::InvariantViolated(_)));
    assert!(harness.shard.reset_requests().is_empty());
    // Rejected before any flush happened.
    assert_eq!(new_probe.flush_count(), 0);
}

#[tokio::test]
async fn reset_requires_exactly_one_event_batch() {
    let harness = TestHarness::new();

    let current_info = sample_execution_info(domain_id(), "order-1", execution().run_id, 10);
    let mut current_state = FakeMutableState::new(current_info);

    let new_run_id = Uuid::from_u128(0x22);
    let new_info = sample_execution_info(domain_id(), "order-1", new_run_id, 5);
    let mut new_state =
        FakeMutableState::new(new_info).with_snapshot(sample_snapshot(5), vec![]);

    let context = harness.context(domain_id(), &execution());
    let mut guard = context.lock(harness.cancellation()).await.unwrap();

    let err = guard
        .reset_workflow_execution(ResetWorkflowTransaction {
            current_mutable_state: &mut current_state,
            update_current: false,
            close_task: None,
            cleanup_task: None,
            new_mutable_state: &mut new_state,
            new_history_size: 0,
            new_transfer_tasks: vec![],
            new_timer_tasks: vec![],
            current_replication_tasks: vec![],
            new_replication_tasks: vec![],
            base_run_id: Uuid::from_u128(0x33),
            base_run_next_event_id: 8,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, HistoryError::InvariantViolated(_)));
    assert!(harness.shard.reset_requests().is_empty());
}

#[tokio::test]
async fn reset_rejects_pending_child_state_on_new_run() {
    let harness = TestHarness::new();

    let current_info = sample_execution_info(domain_id(), "order-1", execution().run_id, 10);
    let mut current_state = FakeMutableState::new(current_info);

    let new_run_id = Uuid::from_u128(0x22);
    let new_info = sample_execution_info(domain_id(), "order-1", new_run_id, 5);
    let mut new_snapshot = sample_snapshot(5);
    new_snapshot.child_execution_infos = vec![ChildExecutionInfo {
        initiated_id: 4,
        started_id: 0,
        child_workflow_id: "child-1".into(),
        child_run_id: None,
        version: 1,
    }];
    let new_batch = sample_event_batch(domain_id(), "order-1", new_run_id, None, 4, 1);
    let mut new_state = FakeMutableState::new(new_info).with_snapshot(new_snapshot, vec![new_batch]);

    let context = harness.context(domain_id(), &execution());
    let mut guard = context.lock(harness.cancellation()).await.unwrap();

    let err = guard
        .reset_workflow_execution(ResetWorkflowTransaction {
            current_mutable_state: &mut current_state,
            update_current: false,
            close_task: None,
            cleanup_task: None,
            new_mutable_state: &mut new_state,
            new_history_size: 0,
            new_transfer_tasks: vec![],
            new_timer_tasks: vec![],
            current_replication_tasks: vec![],
            new_replication_tasks: vec![],
            base_run_id: Uuid::from_u128(0x33),
            base_run_next_event_id: 8,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, HistoryError::InvariantViolated(_)));
    assert!(harness.shard.reset_requests().is_empty());
}
