//! Mutation and snapshot closures produced when a transaction is closed.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::HistoryEvent;
use crate::state::{
    ActivityInfo, ChildExecutionInfo, ExecutionInfo, ExecutionStats, ReplicationState,
    RequestCancelInfo, SignalInfo, TimerInfo,
};
use crate::task::{ReplicationTask, TimerTask, TransferTask};

/// The delta image of one closed transaction against an existing execution.
///
/// Upsert/delete sets name the child entities touched during the
/// transaction; everything untouched stays as persisted. `condition` is the
/// `next_event_id` observed when the transaction began and is the optimistic
/// concurrency check the store must enforce at commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowMutation {
    pub execution_info: ExecutionInfo,
    pub execution_stats: ExecutionStats,
    pub replication_state: Option<ReplicationState>,

    pub upsert_activity_infos: Vec<ActivityInfo>,
    pub delete_activity_infos: Vec<i64>,
    pub upsert_timer_infos: Vec<TimerInfo>,
    pub delete_timer_infos: Vec<String>,
    pub upsert_child_execution_infos: Vec<ChildExecutionInfo>,
    pub delete_child_execution_info: Option<i64>,
    pub upsert_request_cancel_infos: Vec<RequestCancelInfo>,
    pub delete_request_cancel_info: Option<i64>,
    pub upsert_signal_infos: Vec<SignalInfo>,
    pub delete_signal_info: Option<i64>,
    pub upsert_signal_requested_ids: Vec<String>,
    pub delete_signal_requested_id: Option<String>,

    pub new_buffered_events: Vec<HistoryEvent>,
    pub clear_buffered_events: bool,

    pub transfer_tasks: Vec<TransferTask>,
    pub timer_tasks: Vec<TimerTask>,
    pub replication_tasks: Vec<ReplicationTask>,

    pub condition: i64,
}

impl WorkflowMutation {
    /// A mutation that rewrites only the execution header and task lists,
    /// leaving every child-entity set untouched. The reset path commits the
    /// current run with exactly this shape.
    pub fn header_only(
        execution_info: ExecutionInfo,
        execution_stats: ExecutionStats,
        replication_state: Option<ReplicationState>,
        condition: i64,
    ) -> Self {
        Self {
            execution_info,
            execution_stats,
            replication_state,
            upsert_activity_infos: Vec::new(),
            delete_activity_infos: Vec::new(),
            upsert_timer_infos: Vec::new(),
            delete_timer_infos: Vec::new(),
            upsert_child_execution_infos: Vec::new(),
            delete_child_execution_info: None,
            upsert_request_cancel_infos: Vec::new(),
            delete_request_cancel_info: None,
            upsert_signal_infos: Vec::new(),
            delete_signal_info: None,
            upsert_signal_requested_ids: Vec::new(),
            delete_signal_requested_id: None,
            new_buffered_events: Vec::new(),
            clear_buffered_events: false,
            transfer_tasks: Vec::new(),
            timer_tasks: Vec::new(),
            replication_tasks: Vec::new(),
            condition,
        }
    }
}

/// The full image of one execution, produced when a transaction is closed as
/// a snapshot (new run, conflict resolution, reset).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSnapshot {
    pub execution_info: ExecutionInfo,
    pub execution_stats: ExecutionStats,
    pub replication_state: Option<ReplicationState>,

    pub activity_infos: Vec<ActivityInfo>,
    pub timer_infos: Vec<TimerInfo>,
    pub child_execution_infos: Vec<ChildExecutionInfo>,
    pub request_cancel_infos: Vec<RequestCancelInfo>,
    pub signal_infos: Vec<SignalInfo>,
    pub signal_requested_ids: Vec<String>,

    pub transfer_tasks: Vec<TransferTask>,
    pub timer_tasks: Vec<TimerTask>,
    pub replication_tasks: Vec<ReplicationTask>,

    pub condition: i64,
}

impl WorkflowSnapshot {
    /// The run this snapshot describes.
    pub fn run_id(&self) -> Uuid {
        self.execution_info.run_id
    }

    /// Whether the snapshot still references pending child-level work.
    ///
    /// Reset refuses snapshots with pending children, signals, or signal
    /// requests; a reset lands on a decision boundary where none can exist.
    pub fn has_pending_child_state(&self) -> bool {
        !self.child_execution_infos.is_empty()
            || !self.signal_infos.is_empty()
            || !self.signal_requested_ids.is_empty()
    }
}
