//! Execution state images and child-entity records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::event::HistoryEvent;

/// Persistence-level lifecycle state of an execution row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowState {
    Created,
    Running,
    Completed,
    Zombie,
    Corrupted,
}

/// How a closed workflow ended. `None` while the workflow is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloseStatus {
    None,
    Completed,
    Failed,
    Canceled,
    Terminated,
    ContinuedAsNew,
    TimedOut,
}

/// Mutable header of a workflow execution row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionInfo {
    pub domain_id: Uuid,
    pub workflow_id: String,
    pub run_id: Uuid,
    pub workflow_type: String,
    pub task_list: String,

    /// ID the next history event will take; doubles as the optimistic
    /// concurrency condition observed at load time.
    pub next_event_id: i64,
    /// First event ID of the most recently appended batch.
    pub last_first_event_id: i64,
    /// Last event the workflow's decision logic has processed.
    pub last_processed_event: i64,

    pub state: WorkflowState,
    pub close_status: CloseStatus,

    pub start_time: Option<DateTime<Utc>>,
    pub last_updated_time: Option<DateTime<Utc>>,
    pub execution_timeout_secs: i32,
    pub task_timeout_secs: i32,
}

impl ExecutionInfo {
    /// Whether the execution row still accepts new history.
    pub fn is_running(&self) -> bool {
        matches!(self.state, WorkflowState::Created | WorkflowState::Running)
    }
}

/// Size accounting persisted alongside the execution row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStats {
    /// Total bytes of history persisted for this run.
    pub history_size: i64,
}

/// Cross-cluster version bookkeeping for a replicated execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationState {
    /// Failover version currently stamped onto new events.
    pub current_version: i64,
    /// Failover version at the start of the run.
    pub start_version: i64,
    /// Failover version of the last committed write.
    pub last_write_version: i64,
    /// Last event ID covered by `last_write_version`.
    pub last_write_event_id: i64,
}

/// A pending activity on the execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityInfo {
    pub schedule_id: i64,
    pub started_id: i64,
    pub activity_type: String,
    pub version: i64,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

/// A pending user timer on the execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerInfo {
    pub timer_id: String,
    pub started_id: i64,
    pub expiry_time: DateTime<Utc>,
    pub version: i64,
}

/// A pending child workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildExecutionInfo {
    pub initiated_id: i64,
    pub started_id: i64,
    pub child_workflow_id: String,
    pub child_run_id: Option<Uuid>,
    pub version: i64,
}

/// A pending cancellation request to an external execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestCancelInfo {
    pub initiated_id: i64,
    pub cancel_request_id: String,
    pub version: i64,
}

/// A pending signal to an external execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalInfo {
    pub initiated_id: i64,
    pub signal_name: String,
    pub input: Value,
    pub version: i64,
}

/// The full persisted image of a workflow execution, as returned by a load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecutionState {
    pub execution_info: ExecutionInfo,
    pub execution_stats: ExecutionStats,
    pub replication_state: Option<ReplicationState>,

    pub activity_infos: HashMap<i64, ActivityInfo>,
    pub timer_infos: HashMap<String, TimerInfo>,
    pub child_execution_infos: HashMap<i64, ChildExecutionInfo>,
    pub request_cancel_infos: HashMap<i64, RequestCancelInfo>,
    pub signal_infos: HashMap<i64, SignalInfo>,
    pub signal_requested_ids: Vec<String>,

    /// Events received while a decision was in flight, not yet in history.
    pub buffered_events: Vec<HistoryEvent>,
}

/// Row-size statistics reported by the store on a load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutableStateStats {
    pub mutable_state_size: i64,
    pub activity_info_count: usize,
    pub timer_info_count: usize,
    pub child_info_count: usize,
}

/// Per-commit session statistics reported by the store on an update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutableStateUpdateSessionStats {
    pub mutable_state_size: i64,
    pub task_count: usize,
}
