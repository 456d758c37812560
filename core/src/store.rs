//! Request/response types of the execution-store operations.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::HistoryEvent;
use crate::execution::WorkflowExecution;
use crate::state::{MutableStateStats, MutableStateUpdateSessionStats, WorkflowExecutionState, WorkflowState};
use crate::transaction::{WorkflowMutation, WorkflowSnapshot};

/// Bookkeeping string stored with a new history branch so the branch
/// garbage collector can find the owning execution.
pub fn history_cleanup_info(domain_id: Uuid, workflow_id: &str, run_id: Uuid) -> String {
    format!("{domain_id}:{workflow_id}:{run_id}")
}

/// How a create interacts with an existing execution row for the same
/// workflow ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreateWorkflowMode {
    /// No current run may exist for the workflow ID.
    BrandNew,
    /// A closed current run may be superseded, subject to the caller's
    /// ID-reuse policy (checked against the previous run identifiers).
    WorkflowIdReuse,
    /// The previous run continued as new into this one.
    ContinueAsNew,
}

/// Load one execution's full mutable state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetWorkflowExecutionRequest {
    pub domain_id: Uuid,
    pub execution: WorkflowExecution,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetWorkflowExecutionResponse {
    pub state: WorkflowExecutionState,
    pub mutable_state_stats: MutableStateStats,
}

/// Append one event batch to the legacy flat per-workflow event store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendHistoryEventsRequest {
    pub domain_id: Uuid,
    pub execution: WorkflowExecution,
    pub first_event_id: i64,
    pub event_batch_version: i64,
    pub events: Vec<HistoryEvent>,
}

/// Append one event batch to a node of the history tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendHistoryBranchRequest {
    pub domain_id: Uuid,
    pub execution: WorkflowExecution,
    /// True only for the first batch of a new run, which creates the branch.
    pub is_new_branch: bool,
    /// Bookkeeping string consumed by the branch garbage collector.
    pub cleanup_info: String,
    pub branch_token: Vec<u8>,
    pub events: Vec<HistoryEvent>,
}

/// Install a brand-new execution row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorkflowExecutionRequest {
    pub mode: CreateWorkflowMode,
    /// Current run superseded under `WorkflowIdReuse`/`ContinueAsNew`.
    pub previous_run_id: Option<Uuid>,
    pub previous_last_write_version: i64,
    pub new_workflow_snapshot: WorkflowSnapshot,
}

/// Commit one closed transaction: the current run's mutation and, for
/// continue-as-new, the successor run's snapshot, atomically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateWorkflowExecutionRequest {
    pub mutation: WorkflowMutation,
    pub new_workflow_snapshot: Option<WorkflowSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateWorkflowExecutionResponse {
    pub session_stats: MutableStateUpdateSessionStats,
}

/// Atomically replace a diverged execution with the authoritative image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictResolveWorkflowExecutionRequest {
    pub prev_run_id: Uuid,
    pub prev_last_write_version: i64,
    pub prev_state: WorkflowState,
    pub reset_workflow_snapshot: WorkflowSnapshot,
}

/// Atomically close out the current run (optionally) and install a new run
/// forked from a base point in the workflow's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetWorkflowExecutionRequest {
    pub base_run_id: Uuid,
    pub base_run_next_event_id: i64,

    pub current_run_id: Uuid,
    pub current_run_next_event_id: i64,

    /// Present when the current run is still open and must be closed as part
    /// of the reset.
    pub current_workflow_mutation: Option<WorkflowMutation>,

    pub new_workflow_snapshot: WorkflowSnapshot,
}
