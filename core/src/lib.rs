//! # Windlass Core
//!
//! Shared persistence data model for the Windlass history engine.
//!
//! This crate defines the types that cross the boundary between the history
//! engine and its execution store: history events and event batches, task
//! descriptors for the transfer/timer/replication pumps, workflow state
//! images, the mutation/snapshot closures produced when a transaction is
//! closed, and the request/response types of the store operations.
//!
//! ## What's in Core vs History
//!
//! **Core** contains plain data:
//! - History events, event types, and event batches
//! - Transfer, timer, and replication task descriptors
//! - Execution info, stats, and replication state images
//! - Workflow mutations and snapshots
//! - Store request/response types and the store error taxonomy
//!
//! **History** (`windlass-history`) contains the machinery:
//! - The per-execution context, its lock, and the commit paths
//! - The persistence retry harness
//! - Collaborator traits (store, shard, engine, domain cache, mutable state)
//! - Notification fanout and metrics
//!
//! ## Modules
//!
//! - [`error`] - Store error taxonomy and transience classification
//! - [`event`] - History events and event batches
//! - [`execution`] - Workflow execution identifiers
//! - [`state`] - Execution state images and child-entity records
//! - [`store`] - Store request/response types
//! - [`task`] - Task descriptors for the downstream pumps
//! - [`transaction`] - Mutation and snapshot closures

pub mod error;
pub mod event;
pub mod execution;
pub mod state;
pub mod store;
pub mod task;
pub mod transaction;

pub use error::{StoreError, StoreResult};
pub use event::{EventType, HistoryEvent, WorkflowEvents};
pub use execution::WorkflowExecution;
pub use state::{
    ActivityInfo, ChildExecutionInfo, CloseStatus, ExecutionInfo, ExecutionStats,
    MutableStateStats, MutableStateUpdateSessionStats, ReplicationState, RequestCancelInfo,
    SignalInfo, TimerInfo, WorkflowExecutionState, WorkflowState,
};
pub use store::{
    history_cleanup_info, AppendHistoryBranchRequest, AppendHistoryEventsRequest,
    ConflictResolveWorkflowExecutionRequest, CreateWorkflowExecutionRequest, CreateWorkflowMode,
    GetWorkflowExecutionRequest, GetWorkflowExecutionResponse, ResetWorkflowExecutionRequest,
    UpdateWorkflowExecutionRequest, UpdateWorkflowExecutionResponse,
};
pub use task::{
    stamp_task_info, HistoryReplicationTask, ReplicationTask, SyncActivityTask, TimerTask,
    TimerTaskKind, TransferTask, TransferTaskKind,
};
pub use transaction::{WorkflowMutation, WorkflowSnapshot};
