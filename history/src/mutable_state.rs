//! Contract consumed from the mutable-state builder.
//!
//! The concrete builder lives with the workflow state machine; the
//! coordinator only needs the operations below: read the execution header,
//! keep replication versioning current, and close the in-memory transaction
//! into a persistable mutation or snapshot.

use chrono::{DateTime, Utc};
use windlass_core::{
    ExecutionInfo, HistoryEvent, ReplicationState, WorkflowEvents, WorkflowExecutionState,
    WorkflowMutation, WorkflowSnapshot,
};

use crate::domain::ReplicationPolicy;
use crate::error::Result;

/// Whether this cluster is the authoritative source of new history for the
/// transaction being closed.
///
/// An `Active` close may generate replication tasks; a `Passive` close is
/// applying state decided elsewhere and must not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionPolicy {
    Active,
    Passive,
}

/// The in-memory image of one workflow execution.
pub trait MutableState: Send + std::fmt::Debug {
    /// Install a freshly fetched persisted image.
    fn load(&mut self, state: WorkflowExecutionState);

    fn execution_info(&self) -> &ExecutionInfo;
    fn replication_state(&self) -> Option<&ReplicationState>;
    fn is_workflow_execution_running(&self) -> bool;

    /// Re-stamp the failover version after a load. `force` overrides the
    /// monotonicity check inside the builder.
    fn update_replication_state_version(&mut self, version: i64, force: bool);
    fn update_replication_policy(&mut self, policy: ReplicationPolicy);

    fn current_version(&self) -> i64;
    fn last_first_event_id(&self) -> i64;
    fn next_event_id(&self) -> i64;
    fn previous_started_event_id(&self) -> i64;

    /// The terminal event, once the workflow has closed.
    fn completion_event(&self) -> Option<HistoryEvent>;

    /// Events accumulated by the history builder but not yet persisted.
    fn pending_history_events(&self) -> Vec<HistoryEvent>;

    /// Branch token of the run's current history node, when the run lives
    /// in the history tree rather than the flat event store.
    fn current_branch(&self) -> Option<Vec<u8>>;

    fn has_buffered_events(&self) -> bool;

    /// Assign durable task IDs to buffered events and fold them into the
    /// history builder.
    fn flush_buffered_events(&mut self) -> Result<()>;

    /// Close the transaction into a delta plus the event batches to persist.
    fn close_transaction_as_mutation(
        &mut self,
        now: DateTime<Utc>,
        policy: TransactionPolicy,
    ) -> Result<(WorkflowMutation, Vec<WorkflowEvents>)>;

    /// Close the transaction into a full image plus the event batches to
    /// persist.
    fn close_transaction_as_snapshot(
        &mut self,
        now: DateTime<Utc>,
        policy: TransactionPolicy,
    ) -> Result<(WorkflowSnapshot, Vec<WorkflowEvents>)>;
}

/// Builds empty mutable-state instances for the coordinator to load into.
pub trait MutableStateFactory: Send + Sync {
    fn create(&self, domain_name: &str) -> Box<dyn MutableState>;
}
