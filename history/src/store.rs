//! Storage seams the coordinator drives.
//!
//! `ExecutionStore` is the raw execution-row read path. `Shard` covers every
//! write: the owning shard stamps range-ID fencing and transaction IDs onto
//! each request before handing it to the storage driver, which is why writes
//! go through the shard rather than the store directly.

use async_trait::async_trait;
use windlass_core::{
    AppendHistoryBranchRequest, AppendHistoryEventsRequest,
    ConflictResolveWorkflowExecutionRequest, CreateWorkflowExecutionRequest,
    GetWorkflowExecutionRequest, GetWorkflowExecutionResponse, ResetWorkflowExecutionRequest,
    StoreResult, UpdateWorkflowExecutionRequest, UpdateWorkflowExecutionResponse,
};

/// Read path of the execution store.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn get_workflow_execution(
        &self,
        request: GetWorkflowExecutionRequest,
    ) -> StoreResult<GetWorkflowExecutionResponse>;
}

/// Write path, fenced by the owning shard.
///
/// Append operations return the byte size of the persisted payload; the
/// coordinator accounts it into the execution's history size.
#[async_trait]
pub trait Shard: Send + Sync {
    async fn append_history_events(
        &self,
        request: AppendHistoryEventsRequest,
    ) -> StoreResult<usize>;

    async fn append_history_branch(
        &self,
        request: AppendHistoryBranchRequest,
    ) -> StoreResult<usize>;

    async fn create_workflow_execution(
        &self,
        request: CreateWorkflowExecutionRequest,
    ) -> StoreResult<()>;

    async fn update_workflow_execution(
        &self,
        request: UpdateWorkflowExecutionRequest,
    ) -> StoreResult<UpdateWorkflowExecutionResponse>;

    async fn conflict_resolve_workflow_execution(
        &self,
        request: ConflictResolveWorkflowExecutionRequest,
    ) -> StoreResult<()>;

    async fn reset_workflow_execution(&self, request: ResetWorkflowExecutionRequest)
        -> StoreResult<()>;
}
