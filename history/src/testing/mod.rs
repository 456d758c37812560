//! Programmable fakes for testing the coordinator in isolation.
//!
//! Everything here is deterministic and in-memory: a manual clock, a
//! recording engine, a static domain cache, mock store/shard backends with
//! programmable result queues, and a scriptable mutable state. The
//! [`TestHarness`] bundles them into ready-made [`ContextDeps`].
//!
//! # Example
//!
//! ```ignore
//! let harness = TestHarness::new();
//! harness.execution_store.expect_get(Ok(sample_get_response(state)));
//!
//! let context = harness.context(domain_id, &execution);
//! let mut guard = context.lock(harness.cancellation()).await?;
//! let mutable_state = guard.load().await?;
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use uuid::Uuid;
use windlass_core::{
    AppendHistoryBranchRequest, AppendHistoryEventsRequest, CloseStatus,
    ConflictResolveWorkflowExecutionRequest, CreateWorkflowExecutionRequest, EventType,
    ExecutionInfo, ExecutionStats, GetWorkflowExecutionRequest, GetWorkflowExecutionResponse,
    HistoryEvent, HistoryReplicationTask, MutableStateStats, ReplicationState, ReplicationTask,
    ResetWorkflowExecutionRequest, StoreError, StoreResult, TimerTask, TransferTask,
    UpdateWorkflowExecutionRequest, UpdateWorkflowExecutionResponse, WorkflowEvents,
    WorkflowExecution, WorkflowExecutionState, WorkflowMutation, WorkflowSnapshot, WorkflowState,
};

use crate::clock::Clock;
use crate::config::{HistoryConfig, RetryPolicy};
use crate::context::{ContextDeps, ExecutionContext};
use crate::domain::{DomainCache, DomainEntry, ReplicationPolicy};
use crate::engine::{Engine, HistoryEventNotification};
use crate::error::{HistoryError, Result};
use crate::metrics::MetricsRecorder;
use crate::mutable_state::{MutableState, MutableStateFactory, TransactionPolicy};
use crate::store::{ExecutionStore, Shard};

// =============================================================================
// Clock
// =============================================================================

/// A clock the test advances by hand.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Everything the coordinator fanned out, flattened for assertions.
#[derive(Debug, Clone, Default)]
pub struct RecordedNotifications {
    pub transfer_tasks: Vec<TransferTask>,
    pub timer_tasks: Vec<TimerTask>,
    pub replication_tasks: Vec<ReplicationTask>,
    pub history_events: Vec<HistoryEventNotification>,
}

/// An [`Engine`] that records every notification.
#[derive(Default)]
pub struct RecordingEngine {
    recorded: Mutex<RecordedNotifications>,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> RecordedNotifications {
        self.recorded.lock().clone()
    }
}

impl Engine for RecordingEngine {
    fn notify_new_transfer_tasks(&self, tasks: &[TransferTask]) {
        self.recorded.lock().transfer_tasks.extend_from_slice(tasks);
    }

    fn notify_new_timer_tasks(&self, tasks: &[TimerTask]) {
        self.recorded.lock().timer_tasks.extend_from_slice(tasks);
    }

    fn notify_new_replication_tasks(&self, tasks: &[ReplicationTask]) {
        self.recorded
            .lock()
            .replication_tasks
            .extend_from_slice(tasks);
    }

    fn notify_new_history_event(&self, notification: HistoryEventNotification) {
        self.recorded.lock().history_events.push(notification);
    }
}

// =============================================================================
// Domain cache
// =============================================================================

/// A [`DomainCache`] backed by a hash map the test fills up front.
#[derive(Default)]
pub struct StaticDomainCache {
    entries: Mutex<HashMap<Uuid, Arc<DomainEntry>>>,
}

impl StaticDomainCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entry: DomainEntry) {
        self.entries.lock().insert(entry.id, Arc::new(entry));
    }
}

impl DomainCache for StaticDomainCache {
    fn domain_by_id(&self, domain_id: Uuid) -> StoreResult<Arc<DomainEntry>> {
        self.entries
            .lock()
            .get(&domain_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("domain {domain_id}")))
    }
}

// =============================================================================
// Execution store
// =============================================================================

#[derive(Default)]
struct MockStoreState {
    get_results: VecDeque<StoreResult<GetWorkflowExecutionResponse>>,
    get_requests: Vec<GetWorkflowExecutionRequest>,
}

/// An [`ExecutionStore`] with a programmable result queue.
///
/// Each `get` pops the next programmed result; an empty queue answers
/// `NotFound`.
#[derive(Default)]
pub struct MockExecutionStore {
    state: Mutex<MockStoreState>,
}

impl MockExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect_get(&self, result: StoreResult<GetWorkflowExecutionResponse>) {
        self.state.lock().get_results.push_back(result);
    }

    pub fn get_calls(&self) -> usize {
        self.state.lock().get_requests.len()
    }

    pub fn get_requests(&self) -> Vec<GetWorkflowExecutionRequest> {
        self.state.lock().get_requests.clone()
    }
}

#[async_trait]
impl ExecutionStore for MockExecutionStore {
    async fn get_workflow_execution(
        &self,
        request: GetWorkflowExecutionRequest,
    ) -> StoreResult<GetWorkflowExecutionResponse> {
        let mut state = self.state.lock();
        state.get_requests.push(request);
        state
            .get_results
            .pop_front()
            .unwrap_or_else(|| Err(StoreError::NotFound("no programmed response".into())))
    }
}

// =============================================================================
// Shard
// =============================================================================

#[derive(Default)]
struct MockShardState {
    append_event_results: VecDeque<StoreResult<usize>>,
    append_branch_results: VecDeque<StoreResult<usize>>,
    create_results: VecDeque<StoreResult<()>>,
    update_results: VecDeque<StoreResult<UpdateWorkflowExecutionResponse>>,
    conflict_results: VecDeque<StoreResult<()>>,
    reset_results: VecDeque<StoreResult<()>>,

    append_event_requests: Vec<AppendHistoryEventsRequest>,
    append_branch_requests: Vec<AppendHistoryBranchRequest>,
    create_requests: Vec<CreateWorkflowExecutionRequest>,
    update_requests: Vec<UpdateWorkflowExecutionRequest>,
    conflict_requests: Vec<ConflictResolveWorkflowExecutionRequest>,
    reset_requests: Vec<ResetWorkflowExecutionRequest>,
}

/// A [`Shard`] with programmable result queues and request logs.
///
/// Unprogrammed operations succeed: appends report a size proportional to
/// the batch, commits return default session stats.
#[derive(Default)]
pub struct MockShard {
    state: Mutex<MockShardState>,
}

impl MockShard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect_append_events(&self, result: StoreResult<usize>) {
        self.state.lock().append_event_results.push_back(result);
    }

    pub fn expect_append_branch(&self, result: StoreResult<usize>) {
        self.state.lock().append_branch_results.push_back(result);
    }

    pub fn expect_create(&self, result: StoreResult<()>) {
        self.state.lock().create_results.push_back(result);
    }

    pub fn expect_update(&self, result: StoreResult<UpdateWorkflowExecutionResponse>) {
        self.state.lock().update_results.push_back(result);
    }

    pub fn expect_conflict_resolve(&self, result: StoreResult<()>) {
        self.state.lock().conflict_results.push_back(result);
    }

    pub fn expect_reset(&self, result: StoreResult<()>) {
        self.state.lock().reset_results.push_back(result);
    }

    pub fn append_event_requests(&self) -> Vec<AppendHistoryEventsRequest> {
        self.state.lock().append_event_requests.clone()
    }

    pub fn append_branch_requests(&self) -> Vec<AppendHistoryBranchRequest> {
        self.state.lock().append_branch_requests.clone()
    }

    pub fn create_requests(&self) -> Vec<CreateWorkflowExecutionRequest> {
        self.state.lock().create_requests.clone()
    }

    pub fn update_requests(&self) -> Vec<UpdateWorkflowExecutionRequest> {
        self.state.lock().update_requests.clone()
    }

    pub fn conflict_requests(&self) -> Vec<ConflictResolveWorkflowExecutionRequest> {
        self.state.lock().conflict_requests.clone()
    }

    pub fn reset_requests(&self) -> Vec<ResetWorkflowExecutionRequest> {
        self.state.lock().reset_requests.clone()
    }
}

fn default_append_size(event_count: usize) -> usize {
    event_count * 64
}

#[async_trait]
impl Shard for MockShard {
    async fn append_history_events(
        &self,
        request: AppendHistoryEventsRequest,
    ) -> StoreResult<usize> {
        let mut state = self.state.lock();
        let default = default_append_size(request.events.len());
        state.append_event_requests.push(request);
        state
            .append_event_results
            .pop_front()
            .unwrap_or(Ok(default))
    }

    async fn append_history_branch(
        &self,
        request: AppendHistoryBranchRequest,
    ) -> StoreResult<usize> {
        let mut state = self.state.lock();
        let default = default_append_size(request.events.len());
        state.append_branch_requests.push(request);
        state
            .append_branch_results
            .pop_front()
            .unwrap_or(Ok(default))
    }

    async fn create_workflow_execution(
        &self,
        request: CreateWorkflowExecutionRequest,
    ) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.create_requests.push(request);
        state.create_results.pop_front().unwrap_or(Ok(()))
    }

    async fn update_workflow_execution(
        &self,
        request: UpdateWorkflowExecutionRequest,
    ) -> StoreResult<UpdateWorkflowExecutionResponse> {
        let mut state = self.state.lock();
        state.update_requests.push(request);
        state.update_results.pop_front().unwrap_or(Ok(
            UpdateWorkflowExecutionResponse {
                session_stats: Default::default(),
            },
        ))
    }

    async fn conflict_resolve_workflow_execution(
        &self,
        request: ConflictResolveWorkflowExecutionRequest,
    ) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.conflict_requests.push(request);
        state.conflict_results.pop_front().unwrap_or(Ok(()))
    }

    async fn reset_workflow_execution(
        &self,
        request: ResetWorkflowExecutionRequest,
    ) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.reset_requests.push(request);
        state.reset_results.pop_front().unwrap_or(Ok(()))
    }
}

// =============================================================================
// Mutable state
// =============================================================================

#[derive(Debug, Clone, Default)]
struct ProbeState {
    stamped_versions: Vec<(i64, bool)>,
    stamped_policies: Vec<ReplicationPolicy>,
    close_policies: Vec<TransactionPolicy>,
    flush_count: u32,
    loads: u32,
}

/// Shared window into a [`FakeMutableState`] after it has been boxed away
/// inside a context.
#[derive(Debug, Clone, Default)]
pub struct MutableStateProbe {
    inner: Arc<Mutex<ProbeState>>,
}

impl MutableStateProbe {
    pub fn stamped_versions(&self) -> Vec<(i64, bool)> {
        self.inner.lock().stamped_versions.clone()
    }

    pub fn stamped_policies(&self) -> Vec<ReplicationPolicy> {
        self.inner.lock().stamped_policies.clone()
    }

    pub fn close_policies(&self) -> Vec<TransactionPolicy> {
        self.inner.lock().close_policies.clone()
    }

    pub fn flush_count(&self) -> u32 {
        self.inner.lock().flush_count
    }

    pub fn loads(&self) -> u32 {
        self.inner.lock().loads
    }
}

/// A scriptable [`MutableState`].
///
/// Close results are programmed up front and consumed once; closing without
/// a programmed result is an invariant error, which doubles as a guard
/// against unexpected commits in tests.
#[derive(Debug)]
pub struct FakeMutableState {
    pub info: ExecutionInfo,
    pub replication: Option<ReplicationState>,
    pub buffered: bool,
    pub pending_events: Vec<HistoryEvent>,
    pub branch: Option<Vec<u8>>,
    pub completion: Option<HistoryEvent>,
    pub previous_started_event_id: i64,
    mutation_to_close: Option<(WorkflowMutation, Vec<WorkflowEvents>)>,
    snapshot_to_close: Option<(WorkflowSnapshot, Vec<WorkflowEvents>)>,
    probe: MutableStateProbe,
}

impl FakeMutableState {
    pub fn new(info: ExecutionInfo) -> Self {
        Self {
            info,
            replication: None,
            buffered: false,
            pending_events: Vec::new(),
            branch: None,
            completion: None,
            previous_started_event_id: 0,
            mutation_to_close: None,
            snapshot_to_close: None,
            probe: MutableStateProbe::default(),
        }
    }

    /// A placeholder that expects `load` to fill it in.
    pub fn empty() -> Self {
        Self::new(sample_execution_info(
            Uuid::nil(),
            "unloaded",
            Uuid::nil(),
            0,
        ))
    }

    pub fn with_replication(mut self, replication: ReplicationState) -> Self {
        self.replication = Some(replication);
        self
    }

    pub fn with_mutation(
        mut self,
        mutation: WorkflowMutation,
        events: Vec<WorkflowEvents>,
    ) -> Self {
        self.mutation_to_close = Some((mutation, events));
        self
    }

    pub fn with_snapshot(
        mut self,
        snapshot: WorkflowSnapshot,
        events: Vec<WorkflowEvents>,
    ) -> Self {
        self.snapshot_to_close = Some((snapshot, events));
        self
    }

    pub fn with_buffered_events(mut self) -> Self {
        self.buffered = true;
        self
    }

    pub fn with_pending_events(mut self, events: Vec<HistoryEvent>) -> Self {
        self.pending_events = events;
        self
    }

    pub fn with_completion_event(mut self, event: HistoryEvent) -> Self {
        self.completion = Some(event);
        self
    }

    pub fn probe(&self) -> MutableStateProbe {
        self.probe.clone()
    }
}

impl MutableState for FakeMutableState {
    fn load(&mut self, state: WorkflowExecutionState) {
        self.probe.inner.lock().loads += 1;
        self.info = state.execution_info;
        self.replication = state.replication_state;
        self.buffered = !state.buffered_events.is_empty();
    }

    fn execution_info(&self) -> &ExecutionInfo {
        &self.info
    }

    fn replication_state(&self) -> Option<&ReplicationState> {
        self.replication.as_ref()
    }

    fn is_workflow_execution_running(&self) -> bool {
        self.info.is_running()
    }

    fn update_replication_state_version(&mut self, version: i64, force: bool) {
        self.probe.inner.lock().stamped_versions.push((version, force));
        if let Some(replication) = self.replication.as_mut() {
            replication.current_version = version;
        }
    }

    fn update_replication_policy(&mut self, policy: ReplicationPolicy) {
        self.probe.inner.lock().stamped_policies.push(policy);
    }

    fn current_version(&self) -> i64 {
        self.replication
            .map(|replication| replication.current_version)
            .unwrap_or(0)
    }

    fn last_first_event_id(&self) -> i64 {
        self.info.last_first_event_id
    }

    fn next_event_id(&self) -> i64 {
        self.info.next_event_id
    }

    fn previous_started_event_id(&self) -> i64 {
        self.previous_started_event_id
    }

    fn completion_event(&self) -> Option<HistoryEvent> {
        self.completion.clone()
    }

    fn pending_history_events(&self) -> Vec<HistoryEvent> {
        self.pending_events.clone()
    }

    fn current_branch(&self) -> Option<Vec<u8>> {
        self.branch.clone()
    }

    fn has_buffered_events(&self) -> bool {
        self.buffered
    }

    fn flush_buffered_events(&mut self) -> Result<()> {
        self.probe.inner.lock().flush_count += 1;
        self.buffered = false;
        Ok(())
    }

    fn close_transaction_as_mutation(
        &mut self,
        _now: DateTime<Utc>,
        policy: TransactionPolicy,
    ) -> Result<(WorkflowMutation, Vec<WorkflowEvents>)> {
        self.probe.inner.lock().close_policies.push(policy);
        self.mutation_to_close
            .take()
            .ok_or_else(|| HistoryError::InvariantViolated("no mutation programmed".into()))
    }

    fn close_transaction_as_snapshot(
        &mut self,
        _now: DateTime<Utc>,
        policy: TransactionPolicy,
    ) -> Result<(WorkflowSnapshot, Vec<WorkflowEvents>)> {
        self.probe.inner.lock().close_policies.push(policy);
        self.snapshot_to_close
            .take()
            .ok_or_else(|| HistoryError::InvariantViolated("no snapshot programmed".into()))
    }
}

/// A [`MutableStateFactory`] serving states prepared by the test.
///
/// `create` hands out prepared states in order and falls back to
/// [`FakeMutableState::empty`] when none are queued.
#[derive(Default)]
pub struct FakeMutableStateFactory {
    prepared: Mutex<VecDeque<FakeMutableState>>,
}

impl FakeMutableStateFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prepare(&self, state: FakeMutableState) {
        self.prepared.lock().push_back(state);
    }
}

impl MutableStateFactory for FakeMutableStateFactory {
    fn create(&self, _domain_name: &str) -> Box<dyn MutableState> {
        Box::new(
            self.prepared
                .lock()
                .pop_front()
                .unwrap_or_else(FakeMutableState::empty),
        )
    }
}

// =============================================================================
// Harness
// =============================================================================

/// All fakes wired into ready-made [`ContextDeps`].
pub struct TestHarness {
    pub shard: Arc<MockShard>,
    pub execution_store: Arc<MockExecutionStore>,
    pub engine: Arc<RecordingEngine>,
    pub domain_cache: Arc<StaticDomainCache>,
    pub factory: Arc<FakeMutableStateFactory>,
    pub clock: Arc<ManualClock>,
    pub metrics: MetricsRecorder,
    pub config: Arc<HistoryConfig>,
    cancellation_tx: watch::Sender<bool>,
    cancellation_rx: watch::Receiver<bool>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(HistoryConfig {
            persistence_retry: RetryPolicy {
                initial_backoff: std::time::Duration::from_millis(1),
                max_backoff: std::time::Duration::from_millis(2),
                backoff_multiplier: 2.0,
                max_attempts: 3,
            },
            ..HistoryConfig::default()
        })
    }

    pub fn with_config(config: HistoryConfig) -> Self {
        let (cancellation_tx, cancellation_rx) = watch::channel(false);
        Self {
            shard: Arc::new(MockShard::new()),
            execution_store: Arc::new(MockExecutionStore::new()),
            engine: Arc::new(RecordingEngine::new()),
            domain_cache: Arc::new(StaticDomainCache::new()),
            factory: Arc::new(FakeMutableStateFactory::new()),
            clock: Arc::new(ManualClock::default()),
            metrics: MetricsRecorder::new(),
            config: Arc::new(config),
            cancellation_tx,
            cancellation_rx,
        }
    }

    pub fn deps(&self) -> ContextDeps {
        ContextDeps {
            shard: self.shard.clone(),
            execution_store: self.execution_store.clone(),
            engine: self.engine.clone(),
            domain_cache: self.domain_cache.clone(),
            mutable_state_factory: self.factory.clone(),
            clock: self.clock.clone(),
            metrics: self.metrics.clone(),
            config: self.config.clone(),
        }
    }

    pub fn context(&self, domain_id: Uuid, execution: &WorkflowExecution) -> ExecutionContext {
        ExecutionContext::new(domain_id, execution.clone(), self.deps())
    }

    /// A cancellation signal that never fires.
    pub fn cancellation(&self) -> watch::Receiver<bool> {
        self.cancellation_rx.clone()
    }

    /// Trip the harness-wide cancellation signal.
    pub fn cancel(&self) {
        let _ = self.cancellation_tx.send(true);
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Fixtures
// =============================================================================

/// An execution info for a running workflow.
pub fn sample_execution_info(
    domain_id: Uuid,
    workflow_id: &str,
    run_id: Uuid,
    next_event_id: i64,
) -> ExecutionInfo {
    ExecutionInfo {
        domain_id,
        workflow_id: workflow_id.to_string(),
        run_id,
        workflow_type: "order-processing".into(),
        task_list: "default".into(),
        next_event_id,
        last_first_event_id: next_event_id - 1,
        last_processed_event: 0,
        state: WorkflowState::Running,
        close_status: CloseStatus::None,
        start_time: None,
        last_updated_time: None,
        execution_timeout_secs: 0,
        task_timeout_secs: 0,
    }
}

/// A full persisted image wrapping the given execution info.
pub fn sample_execution_state(execution_info: ExecutionInfo) -> WorkflowExecutionState {
    WorkflowExecutionState {
        execution_info,
        execution_stats: ExecutionStats::default(),
        replication_state: None,
        activity_infos: HashMap::new(),
        timer_infos: HashMap::new(),
        child_execution_infos: HashMap::new(),
        request_cancel_infos: HashMap::new(),
        signal_infos: HashMap::new(),
        signal_requested_ids: Vec::new(),
        buffered_events: Vec::new(),
    }
}

pub fn sample_get_response(state: WorkflowExecutionState) -> GetWorkflowExecutionResponse {
    GetWorkflowExecutionResponse {
        state,
        mutable_state_stats: MutableStateStats::default(),
    }
}

/// A header-only mutation for a running workflow.
pub fn sample_mutation(next_event_id: i64) -> WorkflowMutation {
    let info = sample_execution_info(Uuid::nil(), "order-1", Uuid::nil(), next_event_id);
    WorkflowMutation::header_only(info, ExecutionStats::default(), None, next_event_id)
}

/// An empty snapshot for a running workflow.
pub fn sample_snapshot(next_event_id: i64) -> WorkflowSnapshot {
    WorkflowSnapshot {
        execution_info: sample_execution_info(Uuid::nil(), "order-1", Uuid::nil(), next_event_id),
        execution_stats: ExecutionStats::default(),
        replication_state: None,
        activity_infos: Vec::new(),
        timer_infos: Vec::new(),
        child_execution_infos: Vec::new(),
        request_cancel_infos: Vec::new(),
        signal_infos: Vec::new(),
        signal_requested_ids: Vec::new(),
        transfer_tasks: Vec::new(),
        timer_tasks: Vec::new(),
        replication_tasks: Vec::new(),
        condition: next_event_id,
    }
}

/// A history replication task wrapped into the task enum.
pub fn history_replication_task(
    first_event_id: i64,
    next_event_id: i64,
    branch_token: Option<Vec<u8>>,
    event_store_version: i32,
) -> ReplicationTask {
    ReplicationTask::History(HistoryReplicationTask {
        first_event_id,
        next_event_id,
        version: 0,
        branch_token,
        event_store_version,
        new_run_branch_token: None,
        new_run_event_store_version: None,
    })
}

/// An event batch of `count` decision events starting at `first_event_id`.
pub fn sample_event_batch(
    domain_id: Uuid,
    workflow_id: &str,
    run_id: Uuid,
    branch_token: Option<Vec<u8>>,
    first_event_id: i64,
    count: usize,
) -> WorkflowEvents {
    let events = (0..count as i64)
        .map(|offset| HistoryEvent::new(first_event_id + offset, 1, EventType::DecisionCompleted))
        .collect();
    WorkflowEvents {
        domain_id,
        workflow_id: workflow_id.to_string(),
        run_id,
        branch_token,
        events,
    }
}
