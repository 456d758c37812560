//! The per-execution transaction coordinator.
//!
//! One [`ExecutionContext`] exists per live `(domain, workflow, run)` triple.
//! It serializes concurrent mutators behind a per-execution lock, caches the
//! loaded mutable state, appends history event batches, commits the closed
//! transaction under an optimistic-concurrency condition, and fans out task
//! notifications after every successful commit.
//!
//! Callers hold the lock for the whole `load → mutate → commit` span: every
//! mutating operation lives on [`ContextGuard`], so the borrow checker
//! enforces what the runtime cannot. A paired update (continue-as-new) holds
//! two guards; lock the current run's context first, then the new run's.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex, MutexGuard};
use tracing::{debug, error};
use uuid::Uuid;
use windlass_core::{
    history_cleanup_info, stamp_task_info, AppendHistoryBranchRequest, AppendHistoryEventsRequest,
    CloseStatus, ConflictResolveWorkflowExecutionRequest, CreateWorkflowExecutionRequest,
    CreateWorkflowMode, ExecutionStats, GetWorkflowExecutionRequest, GetWorkflowExecutionResponse,
    ReplicationTask, ResetWorkflowExecutionRequest, StoreError, TimerTask, TransferTask,
    UpdateWorkflowExecutionRequest, UpdateWorkflowExecutionResponse, WorkflowEvents,
    WorkflowExecution, WorkflowMutation, WorkflowSnapshot, WorkflowState,
};

use crate::clock::Clock;
use crate::config::HistoryConfig;
use crate::domain::DomainCache;
use crate::engine::{Engine, HistoryEventNotification};
use crate::error::{HistoryError, Result};
use crate::metrics::MetricsRecorder;
use crate::mutable_state::{MutableState, MutableStateFactory, TransactionPolicy};
use crate::retry::retry_with_policy;
use crate::store::{ExecutionStore, Shard};

/// Shared collaborators handed to every execution context.
#[derive(Clone)]
pub struct ContextDeps {
    pub shard: Arc<dyn Shard>,
    pub execution_store: Arc<dyn ExecutionStore>,
    pub engine: Arc<dyn Engine>,
    pub domain_cache: Arc<dyn DomainCache>,
    pub mutable_state_factory: Arc<dyn MutableStateFactory>,
    pub clock: Arc<dyn Clock>,
    pub metrics: MetricsRecorder,
    pub config: Arc<HistoryConfig>,
}

/// State cached under the per-execution lock.
struct ContextState {
    mutable_state: Option<Box<dyn MutableState>>,
    stats: Option<ExecutionStats>,
    /// NextEventID observed at the last load or successful commit; the
    /// optimistic-concurrency condition of the next mutation. Deliberately
    /// kept outside the mutable state: it must survive a failed commit that
    /// cleared the cache.
    update_condition: i64,
}

/// The per-execution transaction coordinator.
pub struct ExecutionContext {
    domain_id: Uuid,
    execution: WorkflowExecution,
    deps: ContextDeps,
    inner: Mutex<ContextState>,
}

impl ExecutionContext {
    /// Create a context for one execution. No I/O happens here; the first
    /// [`ContextGuard::load`] fetches the state.
    pub fn new(domain_id: Uuid, execution: WorkflowExecution, deps: ContextDeps) -> Self {
        Self {
            domain_id,
            execution,
            deps,
            inner: Mutex::new(ContextState {
                mutable_state: None,
                stats: Some(ExecutionStats::default()),
                update_condition: 0,
            }),
        }
    }

    pub fn domain_id(&self) -> Uuid {
        self.domain_id
    }

    pub fn execution(&self) -> &WorkflowExecution {
        &self.execution
    }

    /// Best-effort domain name lookup; empty when the cache misses.
    pub fn domain_name(&self) -> String {
        self.deps
            .domain_cache
            .domain_by_id(self.domain_id)
            .map(|entry| entry.name.clone())
            .unwrap_or_default()
    }

    /// Acquire the per-execution lock.
    ///
    /// Fails promptly with [`HistoryError::LockCancelled`] once the caller's
    /// signal flips to `true`. A closed signal can no longer cancel and the
    /// acquisition simply waits. Acquisition is not reentrant; a paired
    /// update locks the current run's context before the new run's.
    pub async fn lock(&self, cancellation: watch::Receiver<bool>) -> Result<ContextGuard<'_>> {
        tokio::select! {
            biased;
            _ = cancelled(cancellation) => Err(HistoryError::LockCancelled),
            state = self.inner.lock() => Ok(ContextGuard { ctx: self, state }),
        }
    }
}

async fn cancelled(mut signal: watch::Receiver<bool>) {
    if signal.wait_for(|flag| *flag).await.is_err() {
        // Sender gone: nobody can cancel any more.
        std::future::pending::<()>().await;
    }
}

/// The successor run of a paired (continue-as-new) update.
pub struct NewRunCommit<'a, 'g> {
    /// Guard of the successor run's context, locked after the current one.
    pub context: &'a mut ContextGuard<'g>,
    /// Freshly built mutable state of the successor run.
    pub mutable_state: &'a mut dyn MutableState,
}

/// Everything a reset commit needs.
///
/// Reset atomically (a) optionally extends the current run's history and
/// closes it out, and (b) installs a new run forked from the base point.
pub struct ResetWorkflowTransaction<'a> {
    pub current_mutable_state: &'a mut dyn MutableState,
    /// Whether the current run is still open and must be closed as part of
    /// the reset.
    pub update_current: bool,
    /// Close-execution transfer task appended to the current run's list.
    pub close_task: Option<TransferTask>,
    /// History-cleanup timer task appended to the current run's list.
    pub cleanup_task: Option<TimerTask>,

    pub new_mutable_state: &'a mut dyn MutableState,
    /// History bytes already persisted for the new run before this call.
    pub new_history_size: i64,
    pub new_transfer_tasks: Vec<TransferTask>,
    pub new_timer_tasks: Vec<TimerTask>,
    pub current_replication_tasks: Vec<ReplicationTask>,
    pub new_replication_tasks: Vec<ReplicationTask>,

    /// Run the fork point was taken from, and the event ID after it.
    pub base_run_id: Uuid,
    pub base_run_next_event_id: i64,
}

/// Exclusive access to one execution context.
///
/// Dropping the guard releases the lock.
pub struct ContextGuard<'a> {
    ctx: &'a ExecutionContext,
    state: MutexGuard<'a, ContextState>,
}

impl ContextGuard<'_> {
    pub fn domain_id(&self) -> Uuid {
        self.ctx.domain_id
    }

    pub fn execution(&self) -> &WorkflowExecution {
        &self.ctx.execution
    }

    pub fn domain_name(&self) -> String {
        self.ctx.domain_name()
    }

    /// History bytes persisted for this run, as currently accounted.
    pub fn history_size(&self) -> i64 {
        self.state.stats.map(|stats| stats.history_size).unwrap_or(0)
    }

    pub fn set_history_size(&mut self, size: i64) {
        self.state.stats = Some(ExecutionStats { history_size: size });
    }

    /// The optimistic-concurrency condition the next commit will be
    /// submitted under.
    pub fn update_condition(&self) -> i64 {
        self.state.update_condition
    }

    /// Whether a mutable state is currently cached.
    pub fn has_cached_mutable_state(&self) -> bool {
        self.state.mutable_state.is_some()
    }

    /// Drop the cached mutable state and stats.
    ///
    /// Called automatically on every commit error before it surfaces; the
    /// next caller starts from a fresh load. `update_condition` survives.
    pub fn clear(&mut self) {
        self.ctx.deps.metrics.record_context_cleared();
        debug!(
            domain_id = %self.ctx.domain_id,
            workflow_id = %self.ctx.execution.workflow_id,
            run_id = %self.ctx.execution.run_id,
            "cleared workflow execution context"
        );
        self.state.mutable_state = None;
        self.state.stats = None;
    }

    // =========================================================================
    // Load
    // =========================================================================

    /// Return the cached mutable state, fetching it on first use.
    ///
    /// A cached state is returned without I/O. On a fetch, the replication
    /// policy hook re-stamps the failover version for running executions of
    /// global domains.
    pub async fn load(&mut self) -> Result<&mut (dyn MutableState + '_)> {
        self.load_internal().await?;
        self.refresh_replication_version()?;
        self.state
            .mutable_state
            .as_mut()
            .map(|state| &mut **state as &mut dyn MutableState)
            .ok_or_else(|| HistoryError::invariant("mutable state absent after load"))
    }

    /// Load (if needed) and return the execution's size accounting.
    pub async fn load_execution_stats(&mut self) -> Result<ExecutionStats> {
        self.load().await?;
        self.state
            .stats
            .ok_or_else(|| HistoryError::invariant("execution stats absent after load"))
    }

    async fn load_internal(&mut self) -> Result<()> {
        if self.state.mutable_state.is_some() {
            return Ok(());
        }

        let response = self
            .get_workflow_execution_with_retry(GetWorkflowExecutionRequest {
                domain_id: self.ctx.domain_id,
                execution: self.ctx.execution.clone(),
            })
            .await?;

        let domain_name = self.domain_name();
        let mut mutable_state = self.ctx.deps.mutable_state_factory.create(&domain_name);
        let history_size = response.state.execution_stats.history_size;
        self.state.stats = Some(response.state.execution_stats);
        self.state.update_condition = response.state.execution_info.next_event_id;
        mutable_state.load(response.state);
        self.state.mutable_state = Some(mutable_state);

        self.ctx
            .deps
            .metrics
            .record_execution_load(response.mutable_state_stats, history_size);
        debug!(
            domain_id = %self.ctx.domain_id,
            workflow_id = %self.ctx.execution.workflow_id,
            run_id = %self.ctx.execution.run_id,
            update_condition = self.state.update_condition,
            history_size,
            "loaded workflow execution"
        );
        Ok(())
    }

    /// Replication policy hook: after a load, running executions of global
    /// domains pick up the domain's current failover version and replication
    /// policy. Local domains and finished workflows are never re-stamped.
    fn refresh_replication_version(&mut self) -> Result<()> {
        if !self.ctx.deps.config.global_domains_enabled {
            return Ok(());
        }
        let mutable_state = self
            .state
            .mutable_state
            .as_deref_mut()
            .ok_or_else(|| HistoryError::invariant("mutable state absent during version refresh"))?;
        if mutable_state.replication_state().is_none() {
            return Ok(());
        }
        if !mutable_state.is_workflow_execution_running() {
            return Ok(());
        }
        let entry = self
            .ctx
            .deps
            .domain_cache
            .domain_by_id(self.ctx.domain_id)
            .map_err(|err| HistoryError::Domain(err.to_string()))?;
        if !entry.is_global {
            return Ok(());
        }
        mutable_state.update_replication_state_version(entry.failover_version, false);
        mutable_state.update_replication_policy(entry.replication_policy);
        Ok(())
    }

    // =========================================================================
    // Create
    // =========================================================================

    /// Install the execution row of a freshly started run.
    ///
    /// The initial history batch is persisted by the caller before this is
    /// invoked; `history_size` is its byte size, stamped onto the snapshot's
    /// stats. On success the snapshot's tasks are fanned out.
    pub async fn create_workflow_execution(
        &mut self,
        mut new_workflow: WorkflowSnapshot,
        history_size: i64,
        now: DateTime<Utc>,
        mode: CreateWorkflowMode,
        previous_run_id: Option<Uuid>,
        previous_last_write_version: i64,
    ) -> Result<()> {
        new_workflow.execution_stats = ExecutionStats { history_size };
        let request = CreateWorkflowExecutionRequest {
            mode,
            previous_run_id,
            previous_last_write_version,
            new_workflow_snapshot: new_workflow,
        };

        if let Err(err) = self.create_workflow_execution_with_retry(&request).await {
            self.clear();
            return Err(err);
        }

        let snapshot = &request.new_workflow_snapshot;
        self.notify_tasks(
            &snapshot.transfer_tasks,
            &snapshot.replication_tasks,
            &snapshot.timer_tasks,
        );
        debug!(
            domain_id = %self.ctx.domain_id,
            workflow_id = %self.ctx.execution.workflow_id,
            run_id = %self.ctx.execution.run_id,
            ?mode,
            committed_at = %now,
            history_size,
            "created workflow execution"
        );
        Ok(())
    }

    // =========================================================================
    // Update
    // =========================================================================

    /// Commit the cached mutable state as an active-cluster mutation.
    pub async fn update_workflow_execution_as_active(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.update_workflow_execution_with_new(now, None, TransactionPolicy::Active, None)
            .await
    }

    /// Commit the cached mutable state and a successor run, both active.
    pub async fn update_workflow_execution_with_new_as_active(
        &mut self,
        now: DateTime<Utc>,
        new_run: NewRunCommit<'_, '_>,
    ) -> Result<()> {
        self.update_workflow_execution_with_new(
            now,
            Some(new_run),
            TransactionPolicy::Active,
            Some(TransactionPolicy::Active),
        )
        .await
    }

    /// Commit state replayed from another cluster.
    pub async fn update_workflow_execution_as_passive(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.update_workflow_execution_with_new(now, None, TransactionPolicy::Passive, None)
            .await
    }

    /// Commit replayed state for the current run plus its successor.
    pub async fn update_workflow_execution_with_new_as_passive(
        &mut self,
        now: DateTime<Utc>,
        new_run: NewRunCommit<'_, '_>,
    ) -> Result<()> {
        self.update_workflow_execution_with_new(
            now,
            Some(new_run),
            TransactionPolicy::Passive,
            Some(TransactionPolicy::Passive),
        )
        .await
    }

    /// The central transaction step: close the cached mutable state as a
    /// mutation, persist its event batches, optionally close a paired new
    /// run as a snapshot with its initial batch, merge continue-as-new
    /// replication tasks, and commit everything atomically.
    ///
    /// Any failure up to and including the commit clears the current and
    /// paired contexts before the error surfaces.
    pub async fn update_workflow_execution_with_new(
        &mut self,
        now: DateTime<Utc>,
        mut new_run: Option<NewRunCommit<'_, '_>>,
        current_policy: TransactionPolicy,
        new_policy: Option<TransactionPolicy>,
    ) -> Result<()> {
        let result = self
            .update_with_new_impl(now, new_run.as_mut(), current_policy, new_policy)
            .await;
        if result.is_err() {
            self.clear();
            if let Some(new_run) = new_run.as_mut() {
                new_run.context.clear();
            }
        }
        result
    }

    async fn update_with_new_impl(
        &mut self,
        now: DateTime<Utc>,
        new_run: Option<&mut NewRunCommit<'_, '_>>,
        current_policy: TransactionPolicy,
        new_policy: Option<TransactionPolicy>,
    ) -> Result<()> {
        let (mut mutation, events_seq) = {
            let mutable_state = self
                .state
                .mutable_state
                .as_deref_mut()
                .ok_or_else(|| HistoryError::invariant("update requires a loaded mutable state"))?;
            mutable_state.close_transaction_as_mutation(now, current_policy)?
        };

        let mut current_size = self.history_size();
        for batch in &events_seq {
            current_size += self.persist_non_first_workflow_events(batch).await?;
        }
        self.set_history_size(current_size);
        mutation.execution_stats = ExecutionStats {
            history_size: current_size,
        };

        let mut new_snapshot: Option<WorkflowSnapshot> = None;
        if let Some(new_run) = new_run {
            let policy = new_policy.ok_or_else(|| {
                HistoryError::invariant("paired update requires a policy for the new run")
            })?;
            let (mut snapshot, new_events_seq) = new_run
                .mutable_state
                .close_transaction_as_snapshot(now, policy)?;
            let first_batch = new_events_seq.first().ok_or_else(|| {
                HistoryError::invariant("new run closed without an initial event batch")
            })?;

            let mut new_size = new_run.context.history_size();
            new_size += self.persist_first_workflow_events(first_batch).await?;
            new_run.context.set_history_size(new_size);
            snapshot.execution_stats = ExecutionStats {
                history_size: new_size,
            };
            new_snapshot = Some(snapshot);
        }

        merge_continue_as_new_replication_tasks(&mut mutation, new_snapshot.as_mut())?;

        let request = UpdateWorkflowExecutionRequest {
            mutation,
            new_workflow_snapshot: new_snapshot,
        };
        let response = self.update_workflow_execution_with_retry(&request).await?;
        let UpdateWorkflowExecutionRequest {
            mutation,
            new_workflow_snapshot: new_snapshot,
        } = request;

        self.state.update_condition = mutation.execution_info.next_event_id;

        let (notification, next_event_id, completion_event) = {
            let mutable_state = self
                .state
                .mutable_state
                .as_deref()
                .ok_or_else(|| HistoryError::invariant("mutable state absent after commit"))?;
            let notification = HistoryEventNotification {
                domain_id: self.ctx.domain_id,
                execution: self.ctx.execution.clone(),
                last_first_event_id: mutable_state.last_first_event_id(),
                next_event_id: mutable_state.next_event_id(),
                previous_started_event_id: mutable_state.previous_started_event_id(),
                is_running: mutable_state.is_workflow_execution_running(),
                close_status: mutable_state.execution_info().close_status,
            };
            let completion_event = if mutation.execution_info.state == WorkflowState::Completed {
                mutable_state.completion_event()
            } else {
                None
            };
            (notification, mutable_state.next_event_id(), completion_event)
        };
        self.ctx.deps.engine.notify_new_history_event(notification);

        self.notify_tasks(
            &mutation.transfer_tasks,
            &mutation.replication_tasks,
            &mutation.timer_tasks,
        );
        if let Some(snapshot) = &new_snapshot {
            self.notify_tasks(
                &snapshot.transfer_tasks,
                &snapshot.replication_tasks,
                &snapshot.timer_tasks,
            );
        }

        self.ctx
            .deps
            .metrics
            .record_history_stats(self.history_size(), next_event_id - 1);
        self.ctx.deps.metrics.record_session_stats(response.session_stats);
        if let Some(event) = completion_event {
            self.ctx.deps.metrics.record_workflow_completed();
            debug!(
                workflow_id = %self.ctx.execution.workflow_id,
                run_id = %self.ctx.execution.run_id,
                completion_event_id = event.event_id,
                "workflow execution completed"
            );
        }
        Ok(())
    }

    // =========================================================================
    // Conflict resolve
    // =========================================================================

    /// Atomically replace a diverged local run with the authoritative image
    /// discovered by the replicator.
    ///
    /// On success the context is invalidated and reloaded so the returned
    /// mutable state (and every later load) observes the resolved image.
    pub async fn conflict_resolve_workflow_execution(
        &mut self,
        now: DateTime<Utc>,
        prev_run_id: Uuid,
        prev_last_write_version: i64,
        prev_state: WorkflowState,
        reset_mutable_state: &mut dyn MutableState,
        reset_history_size: i64,
    ) -> Result<&mut (dyn MutableState + '_)> {
        let result = self
            .conflict_resolve_impl(
                now,
                prev_run_id,
                prev_last_write_version,
                prev_state,
                reset_mutable_state,
                reset_history_size,
            )
            .await;
        if let Err(err) = result {
            self.clear();
            return Err(err);
        }
        self.clear();
        self.load().await
    }

    async fn conflict_resolve_impl(
        &mut self,
        now: DateTime<Utc>,
        prev_run_id: Uuid,
        prev_last_write_version: i64,
        prev_state: WorkflowState,
        reset_mutable_state: &mut dyn MutableState,
        reset_history_size: i64,
    ) -> Result<()> {
        // The authoritative image is applied as-is: Passive, and the closer
        // must not produce events of its own.
        let (mut snapshot, events_seq) =
            reset_mutable_state.close_transaction_as_snapshot(now, TransactionPolicy::Passive)?;
        if !events_seq.is_empty() {
            return Err(HistoryError::invariant(
                "conflict resolution must not generate new events",
            ));
        }
        snapshot.execution_stats = ExecutionStats {
            history_size: reset_history_size,
        };

        let request = ConflictResolveWorkflowExecutionRequest {
            prev_run_id,
            prev_last_write_version,
            prev_state,
            reset_workflow_snapshot: snapshot,
        };
        self.conflict_resolve_with_retry(&request).await?;

        let snapshot = &request.reset_workflow_snapshot;
        self.notify_tasks(
            &snapshot.transfer_tasks,
            &snapshot.replication_tasks,
            &snapshot.timer_tasks,
        );
        Ok(())
    }

    // =========================================================================
    // Reset
    // =========================================================================

    /// Atomically close out the current run (optionally extending its
    /// history) and install a new run forked from the base point.
    pub async fn reset_workflow_execution(
        &mut self,
        mut transaction: ResetWorkflowTransaction<'_>,
    ) -> Result<()> {
        let result = self.reset_impl(&mut transaction).await;
        if result.is_err() {
            self.clear();
        }
        result
    }

    async fn reset_impl(&mut self, tx: &mut ResetWorkflowTransaction<'_>) -> Result<()> {
        let now = self.ctx.deps.clock.now();

        let mut current_transfer_tasks: Vec<TransferTask> =
            tx.close_task.take().into_iter().collect();
        let mut current_timer_tasks: Vec<TimerTask> = tx.cleanup_task.take().into_iter().collect();
        stamp_task_info(
            tx.current_mutable_state.current_version(),
            now,
            &mut current_transfer_tasks,
            &mut current_timer_tasks,
        );
        stamp_task_info(
            tx.new_mutable_state.current_version(),
            now,
            &mut tx.new_transfer_tasks,
            &mut tx.new_timer_tasks,
        );

        // Reset always lands on a decision boundary; the reset store
        // operation has no way to carry buffered events for the new run.
        if tx.new_mutable_state.has_buffered_events() {
            return Err(HistoryError::invariant(
                "reset workflow execution must not have buffered events",
            ));
        }

        // Assign durable task IDs to anything still buffered on the current
        // run and settle last-event bookkeeping on both states.
        tx.current_mutable_state.flush_buffered_events()?;
        tx.new_mutable_state.flush_buffered_events()?;

        if tx.update_current {
            let info = tx.current_mutable_state.execution_info().clone();
            let batch = WorkflowEvents {
                domain_id: info.domain_id,
                workflow_id: info.workflow_id.clone(),
                run_id: info.run_id,
                branch_token: tx.current_mutable_state.current_branch(),
                events: tx.current_mutable_state.pending_history_events(),
            };
            let size = self.persist_non_first_workflow_events(&batch).await?;
            let total = self.history_size() + size;
            self.set_history_size(total);
        }

        // Passive on purpose: reset hand-crafts the task lists below, and an
        // Active close would emit replication tasks duplicating them.
        let (mut snapshot, events_seq) = tx
            .new_mutable_state
            .close_transaction_as_snapshot(now, TransactionPolicy::Passive)?;
        if events_seq.len() != 1 {
            return Err(HistoryError::invariant(
                "reset workflow execution must generate exactly one event batch",
            ));
        }
        let mut new_history_size = tx.new_history_size;
        for batch in &events_seq {
            new_history_size += self.persist_non_first_workflow_events(batch).await?;
        }
        snapshot.execution_stats = ExecutionStats {
            history_size: new_history_size,
        };
        snapshot.transfer_tasks = std::mem::take(&mut tx.new_transfer_tasks);
        snapshot.timer_tasks = std::mem::take(&mut tx.new_timer_tasks);
        snapshot.replication_tasks = std::mem::take(&mut tx.new_replication_tasks);

        if snapshot.has_pending_child_state() {
            return Err(HistoryError::invariant(
                "reset snapshot must not carry pending child executions or signals",
            ));
        }

        let current_info = tx.current_mutable_state.execution_info();
        let mut request = ResetWorkflowExecutionRequest {
            base_run_id: tx.base_run_id,
            base_run_next_event_id: tx.base_run_next_event_id,
            current_run_id: current_info.run_id,
            current_run_next_event_id: current_info.next_event_id,
            current_workflow_mutation: None,
            new_workflow_snapshot: snapshot,
        };

        if tx.update_current {
            // Reset leaves child-level state of the current run untouched;
            // the mutation only rewrites the header and task lists.
            let mut mutation = WorkflowMutation::header_only(
                current_info.clone(),
                ExecutionStats {
                    history_size: self.history_size(),
                },
                tx.current_mutable_state.replication_state().copied(),
                self.state.update_condition,
            );
            mutation.transfer_tasks = current_transfer_tasks;
            mutation.timer_tasks = current_timer_tasks;
            mutation.replication_tasks = std::mem::take(&mut tx.current_replication_tasks);
            request.current_workflow_mutation = Some(mutation);
        }

        self.reset_workflow_with_retry(&request).await?;

        let snapshot = &request.new_workflow_snapshot;
        self.notify_tasks(
            &snapshot.transfer_tasks,
            &snapshot.replication_tasks,
            &snapshot.timer_tasks,
        );
        if let Some(mutation) = &request.current_workflow_mutation {
            self.notify_tasks(
                &mutation.transfer_tasks,
                &mutation.replication_tasks,
                &mutation.timer_tasks,
            );
        }
        Ok(())
    }

    // =========================================================================
    // History appender
    // =========================================================================

    /// Persist the initial event batch of a run, creating its history
    /// branch when the run lives in the history tree. Returns the byte size
    /// of the persisted payload.
    pub async fn persist_first_workflow_events(&self, events: &WorkflowEvents) -> Result<i64> {
        let first_event = events.events.first().ok_or_else(|| {
            HistoryError::invariant("cannot persist first workflow events with an empty batch")
        })?;
        let execution = WorkflowExecution::new(events.workflow_id.clone(), events.run_id);

        match events.branch_token.as_deref() {
            None | Some([]) => {
                self.append_history_events_with_retry(AppendHistoryEventsRequest {
                    domain_id: events.domain_id,
                    execution,
                    first_event_id: first_event.event_id,
                    event_batch_version: first_event.version,
                    events: events.events.clone(),
                })
                .await
            }
            Some(branch_token) => {
                self.append_history_branch_with_retry(AppendHistoryBranchRequest {
                    domain_id: events.domain_id,
                    execution,
                    is_new_branch: true,
                    cleanup_info: history_cleanup_info(
                        events.domain_id,
                        &events.workflow_id,
                        events.run_id,
                    ),
                    branch_token: branch_token.to_vec(),
                    events: events.events.clone(),
                })
                .await
            }
        }
    }

    /// Persist a follow-up event batch. An empty batch is a no-op: an
    /// update may commit state without new events.
    pub async fn persist_non_first_workflow_events(&self, events: &WorkflowEvents) -> Result<i64> {
        let Some(first_event) = events.events.first() else {
            return Ok(0);
        };
        let execution = WorkflowExecution::new(events.workflow_id.clone(), events.run_id);

        match events.branch_token.as_deref() {
            None | Some([]) => {
                self.append_history_events_with_retry(AppendHistoryEventsRequest {
                    domain_id: events.domain_id,
                    execution,
                    first_event_id: first_event.event_id,
                    event_batch_version: first_event.version,
                    events: events.events.clone(),
                })
                .await
            }
            Some(branch_token) => {
                self.append_history_branch_with_retry(AppendHistoryBranchRequest {
                    domain_id: events.domain_id,
                    execution,
                    is_new_branch: false,
                    cleanup_info: String::new(),
                    branch_token: branch_token.to_vec(),
                    events: events.events.clone(),
                })
                .await
            }
        }
    }

    // =========================================================================
    // Notification fanout
    // =========================================================================

    fn notify_tasks(
        &self,
        transfer_tasks: &[TransferTask],
        replication_tasks: &[ReplicationTask],
        timer_tasks: &[TimerTask],
    ) {
        self.ctx.deps.engine.notify_new_transfer_tasks(transfer_tasks);
        self.ctx
            .deps
            .engine
            .notify_new_replication_tasks(replication_tasks);
        self.ctx.deps.engine.notify_new_timer_tasks(timer_tasks);
    }

    // =========================================================================
    // Store calls, wrapped in the retry harness
    // =========================================================================

    async fn get_workflow_execution_with_retry(
        &self,
        request: GetWorkflowExecutionRequest,
    ) -> Result<GetWorkflowExecutionResponse> {
        let store = self.ctx.deps.execution_store.clone();
        let result = retry_with_policy(
            &self.ctx.deps.config.persistence_retry,
            StoreError::is_transient,
            move || {
                let store = store.clone();
                let request = request.clone();
                async move { store.get_workflow_execution(request).await }
            },
        )
        .await;

        match result {
            Ok(response) => Ok(response),
            // Absence is an expected signal to the caller, not a fault.
            Err(StoreError::NotFound(message)) => Err(HistoryError::NotFound(message)),
            Err(err) => {
                error!(
                    domain_id = %self.ctx.domain_id,
                    workflow_id = %self.ctx.execution.workflow_id,
                    run_id = %self.ctx.execution.run_id,
                    error = %err,
                    "store fetch operation failure: get workflow execution"
                );
                Err(err.into())
            }
        }
    }

    async fn create_workflow_execution_with_retry(
        &self,
        request: &CreateWorkflowExecutionRequest,
    ) -> Result<()> {
        let shard = self.ctx.deps.shard.clone();
        let result = retry_with_policy(
            &self.ctx.deps.config.persistence_retry,
            StoreError::is_transient,
            move || {
                let shard = shard.clone();
                let request = request.clone();
                async move { shard.create_workflow_execution(request).await }
            },
        )
        .await;

        match result {
            Ok(()) => Ok(()),
            // Expected by the caller's workflow-ID reuse policy.
            Err(StoreError::AlreadyStarted {
                workflow_id,
                run_id,
                start_request_id,
            }) => Err(HistoryError::AlreadyStarted {
                workflow_id,
                run_id,
                start_request_id,
            }),
            Err(err) => {
                error!(
                    domain_id = %self.ctx.domain_id,
                    workflow_id = %self.ctx.execution.workflow_id,
                    run_id = %self.ctx.execution.run_id,
                    error = %err,
                    "store operation failure: create workflow execution"
                );
                Err(err.into())
            }
        }
    }

    async fn update_workflow_execution_with_retry(
        &self,
        request: &UpdateWorkflowExecutionRequest,
    ) -> Result<UpdateWorkflowExecutionResponse> {
        let shard = self.ctx.deps.shard.clone();
        let result = retry_with_policy(
            &self.ctx.deps.config.persistence_retry,
            StoreError::is_transient,
            move || {
                let shard = shard.clone();
                let request = request.clone();
                async move { shard.update_workflow_execution(request).await }
            },
        )
        .await;

        match result {
            Ok(response) => Ok(response),
            // Optimistic-lock loss; the caller invalidates and reloads.
            Err(StoreError::ConditionFailed(_)) => Err(HistoryError::Conflict),
            Err(err) => {
                error!(
                    domain_id = %self.ctx.domain_id,
                    workflow_id = %self.ctx.execution.workflow_id,
                    run_id = %self.ctx.execution.run_id,
                    update_condition = self.state.update_condition,
                    error = %err,
                    "store operation failure: update workflow execution"
                );
                Err(err.into())
            }
        }
    }

    async fn conflict_resolve_with_retry(
        &self,
        request: &ConflictResolveWorkflowExecutionRequest,
    ) -> Result<()> {
        let shard = self.ctx.deps.shard.clone();
        let result = retry_with_policy(
            &self.ctx.deps.config.persistence_retry,
            StoreError::is_transient,
            move || {
                let shard = shard.clone();
                let request = request.clone();
                async move { shard.conflict_resolve_workflow_execution(request).await }
            },
        )
        .await;

        result.map_err(|err| {
            error!(
                domain_id = %self.ctx.domain_id,
                workflow_id = %self.ctx.execution.workflow_id,
                run_id = %self.ctx.execution.run_id,
                error = %err,
                "store operation failure: conflict resolve workflow execution"
            );
            err.into()
        })
    }

    async fn reset_workflow_with_retry(&self, request: &ResetWorkflowExecutionRequest) -> Result<()> {
        let shard = self.ctx.deps.shard.clone();
        let result = retry_with_policy(
            &self.ctx.deps.config.persistence_retry,
            StoreError::is_transient,
            move || {
                let shard = shard.clone();
                let request = request.clone();
                async move { shard.reset_workflow_execution(request).await }
            },
        )
        .await;

        result.map_err(|err| {
            error!(
                domain_id = %self.ctx.domain_id,
                workflow_id = %self.ctx.execution.workflow_id,
                run_id = %self.ctx.execution.run_id,
                update_condition = self.state.update_condition,
                error = %err,
                "store operation failure: reset workflow execution"
            );
            err.into()
        })
    }

    async fn append_history_events_with_retry(
        &self,
        request: AppendHistoryEventsRequest,
    ) -> Result<i64> {
        let shard = self.ctx.deps.shard.clone();
        let size = retry_with_policy(
            &self.ctx.deps.config.persistence_retry,
            StoreError::is_transient,
            move || {
                let shard = shard.clone();
                let request = request.clone();
                async move { shard.append_history_events(request).await }
            },
        )
        .await?;
        Ok(size as i64)
    }

    async fn append_history_branch_with_retry(
        &self,
        request: AppendHistoryBranchRequest,
    ) -> Result<i64> {
        let shard = self.ctx.deps.shard.clone();
        let size = retry_with_policy(
            &self.ctx.deps.config.persistence_retry,
            StoreError::is_transient,
            move || {
                let shard = shard.clone();
                let request = request.clone();
                async move { shard.append_history_branch(request).await }
            },
        )
        .await?;
        Ok(size as i64)
    }
}

/// For a continue-as-new commit, fold the successor run's sole
/// HistoryReplicationTask into every HistoryReplicationTask of the current
/// mutation (as the new-run branch token and event-store version), then
/// strip the successor's replication tasks so they are not shipped twice.
///
/// Passive continue-as-new carries no replication tasks on the current
/// mutation and the merge is a no-op. In the active case the successor must
/// carry exactly one HistoryReplicationTask; anything else refuses the
/// commit.
fn merge_continue_as_new_replication_tasks(
    mutation: &mut WorkflowMutation,
    new_snapshot: Option<&mut WorkflowSnapshot>,
) -> Result<()> {
    if mutation.execution_info.close_status != CloseStatus::ContinuedAsNew {
        return Ok(());
    }
    // Continue-as-new applied from another cluster generates no replication
    // tasks locally.
    if mutation.replication_tasks.is_empty() {
        return Ok(());
    }

    let Some(new_snapshot) = new_snapshot else {
        return Err(HistoryError::invariant(
            "continue-as-new replication requires a new-run snapshot",
        ));
    };
    if new_snapshot.replication_tasks.len() != 1 {
        return Err(HistoryError::invariant(
            "unable to find the replication task on the new run for continue-as-new",
        ));
    }
    let new_run_task = match new_snapshot.replication_tasks.pop() {
        Some(ReplicationTask::History(task)) => task,
        _ => {
            return Err(HistoryError::invariant(
                "continue-as-new expects a history replication task on the new run",
            ));
        }
    };

    let mut task_updated = false;
    for replication_task in mutation.replication_tasks.iter_mut() {
        if let Some(history_task) = replication_task.as_history_mut() {
            task_updated = true;
            history_task.new_run_branch_token = new_run_task.branch_token.clone();
            history_task.new_run_event_store_version = Some(new_run_task.event_store_version);
        }
    }
    if !task_updated {
        return Err(HistoryError::invariant(
            "unable to find the replication task on the current run for continue-as-new",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_mutation, sample_snapshot, history_replication_task};
    use windlass_core::SyncActivityTask;

    #[test]
    fn merge_is_noop_unless_continued_as_new() {
        let mut mutation = sample_mutation(10);
        mutation.replication_tasks = vec![history_replication_task(1, 10, None, 2)];
        let mut snapshot = sample_snapshot(1);
        snapshot.replication_tasks = vec![history_replication_task(1, 3, Some(vec![7]), 2)];

        merge_continue_as_new_replication_tasks(&mut mutation, Some(&mut snapshot)).unwrap();

        assert_eq!(snapshot.replication_tasks.len(), 1);
        let current = mutation.replication_tasks[0].as_history().unwrap();
        assert_eq!(current.new_run_branch_token, None);
    }

    #[test]
    fn merge_is_noop_for_passive_continue_as_new() {
        let mut mutation = sample_mutation(10);
        mutation.execution_info.close_status = CloseStatus::ContinuedAsNew;
        let mut snapshot = sample_snapshot(1);
        snapshot.replication_tasks = vec![history_replication_task(1, 3, Some(vec![7]), 2)];

        merge_continue_as_new_replication_tasks(&mut mutation, Some(&mut snapshot)).unwrap();

        // The new run's task is preserved as-is in the passive case.
        assert_eq!(snapshot.replication_tasks.len(), 1);
    }

    #[test]
    fn merge_moves_new_run_branch_into_current_tasks() {
        let mut mutation = sample_mutation(10);
        mutation.execution_info.close_status = CloseStatus::ContinuedAsNew;
        mutation.replication_tasks = vec![
            history_replication_task(1, 10, None, 2),
            ReplicationTask::SyncActivity(SyncActivityTask {
                scheduled_id: 4,
                version: 1,
            }),
        ];
        let mut snapshot = sample_snapshot(1);
        snapshot.replication_tasks = vec![history_replication_task(1, 3, Some(vec![0xB]), 2)];

        merge_continue_as_new_replication_tasks(&mut mutation, Some(&mut snapshot)).unwrap();

        assert!(snapshot.replication_tasks.is_empty());
        let merged = mutation.replication_tasks[0].as_history().unwrap();
        assert_eq!(merged.new_run_branch_token, Some(vec![0xB]));
        assert_eq!(merged.new_run_event_store_version, Some(2));
        // Sync-activity tasks are untouched.
        assert!(mutation.replication_tasks[1].as_history().is_none());
    }

    #[test]
    fn merge_requires_exactly_one_new_run_task() {
        let mut mutation = sample_mutation(10);
        mutation.execution_info.close_status = CloseStatus::ContinuedAsNew;
        mutation.replication_tasks = vec![history_replication_task(1, 10, None, 2)];

        let mut snapshot = sample_snapshot(1);
        snapshot.replication_tasks = vec![
            history_replication_task(1, 3, Some(vec![1]), 2),
            history_replication_task(3, 5, Some(vec![1]), 2),
        ];
        let err =
            merge_continue_as_new_replication_tasks(&mut mutation, Some(&mut snapshot)).unwrap_err();
        assert!(matches!(err, HistoryError::InvariantViolated(_)));

        let err = merge_continue_as_new_replication_tasks(&mut mutation, None).unwrap_err();
        assert!(matches!(err, HistoryError::InvariantViolated(_)));
    }

    #[test]
    fn merge_requires_history_task_on_current_run() {
        let mut mutation = sample_mutation(10);
        mutation.execution_info.close_status = CloseStatus::ContinuedAsNew;
        mutation.replication_tasks = vec![ReplicationTask::SyncActivity(SyncActivityTask {
            scheduled_id: 4,
            version: 1,
        })];
        let mut snapshot = sample_snapshot(1);
        snapshot.replication_tasks = vec![history_replication_task(1, 3, Some(vec![1]), 2)];

        let err =
            merge_continue_as_new_replication_tasks(&mut mutation, Some(&mut snapshot)).unwrap_err();
        assert!(matches!(err, HistoryError::InvariantViolated(_)));
    }
}
