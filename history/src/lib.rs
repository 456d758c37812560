//! # Windlass History
//!
//! The per-execution transaction coordinator of the Windlass history engine.
//!
//! For each `(domain, workflow, run)` triple the coordinator loads the
//! workflow's mutable state from storage, serializes concurrent mutators
//! behind a per-execution lock, appends history event batches to the
//! append-only event store, commits the closed transaction to the execution
//! store under an optimistic-concurrency condition, and fans out task
//! notifications to the transfer, timer, and replication pumps.
//!
//! ## Walkthrough
//!
//! ```ignore
//! let context = registry.get_or_create(domain_id, &execution);
//! let mut guard = context.lock(cancellation).await?;
//!
//! let mutable_state = guard.load().await?;
//! // ... drive the workflow state machine against `mutable_state` ...
//!
//! guard.update_workflow_execution_as_active(clock.now()).await?;
//! drop(guard);
//! ```
//!
//! On any commit error the guard clears its cached state before the error
//! surfaces, so the next caller starts from a fresh load.
//!
//! ## Modules
//!
//! - [`context`] - The execution context, its lock, and the commit paths
//! - [`cache`] - Registry of live contexts
//! - [`retry`] - Retry harness wrapped around every store call
//! - [`mutable_state`] - Contract consumed from the mutable-state builder
//! - [`store`] - Execution store and shard seams
//! - [`domain`] - Domain metadata cache seam
//! - [`engine`] - Notification fanout to the downstream pumps
//! - [`metrics`] - Coordinator metrics
//! - [`testing`] - Programmable fakes for tests

pub mod cache;
pub mod clock;
pub mod config;
pub mod context;
pub mod domain;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod mutable_state;
pub mod retry;
pub mod store;
pub mod testing;

pub use cache::ContextRegistry;
pub use clock::{Clock, SystemClock};
pub use config::{HistoryConfig, RetryPolicy};
pub use context::{
    ContextDeps, ContextGuard, ExecutionContext, NewRunCommit, ResetWorkflowTransaction,
};
pub use domain::{DomainCache, DomainEntry, ReplicationPolicy};
pub use engine::{Engine, HistoryEventNotification, NotificationPumps, NotificationReceivers};
pub use error::{HistoryError, Result};
pub use metrics::{HistoryMetrics, MetricsRecorder};
pub use mutable_state::{MutableState, MutableStateFactory, TransactionPolicy};
pub use retry::retry_with_policy;
pub use store::{ExecutionStore, Shard};
