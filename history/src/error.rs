//! Error surface of the history engine's transaction coordinator.

use uuid::Uuid;
use windlass_core::StoreError;

/// Errors surfaced by execution-context operations.
///
/// `Conflict`, `NotFound`, and `AlreadyStarted` are expected control-flow
/// signals: callers pattern-match on them and they are never logged at error
/// level. `InvariantViolated` marks a malformed transaction and is never
/// retried. `Store` passes every other storage failure through unchanged.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// The commit's optimistic-concurrency condition no longer held.
    /// Callers typically invalidate their cache and reload.
    #[error("workflow execution transaction conflict")]
    Conflict,

    /// The execution does not exist in the store.
    #[error("workflow execution not found: {0}")]
    NotFound(String),

    /// A create collided with an existing run holding the workflow ID; the
    /// caller applies its ID-reuse policy.
    #[error("workflow already started: workflow {workflow_id} run {run_id}")]
    AlreadyStarted {
        workflow_id: String,
        run_id: Uuid,
        start_request_id: String,
    },

    /// A transaction reached the coordinator in a shape it must never have.
    #[error("internal invariant violated: {0}")]
    InvariantViolated(String),

    /// Domain metadata lookup failed; distinct from execution-store
    /// failures because the caller retries it against the metadata cache,
    /// not the execution store.
    #[error("domain lookup failed: {0}")]
    Domain(String),

    /// Lock acquisition was abandoned because the caller's cancellation
    /// signal fired.
    #[error("context lock acquisition cancelled")]
    LockCancelled,

    /// Storage failure, transient or terminal, after the retry budget.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl HistoryError {
    pub(crate) fn invariant(message: impl Into<String>) -> Self {
        HistoryError::InvariantViolated(message.into())
    }
}

/// Result type alias for history-engine operations.
pub type Result<T> = std::result::Result<T, HistoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_pass_through() {
        let err: HistoryError = StoreError::Timeout("update".into()).into();
        assert!(matches!(err, HistoryError::Store(StoreError::Timeout(_))));
    }

    #[test]
    fn display_is_stable_for_sentinels() {
        assert_eq!(
            HistoryError::Conflict.to_string(),
            "workflow execution transaction conflict"
        );
        assert_eq!(
            HistoryError::LockCancelled.to_string(),
            "context lock acquisition cancelled"
        );
    }

    #[test]
    fn domain_failures_are_not_store_failures() {
        let err = HistoryError::Domain("domain deadbeef not registered".into());
        assert!(!matches!(err, HistoryError::Store(_)));
        assert_eq!(
            err.to_string(),
            "domain lookup failed: domain deadbeef not registered"
        );
    }
}
