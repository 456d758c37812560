//! Store error taxonomy shared by every execution-store backend.

use uuid::Uuid;

/// Error surface of the execution store.
///
/// Backends map their driver-level failures onto this taxonomy; the history
/// engine only ever classifies against it. `Timeout`, `Busy`, and
/// `Unavailable` are transient and eligible for retry, everything else is
/// terminal for the attempted operation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The store did not answer within its own deadline.
    #[error("store operation timed out: {0}")]
    Timeout(String),

    /// The store shed load; the operation was not attempted.
    #[error("store busy: {0}")]
    Busy(String),

    /// The backend is temporarily unreachable.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// An optimistic-concurrency condition did not hold at commit time.
    #[error("condition failed: {0}")]
    ConditionFailed(String),

    /// A create collided with an existing execution for the workflow ID.
    ///
    /// Carries the identifiers of the run that already holds the ID so the
    /// caller can apply its ID-reuse policy.
    #[error("workflow already started: workflow {workflow_id} run {run_id}")]
    AlreadyStarted {
        workflow_id: String,
        run_id: Uuid,
        start_request_id: String,
    },

    /// The requested entity does not exist.
    #[error("entity not found: {0}")]
    NotFound(String),

    /// The persisted record failed integrity checks.
    #[error("data corrupted: {0}")]
    Corrupted(String),

    /// Any other backend failure.
    #[error("internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Whether a retry of the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Timeout(_) | StoreError::Busy(_) | StoreError::Unavailable(_)
        )
    }
}

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(StoreError::Timeout("get".into()).is_transient());
        assert!(StoreError::Busy("shed".into()).is_transient());
        assert!(StoreError::Unavailable("conn reset".into()).is_transient());

        assert!(!StoreError::ConditionFailed("next_event_id mismatch".into()).is_transient());
        assert!(!StoreError::NotFound("run".into()).is_transient());
        assert!(!StoreError::AlreadyStarted {
            workflow_id: "order-1".into(),
            run_id: Uuid::nil(),
            start_request_id: "req".into(),
        }
        .is_transient());
        assert!(!StoreError::Internal("boom".into()).is_transient());
    }

    #[test]
    fn display_includes_identifiers() {
        let err = StoreError::AlreadyStarted {
            workflow_id: "order-1".into(),
            run_id: Uuid::nil(),
            start_request_id: "req-9".into(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("order-1"));
        assert!(rendered.contains("00000000-0000-0000-0000-000000000000"));
    }
}
