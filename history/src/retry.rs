//! Retry harness wrapped around every store operation.

use std::future::Future;

use crate::config::RetryPolicy;

/// Run `operation` until it succeeds, fails terminally, or exhausts the
/// policy's attempt budget.
///
/// The harness is deliberately decoupled from any concrete error hierarchy:
/// `is_transient` is the only thing that decides whether a failure is worth
/// another attempt. The last error is returned unchanged when the budget
/// runs out.
pub async fn retry_with_policy<T, E, P, F, Fut>(
    policy: &RetryPolicy,
    mut is_transient: P,
    mut operation: F,
) -> std::result::Result<T, E>
where
    E: std::fmt::Display,
    P: FnMut(&E) -> bool,
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    let mut attempt: u32 = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if !is_transient(&err) || policy.is_exhausted(attempt) {
                    return Err(err);
                }
                let backoff = policy.calculate_backoff(attempt);
                tracing::debug!(
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "retrying transient store failure"
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use windlass_core::StoreError;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            backoff_multiplier: 2.0,
            max_attempts,
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = retry_with_policy(&fast_policy(5), StoreError::is_transient, || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(StoreError::Timeout("get".into()))
                } else {
                    Ok(41 + 1)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn terminal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> =
            retry_with_policy(&fast_policy(5), StoreError::is_transient, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(StoreError::ConditionFailed("stale".into())) }
            })
            .await;
        assert!(matches!(result, Err(StoreError::ConditionFailed(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn attempt_budget_is_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> =
            retry_with_policy(&fast_policy(3), StoreError::is_transient, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(StoreError::Busy("shedding".into())) }
            })
            .await;
        assert!(matches!(result, Err(StoreError::Busy(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
