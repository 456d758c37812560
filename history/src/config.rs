//! Configuration for the history engine's transaction coordinator.

use std::time::Duration;

/// Bounded exponential backoff policy for store operations.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Ceiling on the delay between attempts.
    pub max_backoff: Duration,
    /// Multiplier applied for each subsequent attempt.
    pub backoff_multiplier: f64,
    /// Total attempts, including the first.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Calculate the backoff preceding the given retry attempt (1-indexed).
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_backoff.as_millis() as f64;
        let multiplier = self
            .backoff_multiplier
            .powi(attempt.saturating_sub(1) as i32);
        let backoff = Duration::from_millis((base_ms * multiplier) as u64);
        std::cmp::min(backoff, self.max_backoff)
    }

    /// Whether the attempt budget is spent after `attempt` failures.
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}

/// Tunables of the coordinator.
#[derive(Debug, Clone)]
pub struct HistoryConfig {
    /// Backoff policy wrapped around every store call.
    pub persistence_retry: RetryPolicy,
    /// Whether global (replicated) domains are enabled for this cluster.
    /// When false the replication policy hook on load is a no-op.
    pub global_domains_enabled: bool,
    /// Capacity of each notification pump channel.
    pub notification_queue_capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            persistence_retry: RetryPolicy::default(),
            global_domains_enabled: true,
            notification_queue_capacity: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            backoff_multiplier: 2.0,
            max_attempts: 10,
        };
        assert_eq!(policy.calculate_backoff(1), Duration::from_millis(100));
        assert_eq!(policy.calculate_backoff(2), Duration::from_millis(200));
        assert_eq!(policy.calculate_backoff(3), Duration::from_millis(350));
        assert_eq!(policy.calculate_backoff(8), Duration::from_millis(350));
    }

    #[test]
    fn attempt_budget() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        };
        assert!(!policy.is_exhausted(1));
        assert!(!policy.is_exhausted(2));
        assert!(policy.is_exhausted(3));
        assert!(policy.is_exhausted(4));
    }
}
