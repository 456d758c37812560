//! Coordinator metrics.
//!
//! A snapshot-style recorder: counters and last-observed gauges behind a
//! lock, cloned out on read. Emission sites also produce `tracing` events so
//! the numbers are visible without a scraper.

use std::sync::Arc;

use parking_lot::RwLock;
use windlass_core::{MutableStateStats, MutableStateUpdateSessionStats};

/// Point-in-time view of the coordinator's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HistoryMetrics {
    /// Executions fetched from the store.
    pub executions_loaded: u64,
    /// Mutable-state row size reported by the most recent load.
    pub last_mutable_state_size: i64,
    /// History size observed at the most recent load or commit.
    pub last_history_size: i64,
    /// History event count observed at the most recent commit.
    pub last_history_event_count: i64,
    /// Session size reported by the most recent update commit.
    pub last_session_mutable_state_size: i64,
    /// Tasks written by the most recent update commit.
    pub last_session_task_count: usize,
    /// Runs observed reaching the Completed state with a completion event.
    pub workflows_completed: u64,
    /// Context caches dropped, by failure or explicit invalidation.
    pub contexts_cleared: u64,
}

/// Shared handle used by execution contexts to record metrics.
#[derive(Clone, Default)]
pub struct MetricsRecorder {
    inner: Arc<RwLock<HistoryMetrics>>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clone out the current counters.
    pub fn snapshot(&self) -> HistoryMetrics {
        *self.inner.read()
    }

    pub(crate) fn record_execution_load(&self, stats: MutableStateStats, history_size: i64) {
        let mut metrics = self.inner.write();
        metrics.executions_loaded += 1;
        metrics.last_mutable_state_size = stats.mutable_state_size;
        metrics.last_history_size = history_size;
    }

    pub(crate) fn record_history_stats(&self, history_size: i64, event_count: i64) {
        let mut metrics = self.inner.write();
        metrics.last_history_size = history_size;
        metrics.last_history_event_count = event_count;
    }

    pub(crate) fn record_session_stats(&self, stats: MutableStateUpdateSessionStats) {
        let mut metrics = self.inner.write();
        metrics.last_session_mutable_state_size = stats.mutable_state_size;
        metrics.last_session_task_count = stats.task_count;
    }

    pub(crate) fn record_workflow_completed(&self) {
        self.inner.write().workflows_completed += 1;
    }

    pub(crate) fn record_context_cleared(&self) {
        self.inner.write().contexts_cleared += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorder_accumulates() {
        let recorder = MetricsRecorder::new();
        recorder.record_execution_load(
            MutableStateStats {
                mutable_state_size: 2048,
                ..Default::default()
            },
            120,
        );
        recorder.record_history_stats(320, 11);
        recorder.record_workflow_completed();
        recorder.record_context_cleared();
        recorder.record_context_cleared();

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.executions_loaded, 1);
        assert_eq!(snapshot.last_mutable_state_size, 2048);
        assert_eq!(snapshot.last_history_size, 320);
        assert_eq!(snapshot.last_history_event_count, 11);
        assert_eq!(snapshot.workflows_completed, 1);
        assert_eq!(snapshot.contexts_cleared, 2);
    }
}
