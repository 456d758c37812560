//! History events and event batches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Event types recorded in a workflow's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    // Workflow lifecycle events
    WorkflowStarted,
    WorkflowCompleted,
    WorkflowFailed,
    WorkflowTimedOut,
    WorkflowTerminated,
    WorkflowCanceled,
    WorkflowContinuedAsNew,

    // Decision events
    DecisionScheduled,
    DecisionStarted,
    DecisionCompleted,
    DecisionTimedOut,

    // Activity events
    ActivityScheduled,
    ActivityStarted,
    ActivityCompleted,
    ActivityFailed,

    // Timer events
    TimerStarted,
    TimerFired,
    TimerCanceled,

    // External events
    SignalReceived,
    CancelRequested,
}

impl EventType {
    /// Check if this event type closes the workflow.
    pub fn is_workflow_terminal(&self) -> bool {
        matches!(
            self,
            Self::WorkflowCompleted
                | Self::WorkflowFailed
                | Self::WorkflowTimedOut
                | Self::WorkflowTerminated
                | Self::WorkflowCanceled
                | Self::WorkflowContinuedAsNew
        )
    }
}

/// A single persisted history event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEvent {
    /// Position of this event in the run's history (1-indexed).
    pub event_id: i64,
    /// Failover version of the cluster that generated the event.
    pub version: i64,
    /// Durable task ID assigned when buffered events are flushed.
    pub task_id: i64,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    /// Type-specific payload.
    #[serde(default)]
    pub attributes: Value,
}

impl HistoryEvent {
    pub fn new(event_id: i64, version: i64, event_type: EventType) -> Self {
        Self {
            event_id,
            version,
            task_id: 0,
            event_type,
            timestamp: Utc::now(),
            attributes: Value::Null,
        }
    }
}

/// An ordered group of history events persisted atomically.
///
/// The first event's ID and version identify the batch. A populated branch
/// token routes the batch to the history-tree append; its absence selects
/// the legacy flat per-workflow append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowEvents {
    pub domain_id: Uuid,
    pub workflow_id: String,
    pub run_id: Uuid,
    pub branch_token: Option<Vec<u8>>,
    pub events: Vec<HistoryEvent>,
}

impl WorkflowEvents {
    /// ID of the first event in the batch, if any.
    pub fn first_event_id(&self) -> Option<i64> {
        self.events.first().map(|e| e.event_id)
    }

    /// Failover version of the batch, taken from its first event.
    pub fn batch_version(&self) -> Option<i64> {
        self.events.first().map(|e| e.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_identity_comes_from_first_event() {
        let batch = WorkflowEvents {
            domain_id: Uuid::nil(),
            workflow_id: "order-1".into(),
            run_id: Uuid::nil(),
            branch_token: None,
            events: vec![
                HistoryEvent::new(7, 3, EventType::DecisionCompleted),
                HistoryEvent::new(8, 3, EventType::ActivityScheduled),
            ],
        };
        assert_eq!(batch.first_event_id(), Some(7));
        assert_eq!(batch.batch_version(), Some(3));
    }

    #[test]
    fn empty_batch_has_no_identity() {
        let batch = WorkflowEvents {
            domain_id: Uuid::nil(),
            workflow_id: "order-1".into(),
            run_id: Uuid::nil(),
            branch_token: None,
            events: vec![],
        };
        assert_eq!(batch.first_event_id(), None);
        assert_eq!(batch.batch_version(), None);
    }

    #[test]
    fn event_type_serializes_screaming_snake() {
        let json = serde_json::to_string(&EventType::WorkflowContinuedAsNew).unwrap();
        assert_eq!(json, "\"WORKFLOW_CONTINUED_AS_NEW\"");
    }

    #[test]
    fn terminal_event_types() {
        assert!(EventType::WorkflowContinuedAsNew.is_workflow_terminal());
        assert!(EventType::WorkflowCompleted.is_workflow_terminal());
        assert!(!EventType::DecisionCompleted.is_workflow_terminal());
        assert!(!EventType::SignalReceived.is_workflow_terminal());
    }
}
