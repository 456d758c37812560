//! Task descriptors handed to the transfer, timer, and replication pumps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a transfer task asks the transfer pump to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferTaskKind {
    ActivityTask,
    DecisionTask,
    CloseExecution,
    CancelExecution,
    SignalExecution,
    StartChildExecution,
    RecordWorkflowStarted,
}

/// A unit of work for the transfer pump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferTask {
    pub kind: TransferTaskKind,
    /// Durable queue position; assigned by the shard at commit.
    pub task_id: i64,
    pub version: i64,
    pub visibility_time: Option<DateTime<Utc>>,
    /// Event the task refers to (schedule/initiated event ID).
    pub schedule_id: i64,
}

impl TransferTask {
    pub fn new(kind: TransferTaskKind, schedule_id: i64) -> Self {
        Self {
            kind,
            task_id: 0,
            version: 0,
            visibility_time: None,
            schedule_id,
        }
    }
}

/// What a timer task asks the timer pump to do when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimerTaskKind {
    DecisionTimeout,
    ActivityTimeout,
    UserTimer,
    WorkflowTimeout,
    DeleteHistoryEvent,
}

/// A unit of work for the timer pump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerTask {
    pub kind: TimerTaskKind,
    pub task_id: i64,
    pub version: i64,
    /// When the timer becomes due.
    pub visibility_time: Option<DateTime<Utc>>,
    pub event_id: i64,
}

impl TimerTask {
    pub fn new(kind: TimerTaskKind, event_id: i64) -> Self {
        Self {
            kind,
            task_id: 0,
            version: 0,
            visibility_time: None,
            event_id,
        }
    }
}

/// Ships a range of history events to passive clusters.
///
/// For a continue-as-new commit the predecessor run's task additionally
/// carries the successor run's branch token and event-store version, so the
/// receiving cluster can create both runs from one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryReplicationTask {
    pub first_event_id: i64,
    pub next_event_id: i64,
    pub version: i64,
    pub branch_token: Option<Vec<u8>>,
    pub event_store_version: i32,
    pub new_run_branch_token: Option<Vec<u8>>,
    pub new_run_event_store_version: Option<i32>,
}

/// Ships one activity's heartbeat/started state to passive clusters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncActivityTask {
    pub scheduled_id: i64,
    pub version: i64,
}

/// A unit of work for the replication pump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "taskType")]
pub enum ReplicationTask {
    History(HistoryReplicationTask),
    SyncActivity(SyncActivityTask),
}

impl ReplicationTask {
    /// Borrow the history payload when this is a history replication task.
    pub fn as_history(&self) -> Option<&HistoryReplicationTask> {
        match self {
            ReplicationTask::History(task) => Some(task),
            ReplicationTask::SyncActivity(_) => None,
        }
    }

    /// Mutably borrow the history payload when this is a history task.
    pub fn as_history_mut(&mut self) -> Option<&mut HistoryReplicationTask> {
        match self {
            ReplicationTask::History(task) => Some(task),
            ReplicationTask::SyncActivity(_) => None,
        }
    }
}

/// Stamp freshly assembled transfer and timer tasks with the version of the
/// run that produced them and the wall-clock time of the commit.
pub fn stamp_task_info(
    version: i64,
    now: DateTime<Utc>,
    transfer_tasks: &mut [TransferTask],
    timer_tasks: &mut [TimerTask],
) {
    for task in transfer_tasks.iter_mut() {
        task.version = version;
        task.visibility_time = Some(now);
    }
    for task in timer_tasks.iter_mut() {
        task.version = version;
        // Timer fire times are set by the producer; only stamp when absent.
        if task.visibility_time.is_none() {
            task.visibility_time = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamp_sets_version_and_time() {
        let now = Utc::now();
        let mut transfer = vec![TransferTask::new(TransferTaskKind::CloseExecution, 10)];
        let mut timer = vec![TimerTask::new(TimerTaskKind::DeleteHistoryEvent, 10)];

        stamp_task_info(42, now, &mut transfer, &mut timer);

        assert_eq!(transfer[0].version, 42);
        assert_eq!(transfer[0].visibility_time, Some(now));
        assert_eq!(timer[0].version, 42);
        assert_eq!(timer[0].visibility_time, Some(now));
    }

    #[test]
    fn stamp_keeps_existing_fire_time() {
        let now = Utc::now();
        let fire_at = now + chrono::Duration::hours(1);
        let mut timer = vec![TimerTask {
            visibility_time: Some(fire_at),
            ..TimerTask::new(TimerTaskKind::UserTimer, 4)
        }];

        stamp_task_info(7, now, &mut [], &mut timer);

        assert_eq!(timer[0].version, 7);
        assert_eq!(timer[0].visibility_time, Some(fire_at));
    }

    #[test]
    fn replication_task_history_accessor() {
        let mut task = ReplicationTask::History(HistoryReplicationTask {
            first_event_id: 1,
            next_event_id: 5,
            version: 2,
            branch_token: None,
            event_store_version: 2,
            new_run_branch_token: None,
            new_run_event_store_version: None,
        });
        assert!(task.as_history().is_some());
        task.as_history_mut().unwrap().new_run_event_store_version = Some(2);

        let sync = ReplicationTask::SyncActivity(SyncActivityTask {
            scheduled_id: 9,
            version: 2,
        });
        assert!(sync.as_history().is_none());
    }
}
