//! Task notification fanout to the downstream pumps.
//!
//! Notifications are best-effort wake-ups: the pumps also poll storage, so a
//! dropped notification only adds latency, never loses work. Nothing here
//! blocks the commit path.

use tokio::sync::mpsc;
use uuid::Uuid;
use windlass_core::{CloseStatus, ReplicationTask, TimerTask, TransferTask, WorkflowExecution};

/// Emitted after every committed update so history subscribers (pollers on
/// long-poll GetHistory, queries) can react without polling lag.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEventNotification {
    pub domain_id: Uuid,
    pub execution: WorkflowExecution,
    pub last_first_event_id: i64,
    pub next_event_id: i64,
    pub previous_started_event_id: i64,
    pub is_running: bool,
    pub close_status: CloseStatus,
}

/// Handle into the history engine's notification side.
///
/// All methods are fire-and-forget and must not block; implementations are
/// shared and safe for concurrent use.
pub trait Engine: Send + Sync {
    fn notify_new_transfer_tasks(&self, tasks: &[TransferTask]);
    fn notify_new_timer_tasks(&self, tasks: &[TimerTask]);
    fn notify_new_replication_tasks(&self, tasks: &[ReplicationTask]);
    fn notify_new_history_event(&self, notification: HistoryEventNotification);
}

/// Receiving ends of the notification channels, owned by the pumps.
pub struct NotificationReceivers {
    pub transfer: mpsc::Receiver<TransferTask>,
    pub timer: mpsc::Receiver<TimerTask>,
    pub replication: mpsc::Receiver<ReplicationTask>,
    pub history_events: mpsc::Receiver<HistoryEventNotification>,
}

/// Channel-backed [`Engine`] implementation.
///
/// Each pump gets its own bounded channel. A full or closed channel drops
/// the notification; the pump's storage poll covers the gap.
pub struct NotificationPumps {
    transfer_tx: mpsc::Sender<TransferTask>,
    timer_tx: mpsc::Sender<TimerTask>,
    replication_tx: mpsc::Sender<ReplicationTask>,
    history_tx: mpsc::Sender<HistoryEventNotification>,
}

impl NotificationPumps {
    /// Create the pumps with the given per-channel capacity.
    pub fn new(capacity: usize) -> (Self, NotificationReceivers) {
        let (transfer_tx, transfer) = mpsc::channel(capacity);
        let (timer_tx, timer) = mpsc::channel(capacity);
        let (replication_tx, replication) = mpsc::channel(capacity);
        let (history_tx, history_events) = mpsc::channel(capacity);
        (
            Self {
                transfer_tx,
                timer_tx,
                replication_tx,
                history_tx,
            },
            NotificationReceivers {
                transfer,
                timer,
                replication,
                history_events,
            },
        )
    }
}

impl Engine for NotificationPumps {
    fn notify_new_transfer_tasks(&self, tasks: &[TransferTask]) {
        for task in tasks {
            if self.transfer_tx.try_send(task.clone()).is_err() {
                tracing::debug!(kind = ?task.kind, "transfer pump slow, dropping notification");
            }
        }
    }

    fn notify_new_timer_tasks(&self, tasks: &[TimerTask]) {
        for task in tasks {
            if self.timer_tx.try_send(task.clone()).is_err() {
                tracing::debug!(kind = ?task.kind, "timer pump slow, dropping notification");
            }
        }
    }

    fn notify_new_replication_tasks(&self, tasks: &[ReplicationTask]) {
        for task in tasks {
            if self.replication_tx.try_send(task.clone()).is_err() {
                tracing::debug!("replication pump slow, dropping notification");
            }
        }
    }

    fn notify_new_history_event(&self, notification: HistoryEventNotification) {
        if self.history_tx.try_send(notification).is_err() {
            tracing::debug!("history event subscriber slow, dropping notification");
        }
    }
}
