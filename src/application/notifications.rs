//! Notification queue and dispatcher.
//!
//! Committed transitions enqueue notifications without waiting on delivery.
//! A single dispatcher task drains the queue into the `NotificationSink`.
//! A full queue or a failing sink is logged and never rolls anything back.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::ports::{Notification, NotificationSink};

/// Creates a bounded queue and the dispatcher that drains it.
pub fn notification_channel(
    capacity: usize,
    sink: Arc<dyn NotificationSink>,
) -> (NotificationQueue, NotificationDispatcher) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (
        NotificationQueue { sender },
        NotificationDispatcher { receiver, sink },
    )
}

/// Producer half. Cheap to clone.
#[derive(Clone)]
pub struct NotificationQueue {
    sender: mpsc::Sender<Notification>,
}

impl NotificationQueue {
    /// Enqueues without blocking. Returns false if the notification was dropped.
    pub fn enqueue(&self, notification: Notification) -> bool {
        match self.sender.try_send(notification) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(n)) => {
                tracing::error!(
                    agreement_id = %n.agreement_id,
                    kind = %n.kind,
                    alert = true,
                    "Notification queue full, dropping notification"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(n)) => {
                tracing::warn!(
                    agreement_id = %n.agreement_id,
                    kind = %n.kind,
                    "Notification dispatcher stopped, dropping notification"
                );
                false
            }
        }
    }
}

/// Consumer half, run as a background task.
pub struct NotificationDispatcher {
    receiver: mpsc::Receiver<Notification>,
    sink: Arc<dyn NotificationSink>,
}

impl NotificationDispatcher {
    /// Delivers notifications until the queue closes or shutdown is signaled.
    ///
    /// On shutdown, whatever is already queued is still delivered.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("Notification dispatcher starting");

        loop {
            tokio::select! {
                next = self.receiver.recv() => match next {
                    Some(notification) => self.deliver(&notification).await,
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        self.receiver.close();
                        while let Some(notification) = self.receiver.recv().await {
                            self.deliver(&notification).await;
                        }
                        break;
                    }
                }
            }
        }

        tracing::info!("Notification dispatcher stopped");
    }

    async fn deliver(&self, notification: &Notification) {
        if let Err(e) = self.sink.notify(notification).await {
            tracing::warn!(
                agreement_id = %notification.agreement_id,
                kind = %notification.kind,
                error = %e,
                "Notification delivery failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::notifications::RecordingNotificationSink;
    use crate::domain::billing::NotificationKind;
    use crate::domain::foundation::{AgreementId, Timestamp};

    fn notification(kind: NotificationKind) -> Notification {
        Notification {
            agreement_id: AgreementId::new(),
            kind,
            occurred_at: Timestamp::now(),
        }
    }

    #[tokio::test]
    async fn dispatcher_drains_queue_on_shutdown() {
        let sink = Arc::new(RecordingNotificationSink::new());
        let (queue, dispatcher) = notification_channel(8, sink.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        assert!(queue.enqueue(notification(NotificationKind::PaymentFailed)));
        assert!(queue.enqueue(notification(NotificationKind::PaymentRecovered)));

        let handle = tokio::spawn(dispatcher.run(shutdown_rx));
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(
            sink.kinds(),
            vec![NotificationKind::PaymentFailed, NotificationKind::PaymentRecovered]
        );
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking() {
        let sink = Arc::new(RecordingNotificationSink::new());
        let (queue, _dispatcher) = notification_channel(1, sink);

        assert!(queue.enqueue(notification(NotificationKind::PaymentFailed)));
        assert!(!queue.enqueue(notification(NotificationKind::PaymentFailed)));
    }

    #[tokio::test]
    async fn closed_queue_drops() {
        let sink = Arc::new(RecordingNotificationSink::new());
        let (queue, dispatcher) = notification_channel(4, sink);
        drop(dispatcher);

        assert!(!queue.enqueue(notification(NotificationKind::PaymentFailed)));
    }
}
