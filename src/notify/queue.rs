use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{info, warn};

use crate::notify::{Notification, NotificationError, NotificationQueue, Recipient};
use crate::observability::metrics::Metrics;

/// Bounded channel in front of the delivery worker. Enqueue never waits:
/// a full queue is reported, not absorbed.
#[derive(Clone)]
pub struct ChannelNotificationQueue {
    tx: mpsc::Sender<Notification>,
    metrics: Metrics,
}

impl ChannelNotificationQueue {
    pub fn new(capacity: usize, metrics: Metrics) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, metrics }, rx)
    }
}

#[async_trait]
impl NotificationQueue for ChannelNotificationQueue {
    async fn enqueue(&self, notification: Notification) -> Result<(), NotificationError> {
        self.tx.try_send(notification).map_err(|err| match err {
            TrySendError::Full(_) => NotificationError::QueueFull,
            TrySendError::Closed(_) => NotificationError::Closed,
        })?;

        self.metrics.notifications_in_queue.inc();
        Ok(())
    }
}

pub async fn run_notification_worker(mut rx: mpsc::Receiver<Notification>, metrics: Metrics) {
    info!("notification worker started");

    while let Some(notification) = rx.recv().await {
        metrics.notifications_in_queue.dec();

        match notification.recipient {
            Recipient::Courier(courier_id) => info!(
                order_id = %notification.order_id,
                courier_id = %courier_id,
                kind = ?notification.kind,
                "courier notification handed off"
            ),
            Recipient::Customer => info!(
                order_id = %notification.order_id,
                kind = ?notification.kind,
                "customer notification handed off"
            ),
        }
    }

    warn!("notification worker stopped: queue channel closed");
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::ChannelNotificationQueue;
    use crate::notify::{Notification, NotificationError, NotificationKind, NotificationQueue};
    use crate::observability::metrics::Metrics;

    #[tokio::test]
    async fn full_queue_reports_instead_of_blocking() {
        let (queue, _rx) = ChannelNotificationQueue::new(1, Metrics::new());
        let order_id = Uuid::new_v4();

        queue
            .enqueue(Notification::to_customer(NotificationKind::CourierAssigned, order_id))
            .await
            .unwrap();
        let second = queue
            .enqueue(Notification::to_customer(NotificationKind::CourierAssigned, order_id))
            .await;

        assert!(matches!(second, Err(NotificationError::QueueFull)));
    }

    #[tokio::test]
    async fn dropped_worker_closes_queue() {
        let (queue, rx) = ChannelNotificationQueue::new(4, Metrics::new());
        drop(rx);

        let result = queue
            .enqueue(Notification::to_courier(
                NotificationKind::NewOrderOffer,
                Uuid::new_v4(),
                Uuid::new_v4(),
            ))
            .await;

        assert!(matches!(result, Err(NotificationError::Closed)));
    }
}
