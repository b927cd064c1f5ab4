//! Best-effort notification hand-off. Delivery itself belongs to an
//! external subsystem with its own retries.

pub mod queue;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use queue::{ChannelNotificationQueue, run_notification_worker};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    NewOrderOffer,
    OrderAssigned,
    CourierAssigned,
    CourierChanged,
    OrderReleased,
    OrderUnassigned,
    OrderCancelled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Recipient {
    Courier(Uuid),
    Customer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub order_id: Uuid,
    pub recipient: Recipient,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn to_courier(kind: NotificationKind, order_id: Uuid, courier_id: Uuid) -> Self {
        Self {
            kind,
            order_id,
            recipient: Recipient::Courier(courier_id),
            reason: None,
            created_at: Utc::now(),
        }
    }

    pub fn to_customer(kind: NotificationKind, order_id: Uuid) -> Self {
        Self {
            kind,
            order_id,
            recipient: Recipient::Customer,
            reason: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("notification queue is full")]
    QueueFull,

    #[error("notification queue is closed")]
    Closed,
}

#[async_trait]
pub trait NotificationQueue: Send + Sync {
    async fn enqueue(&self, notification: Notification) -> Result<(), NotificationError>;
}
