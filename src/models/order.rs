use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::courier::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Unbroadcast,
    Broadcasting,
    Assigned,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryOrder {
    pub id: Uuid,
    pub restaurant: Option<GeoPoint>,
    pub customer: Option<GeoPoint>,
    pub status: OrderStatus,
    pub assigned_courier: Option<Uuid>,
    pub broadcast_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Fixed endpoints of a delivery; both are required before a route exists.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderGeometry {
    pub restaurant: GeoPoint,
    pub customer: GeoPoint,
}
