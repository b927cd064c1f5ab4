//! Boundary to the persistent order/courier store.
//!
//! The engine only touches the status and assignment fields of an order.
//! Every method is a single row-level operation; [`PersistentStore::atomic_assign`]
//! is the one conditional write that first-accept-wins correctness rests on.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::courier::{CourierCandidate, GeoPoint};
use crate::models::order::OrderStatus;

pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("order {0} not found")]
    OrderNotFound(Uuid),

    #[error("courier {0} not found")]
    CourierNotFound(Uuid),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CourierFilter {
    pub available: Option<bool>,
    pub online: Option<bool>,
}

impl CourierFilter {
    pub fn eligible() -> Self {
        Self {
            available: Some(true),
            online: Some(true),
        }
    }

    pub fn matches(&self, available: bool, online: bool) -> bool {
        self.available.is_none_or(|want| want == available)
            && self.online.is_none_or(|want| want == online)
    }
}

/// Assignment-relevant slice of an order row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderState {
    pub status: OrderStatus,
    pub assigned_courier: Option<Uuid>,
}

/// Restaurant and customer coordinates as stored; either may be unresolved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderCoordinates {
    pub restaurant: Option<GeoPoint>,
    pub customer: Option<GeoPoint>,
}

#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn get_couriers(&self, filter: CourierFilter) -> Result<Vec<CourierCandidate>, StoreError>;

    async fn get_courier(&self, courier_id: Uuid) -> Result<CourierCandidate, StoreError>;

    async fn get_order_state(&self, order_id: Uuid) -> Result<OrderState, StoreError>;

    /// Sets `assigned_courier = courier_id, status = assigned` only when the
    /// order is in `expected` and has no courier. Returns whether the write
    /// happened.
    async fn atomic_assign(
        &self,
        order_id: Uuid,
        courier_id: Uuid,
        expected: OrderStatus,
    ) -> Result<bool, StoreError>;

    /// Conditional write: applies only while the order is not terminal and its
    /// courier is still `expected_courier`. `Some` moves the order to
    /// `assigned`, `None` clears the courier and returns the order to
    /// `unbroadcast`. Returns whether the write happened.
    async fn set_assignment(
        &self,
        order_id: Uuid,
        courier_id: Option<Uuid>,
        expected_courier: Option<Uuid>,
    ) -> Result<bool, StoreError>;

    /// Same guard as [`PersistentStore::set_assignment`]. The courier column
    /// is left as is, so terminal orders keep their last courier on record.
    async fn set_order_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
        expected_courier: Option<Uuid>,
    ) -> Result<bool, StoreError>;

    /// Opens the order for bids. Applies only to `unbroadcast` or
    /// `broadcasting` orders with no courier.
    async fn mark_broadcasting(
        &self,
        order_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn set_courier_available(
        &self,
        courier_id: Uuid,
        available: bool,
    ) -> Result<(), StoreError>;

    async fn get_order_coordinates(&self, order_id: Uuid)
    -> Result<OrderCoordinates, StoreError>;
}
