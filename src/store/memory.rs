use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::models::courier::{Courier, CourierCandidate, GeoPoint};
use crate::models::order::{DeliveryOrder, OrderStatus};
use crate::providers::LocationFeed;
use crate::store::{
    CourierFilter, OrderCoordinates, OrderState, PersistentStore, StoreError,
};

/// In-process store. Each row sits behind a DashMap shard lock, so a
/// `get_mut` guard gives the same row-level atomicity a relational
/// `UPDATE ... WHERE` does.
#[derive(Default)]
pub struct MemoryStore {
    couriers: DashMap<Uuid, Courier>,
    orders: DashMap<Uuid, DeliveryOrder>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_courier(&self, courier: Courier) {
        self.couriers.insert(courier.id, courier);
    }

    pub fn insert_order(&self, order: DeliveryOrder) {
        self.orders.insert(order.id, order);
    }

    pub fn courier(&self, id: Uuid) -> Option<Courier> {
        self.couriers.get(&id).map(|entry| entry.value().clone())
    }

    pub fn couriers(&self) -> Vec<Courier> {
        self.couriers
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn order(&self, id: Uuid) -> Option<DeliveryOrder> {
        self.orders.get(&id).map(|entry| entry.value().clone())
    }

    pub fn courier_count(&self) -> usize {
        self.couriers.len()
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    pub fn update_courier_presence(
        &self,
        id: Uuid,
        available: Option<bool>,
        online: Option<bool>,
    ) -> Option<Courier> {
        let mut courier = self.couriers.get_mut(&id)?;
        if let Some(available) = available {
            courier.available = available;
        }
        if let Some(online) = online {
            courier.online = online;
        }
        courier.updated_at = Utc::now();
        Some(courier.clone())
    }

    pub fn update_courier_location(&self, id: Uuid, location: GeoPoint) -> Option<Courier> {
        let mut courier = self.couriers.get_mut(&id)?;
        courier.location = Some(location);
        courier.updated_at = Utc::now();
        Some(courier.clone())
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn get_couriers(&self, filter: CourierFilter) -> Result<Vec<CourierCandidate>, StoreError> {
        Ok(self
            .couriers
            .iter()
            .filter(|entry| filter.matches(entry.available, entry.online))
            .map(|entry| CourierCandidate::from(entry.value()))
            .collect())
    }

    async fn get_courier(&self, courier_id: Uuid) -> Result<CourierCandidate, StoreError> {
        self.couriers
            .get(&courier_id)
            .map(|entry| CourierCandidate::from(entry.value()))
            .ok_or(StoreError::CourierNotFound(courier_id))
    }

    async fn get_order_state(&self, order_id: Uuid) -> Result<OrderState, StoreError> {
        self.orders
            .get(&order_id)
            .map(|order| OrderState {
                status: order.status,
                assigned_courier: order.assigned_courier,
            })
            .ok_or(StoreError::OrderNotFound(order_id))
    }

    async fn atomic_assign(
        &self,
        order_id: Uuid,
        courier_id: Uuid,
        expected: OrderStatus,
    ) -> Result<bool, StoreError> {
        let mut order = self
            .orders
            .get_mut(&order_id)
            .ok_or(StoreError::OrderNotFound(order_id))?;

        if order.status != expected || order.assigned_courier.is_some() {
            return Ok(false);
        }

        order.assigned_courier = Some(courier_id);
        order.status = OrderStatus::Assigned;
        Ok(true)
    }

    async fn set_assignment(
        &self,
        order_id: Uuid,
        courier_id: Option<Uuid>,
        expected_courier: Option<Uuid>,
    ) -> Result<bool, StoreError> {
        let mut order = self
            .orders
            .get_mut(&order_id)
            .ok_or(StoreError::OrderNotFound(order_id))?;

        if !still_held_by(&order, expected_courier) {
            return Ok(false);
        }

        order.assigned_courier = courier_id;
        order.status = match courier_id {
            Some(_) => OrderStatus::Assigned,
            None => OrderStatus::Unbroadcast,
        };
        Ok(true)
    }

    async fn set_order_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
        expected_courier: Option<Uuid>,
    ) -> Result<bool, StoreError> {
        let mut order = self
            .orders
            .get_mut(&order_id)
            .ok_or(StoreError::OrderNotFound(order_id))?;

        if !still_held_by(&order, expected_courier) {
            return Ok(false);
        }

        order.status = status;
        Ok(true)
    }

    async fn mark_broadcasting(
        &self,
        order_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut order = self
            .orders
            .get_mut(&order_id)
            .ok_or(StoreError::OrderNotFound(order_id))?;

        let open = matches!(
            order.status,
            OrderStatus::Unbroadcast | OrderStatus::Broadcasting
        );
        if !open || order.assigned_courier.is_some() {
            return Ok(false);
        }

        order.status = OrderStatus::Broadcasting;
        order.broadcast_at = Some(at);
        Ok(true)
    }

    async fn set_courier_available(
        &self,
        courier_id: Uuid,
        available: bool,
    ) -> Result<(), StoreError> {
        let mut courier = self
            .couriers
            .get_mut(&courier_id)
            .ok_or(StoreError::CourierNotFound(courier_id))?;
        courier.available = available;
        courier.updated_at = Utc::now();
        Ok(())
    }

    async fn get_order_coordinates(
        &self,
        order_id: Uuid,
    ) -> Result<OrderCoordinates, StoreError> {
        self.orders
            .get(&order_id)
            .map(|order| OrderCoordinates {
                restaurant: order.restaurant,
                customer: order.customer,
            })
            .ok_or(StoreError::OrderNotFound(order_id))
    }
}

fn still_held_by(order: &DeliveryOrder, expected_courier: Option<Uuid>) -> bool {
    !order.status.is_terminal() && order.assigned_courier == expected_courier
}

#[async_trait]
impl LocationFeed for MemoryStore {
    async fn latest_position_for(&self, courier_id: Uuid) -> Option<GeoPoint> {
        self.couriers
            .get(&courier_id)
            .and_then(|courier| courier.location)
    }
}
