use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::courier::GeoPoint;

/// Delivery milestones, declared in their only legal order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TrackingStep {
    Accepted,
    HeadingToRestaurant,
    ArrivedAtRestaurant,
    PickedUp,
    HeadingToCustomer,
    ArrivedAtCustomer,
    Delivered,
}

impl TrackingStep {
    pub fn is_terminal(self) -> bool {
        self == TrackingStep::Delivered
    }

    pub fn destination(self) -> Destination {
        match self {
            TrackingStep::Accepted
            | TrackingStep::HeadingToRestaurant
            | TrackingStep::ArrivedAtRestaurant => Destination::Restaurant,
            _ => Destination::Customer,
        }
    }

    pub fn is_heading(self) -> bool {
        matches!(
            self,
            TrackingStep::HeadingToRestaurant | TrackingStep::HeadingToCustomer
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    Restaurant,
    Customer,
}

/// Distance and ETA toward a destination.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TripEstimate {
    pub distance_km: f64,
    pub eta_minutes: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingEvent {
    pub order_id: Uuid,
    pub courier_id: Uuid,
    pub step: TrackingStep,
    pub current: GeoPoint,
    pub distance_km: Option<f64>,
    pub eta_minutes: Option<f64>,
    pub estimated_arrival: Option<DateTime<Utc>>,
}

/// Read-only view of a live session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingSnapshot {
    pub order_id: Uuid,
    pub courier_id: Uuid,
    pub step: TrackingStep,
    pub current: GeoPoint,
    pub restaurant: GeoPoint,
    pub customer: GeoPoint,
    pub destination: Option<Destination>,
    pub route: Vec<GeoPoint>,
    pub is_route_calculated: bool,
    pub distance_km: Option<f64>,
    pub eta_minutes: Option<f64>,
    pub estimated_arrival: Option<DateTime<Utc>>,
    pub last_recomputed_at: Option<DateTime<Utc>>,
}
