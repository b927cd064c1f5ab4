use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// Courier row as held by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Courier {
    pub id: Uuid,
    pub name: String,
    pub location: Option<GeoPoint>,
    pub rating: f64,
    pub total_deliveries: u32,
    pub available: bool,
    pub online: bool,
    pub updated_at: DateTime<Utc>,
}

impl Courier {
    pub fn is_eligible(&self) -> bool {
        self.available && self.online
    }
}

/// Transient ranking input, rebuilt from the store on every call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CourierCandidate {
    pub id: Uuid,
    pub location: Option<GeoPoint>,
    pub rating: f64,
    pub total_deliveries: u32,
    pub available: bool,
    pub online: bool,
}

impl CourierCandidate {
    pub fn is_eligible(&self) -> bool {
        self.available && self.online
    }
}

impl From<&Courier> for CourierCandidate {
    fn from(courier: &Courier) -> Self {
        Self {
            id: courier.id,
            location: courier.location,
            rating: courier.rating,
            total_deliveries: courier.total_deliveries,
            available: courier.available,
            online: courier.online,
        }
    }
}
