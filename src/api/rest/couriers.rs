use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::courier::{Courier, GeoPoint};
use crate::state::AppState;
use crate::store::CourierFilter;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/couriers", post(create_courier).get(list_couriers))
        .route("/couriers/:id", get(get_courier))
        .route("/couriers/:id/status", patch(update_courier_status))
        .route("/couriers/:id/location", patch(update_courier_location))
}

#[derive(Deserialize)]
pub struct CreateCourierRequest {
    pub name: String,
    pub location: Option<GeoPoint>,
    pub rating: f64,
    #[serde(default)]
    pub total_deliveries: u32,
}

/// Query for `GET /couriers`; absent fields do not filter.
#[derive(Deserialize, Default)]
pub struct CourierListQuery {
    pub available: Option<bool>,
    pub online: Option<bool>,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub available: Option<bool>,
    pub online: Option<bool>,
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub location: GeoPoint,
}

async fn create_courier(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateCourierRequest>,
) -> Result<Json<Courier>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }

    let courier = Courier {
        id: Uuid::new_v4(),
        name: payload.name,
        location: payload.location,
        rating: payload.rating.clamp(0.0, 5.0),
        total_deliveries: payload.total_deliveries,
        available: true,
        online: true,
        updated_at: Utc::now(),
    };

    state.store.insert_courier(courier.clone());
    Ok(Json(courier))
}

async fn list_couriers(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CourierListQuery>,
) -> Json<Vec<Courier>> {
    let filter = CourierFilter {
        available: query.available,
        online: query.online,
    };
    let mut couriers: Vec<Courier> = state
        .store
        .couriers()
        .into_iter()
        .filter(|courier| filter.matches(courier.available, courier.online))
        .collect();
    couriers.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
    Json(couriers)
}

async fn get_courier(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Courier>, AppError> {
    state
        .store
        .courier(id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("courier {id} not found")))
}

async fn update_courier_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Courier>, AppError> {
    state
        .store
        .update_courier_presence(id, payload.available, payload.online)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("courier {id} not found")))
}

async fn update_courier_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<Json<Courier>, AppError> {
    state
        .store
        .update_courier_location(id, payload.location)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("courier {id} not found")))
}
