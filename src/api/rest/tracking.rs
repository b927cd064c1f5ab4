use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::courier::GeoPoint;
use crate::models::tracking::{TrackingSnapshot, TrackingStep};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tracking", get(list_tracked))
        .route("/tracking/:order_id", get(get_tracking).delete(stop_tracking))
        .route("/tracking/:order_id/start", post(start_tracking))
        .route("/tracking/:order_id/advance", post(advance_tracking))
        .route("/tracking/:order_id/location", post(update_location))
}

#[derive(Deserialize)]
pub struct StartRequest {
    pub courier_id: Uuid,
    pub location: GeoPoint,
}

#[derive(Deserialize)]
pub struct AdvanceRequest {
    pub step: TrackingStep,
    pub location: Option<GeoPoint>,
}

#[derive(Deserialize)]
pub struct LocationRequest {
    pub location: GeoPoint,
}

async fn list_tracked(State(state): State<Arc<AppState>>) -> Json<Vec<Uuid>> {
    Json(state.tracking.active_orders())
}

async fn get_tracking(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<TrackingSnapshot>, AppError> {
    state
        .tracking
        .snapshot(order_id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} is not being tracked")))
}

async fn start_tracking(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<StartRequest>,
) -> Result<Json<TrackingSnapshot>, AppError> {
    let snapshot = state
        .tracking
        .start(order_id, payload.courier_id, payload.location)
        .await?;
    Ok(Json(snapshot))
}

async fn advance_tracking(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<AdvanceRequest>,
) -> Result<Json<TrackingSnapshot>, AppError> {
    let snapshot = state
        .tracking
        .advance(order_id, payload.step, payload.location)
        .await?;
    Ok(Json(snapshot))
}

async fn update_location(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<LocationRequest>,
) -> Result<Json<TrackingSnapshot>, AppError> {
    let snapshot = state
        .tracking
        .update_location(order_id, payload.location)
        .await?;
    Ok(Json(snapshot))
}

async fn stop_tracking(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
) -> StatusCode {
    state.tracking.stop(order_id).await;
    StatusCode::NO_CONTENT
}
