use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::assignment::RankedCandidate;
use crate::models::courier::GeoPoint;
use crate::models::order::{DeliveryOrder, OrderStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/broadcast", post(broadcast_order))
        .route("/orders/:id/accept", post(accept_order))
        .route("/orders/:id/auto-assign", post(auto_assign_order))
        .route("/orders/:id/assign", post(assign_order))
        .route("/orders/:id/reassign", post(reassign_order))
        .route("/orders/:id/unassign", post(unassign_order))
        .route("/orders/:id/cancel", post(cancel_order))
        .route("/orders/:id/suggestions", get(suggest_couriers))
}

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub restaurant: Option<GeoPoint>,
    pub customer: Option<GeoPoint>,
}

#[derive(Deserialize, Default)]
pub struct SearchRequest {
    pub origin: Option<GeoPoint>,
    pub radius_km: Option<f64>,
}

#[derive(Deserialize)]
pub struct CourierRequest {
    pub courier_id: Uuid,
}

#[derive(Deserialize)]
pub struct ReassignRequest {
    pub courier_id: Uuid,
    pub reason: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct ReasonRequest {
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct SuggestQuery {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub radius_km: Option<f64>,
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct BroadcastResponse {
    pub order_id: Uuid,
    pub couriers_notified: usize,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<Json<DeliveryOrder>, AppError> {
    let order = DeliveryOrder {
        id: Uuid::new_v4(),
        restaurant: payload.restaurant,
        customer: payload.customer,
        status: OrderStatus::Unbroadcast,
        assigned_courier: None,
        broadcast_at: None,
        created_at: Utc::now(),
    };

    state.store.insert_order(order.clone());
    Ok(Json(order))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeliveryOrder>, AppError> {
    load_order(&state, id).map(Json)
}

async fn broadcast_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    payload: Option<Json<SearchRequest>>,
) -> Result<Json<BroadcastResponse>, AppError> {
    let search = payload.map(|Json(search)| search).unwrap_or_default();
    let couriers_notified = state
        .coordinator
        .broadcast(id, search.origin, search.radius_km)
        .await?;

    Ok(Json(BroadcastResponse {
        order_id: id,
        couriers_notified,
    }))
}

async fn accept_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CourierRequest>,
) -> Result<Json<DeliveryOrder>, AppError> {
    state.coordinator.accept(id, payload.courier_id).await?;
    load_order(&state, id).map(Json)
}

async fn auto_assign_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    payload: Option<Json<SearchRequest>>,
) -> Result<Json<RankedCandidate>, AppError> {
    let search = payload.map(|Json(search)| search).unwrap_or_default();
    let chosen = state
        .coordinator
        .auto_assign(id, search.origin, search.radius_km)
        .await?;

    Ok(Json(chosen))
}

async fn assign_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CourierRequest>,
) -> Result<Json<DeliveryOrder>, AppError> {
    state
        .coordinator
        .manual_assign(id, payload.courier_id)
        .await?;
    load_order(&state, id).map(Json)
}

async fn reassign_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReassignRequest>,
) -> Result<Json<DeliveryOrder>, AppError> {
    state
        .coordinator
        .reassign(id, payload.courier_id, payload.reason)
        .await?;
    load_order(&state, id).map(Json)
}

async fn unassign_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    payload: Option<Json<ReasonRequest>>,
) -> Result<Json<DeliveryOrder>, AppError> {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    state.coordinator.unassign(id, request.reason).await?;
    load_order(&state, id).map(Json)
}

async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    payload: Option<Json<ReasonRequest>>,
) -> Result<Json<DeliveryOrder>, AppError> {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    state.coordinator.cancel(id, request.reason).await?;
    load_order(&state, id).map(Json)
}

async fn suggest_couriers(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<SuggestQuery>,
) -> Result<Json<Vec<RankedCandidate>>, AppError> {
    let origin = match (query.lat, query.lng) {
        (Some(lat), Some(lng)) => Some(GeoPoint { lat, lng }),
        (None, None) => None,
        _ => {
            return Err(AppError::BadRequest(
                "lat and lng must be given together".to_string(),
            ));
        }
    };

    let suggestions = state
        .coordinator
        .suggest(id, origin, query.radius_km, query.limit)
        .await?;
    Ok(Json(suggestions))
}

fn load_order(state: &AppState, id: Uuid) -> Result<DeliveryOrder, AppError> {
    state
        .store
        .order(id)
        .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))
}
