use std::sync::Arc;

use axum::extract::{Query, State};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::assignment::AssignmentEvent;
use crate::models::tracking::TrackingEvent;
use crate::state::AppState;

#[derive(Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
enum OutboundEvent {
    Assignment(AssignmentEvent),
    Tracking(TrackingEvent),
}

impl OutboundEvent {
    fn order_id(&self) -> Uuid {
        match self {
            OutboundEvent::Assignment(event) => event.order_id,
            OutboundEvent::Tracking(event) => event.order_id,
        }
    }
}

/// `GET /ws?order_id=...` follows a single order; without it every event is sent.
#[derive(Deserialize, Default)]
pub struct WsQuery {
    pub order_id: Option<Uuid>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.order_id))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, order_filter: Option<Uuid>) {
    let (mut sender, mut receiver) = socket.split();

    // Lagged receivers drop the missed events and keep going.
    let assignments = BroadcastStream::new(state.assignment_events_tx.subscribe())
        .filter_map(|event| async move { event.ok().map(OutboundEvent::Assignment) });
    let tracking = BroadcastStream::new(state.tracking_events_tx.subscribe())
        .filter_map(|event| async move { event.ok().map(OutboundEvent::Tracking) });
    let mut events = futures::stream::select(assignments, tracking)
        .filter(move |event| {
            let wanted = order_filter.is_none_or(|id| id == event.order_id());
            async move { wanted }
        })
        .boxed();

    info!(order_filter = ?order_filter, "websocket client connected");

    let send_task = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize event for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!("websocket client disconnected");
}
