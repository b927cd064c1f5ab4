use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::registry::TrackingRegistry;
use crate::engine::scoring::rank;
use crate::error::AppError;
use crate::geo::within_radius;
use crate::models::assignment::{AssignmentEvent, AssignmentEventKind, RankedCandidate};
use crate::models::courier::{CourierCandidate, GeoPoint};
use crate::models::order::OrderStatus;
use crate::notify::{Notification, NotificationKind, NotificationQueue};
use crate::observability::metrics::Metrics;
use crate::providers::LocationFeed;
use crate::store::{CourierFilter, OrderState, PersistentStore};

pub const DEFAULT_RADIUS_KM: f64 = 10.0;
pub const DEFAULT_SUGGEST_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy)]
pub struct AssignmentSettings {
    pub default_radius_km: f64,
    pub suggest_limit: usize,
}

impl Default for AssignmentSettings {
    fn default() -> Self {
        Self {
            default_radius_km: DEFAULT_RADIUS_KM,
            suggest_limit: DEFAULT_SUGGEST_LIMIT,
        }
    }
}

/// Drives an order through broadcast, acceptance and (re/un)assignment.
///
/// First-accept-wins is decided by [`PersistentStore::atomic_assign`] alone;
/// the reads in front of it only fail fast.
pub struct AssignmentCoordinator {
    store: Arc<dyn PersistentStore>,
    notifier: Arc<dyn NotificationQueue>,
    feed: Arc<dyn LocationFeed>,
    tracking: TrackingRegistry,
    events_tx: broadcast::Sender<AssignmentEvent>,
    metrics: Metrics,
    settings: AssignmentSettings,
}

impl AssignmentCoordinator {
    pub fn new(
        store: Arc<dyn PersistentStore>,
        notifier: Arc<dyn NotificationQueue>,
        feed: Arc<dyn LocationFeed>,
        tracking: TrackingRegistry,
        events_tx: broadcast::Sender<AssignmentEvent>,
        metrics: Metrics,
        settings: AssignmentSettings,
    ) -> Self {
        Self {
            store,
            notifier,
            feed,
            tracking,
            events_tx,
            metrics,
            settings,
        }
    }

    pub fn settings(&self) -> AssignmentSettings {
        self.settings
    }

    /// Offers the order to every eligible courier in range. Returns how many
    /// couriers were offered it.
    pub async fn broadcast(
        &self,
        order_id: Uuid,
        origin: Option<GeoPoint>,
        radius_km: Option<f64>,
    ) -> Result<usize, AppError> {
        let start = Instant::now();
        let state = self.store.get_order_state(order_id).await?;
        match state.status {
            OrderStatus::Unbroadcast | OrderStatus::Broadcasting
                if state.assigned_courier.is_none() => {}
            status => {
                return Err(AppError::InvalidTransition(format!(
                    "order {order_id} cannot be broadcast while {status:?}"
                )));
            }
        }

        let candidates = self.eligible_candidates(origin.as_ref(), radius_km).await?;
        if candidates.is_empty() {
            warn!(order_id = %order_id, "broadcast found no eligible couriers");
            return Err(AppError::NotEligible);
        }

        // Open for bids before anyone hears about it.
        if !self.store.mark_broadcasting(order_id, Utc::now()).await? {
            warn!(order_id = %order_id, "order moved before it could be broadcast");
            return Err(self.write_conflict(order_id).await);
        }

        for candidate in &candidates {
            self.notify(Notification::to_courier(
                NotificationKind::NewOrderOffer,
                order_id,
                candidate.id,
            ))
            .await;
        }

        self.publish(order_id, AssignmentEventKind::Broadcasted, None, None);
        self.metrics.observe_latency("broadcast", start);
        info!(order_id = %order_id, couriers = candidates.len(), "order broadcast");

        Ok(candidates.len())
    }

    /// Courier bid on a broadcast order. Exactly one concurrent caller wins;
    /// the rest get [`AppError::RaceLost`].
    pub async fn accept(&self, order_id: Uuid, courier_id: Uuid) -> Result<(), AppError> {
        let start = Instant::now();
        let state = self.store.get_order_state(order_id).await?;
        if let Err(err) = biddable(order_id, state) {
            self.record_accept(&err);
            return Err(err);
        }

        let courier = self.store.get_courier(courier_id).await?;
        if !courier.is_eligible() {
            self.record_accept(&AppError::NotEligible);
            return Err(AppError::NotEligible);
        }

        let won = self
            .store
            .atomic_assign(order_id, courier_id, OrderStatus::Broadcasting)
            .await?;
        if !won {
            info!(order_id = %order_id, courier_id = %courier_id, "accept lost the race");
            self.record_accept(&AppError::RaceLost);
            return Err(AppError::RaceLost);
        }

        self.metrics
            .accept_attempts_total
            .with_label_values(&["won"])
            .inc();
        self.on_assigned(order_id, courier_id, AssignmentEventKind::Assigned, None, None)
            .await?;
        self.metrics.observe_latency("accept", start);
        info!(order_id = %order_id, courier_id = %courier_id, "order accepted");

        Ok(())
    }

    /// Picks the best-ranked eligible courier and assigns it outright.
    pub async fn auto_assign(
        &self,
        order_id: Uuid,
        origin: Option<GeoPoint>,
        radius_km: Option<f64>,
    ) -> Result<RankedCandidate, AppError> {
        let start = Instant::now();
        let state = self.store.get_order_state(order_id).await?;
        assignable(order_id, state)?;

        let candidates = self.eligible_candidates(origin.as_ref(), radius_km).await?;
        let Some(chosen) = rank(&candidates, origin.as_ref()).into_iter().next() else {
            warn!(order_id = %order_id, "auto-assign found no eligible couriers");
            return Err(AppError::NotEligible);
        };

        let courier_id = chosen.candidate.id;
        if !self
            .store
            .set_assignment(order_id, Some(courier_id), None)
            .await?
        {
            return Err(self.write_conflict(order_id).await);
        }
        self.on_assigned(order_id, courier_id, AssignmentEventKind::Assigned, None, None)
            .await?;
        self.metrics.observe_latency("auto_assign", start);
        info!(
            order_id = %order_id,
            courier_id = %courier_id,
            score = chosen.score,
            "order auto-assigned"
        );

        Ok(chosen)
    }

    pub async fn manual_assign(&self, order_id: Uuid, courier_id: Uuid) -> Result<(), AppError> {
        let start = Instant::now();
        let state = self.store.get_order_state(order_id).await?;
        assignable(order_id, state)?;
        self.require_eligible(courier_id).await?;

        if !self
            .store
            .set_assignment(order_id, Some(courier_id), None)
            .await?
        {
            return Err(self.write_conflict(order_id).await);
        }
        self.on_assigned(order_id, courier_id, AssignmentEventKind::Assigned, None, None)
            .await?;
        self.metrics.observe_latency("manual_assign", start);
        info!(order_id = %order_id, courier_id = %courier_id, "order assigned manually");

        Ok(())
    }

    pub async fn reassign(
        &self,
        order_id: Uuid,
        new_courier_id: Uuid,
        reason: Option<String>,
    ) -> Result<(), AppError> {
        let start = Instant::now();
        let state = self.store.get_order_state(order_id).await?;
        not_terminal(order_id, state)?;
        if state.assigned_courier == Some(new_courier_id) {
            return Err(AppError::InvalidTransition(format!(
                "order {order_id} is already assigned to courier {new_courier_id}"
            )));
        }
        self.require_eligible(new_courier_id).await?;

        if !self
            .store
            .set_assignment(order_id, Some(new_courier_id), state.assigned_courier)
            .await?
        {
            return Err(self.write_conflict(order_id).await);
        }
        if let Some(previous) = state.assigned_courier {
            self.release(order_id, previous, reason.clone()).await?;
        }
        self.on_assigned(
            order_id,
            new_courier_id,
            AssignmentEventKind::Reassigned,
            state.assigned_courier,
            reason,
        )
        .await?;
        self.metrics.observe_latency("reassign", start);
        info!(
            order_id = %order_id,
            courier_id = %new_courier_id,
            previous_courier_id = ?state.assigned_courier,
            "order reassigned"
        );

        Ok(())
    }

    pub async fn unassign(&self, order_id: Uuid, reason: Option<String>) -> Result<(), AppError> {
        let start = Instant::now();
        let state = self.store.get_order_state(order_id).await?;
        not_terminal(order_id, state)?;
        let Some(courier_id) = state.assigned_courier else {
            return Err(AppError::InvalidTransition(format!(
                "order {order_id} has no assigned courier"
            )));
        };

        if !self
            .store
            .set_assignment(order_id, None, Some(courier_id))
            .await?
        {
            return Err(self.write_conflict(order_id).await);
        }
        self.release(order_id, courier_id, reason.clone()).await?;
        self.tracking.stop(order_id).await;

        self.notify(
            Notification::to_customer(NotificationKind::OrderUnassigned, order_id)
                .with_reason(reason.clone()),
        )
        .await;
        self.publish(
            order_id,
            AssignmentEventKind::Unassigned,
            Some(courier_id),
            reason,
        );
        self.metrics.observe_latency("unassign", start);
        info!(order_id = %order_id, courier_id = %courier_id, "order unassigned");

        Ok(())
    }

    pub async fn cancel(&self, order_id: Uuid, reason: Option<String>) -> Result<(), AppError> {
        let start = Instant::now();
        let state = self.store.get_order_state(order_id).await?;
        not_terminal(order_id, state)?;

        if !self
            .store
            .set_order_status(order_id, OrderStatus::Cancelled, state.assigned_courier)
            .await?
        {
            return Err(self.write_conflict(order_id).await);
        }
        self.tracking.stop(order_id).await;
        if let Some(courier_id) = state.assigned_courier {
            self.release(order_id, courier_id, reason.clone()).await?;
        }

        self.notify(
            Notification::to_customer(NotificationKind::OrderCancelled, order_id)
                .with_reason(reason.clone()),
        )
        .await;
        self.publish(
            order_id,
            AssignmentEventKind::Cancelled,
            state.assigned_courier,
            reason,
        );
        self.metrics.observe_latency("cancel", start);
        info!(order_id = %order_id, "order cancelled");

        Ok(())
    }

    /// Read-only ranked shortlist for a dispatcher.
    pub async fn suggest(
        &self,
        order_id: Uuid,
        origin: Option<GeoPoint>,
        radius_km: Option<f64>,
        limit: Option<usize>,
    ) -> Result<Vec<RankedCandidate>, AppError> {
        self.store.get_order_state(order_id).await?;

        let candidates = self.eligible_candidates(origin.as_ref(), radius_km).await?;
        let mut ranked = rank(&candidates, origin.as_ref());
        ranked.truncate(limit.unwrap_or(self.settings.suggest_limit));

        Ok(ranked)
    }

    async fn eligible_candidates(
        &self,
        origin: Option<&GeoPoint>,
        radius_km: Option<f64>,
    ) -> Result<Vec<CourierCandidate>, AppError> {
        let radius_km = radius_km.unwrap_or(self.settings.default_radius_km);
        let couriers = self.store.get_couriers(CourierFilter::eligible()).await?;

        Ok(couriers
            .into_iter()
            .filter(|courier| courier.is_eligible())
            .filter(|courier| within_radius(origin, courier.location.as_ref(), radius_km))
            .collect())
    }

    /// Explains a guarded write that found the order already moved on.
    async fn write_conflict(&self, order_id: Uuid) -> AppError {
        match self.store.get_order_state(order_id).await {
            Ok(state) if state.status.is_terminal() => AppError::InvalidTransition(format!(
                "order {order_id} became {:?}",
                state.status
            )),
            Ok(state) => {
                info!(
                    order_id = %order_id,
                    courier_id = ?state.assigned_courier,
                    "assignment changed underneath the request"
                );
                AppError::RaceLost
            }
            Err(err) => err.into(),
        }
    }

    async fn require_eligible(&self, courier_id: Uuid) -> Result<(), AppError> {
        let courier = self.store.get_courier(courier_id).await?;
        if courier.is_eligible() {
            Ok(())
        } else {
            Err(AppError::NotEligible)
        }
    }

    async fn on_assigned(
        &self,
        order_id: Uuid,
        courier_id: Uuid,
        kind: AssignmentEventKind,
        previous: Option<Uuid>,
        reason: Option<String>,
    ) -> Result<(), AppError> {
        self.store.set_courier_available(courier_id, false).await?;

        self.notify(Notification::to_courier(
            NotificationKind::OrderAssigned,
            order_id,
            courier_id,
        ))
        .await;
        let customer_kind = match previous {
            Some(_) => NotificationKind::CourierChanged,
            None => NotificationKind::CourierAssigned,
        };
        self.notify(
            Notification::to_customer(customer_kind, order_id).with_reason(reason.clone()),
        )
        .await;

        self.publish(order_id, kind, Some(courier_id), reason);
        self.start_tracking(order_id, courier_id).await;
        Ok(())
    }

    async fn release(
        &self,
        order_id: Uuid,
        courier_id: Uuid,
        reason: Option<String>,
    ) -> Result<(), AppError> {
        self.store.set_courier_available(courier_id, true).await?;
        self.notify(
            Notification::to_courier(NotificationKind::OrderReleased, order_id, courier_id)
                .with_reason(reason),
        )
        .await;
        Ok(())
    }

    /// Tracking follows assignment but never gates it.
    async fn start_tracking(&self, order_id: Uuid, courier_id: Uuid) {
        let Some(position) = self.feed.latest_position_for(courier_id).await else {
            warn!(
                order_id = %order_id,
                courier_id = %courier_id,
                "courier has no position fix; tracking not started"
            );
            self.tracking.stop(order_id).await;
            return;
        };

        if let Err(err) = self.tracking.start(order_id, courier_id, position).await {
            warn!(order_id = %order_id, error = %err, "tracking not started");
            self.tracking.stop(order_id).await;
        }
    }

    async fn notify(&self, notification: Notification) {
        let order_id = notification.order_id;
        let kind = notification.kind;
        if let Err(err) = self.notifier.enqueue(notification).await {
            self.metrics.notification_failures_total.inc();
            warn!(order_id = %order_id, kind = ?kind, error = %err, "notification enqueue failed");
        }
    }

    fn publish(
        &self,
        order_id: Uuid,
        event: AssignmentEventKind,
        courier_id: Option<Uuid>,
        reason: Option<String>,
    ) {
        self.metrics
            .assignments_total
            .with_label_values(&[event.as_str()])
            .inc();
        let _ = self.events_tx.send(AssignmentEvent {
            order_id,
            event,
            courier_id,
            reason,
            at: Utc::now(),
        });
    }

    fn record_accept(&self, err: &AppError) {
        let outcome = match err {
            AppError::RaceLost => "race_lost",
            _ => "rejected",
        };
        self.metrics
            .accept_attempts_total
            .with_label_values(&[outcome])
            .inc();
    }
}

fn biddable(order_id: Uuid, state: OrderState) -> Result<(), AppError> {
    match state.status {
        OrderStatus::Broadcasting if state.assigned_courier.is_none() => Ok(()),
        OrderStatus::Broadcasting | OrderStatus::Assigned => Err(AppError::RaceLost),
        status => Err(AppError::InvalidTransition(format!(
            "order {order_id} is not open for bids while {status:?}"
        ))),
    }
}

fn assignable(order_id: Uuid, state: OrderState) -> Result<(), AppError> {
    not_terminal(order_id, state)?;
    if state.assigned_courier.is_some() {
        return Err(AppError::InvalidTransition(format!(
            "order {order_id} is already assigned; reassign instead"
        )));
    }
    Ok(())
}

fn not_terminal(order_id: Uuid, state: OrderState) -> Result<(), AppError> {
    if state.status.is_terminal() {
        return Err(AppError::InvalidTransition(format!(
            "order {order_id} is {:?}",
            state.status
        )));
    }
    Ok(())
}
