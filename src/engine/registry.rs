use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::tracking::{RecomputeTrigger, TrackingSession};
use crate::error::AppError;
use crate::models::courier::GeoPoint;
use crate::models::order::{OrderGeometry, OrderStatus};
use crate::models::tracking::{TrackingEvent, TrackingSnapshot, TrackingStep};
use crate::observability::metrics::Metrics;
use crate::providers::{LocationFeed, RoutePlanner};
use crate::store::PersistentStore;

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

struct TrackedOrder {
    session: Arc<Mutex<TrackingSession>>,
    refresher: JoinHandle<()>,
}

struct RegistryInner {
    sessions: DashMap<Uuid, TrackedOrder>,
    store: Arc<dyn PersistentStore>,
    feed: Arc<dyn LocationFeed>,
    planner: RoutePlanner,
    refresh_interval: Duration,
    events_tx: broadcast::Sender<TrackingEvent>,
    metrics: Metrics,
}

/// Live tracking sessions keyed by order id.
///
/// Each session sits behind its own async mutex, so transitions on one order
/// apply one at a time while different orders proceed independently. Refresh
/// timers only hold the order id and a weak handle to the registry; once an
/// entry is removed their next tick is a lookup miss.
#[derive(Clone)]
pub struct TrackingRegistry {
    inner: Arc<RegistryInner>,
}

impl TrackingRegistry {
    pub fn new(
        store: Arc<dyn PersistentStore>,
        feed: Arc<dyn LocationFeed>,
        planner: RoutePlanner,
        refresh_interval: Duration,
        events_tx: broadcast::Sender<TrackingEvent>,
        metrics: Metrics,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: DashMap::new(),
                store,
                feed,
                planner,
                refresh_interval,
                events_tx,
                metrics,
            }),
        }
    }

    pub fn is_tracking(&self, order_id: Uuid) -> bool {
        self.inner.sessions.contains_key(&order_id)
    }

    pub fn active_orders(&self) -> Vec<Uuid> {
        self.inner.sessions.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sessions.is_empty()
    }

    /// Starts tracking, replacing any session the order already had. The
    /// order must be `assigned` to `courier_id`.
    pub async fn start(
        &self,
        order_id: Uuid,
        courier_id: Uuid,
        current: GeoPoint,
    ) -> Result<TrackingSnapshot, AppError> {
        if !self.inner.held_by(order_id, courier_id).await? {
            warn!(
                order_id = %order_id,
                courier_id = %courier_id,
                "tracking refused for an order the courier does not hold"
            );
            return Err(not_held(order_id, courier_id));
        }

        let coordinates = self.inner.store.get_order_coordinates(order_id).await?;
        let geometry = match (coordinates.restaurant, coordinates.customer) {
            (Some(restaurant), Some(customer)) => OrderGeometry {
                restaurant,
                customer,
            },
            (restaurant, _) => {
                let missing = if restaurant.is_none() {
                    "restaurant"
                } else {
                    "customer"
                };
                warn!(order_id = %order_id, missing, "cannot start tracking without coordinates");
                return Err(AppError::MissingGeometry(format!(
                    "order {order_id} has no {missing} coordinate"
                )));
            }
        };

        let session =
            TrackingSession::start(order_id, courier_id, current, geometry, &self.inner.planner)
                .await;
        self.inner.record_recompute(RecomputeTrigger::Start);
        let snapshot = session.snapshot();
        self.inner.publish(session.event());

        let refresher = tokio::spawn(refresh_loop(
            Arc::downgrade(&self.inner),
            order_id,
            self.inner.refresh_interval,
        ));
        let session = Arc::new(Mutex::new(session));
        let tracked = TrackedOrder {
            session: session.clone(),
            refresher,
        };

        match self.inner.sessions.insert(order_id, tracked) {
            Some(previous) => {
                previous.refresher.abort();
                previous.session.lock().await.close();
                info!(order_id = %order_id, courier_id = %courier_id, "tracking restarted");
            }
            None => {
                self.inner.metrics.active_tracking_sessions.inc();
                info!(order_id = %order_id, courier_id = %courier_id, "tracking started");
            }
        }

        // A cancel or reassign may have landed while the route was planned.
        if !self.inner.held_by(order_id, courier_id).await? {
            self.inner.stop_session(order_id, &session).await;
            return Err(not_held(order_id, courier_id));
        }

        Ok(snapshot)
    }

    pub async fn advance(
        &self,
        order_id: Uuid,
        step: TrackingStep,
        coordinate: Option<GeoPoint>,
    ) -> Result<TrackingSnapshot, AppError> {
        let session = self.inner.session(order_id).ok_or_else(|| {
            error!(order_id = %order_id, step = ?step, "advance on an untracked order");
            AppError::NotFound(format!("order {order_id} is not being tracked"))
        })?;

        let (snapshot, courier_id) = {
            let mut session = session.lock().await;
            let recomputed = session
                .advance(step, coordinate, &self.inner.planner)
                .await?;
            if recomputed {
                self.inner.record_recompute(RecomputeTrigger::Advance);
            }
            self.inner.publish(session.event());
            info!(
                order_id = %order_id,
                step = ?session.step(),
                distance_km = session.distance_km(),
                eta_minutes = session.eta_minutes(),
                "tracking advanced"
            );
            (session.snapshot(), session.courier_id())
        };

        if snapshot.step.is_terminal() {
            self.complete_delivery(order_id, courier_id, &session).await?;
        }

        Ok(snapshot)
    }

    pub async fn update_location(
        &self,
        order_id: Uuid,
        coordinate: GeoPoint,
    ) -> Result<TrackingSnapshot, AppError> {
        let session = self
            .inner
            .session(order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} is not being tracked")))?;

        let mut session = session.lock().await;
        if session.is_closed() {
            return Err(AppError::NotFound(format!(
                "order {order_id} is not being tracked"
            )));
        }
        if session.update_location(coordinate, &self.inner.planner).await {
            self.inner.record_recompute(RecomputeTrigger::Location);
        }
        self.inner.publish(session.event());
        debug!(order_id = %order_id, eta_minutes = session.eta_minutes(), "location applied");

        Ok(session.snapshot())
    }

    /// Removes the session and cancels its timer. Returns whether a session
    /// existed.
    pub async fn stop(&self, order_id: Uuid) -> bool {
        let Some((_, tracked)) = self.inner.sessions.remove(&order_id) else {
            return false;
        };

        self.inner.teardown(order_id, tracked).await;
        true
    }

    pub async fn snapshot(&self, order_id: Uuid) -> Option<TrackingSnapshot> {
        let session = self.inner.session(order_id)?;
        let session = session.lock().await;
        Some(session.snapshot())
    }

    async fn complete_delivery(
        &self,
        order_id: Uuid,
        courier_id: Uuid,
        session: &Arc<Mutex<TrackingSession>>,
    ) -> Result<(), AppError> {
        let delivered = self
            .inner
            .store
            .set_order_status(order_id, OrderStatus::Delivered, Some(courier_id))
            .await?;
        self.inner.stop_session(order_id, session).await;
        if !delivered {
            warn!(
                order_id = %order_id,
                courier_id = %courier_id,
                "delivery reported for an order the courier no longer holds"
            );
            return Err(not_held(order_id, courier_id));
        }

        self.inner
            .store
            .set_courier_available(courier_id, true)
            .await?;
        info!(order_id = %order_id, courier_id = %courier_id, "order delivered");
        Ok(())
    }
}

impl RegistryInner {
    fn session(&self, order_id: Uuid) -> Option<Arc<Mutex<TrackingSession>>> {
        self.sessions
            .get(&order_id)
            .map(|tracked| tracked.session.clone())
    }

    async fn held_by(&self, order_id: Uuid, courier_id: Uuid) -> Result<bool, AppError> {
        let state = self.store.get_order_state(order_id).await?;
        Ok(state.status == OrderStatus::Assigned && state.assigned_courier == Some(courier_id))
    }

    /// Removes the entry only while it still holds `session`, so a newer
    /// session for the same order survives.
    async fn stop_session(
        &self,
        order_id: Uuid,
        session: &Arc<Mutex<TrackingSession>>,
    ) -> bool {
        let removed = self
            .sessions
            .remove_if(&order_id, |_, tracked| Arc::ptr_eq(&tracked.session, session));
        match removed {
            Some((_, tracked)) => {
                self.teardown(order_id, tracked).await;
                true
            }
            None => false,
        }
    }

    async fn teardown(&self, order_id: Uuid, tracked: TrackedOrder) {
        tracked.refresher.abort();
        tracked.session.lock().await.close();
        self.metrics.active_tracking_sessions.dec();
        info!(order_id = %order_id, "tracking stopped");
    }

    fn publish(&self, event: TrackingEvent) {
        // No subscribers is fine.
        let _ = self.events_tx.send(event);
    }

    fn record_recompute(&self, trigger: RecomputeTrigger) {
        self.metrics
            .eta_recomputes_total
            .with_label_values(&[trigger.as_str()])
            .inc();
    }

    async fn refresh(&self, session: Arc<Mutex<TrackingSession>>) {
        let mut session = session.lock().await;
        if session.is_closed() {
            return;
        }

        let latest = self.feed.latest_position_for(session.courier_id()).await;
        if session.refresh(latest, &self.planner).await {
            self.record_recompute(RecomputeTrigger::Refresh);
            self.publish(session.event());
            debug!(
                order_id = %session.order_id(),
                eta_minutes = session.eta_minutes(),
                "eta refreshed"
            );
        }
    }
}

fn not_held(order_id: Uuid, courier_id: Uuid) -> AppError {
    AppError::InvalidTransition(format!(
        "order {order_id} is not assigned to courier {courier_id}"
    ))
}

async fn refresh_loop(inner: Weak<RegistryInner>, order_id: Uuid, period: Duration) {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let Some(inner) = inner.upgrade() else {
            break;
        };
        let Some(session) = inner.session(order_id) else {
            debug!(order_id = %order_id, "refresh tick for removed session");
            break;
        };
        inner.refresh(session).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use tokio::sync::broadcast;
    use uuid::Uuid;

    use super::TrackingRegistry;
    use crate::error::AppError;
    use crate::models::courier::{Courier, GeoPoint};
    use crate::models::order::{DeliveryOrder, OrderStatus};
    use crate::models::tracking::{Destination, TrackingEvent, TrackingStep};
    use crate::observability::metrics::Metrics;
    use crate::providers::RoutePlanner;
    use crate::store::{MemoryStore, PersistentStore};

    const RESTAURANT: GeoPoint = GeoPoint {
        lat: 36.75,
        lng: 3.06,
    };
    const CUSTOMER: GeoPoint = GeoPoint {
        lat: 36.77,
        lng: 3.09,
    };

    struct Fixture {
        store: Arc<MemoryStore>,
        registry: TrackingRegistry,
        events: broadcast::Receiver<TrackingEvent>,
        order_id: Uuid,
        courier_id: Uuid,
    }

    fn fixture(customer: Option<GeoPoint>) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let courier_id = Uuid::from_u128(2);
        store.insert_courier(Courier {
            id: courier_id,
            name: "rider".to_string(),
            location: Some(RESTAURANT),
            rating: 4.0,
            total_deliveries: 10,
            available: false,
            online: true,
            updated_at: Utc::now(),
        });
        let order_id = Uuid::from_u128(1);
        store.insert_order(DeliveryOrder {
            id: order_id,
            restaurant: Some(RESTAURANT),
            customer,
            status: OrderStatus::Assigned,
            assigned_courier: Some(courier_id),
            broadcast_at: None,
            created_at: Utc::now(),
        });

        let (events_tx, events) = broadcast::channel(64);
        let registry = TrackingRegistry::new(
            store.clone(),
            store.clone(),
            RoutePlanner::default(),
            Duration::from_secs(30),
            events_tx,
            Metrics::new(),
        );

        Fixture {
            store,
            registry,
            events,
            order_id,
            courier_id,
        }
    }

    #[tokio::test]
    async fn start_requires_both_coordinates() {
        let f = fixture(None);

        let result = f.registry.start(f.order_id, f.courier_id, RESTAURANT).await;

        assert!(matches!(result, Err(AppError::MissingGeometry(_))));
        assert!(!f.registry.is_tracking(f.order_id));
    }

    #[tokio::test]
    async fn scenario_start_then_head_to_customer() {
        let f = fixture(Some(CUSTOMER));

        let started = f
            .registry
            .start(f.order_id, f.courier_id, RESTAURANT)
            .await
            .unwrap();
        assert!(started.is_route_calculated);
        assert_eq!(started.destination, Some(Destination::Restaurant));

        let heading = f
            .registry
            .advance(
                f.order_id,
                TrackingStep::HeadingToCustomer,
                Some(GeoPoint::new(36.751, 3.061)),
            )
            .await
            .unwrap();
        assert_eq!(heading.destination, Some(Destination::Customer));
        assert_eq!(*heading.route.last().unwrap(), CUSTOMER);

        let close = f
            .registry
            .update_location(f.order_id, GeoPoint::new(36.769, 3.089))
            .await
            .unwrap();
        let initial_leg = crate::geo::haversine_km(&RESTAURANT, &CUSTOMER);
        assert!(close.distance_km.unwrap() < initial_leg);
    }

    #[tokio::test]
    async fn delivery_tears_down_session_and_releases_courier() {
        let mut f = fixture(Some(CUSTOMER));
        f.registry
            .start(f.order_id, f.courier_id, RESTAURANT)
            .await
            .unwrap();

        f.registry
            .advance(f.order_id, TrackingStep::Delivered, Some(CUSTOMER))
            .await
            .unwrap();

        assert!(!f.registry.is_tracking(f.order_id));
        assert_eq!(
            f.store.order(f.order_id).unwrap().status,
            OrderStatus::Delivered
        );
        assert!(f.store.courier(f.courier_id).unwrap().available);

        let mut steps = Vec::new();
        while let Ok(event) = f.events.try_recv() {
            steps.push(event.step);
        }
        assert_eq!(steps, vec![TrackingStep::Accepted, TrackingStep::Delivered]);
    }

    #[tokio::test]
    async fn start_refuses_orders_the_courier_does_not_hold() {
        let f = fixture(Some(CUSTOMER));
        let stranger = Uuid::from_u128(99);

        let wrong_courier = f.registry.start(f.order_id, stranger, RESTAURANT).await;
        assert!(matches!(wrong_courier, Err(AppError::InvalidTransition(_))));

        f.store
            .set_order_status(f.order_id, OrderStatus::Cancelled, Some(f.courier_id))
            .await
            .unwrap();
        let cancelled = f.registry.start(f.order_id, f.courier_id, RESTAURANT).await;

        assert!(matches!(cancelled, Err(AppError::InvalidTransition(_))));
        assert!(!f.registry.is_tracking(f.order_id));
        assert_eq!(
            f.store.order(f.order_id).unwrap().status,
            OrderStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn delivery_does_not_revive_a_cancelled_order() {
        let f = fixture(Some(CUSTOMER));
        f.registry
            .start(f.order_id, f.courier_id, RESTAURANT)
            .await
            .unwrap();
        f.store
            .set_order_status(f.order_id, OrderStatus::Cancelled, Some(f.courier_id))
            .await
            .unwrap();

        let result = f
            .registry
            .advance(f.order_id, TrackingStep::Delivered, Some(CUSTOMER))
            .await;

        assert!(matches!(result, Err(AppError::InvalidTransition(_))));
        assert!(!f.registry.is_tracking(f.order_id));
        assert_eq!(
            f.store.order(f.order_id).unwrap().status,
            OrderStatus::Cancelled
        );
        assert!(!f.store.courier(f.courier_id).unwrap().available);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_deliveries_complete_once() {
        let f = fixture(Some(CUSTOMER));
        f.registry
            .start(f.order_id, f.courier_id, RESTAURANT)
            .await
            .unwrap();

        let attempts: Vec<_> = (0..4)
            .map(|_| {
                let registry = f.registry.clone();
                let order_id = f.order_id;
                tokio::spawn(async move {
                    registry
                        .advance(order_id, TrackingStep::Delivered, Some(CUSTOMER))
                        .await
                })
            })
            .collect();

        let mut completed = 0;
        for attempt in attempts {
            if attempt.await.unwrap().is_ok() {
                completed += 1;
            }
        }

        assert_eq!(completed, 1);
        assert!(!f.registry.is_tracking(f.order_id));
        assert_eq!(
            f.store.order(f.order_id).unwrap().status,
            OrderStatus::Delivered
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_advance_and_location_updates_stay_consistent() {
        let mut f = fixture(Some(CUSTOMER));
        f.registry
            .start(f.order_id, f.courier_id, RESTAURANT)
            .await
            .unwrap();
        let _ = f.events.recv().await.unwrap();

        let mut handles = Vec::new();
        for step in [
            TrackingStep::HeadingToRestaurant,
            TrackingStep::PickedUp,
            TrackingStep::HeadingToCustomer,
        ] {
            let registry = f.registry.clone();
            let order_id = f.order_id;
            handles.push(tokio::spawn(async move {
                let _ = registry
                    .advance(order_id, step, Some(GeoPoint::new(36.755, 3.065)))
                    .await;
            }));
        }
        for i in 0..40_u32 {
            let registry = f.registry.clone();
            let order_id = f.order_id;
            let offset = f64::from(i);
            let position = GeoPoint::new(36.75 + offset * 0.0005, 3.06 + offset * 0.0007);
            handles.push(tokio::spawn(async move {
                registry.update_location(order_id, position).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let target = |step: TrackingStep| match step.destination() {
            Destination::Restaurant => RESTAURANT,
            Destination::Customer => CUSTOMER,
        };

        let mut last_step = TrackingStep::Accepted;
        let mut last_event = None;
        while let Ok(event) = f.events.try_recv() {
            assert!(event.step >= last_step);
            let expected = crate::geo::haversine_km(&event.current, &target(event.step));
            assert!((event.distance_km.unwrap() - expected).abs() < 1e-9);
            last_step = event.step;
            last_event = Some(event);
        }

        let snapshot = f.registry.snapshot(f.order_id).await.unwrap();
        let last_event = last_event.unwrap();
        assert_eq!(snapshot.step, TrackingStep::HeadingToCustomer);
        assert_eq!(snapshot.destination, Some(Destination::Customer));
        assert_eq!(*snapshot.route.last().unwrap(), CUSTOMER);
        assert_eq!(snapshot.current, last_event.current);
        assert_eq!(snapshot.distance_km, last_event.distance_km);
    }

    #[tokio::test]
    async fn advancing_untracked_order_is_not_found() {
        let f = fixture(Some(CUSTOMER));

        let result = f
            .registry
            .advance(f.order_id, TrackingStep::PickedUp, None)
            .await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let f = fixture(Some(CUSTOMER));
        f.registry
            .start(f.order_id, f.courier_id, RESTAURANT)
            .await
            .unwrap();

        assert!(f.registry.stop(f.order_id).await);
        assert!(!f.registry.stop(f.order_id).await);
        assert!(f.registry.snapshot(f.order_id).await.is_none());
        assert!(f.registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_timer_follows_location_feed() {
        let mut f = fixture(Some(CUSTOMER));
        f.registry
            .start(f.order_id, f.courier_id, GeoPoint::new(36.70, 3.00))
            .await
            .unwrap();
        let _ = f.events.recv().await.unwrap();

        f.store
            .update_courier_location(f.courier_id, GeoPoint::new(36.7501, 3.0601));
        tokio::time::sleep(Duration::from_secs(31)).await;

        let refreshed = f.events.recv().await.unwrap();
        assert_eq!(refreshed.current, GeoPoint::new(36.7501, 3.0601));
        assert!(refreshed.distance_km.unwrap() < 0.1);
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_session_receives_no_more_refreshes() {
        let mut f = fixture(Some(CUSTOMER));
        f.registry
            .start(f.order_id, f.courier_id, RESTAURANT)
            .await
            .unwrap();
        let _ = f.events.recv().await.unwrap();

        f.registry.stop(f.order_id).await;
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert!(matches!(
            f.events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }
}
