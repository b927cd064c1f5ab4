use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use crate::config::Config;
use crate::engine::assignment::AssignmentCoordinator;
use crate::engine::registry::TrackingRegistry;
use crate::models::assignment::AssignmentEvent;
use crate::models::tracking::TrackingEvent;
use crate::notify::{ChannelNotificationQueue, Notification};
use crate::observability::metrics::Metrics;
use crate::providers::{RoutePlanner, TripEstimator};
use crate::store::MemoryStore;

/// Composition root shared by the HTTP handlers.
pub struct AppState {
    pub store: Arc<MemoryStore>,
    pub coordinator: AssignmentCoordinator,
    pub tracking: TrackingRegistry,
    pub assignment_events_tx: broadcast::Sender<AssignmentEvent>,
    pub tracking_events_tx: broadcast::Sender<TrackingEvent>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: &Config) -> (Self, mpsc::Receiver<Notification>) {
        Self::with_trip_estimator(config, None)
    }

    pub fn with_trip_estimator(
        config: &Config,
        estimator: Option<Arc<dyn TripEstimator>>,
    ) -> (Self, mpsc::Receiver<Notification>) {
        let metrics = Metrics::new();
        let store = Arc::new(MemoryStore::new());
        let (notifier, notification_rx) =
            ChannelNotificationQueue::new(config.notification_queue_size, metrics.clone());
        let (assignment_events_tx, _unused_rx) = broadcast::channel(config.event_buffer_size);
        let (tracking_events_tx, _unused_rx) = broadcast::channel(config.event_buffer_size);

        let planner = RoutePlanner::new(estimator, config.average_speed_kmh, config.route_points);
        let tracking = TrackingRegistry::new(
            store.clone(),
            store.clone(),
            planner,
            config.refresh_interval(),
            tracking_events_tx.clone(),
            metrics.clone(),
        );
        let coordinator = AssignmentCoordinator::new(
            store.clone(),
            Arc::new(notifier),
            store.clone(),
            tracking.clone(),
            assignment_events_tx.clone(),
            metrics.clone(),
            config.assignment_settings(),
        );

        (
            Self {
                store,
                coordinator,
                tracking,
                assignment_events_tx,
                tracking_events_tx,
                metrics,
            },
            notification_rx,
        )
    }
}
