use chrono::{DateTime, Duration as ChronoDuration, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::courier::GeoPoint;
use crate::models::order::OrderGeometry;
use crate::models::tracking::{
    Destination, TrackingEvent, TrackingSnapshot, TrackingStep, TripEstimate,
};
use crate::providers::RoutePlanner;

/// What caused a route/ETA recompute; doubles as the metrics label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecomputeTrigger {
    Start,
    Advance,
    Location,
    Refresh,
}

impl RecomputeTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            RecomputeTrigger::Start => "start",
            RecomputeTrigger::Advance => "advance",
            RecomputeTrigger::Location => "location",
            RecomputeTrigger::Refresh => "refresh",
        }
    }
}

/// Delivery progress of one order.
///
/// Steps only move forward. Distance and ETA are only meaningful once
/// [`TrackingSession::is_route_calculated`] is true.
#[derive(Debug, Clone)]
pub struct TrackingSession {
    order_id: Uuid,
    courier_id: Uuid,
    step: TrackingStep,
    current: GeoPoint,
    geometry: OrderGeometry,
    route: Vec<GeoPoint>,
    route_destination: Option<Destination>,
    estimate: Option<TripEstimate>,
    estimated_arrival: Option<DateTime<Utc>>,
    last_recomputed_at: Option<DateTime<Utc>>,
    closed: bool,
}

impl TrackingSession {
    /// Opens a session in `accepted` and computes the first route before
    /// returning.
    pub async fn start(
        order_id: Uuid,
        courier_id: Uuid,
        current: GeoPoint,
        geometry: OrderGeometry,
        planner: &RoutePlanner,
    ) -> Self {
        let mut session = Self {
            order_id,
            courier_id,
            step: TrackingStep::Accepted,
            current,
            geometry,
            route: Vec::new(),
            route_destination: None,
            estimate: None,
            estimated_arrival: None,
            last_recomputed_at: None,
            closed: false,
        };
        session.recompute(planner).await;
        session
    }

    pub fn order_id(&self) -> Uuid {
        self.order_id
    }

    pub fn courier_id(&self) -> Uuid {
        self.courier_id
    }

    pub fn step(&self) -> TrackingStep {
        self.step
    }

    pub fn current(&self) -> GeoPoint {
        self.current
    }

    pub fn route(&self) -> &[GeoPoint] {
        &self.route
    }

    pub fn route_destination(&self) -> Option<Destination> {
        self.route_destination
    }

    pub fn is_route_calculated(&self) -> bool {
        self.estimate.is_some()
    }

    pub fn distance_km(&self) -> Option<f64> {
        self.estimate.map(|estimate| estimate.distance_km)
    }

    pub fn eta_minutes(&self) -> Option<f64> {
        self.estimate.map(|estimate| estimate.eta_minutes)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn close(&mut self) {
        self.closed = true;
    }

    /// Moves to `new_step`. Going backward is rejected; repeating the
    /// current step only updates the position. Returns whether the route
    /// was recomputed.
    pub async fn advance(
        &mut self,
        new_step: TrackingStep,
        coordinate: Option<GeoPoint>,
        planner: &RoutePlanner,
    ) -> Result<bool, AppError> {
        if self.closed {
            return Err(AppError::InvalidTransition(format!(
                "tracking for order {} has stopped",
                self.order_id
            )));
        }

        if self.step.is_terminal() {
            return Err(AppError::InvalidTransition(format!(
                "order {} is already delivered",
                self.order_id
            )));
        }

        if new_step < self.step {
            return Err(AppError::InvalidTransition(format!(
                "cannot move order {} back from {:?} to {:?}",
                self.order_id, self.step, new_step
            )));
        }

        let step_changed = new_step != self.step;
        self.step = new_step;
        if let Some(coordinate) = coordinate {
            self.current = coordinate;
        }

        let needs_route = step_changed
            && !new_step.is_terminal()
            && (new_step.is_heading()
                || self.route_destination != Some(new_step.destination()));

        if needs_route {
            self.recompute(planner).await;
        }

        Ok(needs_route)
    }

    /// Applies a position from the location feed. Recomputes against the
    /// existing destination only if a route already exists.
    pub async fn update_location(&mut self, coordinate: GeoPoint, planner: &RoutePlanner) -> bool {
        if self.closed {
            return false;
        }

        self.current = coordinate;
        if self.route_destination.is_none() {
            return false;
        }

        self.recompute(planner).await;
        true
    }

    /// Timer-driven refresh; `None` keeps the last known position.
    pub async fn refresh(&mut self, latest: Option<GeoPoint>, planner: &RoutePlanner) -> bool {
        if self.closed || self.step.is_terminal() {
            return false;
        }

        if let Some(latest) = latest {
            self.current = latest;
        }

        self.recompute(planner).await;
        true
    }

    fn destination_point(&self, destination: Destination) -> GeoPoint {
        match destination {
            Destination::Restaurant => self.geometry.restaurant,
            Destination::Customer => self.geometry.customer,
        }
    }

    async fn recompute(&mut self, planner: &RoutePlanner) {
        let destination = self.step.destination();
        let target = self.destination_point(destination);
        let planned = planner.plan(&self.current, &target).await;

        let now = Utc::now();
        self.route = planned.path;
        self.route_destination = Some(destination);
        self.estimated_arrival = Some(now + eta_duration(planned.estimate.eta_minutes));
        self.estimate = Some(planned.estimate);
        self.last_recomputed_at = Some(now);
    }

    pub fn event(&self) -> TrackingEvent {
        TrackingEvent {
            order_id: self.order_id,
            courier_id: self.courier_id,
            step: self.step,
            current: self.current,
            distance_km: self.distance_km(),
            eta_minutes: self.eta_minutes(),
            estimated_arrival: self.estimated_arrival,
        }
    }

    pub fn snapshot(&self) -> TrackingSnapshot {
        TrackingSnapshot {
            order_id: self.order_id,
            courier_id: self.courier_id,
            step: self.step,
            current: self.current,
            restaurant: self.geometry.restaurant,
            customer: self.geometry.customer,
            destination: self.route_destination,
            route: self.route.clone(),
            is_route_calculated: self.is_route_calculated(),
            distance_km: self.distance_km(),
            eta_minutes: self.eta_minutes(),
            estimated_arrival: self.estimated_arrival,
            last_recomputed_at: self.last_recomputed_at,
        }
    }
}

fn eta_duration(eta_minutes: f64) -> ChronoDuration {
    let seconds = (eta_minutes.max(0.0) * 60.0).round();
    ChronoDuration::seconds(seconds.min(i32::MAX as f64) as i64)
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::TrackingSession;
    use crate::error::AppError;
    use crate::geo::haversine_km;
    use crate::models::courier::GeoPoint;
    use crate::models::order::OrderGeometry;
    use crate::models::tracking::{Destination, TrackingStep};
    use crate::providers::RoutePlanner;

    fn geometry() -> OrderGeometry {
        OrderGeometry {
            restaurant: GeoPoint::new(36.75, 3.06),
            customer: GeoPoint::new(36.77, 3.09),
        }
    }

    async fn started(planner: &RoutePlanner) -> TrackingSession {
        TrackingSession::start(
            Uuid::from_u128(1),
            Uuid::from_u128(2),
            GeoPoint::new(36.75, 3.06),
            geometry(),
            planner,
        )
        .await
    }

    #[tokio::test]
    async fn start_computes_route_to_restaurant() {
        let planner = RoutePlanner::default();
        let session = started(&planner).await;

        assert_eq!(session.step(), TrackingStep::Accepted);
        assert!(session.is_route_calculated());
        assert_eq!(session.route_destination(), Some(Destination::Restaurant));
        assert!(session.distance_km().unwrap() < 1e-9);
        assert!(session.snapshot().estimated_arrival.is_some());
    }

    #[tokio::test]
    async fn heading_to_customer_retargets_route() {
        let planner = RoutePlanner::default();
        let mut session = started(&planner).await;
        let customer = geometry().customer;
        let near_restaurant = GeoPoint::new(36.751, 3.061);

        let recomputed = session
            .advance(TrackingStep::HeadingToCustomer, Some(near_restaurant), &planner)
            .await
            .unwrap();

        assert!(recomputed);
        assert_eq!(session.route_destination(), Some(Destination::Customer));
        let expected = haversine_km(&near_restaurant, &customer);
        assert!((session.distance_km().unwrap() - expected).abs() < 1e-9);
        assert_eq!(*session.route().last().unwrap(), customer);

        let near_customer = GeoPoint::new(36.769, 3.089);
        session.update_location(near_customer, &planner).await;
        let full_leg = haversine_km(&geometry().restaurant, &customer);
        assert!(session.distance_km().unwrap() < full_leg);
    }

    #[tokio::test]
    async fn arrival_and_pickup_keep_existing_route() {
        let planner = RoutePlanner::default();
        let mut session = started(&planner).await;
        session
            .advance(TrackingStep::HeadingToRestaurant, None, &planner)
            .await
            .unwrap();

        let arrived = session
            .advance(TrackingStep::ArrivedAtRestaurant, None, &planner)
            .await
            .unwrap();
        assert!(!arrived);
        assert_eq!(session.route_destination(), Some(Destination::Restaurant));
    }

    #[tokio::test]
    async fn skipping_past_pickup_retargets_to_customer() {
        let planner = RoutePlanner::default();
        let mut session = started(&planner).await;

        let recomputed = session
            .advance(TrackingStep::PickedUp, None, &planner)
            .await
            .unwrap();

        assert!(recomputed);
        assert_eq!(session.route_destination(), Some(Destination::Customer));
    }

    #[tokio::test]
    async fn backward_advance_is_rejected_without_mutation() {
        let planner = RoutePlanner::default();
        let mut session = started(&planner).await;
        session
            .advance(TrackingStep::PickedUp, None, &planner)
            .await
            .unwrap();
        let before = session.snapshot();

        let result = session
            .advance(
                TrackingStep::HeadingToRestaurant,
                Some(GeoPoint::new(10.0, 10.0)),
                &planner,
            )
            .await;

        assert!(matches!(result, Err(AppError::InvalidTransition(_))));
        assert_eq!(session.step(), TrackingStep::PickedUp);
        assert_eq!(session.current(), before.current);
    }

    #[tokio::test]
    async fn steps_never_decrease_over_any_sequence() {
        let planner = RoutePlanner::default();
        let mut session = started(&planner).await;
        let attempts = [
            TrackingStep::ArrivedAtRestaurant,
            TrackingStep::HeadingToRestaurant,
            TrackingStep::PickedUp,
            TrackingStep::Accepted,
            TrackingStep::HeadingToCustomer,
            TrackingStep::PickedUp,
            TrackingStep::ArrivedAtCustomer,
            TrackingStep::Delivered,
            TrackingStep::HeadingToCustomer,
        ];

        let mut last = session.step();
        for step in attempts {
            let _ = session.advance(step, None, &planner).await;
            assert!(session.step() >= last);
            last = session.step();
        }
        assert_eq!(session.step(), TrackingStep::Delivered);
    }

    #[tokio::test]
    async fn repeating_a_step_only_moves_position() {
        let planner = RoutePlanner::default();
        let mut session = started(&planner).await;
        let moved = GeoPoint::new(36.755, 3.065);

        let recomputed = session
            .advance(TrackingStep::Accepted, Some(moved), &planner)
            .await
            .unwrap();

        assert!(!recomputed);
        assert_eq!(session.current(), moved);
    }

    #[tokio::test]
    async fn delivered_session_rejects_a_second_delivery() {
        let planner = RoutePlanner::default();
        let mut session = started(&planner).await;
        session
            .advance(TrackingStep::Delivered, None, &planner)
            .await
            .unwrap();

        let again = session
            .advance(TrackingStep::Delivered, Some(GeoPoint::new(36.77, 3.09)), &planner)
            .await;

        assert!(matches!(again, Err(AppError::InvalidTransition(_))));
        assert_eq!(session.current(), GeoPoint::new(36.75, 3.06));
    }

    #[tokio::test]
    async fn closed_session_ignores_updates() {
        let planner = RoutePlanner::default();
        let mut session = started(&planner).await;
        session.close();

        assert!(!session.update_location(GeoPoint::new(1.0, 1.0), &planner).await);
        assert!(!session.refresh(None, &planner).await);
        assert!(
            session
                .advance(TrackingStep::PickedUp, None, &planner)
                .await
                .is_err()
        );
    }
}
