//! Location and trip-estimation collaborators used by tracking.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::geo::{haversine_km, interpolate_route};
use crate::models::courier::GeoPoint;
use crate::models::tracking::TripEstimate;

#[async_trait]
pub trait LocationFeed: Send + Sync {
    async fn latest_position_for(&self, courier_id: Uuid) -> Option<GeoPoint>;
}

/// Richer distance/ETA source, e.g. a routing provider. `None` means no
/// estimate for this leg.
#[async_trait]
pub trait TripEstimator: Send + Sync {
    async fn estimate(&self, origin: &GeoPoint, destination: &GeoPoint) -> Option<TripEstimate>;
}

pub const DEFAULT_AVERAGE_SPEED_KMH: f64 = 30.0;
pub const DEFAULT_ROUTE_SEGMENTS: usize = 10;

/// A planned leg: interpolated path plus distance/ETA.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedRoute {
    pub path: Vec<GeoPoint>,
    pub estimate: TripEstimate,
}

#[derive(Clone)]
pub struct RoutePlanner {
    estimator: Option<Arc<dyn TripEstimator>>,
    average_speed_kmh: f64,
    route_segments: usize,
}

impl Default for RoutePlanner {
    fn default() -> Self {
        Self::new(None, DEFAULT_AVERAGE_SPEED_KMH, DEFAULT_ROUTE_SEGMENTS)
    }
}

impl RoutePlanner {
    pub fn new(
        estimator: Option<Arc<dyn TripEstimator>>,
        average_speed_kmh: f64,
        route_segments: usize,
    ) -> Self {
        Self {
            estimator,
            average_speed_kmh,
            route_segments,
        }
    }

    /// The estimator's figure wins when it has one.
    pub async fn plan(&self, from: &GeoPoint, to: &GeoPoint) -> PlannedRoute {
        let estimate = match &self.estimator {
            Some(estimator) => estimator.estimate(from, to).await,
            None => None,
        };

        PlannedRoute {
            path: interpolate_route(from, to, self.route_segments),
            estimate: estimate.unwrap_or_else(|| self.fallback_estimate(from, to)),
        }
    }

    pub fn fallback_estimate(&self, from: &GeoPoint, to: &GeoPoint) -> TripEstimate {
        let distance_km = haversine_km(from, to);
        let speed = if self.average_speed_kmh > 0.0 {
            self.average_speed_kmh
        } else {
            DEFAULT_AVERAGE_SPEED_KMH
        };

        TripEstimate {
            distance_km,
            eta_minutes: distance_km / speed * 60.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::{RoutePlanner, TripEstimator};
    use crate::models::courier::GeoPoint;
    use crate::models::tracking::TripEstimate;

    struct FixedEstimator(Option<TripEstimate>);

    #[async_trait]
    impl TripEstimator for FixedEstimator {
        async fn estimate(&self, _: &GeoPoint, _: &GeoPoint) -> Option<TripEstimate> {
            self.0
        }
    }

    #[tokio::test]
    async fn fallback_uses_average_urban_speed() {
        let planner = RoutePlanner::default();
        let from = GeoPoint::new(36.75, 3.06);
        let to = GeoPoint::new(36.77, 3.09);

        let route = planner.plan(&from, &to).await;

        let expected_eta = route.estimate.distance_km / 30.0 * 60.0;
        assert!((route.estimate.eta_minutes - expected_eta).abs() < 1e-9);
        assert_eq!(route.path.len(), 11);
    }

    #[tokio::test]
    async fn estimator_figure_takes_precedence() {
        let supplied = TripEstimate {
            distance_km: 4.2,
            eta_minutes: 17.0,
        };
        let planner = RoutePlanner::new(Some(Arc::new(FixedEstimator(Some(supplied)))), 30.0, 5);

        let route = planner
            .plan(&GeoPoint::new(36.75, 3.06), &GeoPoint::new(36.77, 3.09))
            .await;

        assert_eq!(route.estimate, supplied);
        assert_eq!(route.path.len(), 6);
    }

    #[tokio::test]
    async fn estimator_without_answer_falls_back() {
        let planner = RoutePlanner::new(Some(Arc::new(FixedEstimator(None))), 30.0, 5);
        let from = GeoPoint::new(36.75, 3.06);
        let to = GeoPoint::new(36.77, 3.09);

        let route = planner.plan(&from, &to).await;

        assert_eq!(route.estimate, planner.fallback_estimate(&from, &to));
    }
}
