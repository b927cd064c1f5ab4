use crate::models::courier::GeoPoint;

const EARTH_RADIUS_KM: f64 = 6_371.0;

pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    // Clamped so rounding never pushes asin out of its domain.
    let haversine =
        (sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng).clamp(0.0, 1.0);
    let central_angle = 2.0 * haversine.sqrt().asin();

    EARTH_RADIUS_KM * central_angle
}

/// `None` origin means unbounded.
pub fn within_radius(origin: Option<&GeoPoint>, point: Option<&GeoPoint>, radius_km: f64) -> bool {
    match (origin, point) {
        (None, _) => true,
        (Some(origin), Some(point)) => haversine_km(origin, point) <= radius_km,
        (Some(_), None) => false,
    }
}

/// Straight-line route from `from` to `to`, both endpoints included.
pub fn interpolate_route(from: &GeoPoint, to: &GeoPoint, segments: usize) -> Vec<GeoPoint> {
    let segments = segments.max(1);
    (0..=segments)
        .map(|i| {
            let t = i as f64 / segments as f64;
            GeoPoint {
                lat: from.lat + (to.lat - from.lat) * t,
                lng: from.lng + (to.lng - from.lng) * t,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{haversine_km, interpolate_route, within_radius};
    use crate::models::courier::GeoPoint;

    #[test]
    fn zero_distance_for_same_point() {
        let p = GeoPoint {
            lat: 36.75,
            lng: 3.06,
        };
        let distance = haversine_km(&p, &p);
        assert!(distance < 1e-9);
    }

    #[test]
    fn london_to_paris_is_around_343_km() {
        let london = GeoPoint {
            lat: 51.5074,
            lng: -0.1278,
        };
        let paris = GeoPoint {
            lat: 48.8566,
            lng: 2.3522,
        };
        let distance = haversine_km(&london, &paris);
        assert!((distance - 343.0).abs() < 5.0);
    }

    #[test]
    fn distance_is_symmetric() {
        let points = [
            GeoPoint::new(36.75, 3.06),
            GeoPoint::new(36.77, 3.09),
            GeoPoint::new(-33.86, 151.21),
            GeoPoint::new(40.71, -74.0),
            GeoPoint::new(0.0, 179.9),
            GeoPoint::new(0.0, -179.9),
        ];

        for a in &points {
            for b in &points {
                let forward = haversine_km(a, b);
                let backward = haversine_km(b, a);
                assert!((forward - backward).abs() < 1e-9, "{a:?} <-> {b:?}");
            }
        }
    }

    #[test]
    fn missing_origin_means_unbounded_radius() {
        let far = GeoPoint::new(-33.86, 151.21);
        assert!(within_radius(None, Some(&far), 10.0));
        assert!(within_radius(None, None, 10.0));
    }

    #[test]
    fn point_without_fix_is_outside_any_radius() {
        let origin = GeoPoint::new(36.75, 3.06);
        assert!(!within_radius(Some(&origin), None, 10.0));
        assert!(within_radius(Some(&origin), Some(&GeoPoint::new(36.76, 3.06)), 10.0));
        assert!(!within_radius(Some(&origin), Some(&GeoPoint::new(37.75, 3.06)), 10.0));
    }

    #[test]
    fn route_runs_from_start_to_destination() {
        let from = GeoPoint::new(36.75, 3.06);
        let to = GeoPoint::new(36.77, 3.09);
        let route = interpolate_route(&from, &to, 4);

        assert_eq!(route.len(), 5);
        assert_eq!(route[0], from);
        assert!((route[4].lat - to.lat).abs() < 1e-12);
        assert!((route[4].lng - to.lng).abs() < 1e-12);
        assert!((route[2].lat - 36.76).abs() < 1e-9);
    }
}
