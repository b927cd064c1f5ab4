use crate::geo::haversine_km;
use crate::models::assignment::{RankedCandidate, ScoreBreakdown};
use crate::models::courier::{CourierCandidate, GeoPoint};

const RATING_WEIGHT: f64 = 0.40;
const DISTANCE_WEIGHT: f64 = 0.30;
const EXPERIENCE_WEIGHT: f64 = 0.20;
const AVAILABILITY_WEIGHT: f64 = 0.10;

const DISTANCE_HORIZON_KM: f64 = 10.0;
const EXPERIENCE_SATURATION: f64 = 100.0;

/// Scores a candidate against an optional pickup origin.
///
/// The rating component is the raw 0–5 rating times its weight, so it can
/// contribute up to 2.0 while the other components stay within their weights.
pub fn compute_score(
    candidate: &CourierCandidate,
    origin: Option<&GeoPoint>,
) -> (f64, ScoreBreakdown, Option<f64>) {
    let distance_km = match (origin, candidate.location.as_ref()) {
        (Some(origin), Some(location)) => Some(haversine_km(origin, location)),
        _ => None,
    };

    let breakdown = ScoreBreakdown {
        rating_score: candidate.rating * RATING_WEIGHT,
        distance_score: distance_score(origin.is_some(), distance_km) * DISTANCE_WEIGHT,
        experience_score: experience_score(candidate.total_deliveries) * EXPERIENCE_WEIGHT,
        availability_score: availability_score(candidate) * AVAILABILITY_WEIGHT,
    };

    (total(&breakdown), breakdown, distance_km)
}

pub fn total(breakdown: &ScoreBreakdown) -> f64 {
    breakdown.rating_score
        + breakdown.distance_score
        + breakdown.experience_score
        + breakdown.availability_score
}

fn distance_score(has_origin: bool, distance_km: Option<f64>) -> f64 {
    match (has_origin, distance_km) {
        (false, _) => 1.0,
        (true, Some(distance)) => {
            (DISTANCE_HORIZON_KM - distance.clamp(0.0, DISTANCE_HORIZON_KM)) / DISTANCE_HORIZON_KM
        }
        (true, None) => 0.0,
    }
}

fn experience_score(total_deliveries: u32) -> f64 {
    (total_deliveries as f64 / EXPERIENCE_SATURATION).min(1.0)
}

fn availability_score(candidate: &CourierCandidate) -> f64 {
    if candidate.is_eligible() { 1.0 } else { 0.0 }
}

/// Orders eligible candidates best first. Ineligible couriers are dropped,
/// ties keep input order.
pub fn rank(candidates: &[CourierCandidate], origin: Option<&GeoPoint>) -> Vec<RankedCandidate> {
    let mut ranked: Vec<RankedCandidate> = candidates
        .iter()
        .filter(|candidate| candidate.is_eligible())
        .map(|candidate| {
            let (score, score_breakdown, distance_km) = compute_score(candidate, origin);
            RankedCandidate {
                candidate: candidate.clone(),
                distance_km,
                score,
                score_breakdown,
            }
        })
        .collect();

    // sort_by is stable, so equal scores keep their input order.
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked
}

pub fn best(candidates: &[CourierCandidate], origin: Option<&GeoPoint>) -> Option<RankedCandidate> {
    rank(candidates, origin).into_iter().next()
}
