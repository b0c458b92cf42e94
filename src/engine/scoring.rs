use serde::{Deserialize, Serialize};

use crate::geo::haversine_km;
use crate::models::courier::Courier;
use crate::models::location::GeoPoint;

const DISTANCE_WEIGHT: f64 = 0.50;
const LOAD_WEIGHT: f64 = 0.30;
const RATING_WEIGHT: f64 = 0.20;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreBreakdown {
    pub distance_km: f64,
    pub distance_score: f64,
    pub load_score: f64,
    pub rating_score: f64,
}

pub fn compute_score(courier: &Courier, pickup: &GeoPoint) -> (f64, ScoreBreakdown) {
    let distance_km = haversine_km(&courier.location, pickup);

    let breakdown = ScoreBreakdown {
        distance_km,
        distance_score: distance_score(distance_km),
        load_score: load_score(courier.current_load, courier.capacity),
        rating_score: rating_score(courier.rating),
    };

    let score = weighted_score(&breakdown);
    (score, breakdown)
}

pub fn weighted_score(breakdown: &ScoreBreakdown) -> f64 {
    (breakdown.distance_score * DISTANCE_WEIGHT)
        + (breakdown.load_score * LOAD_WEIGHT)
        + (breakdown.rating_score * RATING_WEIGHT)
}

fn distance_score(distance_km: f64) -> f64 {
    1.0 / (1.0 + distance_km.max(0.0))
}

fn load_score(current_load: u8, capacity: u8) -> f64 {
    if capacity == 0 {
        return 0.0;
    }

    let utilization = current_load as f64 / capacity as f64;
    (1.0 - utilization).clamp(0.0, 1.0)
}

fn rating_score(rating: f64) -> f64 {
    (rating / 5.0).clamp(0.0, 1.0)
}
