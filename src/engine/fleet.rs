use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::debug;

use crate::engine::candidates::{Candidate, CandidateQuery, CandidateSource, RiderDirectory};
use crate::engine::scoring::compute_score;
use crate::error::CandidateError;
use crate::geo::within_radius;
use crate::models::courier::{Courier, CourierStatus, RiderInfo};
use crate::models::location::GeoPoint;

/// In-memory courier fleet ranked by distance, spare capacity and rating.
#[derive(Default)]
pub struct FleetCandidateSource {
    couriers: DashMap<String, Courier>,
}

impl FleetCandidateSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, courier: Courier) {
        self.couriers.insert(courier.id.clone(), courier);
    }

    pub fn get(&self, courier_id: &str) -> Option<Courier> {
        self.couriers.get(courier_id).map(|entry| entry.value().clone())
    }

    pub fn list(&self) -> Vec<Courier> {
        let mut couriers: Vec<Courier> = self
            .couriers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        couriers.sort_by(|a, b| a.id.cmp(&b.id));
        couriers
    }

    pub fn len(&self) -> usize {
        self.couriers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.couriers.is_empty()
    }

    pub fn update_status(&self, courier_id: &str, status: CourierStatus) -> Option<Courier> {
        let mut courier = self.couriers.get_mut(courier_id)?;
        courier.status = status;
        courier.updated_at = Utc::now();
        Some(courier.clone())
    }

    pub fn update_location(&self, courier_id: &str, location: GeoPoint) -> Option<Courier> {
        let mut courier = self.couriers.get_mut(courier_id)?;
        courier.location = location;
        courier.updated_at = Utc::now();
        Some(courier.clone())
    }

    fn rank(&self, query: &CandidateQuery, pickup: &GeoPoint) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = self
            .couriers
            .iter()
            .filter(|entry| {
                let courier = entry.value();
                courier.can_take_booking()
                    && courier.vehicle_type == query.vehicle_type
                    && within_radius(pickup, &courier.location, query.radius_km)
            })
            .map(|entry| {
                let (score, breakdown) = compute_score(entry.value(), pickup);
                Candidate {
                    courier_id: entry.key().clone(),
                    distance_km: Some(breakdown.distance_km),
                    score,
                }
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.courier_id.cmp(&b.courier_id))
        });
        candidates
    }
}

#[async_trait]
impl CandidateSource for FleetCandidateSource {
    async fn find_candidates(
        &self,
        query: &CandidateQuery,
    ) -> Result<Vec<Candidate>, CandidateError> {
        let Some(pickup) = query.pickup.geo else {
            debug!("pickup has no coordinates; fleet cannot rank couriers");
            return Ok(Vec::new());
        };

        Ok(self.rank(query, &pickup))
    }
}

#[async_trait]
impl RiderDirectory for FleetCandidateSource {
    async fn rider_info(&self, courier_id: &str) -> Result<Option<RiderInfo>, CandidateError> {
        Ok(self.get(courier_id).map(|courier| courier.rider_info()))
    }
}
