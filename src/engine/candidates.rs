use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CandidateError;
use crate::models::courier::{RiderInfo, VehicleType};
use crate::models::location::Stop;

#[derive(Debug, Clone)]
pub struct CandidateQuery {
    pub pickup: Stop,
    pub vehicle_type: VehicleType,
    pub radius_km: f64,
}

/// An eligible courier, best first in the list returned by a source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    pub courier_id: String,
    pub distance_km: Option<f64>,
    pub score: f64,
}

/// Ranks couriers able to serve a pickup. Implementations must not mutate
/// anything and should return a stable order for an unchanged fleet. An
/// empty list is a normal answer.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    async fn find_candidates(&self, query: &CandidateQuery)
        -> Result<Vec<Candidate>, CandidateError>;
}

/// Resolves the public profile recorded on a booking when a courier accepts.
#[async_trait]
pub trait RiderDirectory: Send + Sync {
    async fn rider_info(&self, courier_id: &str) -> Result<Option<RiderInfo>, CandidateError>;
}

/// Fixed ranking, independent of the query.
#[derive(Debug, Clone, Default)]
pub struct StaticCandidateSource {
    riders: Vec<RiderInfo>,
}

impl StaticCandidateSource {
    pub fn new(riders: Vec<RiderInfo>) -> Self {
        Self { riders }
    }

    pub fn with_ids(ids: &[&str]) -> Self {
        let riders = ids
            .iter()
            .map(|id| RiderInfo {
                user_id: id.to_string(),
                name: format!("Rider {id}"),
                vehicle: "motorbike".to_string(),
                phone: "+260972000000".to_string(),
                rating: Some(4.8),
                eta_min: None,
            })
            .collect();
        Self { riders }
    }
}

#[async_trait]
impl CandidateSource for StaticCandidateSource {
    async fn find_candidates(
        &self,
        _query: &CandidateQuery,
    ) -> Result<Vec<Candidate>, CandidateError> {
        let total = self.riders.len() as f64;
        Ok(self
            .riders
            .iter()
            .enumerate()
            .map(|(rank, rider)| Candidate {
                courier_id: rider.user_id.clone(),
                distance_km: None,
                score: total - rank as f64,
            })
            .collect())
    }
}

#[async_trait]
impl RiderDirectory for StaticCandidateSource {
    async fn rider_info(&self, courier_id: &str) -> Result<Option<RiderInfo>, CandidateError> {
        Ok(self
            .riders
            .iter()
            .find(|rider| rider.user_id == courier_id)
            .cloned())
    }
}
