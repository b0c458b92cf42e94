use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::location::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VehicleType {
    Motorbike,
    Bicycle,
    Walking,
    Truck,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum CourierStatus {
    Available,
    Busy,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Courier {
    pub id: String,
    pub name: String,
    pub phone: String,
    pub vehicle_type: VehicleType,
    pub vehicle: String,
    pub location: GeoPoint,
    pub capacity: u8,
    pub current_load: u8,
    pub status: CourierStatus,
    pub rating: f64,
    pub updated_at: DateTime<Utc>,
}

impl Courier {
    pub fn can_take_booking(&self) -> bool {
        self.status == CourierStatus::Available && self.current_load < self.capacity
    }

    pub fn rider_info(&self) -> RiderInfo {
        RiderInfo {
            user_id: self.id.clone(),
            name: self.name.clone(),
            vehicle: self.vehicle.clone(),
            phone: self.phone.clone(),
            rating: Some(self.rating),
            eta_min: None,
        }
    }
}

/// Public view of the courier assigned to a booking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiderInfo {
    pub user_id: String,
    pub name: String,
    pub vehicle: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_min: Option<u32>,
}
