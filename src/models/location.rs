use serde::{Deserialize, Serialize};

use crate::error::BookingError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lng)
    }
}

/// A pickup or drop-off point. Sequence 0 is always the pickup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Stop {
    pub sequence: u32,
    #[serde(default)]
    pub geo: Option<GeoPoint>,
    #[serde(default)]
    pub address: Option<String>,
}

impl Stop {
    pub fn has_location(&self) -> bool {
        let has_address = self
            .address
            .as_deref()
            .is_some_and(|address| !address.trim().is_empty());
        self.geo.is_some() || has_address
    }
}

/// Checks stop sequencing and that every stop can be located.
pub fn validate_route(pickup: &Stop, dropoffs: &[Stop]) -> Result<(), BookingError> {
    if pickup.sequence != 0 {
        return Err(BookingError::Validation(format!(
            "pickup must have sequence 0, got {}",
            pickup.sequence
        )));
    }

    if dropoffs.is_empty() {
        return Err(BookingError::Validation(
            "at least one drop-off is required".to_string(),
        ));
    }

    for (index, stop) in std::iter::once(pickup).chain(dropoffs).enumerate() {
        if stop.sequence as usize != index {
            return Err(BookingError::Validation(format!(
                "stop sequence must be contiguous: expected {index}, got {}",
                stop.sequence
            )));
        }

        if !stop.has_location() {
            return Err(BookingError::Validation(format!(
                "stop {} needs geo coordinates or an address",
                stop.sequence
            )));
        }

        if let Some(geo) = &stop.geo {
            if !geo.is_valid() {
                return Err(BookingError::Validation(format!(
                    "stop {} has out-of-range coordinates ({}, {})",
                    stop.sequence, geo.lat, geo.lng
                )));
            }
        }
    }

    Ok(())
}
