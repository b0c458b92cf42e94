use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{patch, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::courier::{Courier, CourierStatus, VehicleType};
use crate::models::location::GeoPoint;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/couriers", post(create_courier).get(list_couriers))
        .route("/couriers/:id/status", patch(update_courier_status))
        .route("/couriers/:id/location", patch(update_courier_location))
}

#[derive(Deserialize)]
pub struct CreateCourierRequest {
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub phone: String,
    pub vehicle_type: VehicleType,
    #[serde(default)]
    pub vehicle: String,
    pub location: GeoPoint,
    pub capacity: u8,
    pub rating: f64,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: CourierStatus,
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub location: GeoPoint,
}

async fn create_courier(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateCourierRequest>,
) -> Result<Json<Courier>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }

    if payload.capacity == 0 {
        return Err(AppError::BadRequest("capacity must be > 0".to_string()));
    }

    if !payload.location.is_valid() {
        return Err(AppError::BadRequest("location is out of range".to_string()));
    }

    let id = match payload.id {
        Some(id) if !id.trim().is_empty() => id,
        _ => format!("cour_{}", Uuid::new_v4().simple()),
    };

    if state.fleet.get(&id).is_some() {
        return Err(AppError::Conflict {
            message: format!("courier {id} already exists"),
            status: None,
        });
    }

    let courier = Courier {
        id,
        name: payload.name,
        phone: payload.phone,
        vehicle_type: payload.vehicle_type,
        vehicle: payload.vehicle,
        location: payload.location,
        capacity: payload.capacity,
        current_load: 0,
        status: CourierStatus::Available,
        rating: payload.rating.clamp(0.0, 5.0),
        updated_at: Utc::now(),
    };

    info!(courier_id = %courier.id, vehicle_type = ?courier.vehicle_type, "courier registered");
    state.fleet.register(courier.clone());
    Ok(Json(courier))
}

async fn list_couriers(State(state): State<Arc<AppState>>) -> Json<Vec<Courier>> {
    Json(state.fleet.list())
}

async fn update_courier_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Courier>, AppError> {
    let courier = state
        .fleet
        .update_status(&id, payload.status)
        .ok_or_else(|| AppError::NotFound(format!("courier {} not found", id)))?;

    Ok(Json(courier))
}

async fn update_courier_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<Json<Courier>, AppError> {
    if !payload.location.is_valid() {
        return Err(AppError::BadRequest("location is out of range".to_string()));
    }

    let courier = state
        .fleet
        .update_location(&id, payload.location)
        .ok_or_else(|| AppError::NotFound(format!("courier {} not found", id)))?;

    Ok(Json(courier))
}
