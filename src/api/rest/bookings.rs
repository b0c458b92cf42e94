use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::warn;

use crate::engine::dispatch::{Decision, IntakeReceipt};
use crate::engine::queue::enqueue_booking;
use crate::error::AppError;
use crate::models::booking::{BookingId, BookingPatch, BookingRequest, BookingSnapshot};
use crate::models::status::BookingStatus;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bookings", post(create_booking))
        .route("/bookings/:id", get(get_booking).patch(edit_booking))
        .route("/bookings/:id/cancel", post(cancel_booking))
        .route("/bookings/:id/respond", post(respond_to_offer))
        .route("/bookings/:id/progress", post(advance_progress))
        .route("/bookings/:id/timers", get(get_timers))
        .route("/bookings/:id/complete", post(complete_booking))
        .route("/bookings/:id/events", get(booking_events))
}

#[derive(Deserialize)]
pub struct CancelRequest {
    #[serde(default = "default_cancel_reason")]
    pub reason: String,
}

fn default_cancel_reason() -> String {
    "customer_request".to_string()
}

#[derive(Deserialize)]
pub struct RespondRequest {
    pub courier_id: String,
    pub decision: Decision,
}

#[derive(Deserialize)]
pub struct ProgressRequest {
    pub stage: BookingStatus,
}

#[derive(Serialize)]
pub struct TimersResponse {
    pub pickup_wait_sec: u64,
    pub dropoff_wait_sec: u64,
}

async fn create_booking(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<BookingRequest>,
) -> Result<(StatusCode, Json<IntakeReceipt>), AppError> {
    let receipt = state.dispatcher.intake(payload).await?;

    // The booking is already stored as searching; the sweeper resumes it
    // if the queue cannot take it.
    if let Err(err) = enqueue_booking(&state, receipt.booking_id.clone()).await {
        warn!(booking_id = %receipt.booking_id, error = %err, "booking not queued");
    }

    Ok((StatusCode::CREATED, Json(receipt)))
}

async fn get_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<BookingSnapshot>, AppError> {
    let snapshot = state.dispatcher.snapshot(&BookingId::from(id)).await?;
    Ok(Json(snapshot))
}

async fn edit_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(patch): Json<BookingPatch>,
) -> Result<Json<BookingSnapshot>, AppError> {
    let snapshot = state.dispatcher.edit(&BookingId::from(id), patch).await?;
    Ok(Json(snapshot))
}

async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<CancelRequest>,
) -> Result<Json<BookingSnapshot>, AppError> {
    if payload.reason.trim().is_empty() {
        return Err(AppError::BadRequest("reason cannot be empty".to_string()));
    }

    let snapshot = state
        .dispatcher
        .cancel(&BookingId::from(id), &payload.reason)
        .await?;
    Ok(Json(snapshot))
}

async fn respond_to_offer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<RespondRequest>,
) -> Result<Json<BookingSnapshot>, AppError> {
    let snapshot = state
        .dispatcher
        .respond(&BookingId::from(id), &payload.courier_id, payload.decision)
        .await?;
    Ok(Json(snapshot))
}

async fn advance_progress(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<ProgressRequest>,
) -> Result<Json<BookingSnapshot>, AppError> {
    let snapshot = state
        .dispatcher
        .advance_progress(&BookingId::from(id), payload.stage)
        .await?;
    Ok(Json(snapshot))
}

async fn get_timers(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TimersResponse>, AppError> {
    let wait_times = state.dispatcher.timers(&BookingId::from(id)).await?;
    Ok(Json(TimersResponse {
        pickup_wait_sec: wait_times.pickup_sec,
        dropoff_wait_sec: wait_times.dropoff_sec,
    }))
}

async fn complete_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<BookingSnapshot>, AppError> {
    let snapshot = state.dispatcher.complete(&BookingId::from(id)).await?;
    Ok(Json(snapshot))
}

async fn booking_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let booking_id = BookingId::from(id);
    let rx = state.notifier.subscribe();
    state.dispatcher.snapshot(&booking_id).await?;

    let stream = BroadcastStream::new(rx).filter_map(move |result| match result {
        Ok(event) if event.booking_id() == &booking_id => Event::default()
            .event(event.kind())
            .json_data(&event)
            .ok()
            .map(Ok),
        Ok(_) => None,
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            warn!(booking_id = %booking_id, skipped, "sse subscriber lagged");
            None
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
