use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;

use crate::models::booking::BookingId;
use crate::models::status::{BookingStatus, Operation};

/// Precondition failures raised by the booking aggregate. The aggregate is
/// left untouched whenever one of these is returned.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BookingError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("cannot {attempted} while booking is {current}")]
    StateConflict {
        current: BookingStatus,
        attempted: Operation,
    },

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },

    #[error("offer no longer available: {reason}")]
    OfferNotActive {
        status: BookingStatus,
        reason: OfferInactive,
    },

    #[error("courier {0} was already offered this booking")]
    DuplicateCandidate(String),
}

impl BookingError {
    /// Status the client should resynchronize to, when the error carries one.
    pub fn current_status(&self) -> Option<BookingStatus> {
        match self {
            BookingError::StateConflict { current, .. } => Some(*current),
            BookingError::InvalidTransition { from, .. } => Some(*from),
            BookingError::OfferNotActive { status, .. } => Some(*status),
            BookingError::Validation(_) | BookingError::DuplicateCandidate(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OfferInactive {
    Expired { expires_at: DateTime<Utc> },
    NotYetExpired { expires_at: DateTime<Utc> },
    NotCurrentCandidate {
        responder: String,
        current: Option<String>,
    },
}

impl fmt::Display for OfferInactive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OfferInactive::Expired { expires_at } => {
                write!(f, "offer expired at {}", expires_at.to_rfc3339())
            }
            OfferInactive::NotYetExpired { expires_at } => {
                write!(f, "offer is open until {}", expires_at.to_rfc3339())
            }
            OfferInactive::NotCurrentCandidate { responder, current } => match current {
                Some(current) => write!(f, "offer is held by {current}, not {responder}"),
                None => write!(f, "no offer is outstanding for {responder}"),
            },
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("booking {0} not found")]
    NotFound(BookingId),

    #[error("booking {0} already exists")]
    AlreadyExists(BookingId),

    #[error("concurrent write on booking {id} (expected version {expected}, got {actual})")]
    VersionConflict {
        id: BookingId,
        expected: u64,
        actual: u64,
    },

    #[error("booking store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CandidateError {
    #[error("candidate source unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Booking(#[from] BookingError),

    #[error("booking {0} not found")]
    NotFound(BookingId),

    #[error("courier {0} is not registered")]
    UnknownCourier(String),

    #[error("orchestration failure: {0}")]
    Orchestration(String),
}

impl From<StoreError> for DispatchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => DispatchError::NotFound(id),
            other => DispatchError::Orchestration(other.to_string()),
        }
    }
}

impl From<CandidateError> for DispatchError {
    fn from(err: CandidateError) -> Self {
        DispatchError::Orchestration(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {message}")]
    Conflict {
        message: String,
        status: Option<BookingStatus>,
    },

    #[error("matching delayed, retrying")]
    MatchingDelayed,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<DispatchError> for AppError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Booking(BookingError::Validation(msg)) => AppError::BadRequest(msg),
            DispatchError::Booking(err) => AppError::Conflict {
                message: err.to_string(),
                status: err.current_status(),
            },
            DispatchError::NotFound(id) => AppError::NotFound(format!("booking {id} not found")),
            DispatchError::UnknownCourier(id) => {
                AppError::NotFound(format!("courier {id} not found"))
            }
            DispatchError::Orchestration(_) => AppError::MatchingDelayed,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            AppError::Conflict { message, status } => (
                StatusCode::CONFLICT,
                json!({ "error": message, "status": status }),
            ),
            AppError::MatchingDelayed => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({ "error": "matching delayed, retrying" }),
            ),
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": msg }),
            ),
        };

        (status, Json(body)).into_response()
    }
}
