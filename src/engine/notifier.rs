use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::models::booking::BookingId;
use crate::models::courier::RiderInfo;
use crate::models::status::BookingStatus;
use crate::models::wait_timer::WaitTimes;

/// State changes fanned out to customer and courier apps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatchEvent {
    OfferMade {
        booking_id: BookingId,
        courier_id: String,
        expires_at: DateTime<Utc>,
    },
    OfferAccepted {
        booking_id: BookingId,
        rider: RiderInfo,
    },
    OfferDeclined {
        booking_id: BookingId,
        courier_id: String,
    },
    OfferExpired {
        booking_id: BookingId,
        courier_id: String,
    },
    Progress {
        booking_id: BookingId,
        status: BookingStatus,
        timestamp: DateTime<Utc>,
    },
    Edited {
        booking_id: BookingId,
    },
    Cancelled {
        booking_id: BookingId,
        reason: String,
    },
    Unmatched {
        booking_id: BookingId,
    },
    Completed {
        booking_id: BookingId,
        wait_times: WaitTimes,
    },
}

impl DispatchEvent {
    pub fn booking_id(&self) -> &BookingId {
        match self {
            DispatchEvent::OfferMade { booking_id, .. }
            | DispatchEvent::OfferAccepted { booking_id, .. }
            | DispatchEvent::OfferDeclined { booking_id, .. }
            | DispatchEvent::OfferExpired { booking_id, .. }
            | DispatchEvent::Progress { booking_id, .. }
            | DispatchEvent::Edited { booking_id }
            | DispatchEvent::Cancelled { booking_id, .. }
            | DispatchEvent::Unmatched { booking_id }
            | DispatchEvent::Completed { booking_id, .. } => booking_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DispatchEvent::OfferMade { .. } => "offer_made",
            DispatchEvent::OfferAccepted { .. } => "offer_accepted",
            DispatchEvent::OfferDeclined { .. } => "offer_declined",
            DispatchEvent::OfferExpired { .. } => "offer_expired",
            DispatchEvent::Progress { .. } => "progress",
            DispatchEvent::Edited { .. } => "edited",
            DispatchEvent::Cancelled { .. } => "cancelled",
            DispatchEvent::Unmatched { .. } => "unmatched",
            DispatchEvent::Completed { .. } => "completed",
        }
    }
}

/// Fire-and-forget outlet for dispatch events. Publishing must not block
/// and its failures never reach the caller.
pub trait NotificationSink: Send + Sync {
    fn publish(&self, event: DispatchEvent);
}

#[derive(Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<DispatchEvent>,
}

impl BroadcastNotifier {
    pub fn new(tx: broadcast::Sender<DispatchEvent>) -> Self {
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.tx.subscribe()
    }
}

impl NotificationSink for BroadcastNotifier {
    fn publish(&self, event: DispatchEvent) {
        let kind = event.kind();
        let booking_id = event.booking_id().clone();
        if self.tx.send(event).is_err() {
            debug!(booking_id = %booking_id, kind, "no subscribers for dispatch event");
        }
    }
}
