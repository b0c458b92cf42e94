use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{BookingError, OfferInactive};
use crate::models::courier::{RiderInfo, VehicleType};
use crate::models::location::{validate_route, Stop};
use crate::models::status::{BookingStatus, Operation};
use crate::models::wait_timer::{WaitTimer, WaitTimes};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookingId(String);

impl BookingId {
    pub fn generate() -> Self {
        let raw = Uuid::new_v4().simple().to_string();
        Self(format!("bkg_{}", &raw[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for BookingId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for BookingId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for BookingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Intake payload for a new booking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingRequest {
    pub delivery_id: String,
    pub vehicle_type: VehicleType,
    pub pickup: Stop,
    pub dropoffs: Vec<Stop>,
    pub customer_user_id: String,
    pub customer_name: String,
    pub customer_phone: String,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

/// Fields a customer may replace while the booking is still editable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookingPatch {
    #[serde(default)]
    pub pickup: Option<Stop>,
    #[serde(default)]
    pub dropoffs: Option<Vec<Stop>>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

/// The offer currently awaiting a courier's answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActiveOffer {
    pub courier_id: String,
    pub offered_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cancellation {
    pub reason: String,
    pub cancelled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    booking_id: BookingId,
    delivery_id: String,
    status: BookingStatus,
    vehicle_type: VehicleType,
    pickup: Stop,
    dropoffs: Vec<Stop>,
    offered_to: Vec<String>,
    offer: Option<ActiveOffer>,
    rider: Option<RiderInfo>,
    pickup_timer: WaitTimer,
    dropoff_timer: WaitTimer,
    customer_user_id: String,
    customer_name: String,
    customer_phone: String,
    metadata: Map<String, Value>,
    cancellation: Option<Cancellation>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn create(request: BookingRequest, now: DateTime<Utc>) -> Result<Self, BookingError> {
        require_text("delivery_id", &request.delivery_id)?;
        require_text("customer_user_id", &request.customer_user_id)?;
        validate_route(&request.pickup, &request.dropoffs)?;

        Ok(Self {
            booking_id: BookingId::generate(),
            delivery_id: request.delivery_id,
            status: BookingStatus::Created,
            vehicle_type: request.vehicle_type,
            pickup: request.pickup,
            dropoffs: request.dropoffs,
            offered_to: Vec::new(),
            offer: None,
            rider: None,
            pickup_timer: WaitTimer::default(),
            dropoff_timer: WaitTimer::default(),
            customer_user_id: request.customer_user_id,
            customer_name: request.customer_name,
            customer_phone: request.customer_phone,
            metadata: request.metadata.unwrap_or_default(),
            cancellation: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn booking_id(&self) -> &BookingId {
        &self.booking_id
    }

    pub fn delivery_id(&self) -> &str {
        &self.delivery_id
    }

    pub fn status(&self) -> BookingStatus {
        self.status
    }

    pub fn vehicle_type(&self) -> VehicleType {
        self.vehicle_type
    }

    pub fn pickup(&self) -> &Stop {
        &self.pickup
    }

    pub fn dropoffs(&self) -> &[Stop] {
        &self.dropoffs
    }

    /// Every courier this booking has been offered to, oldest first.
    pub fn offered_to(&self) -> &[String] {
        &self.offered_to
    }

    pub fn offer(&self) -> Option<&ActiveOffer> {
        self.offer.as_ref()
    }

    pub fn current_candidate(&self) -> Option<&str> {
        self.offer.as_ref().map(|offer| offer.courier_id.as_str())
    }

    pub fn rider(&self) -> Option<&RiderInfo> {
        self.rider.as_ref()
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn cancellation(&self) -> Option<&Cancellation> {
        self.cancellation.as_ref()
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn can_user_edit(&self) -> bool {
        self.status.is_editable()
    }

    pub fn can_complete(&self) -> bool {
        self.status == BookingStatus::Delivered
    }

    pub fn has_been_offered(&self, courier_id: &str) -> bool {
        self.offered_to.iter().any(|id| id == courier_id)
    }

    pub fn wait_times(&self, now: DateTime<Utc>) -> WaitTimes {
        WaitTimes {
            pickup_sec: self.pickup_timer.elapsed_sec(now),
            dropoff_sec: self.dropoff_timer.elapsed_sec(now),
        }
    }

    pub fn start_searching(&mut self, now: DateTime<Utc>) -> Result<(), BookingError> {
        self.require(&[BookingStatus::Created], Operation::StartSearching)?;
        self.status = BookingStatus::Searching;
        self.touch(now);
        Ok(())
    }

    pub fn offer_to_candidate(
        &mut self,
        courier_id: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), BookingError> {
        self.require(
            &[BookingStatus::Searching, BookingStatus::Offered],
            Operation::Offer,
        )?;

        if self.has_been_offered(courier_id) {
            return Err(BookingError::DuplicateCandidate(courier_id.to_string()));
        }

        self.offered_to.push(courier_id.to_string());
        self.offer = Some(ActiveOffer {
            courier_id: courier_id.to_string(),
            offered_at: now,
            expires_at: now + ttl,
        });
        self.status = BookingStatus::Offered;
        self.touch(now);
        Ok(())
    }

    pub fn accept_by_courier(
        &mut self,
        courier_id: &str,
        rider: RiderInfo,
        now: DateTime<Utc>,
    ) -> Result<(), BookingError> {
        let offer = self.active_offer_for(courier_id, Operation::Accept)?;
        if now >= offer.expires_at {
            return Err(BookingError::OfferNotActive {
                status: self.status,
                reason: OfferInactive::Expired {
                    expires_at: offer.expires_at,
                },
            });
        }

        self.status = BookingStatus::Accepted;
        self.rider = Some(rider);
        self.offer = None;
        self.pickup_timer.start(now);
        self.touch(now);
        Ok(())
    }

    pub fn decline_by_courier(
        &mut self,
        courier_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), BookingError> {
        self.active_offer_for(courier_id, Operation::Decline)?;
        self.return_to_search(now);
        Ok(())
    }

    /// Returns the courier whose offer lapsed.
    pub fn expire_offer(&mut self, now: DateTime<Utc>) -> Result<String, BookingError> {
        self.require(&[BookingStatus::Offered], Operation::Expire)?;

        let Some(offer) = self.offer.as_ref() else {
            return Err(BookingError::StateConflict {
                current: self.status,
                attempted: Operation::Expire,
            });
        };

        if now < offer.expires_at {
            return Err(BookingError::OfferNotActive {
                status: self.status,
                reason: OfferInactive::NotYetExpired {
                    expires_at: offer.expires_at,
                },
            });
        }

        let courier_id = offer.courier_id.clone();
        self.return_to_search(now);
        Ok(courier_id)
    }

    pub fn edit_details(
        &mut self,
        patch: BookingPatch,
        now: DateTime<Utc>,
    ) -> Result<(), BookingError> {
        if !self.can_user_edit() {
            return Err(BookingError::StateConflict {
                current: self.status,
                attempted: Operation::Edit,
            });
        }

        let pickup = patch.pickup.unwrap_or_else(|| self.pickup.clone());
        let dropoffs = patch.dropoffs.unwrap_or_else(|| self.dropoffs.clone());
        validate_route(&pickup, &dropoffs)?;

        self.pickup = pickup;
        self.dropoffs = dropoffs;
        if let Some(metadata) = patch.metadata {
            self.metadata = metadata;
        }
        self.touch(now);
        Ok(())
    }

    pub fn cancel(&mut self, reason: &str, now: DateTime<Utc>) -> Result<(), BookingError> {
        if self.status.is_terminal() {
            return Err(BookingError::StateConflict {
                current: self.status,
                attempted: Operation::Cancel,
            });
        }

        self.pickup_timer.stop(now);
        self.dropoff_timer.stop(now);
        self.offer = None;
        self.cancellation = Some(Cancellation {
            reason: reason.to_string(),
            cancelled_at: now,
        });
        self.status = BookingStatus::Cancelled;
        self.touch(now);
        Ok(())
    }

    pub fn advance_progress(
        &mut self,
        stage: BookingStatus,
        now: DateTime<Utc>,
    ) -> Result<(), BookingError> {
        if self.status.next_progress() != Some(stage) {
            return Err(BookingError::InvalidTransition {
                from: self.status,
                to: stage,
            });
        }

        match stage {
            BookingStatus::PickedUp => {
                self.pickup_timer.stop(now);
                self.dropoff_timer.start(now);
            }
            BookingStatus::Delivered => self.dropoff_timer.stop(now),
            _ => {}
        }

        self.status = stage;
        self.touch(now);
        Ok(())
    }

    pub fn mark_unmatched(&mut self, now: DateTime<Utc>) -> Result<(), BookingError> {
        self.require(&[BookingStatus::Searching], Operation::MarkUnmatched)?;
        self.status = BookingStatus::Unmatched;
        self.touch(now);
        Ok(())
    }

    /// Closes a delivered booking once pricing and payment have settled.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), BookingError> {
        if !self.can_complete() {
            return Err(BookingError::StateConflict {
                current: self.status,
                attempted: Operation::Complete,
            });
        }
        self.status = BookingStatus::Completed;
        self.touch(now);
        Ok(())
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> BookingSnapshot {
        BookingSnapshot {
            booking_id: self.booking_id.clone(),
            delivery_id: self.delivery_id.clone(),
            status: self.status,
            vehicle_type: self.vehicle_type,
            pickup: self.pickup.clone(),
            dropoffs: self.dropoffs.clone(),
            offer: OfferView {
                offered_to: self.offered_to.clone(),
                current_candidate: self.current_candidate().map(str::to_string),
                expires_at: self.offer.as_ref().map(|offer| offer.expires_at),
            },
            rider: self.rider.clone(),
            wait_times: self.wait_times(now),
            can_user_edit: self.can_user_edit(),
            customer_user_id: self.customer_user_id.clone(),
            customer_name: self.customer_name.clone(),
            customer_phone: self.customer_phone.clone(),
            metadata: self.metadata.clone(),
            cancel_reason: self.cancellation.as_ref().map(|c| c.reason.clone()),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    fn require(&self, allowed: &[BookingStatus], attempted: Operation) -> Result<(), BookingError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(BookingError::StateConflict {
                current: self.status,
                attempted,
            })
        }
    }

    fn active_offer_for(
        &self,
        courier_id: &str,
        attempted: Operation,
    ) -> Result<&ActiveOffer, BookingError> {
        if self.status.is_terminal() {
            return Err(BookingError::StateConflict {
                current: self.status,
                attempted,
            });
        }

        match self.offer.as_ref().filter(|_| self.status == BookingStatus::Offered) {
            Some(offer) if offer.courier_id == courier_id => Ok(offer),
            other => Err(BookingError::OfferNotActive {
                status: self.status,
                reason: OfferInactive::NotCurrentCandidate {
                    responder: courier_id.to_string(),
                    current: other.map(|offer| offer.courier_id.clone()),
                },
            }),
        }
    }

    fn return_to_search(&mut self, now: DateTime<Utc>) {
        self.offer = None;
        self.status = BookingStatus::Searching;
        self.touch(now);
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

fn require_text(field: &str, value: &str) -> Result<(), BookingError> {
    if value.trim().is_empty() {
        return Err(BookingError::Validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferView {
    pub offered_to: Vec<String>,
    pub current_candidate: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Read model of a booking with wait times computed at query time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingSnapshot {
    pub booking_id: BookingId,
    pub delivery_id: String,
    pub status: BookingStatus,
    pub vehicle_type: VehicleType,
    pub pickup: Stop,
    pub dropoffs: Vec<Stop>,
    pub offer: OfferView,
    pub rider: Option<RiderInfo>,
    pub wait_times: WaitTimes,
    pub can_user_edit: bool,
    pub customer_user_id: String,
    pub customer_name: String,
    pub customer_phone: String,
    pub metadata: Map<String, Value>,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::{Booking, BookingPatch, BookingRequest};
    use crate::error::{BookingError, OfferInactive};
    use crate::models::courier::{RiderInfo, VehicleType};
    use crate::models::location::{GeoPoint, Stop};
    use crate::models::status::{BookingStatus, Operation};

    const ALL_STATUSES: [BookingStatus; 12] = [
        BookingStatus::Created,
        BookingStatus::Searching,
        BookingStatus::Offered,
        BookingStatus::Accepted,
        BookingStatus::EnRoute,
        BookingStatus::ArrivedPickup,
        BookingStatus::PickedUp,
        BookingStatus::EnRouteDropoff,
        BookingStatus::Delivered,
        BookingStatus::Completed,
        BookingStatus::Cancelled,
        BookingStatus::Unmatched,
    ];

    fn stop(sequence: u32, lat: f64, lng: f64) -> Stop {
        Stop {
            sequence,
            geo: Some(GeoPoint { lat, lng }),
            address: None,
        }
    }

    fn request() -> BookingRequest {
        BookingRequest {
            delivery_id: "del_abc123".to_string(),
            vehicle_type: VehicleType::Motorbike,
            pickup: stop(0, -15.41, 28.28),
            dropoffs: vec![stop(1, -15.43, 28.31)],
            customer_user_id: "usr_123".to_string(),
            customer_name: "John Doe".to_string(),
            customer_phone: "+260972827372".to_string(),
            metadata: None,
        }
    }

    fn rider(id: &str) -> RiderInfo {
        RiderInfo {
            user_id: id.to_string(),
            name: "Test Rider".to_string(),
            vehicle: "Honda CG125".to_string(),
            phone: "+260972000000".to_string(),
            rating: Some(4.8),
            eta_min: None,
        }
    }

    fn ttl() -> Duration {
        Duration::seconds(45)
    }

    fn searching(now: DateTime<Utc>) -> Booking {
        let mut booking = Booking::create(request(), now).unwrap();
        booking.start_searching(now).unwrap();
        booking
    }

    fn offered(courier: &str, now: DateTime<Utc>) -> Booking {
        let mut booking = searching(now);
        booking.offer_to_candidate(courier, ttl(), now).unwrap();
        booking
    }

    /// Drives a fresh booking into the given status through legal calls.
    fn booking_in(status: BookingStatus, now: DateTime<Utc>) -> Booking {
        let mut booking = Booking::create(request(), now).unwrap();
        match status {
            BookingStatus::Created => return booking,
            BookingStatus::Cancelled => {
                booking.cancel("customer_request", now).unwrap();
                return booking;
            }
            _ => {}
        }

        booking.start_searching(now).unwrap();
        match status {
            BookingStatus::Searching => return booking,
            BookingStatus::Unmatched => {
                booking.mark_unmatched(now).unwrap();
                return booking;
            }
            _ => {}
        }

        booking.offer_to_candidate("c1", ttl(), now).unwrap();
        if status == BookingStatus::Offered {
            return booking;
        }

        booking.accept_by_courier("c1", rider("c1"), now).unwrap();
        while booking.status() != status {
            match booking.status().next_progress() {
                Some(next) => booking.advance_progress(next, now).unwrap(),
                None => {
                    booking.complete(now).unwrap();
                }
            }
        }
        booking
    }

    #[test]
    fn create_starts_in_created_and_editable() {
        let booking = Booking::create(request(), Utc::now()).unwrap();
        assert_eq!(booking.status(), BookingStatus::Created);
        assert!(booking.can_user_edit());
        assert!(booking.rider().is_none());
        assert!(booking.booking_id().as_str().starts_with("bkg_"));
    }

    #[test]
    fn create_rejects_invalid_route() {
        let mut bad = request();
        bad.dropoffs.clear();
        assert!(matches!(
            Booking::create(bad, Utc::now()),
            Err(BookingError::Validation(_))
        ));

        let mut bad = request();
        bad.pickup.geo = None;
        assert!(Booking::create(bad, Utc::now()).is_err());
    }

    #[test]
    fn happy_path_reaches_delivered_with_frozen_wait_times() {
        let t0 = Utc::now();
        let mut booking = offered("c1", t0);
        assert!(!booking.can_user_edit());

        booking
            .accept_by_courier("c1", rider("c1"), t0 + Duration::seconds(5))
            .unwrap();
        assert_eq!(booking.status(), BookingStatus::Accepted);
        assert!(booking.offer().is_none());

        let stages = [
            (BookingStatus::EnRoute, 30),
            (BookingStatus::ArrivedPickup, 300),
            (BookingStatus::PickedUp, 420),
            (BookingStatus::EnRouteDropoff, 450),
            (BookingStatus::Delivered, 900),
        ];
        for (stage, at) in stages {
            booking
                .advance_progress(stage, t0 + Duration::seconds(at))
                .unwrap();
        }

        assert_eq!(booking.status(), BookingStatus::Delivered);
        assert_eq!(booking.rider().unwrap().user_id, "c1");
        assert!(booking.can_complete());

        let at_delivery = booking.wait_times(t0 + Duration::seconds(900));
        let much_later = booking.wait_times(t0 + Duration::hours(3));
        assert_eq!(at_delivery.pickup_sec, 415);
        assert_eq!(at_delivery.dropoff_sec, 480);
        assert_eq!(at_delivery, much_later);
    }

    #[test]
    fn decline_then_match_with_next_candidate() {
        let now = Utc::now();
        let mut booking = offered("c1", now);

        booking.decline_by_courier("c1", now).unwrap();
        assert_eq!(booking.status(), BookingStatus::Searching);
        assert!(booking.offer().is_none());
        assert_eq!(booking.offered_to(), ["c1".to_string()]);

        assert_eq!(
            booking.offer_to_candidate("c1", ttl(), now),
            Err(BookingError::DuplicateCandidate("c1".to_string()))
        );

        booking.offer_to_candidate("c2", ttl(), now).unwrap();
        booking.accept_by_courier("c2", rider("c2"), now).unwrap();
        assert_eq!(booking.status(), BookingStatus::Accepted);
        assert_eq!(booking.offered_to(), ["c1".to_string(), "c2".to_string()]);
    }

    #[test]
    fn accept_after_expiry_is_rejected() {
        let now = Utc::now();
        let mut booking = offered("c1", now);

        let err = booking
            .accept_by_courier("c1", rider("c1"), now + Duration::seconds(45))
            .unwrap_err();
        assert!(matches!(
            err,
            BookingError::OfferNotActive {
                reason: OfferInactive::Expired { .. },
                ..
            }
        ));
        assert_eq!(booking.status(), BookingStatus::Offered);
    }

    #[test]
    fn accept_by_wrong_courier_names_current_holder() {
        let now = Utc::now();
        let mut booking = offered("c1", now);

        let err = booking
            .accept_by_courier("c9", rider("c9"), now)
            .unwrap_err();
        assert_eq!(
            err,
            BookingError::OfferNotActive {
                status: BookingStatus::Offered,
                reason: OfferInactive::NotCurrentCandidate {
                    responder: "c9".to_string(),
                    current: Some("c1".to_string()),
                },
            }
        );
        assert!(booking.decline_by_courier("c9", now).is_err());
        assert_eq!(booking.current_candidate(), Some("c1"));
    }

    #[test]
    fn responses_after_offer_resolved_are_not_active() {
        let now = Utc::now();
        let deadline = now + ttl();
        let mut booking = offered("c1", now);
        booking.expire_offer(deadline).unwrap();

        let late = OfferInactive::NotCurrentCandidate {
            responder: "c1".to_string(),
            current: None,
        };
        assert_eq!(
            booking
                .accept_by_courier("c1", rider("c1"), deadline)
                .unwrap_err(),
            BookingError::OfferNotActive {
                status: BookingStatus::Searching,
                reason: late.clone(),
            }
        );
        assert_eq!(
            booking.decline_by_courier("c1", deadline).unwrap_err(),
            BookingError::OfferNotActive {
                status: BookingStatus::Searching,
                reason: late.clone(),
            }
        );

        booking.offer_to_candidate("c2", ttl(), deadline).unwrap();
        booking
            .accept_by_courier("c2", rider("c2"), deadline)
            .unwrap();
        assert_eq!(
            booking
                .accept_by_courier("c1", rider("c1"), deadline)
                .unwrap_err(),
            BookingError::OfferNotActive {
                status: BookingStatus::Accepted,
                reason: late,
            }
        );
        assert_eq!(booking.rider().unwrap().user_id, "c2");
    }

    #[test]
    fn expire_requires_deadline_and_is_not_repeatable() {
        let now = Utc::now();
        let mut booking = offered("c1", now);

        assert!(matches!(
            booking.expire_offer(now + Duration::seconds(10)),
            Err(BookingError::OfferNotActive {
                reason: OfferInactive::NotYetExpired { .. },
                ..
            })
        ));

        let deadline = now + ttl();
        assert_eq!(booking.expire_offer(deadline).unwrap(), "c1");
        assert_eq!(booking.status(), BookingStatus::Searching);

        let before = booking.clone();
        let err = booking.expire_offer(deadline).unwrap_err();
        assert_eq!(
            err,
            BookingError::StateConflict {
                current: BookingStatus::Searching,
                attempted: Operation::Expire,
            }
        );
        assert_eq!(booking.status(), before.status());
        assert_eq!(booking.offered_to(), before.offered_to());
        assert_eq!(booking.updated_at(), before.updated_at());
    }

    #[test]
    fn cancel_mid_offer_blocks_later_accept() {
        let now = Utc::now();
        let mut booking = offered("c1", now);

        booking.cancel("customer_request", now).unwrap();
        assert_eq!(booking.status(), BookingStatus::Cancelled);
        assert_eq!(booking.cancellation().unwrap().reason, "customer_request");
        assert!(booking.offer().is_none());

        let err = booking
            .accept_by_courier("c1", rider("c1"), now)
            .unwrap_err();
        assert_eq!(
            err,
            BookingError::StateConflict {
                current: BookingStatus::Cancelled,
                attempted: Operation::Accept,
            }
        );
        assert!(booking.cancel("again", now).is_err());
    }

    #[test]
    fn cancel_freezes_running_pickup_timer() {
        let t0 = Utc::now();
        let mut booking = offered("c1", t0);
        booking.accept_by_courier("c1", rider("c1"), t0).unwrap();

        booking
            .cancel("customer_request", t0 + Duration::seconds(60))
            .unwrap();
        assert_eq!(booking.wait_times(t0 + Duration::hours(1)).pickup_sec, 60);
        assert_eq!(booking.wait_times(t0 + Duration::hours(1)).dropoff_sec, 0);
    }

    #[test]
    fn pickup_wait_is_monotonic_while_running() {
        let t0 = Utc::now();
        let mut booking = offered("c1", t0);
        booking.accept_by_courier("c1", rider("c1"), t0).unwrap();
        booking.advance_progress(BookingStatus::EnRoute, t0).unwrap();

        let mut previous = 0;
        for step in 1..20 {
            let observed = booking
                .wait_times(t0 + Duration::seconds(step * 7))
                .pickup_sec;
            assert!(observed >= previous);
            previous = observed;
        }
    }

    #[test]
    fn progress_cannot_skip_stages() {
        let now = Utc::now();
        let mut booking = offered("c1", now);
        booking.accept_by_courier("c1", rider("c1"), now).unwrap();

        let err = booking
            .advance_progress(BookingStatus::PickedUp, now)
            .unwrap_err();
        assert_eq!(
            err,
            BookingError::InvalidTransition {
                from: BookingStatus::Accepted,
                to: BookingStatus::PickedUp,
            }
        );

        let mut searching = searching(now);
        assert!(matches!(
            searching.advance_progress(BookingStatus::EnRoute, now),
            Err(BookingError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn edit_allowed_only_before_offer() {
        let now = Utc::now();
        for status in ALL_STATUSES {
            let mut booking = booking_in(status, now);
            assert_eq!(booking.status(), status);

            let patch = BookingPatch {
                dropoffs: Some(vec![stop(1, -15.50, 28.40), stop(2, -15.52, 28.41)]),
                ..BookingPatch::default()
            };
            let result = booking.edit_details(patch, now);

            if matches!(status, BookingStatus::Created | BookingStatus::Searching) {
                assert!(result.is_ok(), "edit should succeed in {status}");
                assert_eq!(booking.dropoffs().len(), 2);
            } else {
                assert_eq!(
                    result,
                    Err(BookingError::StateConflict {
                        current: status,
                        attempted: Operation::Edit,
                    }),
                    "edit should fail in {status}"
                );
            }
        }
    }

    #[test]
    fn edit_revalidates_route() {
        let now = Utc::now();
        let mut booking = searching(now);
        let patch = BookingPatch {
            dropoffs: Some(vec![stop(3, -15.50, 28.40)]),
            ..BookingPatch::default()
        };
        assert!(matches!(
            booking.edit_details(patch, now),
            Err(BookingError::Validation(_))
        ));
    }

    #[test]
    fn terminal_states_admit_nothing() {
        let now = Utc::now();
        for status in [BookingStatus::Cancelled, BookingStatus::Unmatched] {
            let mut booking = booking_in(status, now);
            assert!(booking.start_searching(now).is_err());
            assert!(booking.offer_to_candidate("c7", ttl(), now).is_err());
            assert!(booking.mark_unmatched(now).is_err());
            assert!(booking.cancel("late", now).is_err());
            assert!(booking.expire_offer(now).is_err());
            assert_eq!(booking.status(), status);
        }
    }

    #[test]
    fn complete_requires_delivered() {
        let now = Utc::now();
        let mut booking = booking_in(BookingStatus::PickedUp, now);
        assert!(booking.complete(now).is_err());

        let mut booking = booking_in(BookingStatus::Delivered, now);
        booking.complete(now).unwrap();
        assert_eq!(booking.status(), BookingStatus::Completed);
    }

    fn assert_invariants(booking: &Booking) {
        let status = booking.status();
        if status.is_matched() {
            assert!(booking.rider().is_some(), "{status} without rider");
        } else if status != BookingStatus::Cancelled {
            assert!(booking.rider().is_none(), "{status} with rider");
        }

        let mut seen = booking.offered_to().to_vec();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), booking.offered_to().len(), "duplicate offer");

        match booking.offer() {
            Some(offer) => {
                assert_eq!(status, BookingStatus::Offered);
                assert_eq!(booking.offered_to().last(), Some(&offer.courier_id));
            }
            None => assert_ne!(status, BookingStatus::Offered),
        }

        assert_eq!(
            booking.can_user_edit(),
            matches!(status, BookingStatus::Created | BookingStatus::Searching)
        );
    }

    #[test]
    fn random_operation_sequences_preserve_invariants() {
        let couriers = ["c1", "c2", "c3", "c4", "c5"];
        let mut rng = StdRng::seed_from_u64(0x5eed);

        for _ in 0..300 {
            let mut now = Utc::now();
            let mut booking = Booking::create(request(), now).unwrap();
            let mut declined: Vec<String> = Vec::new();
            let mut last_pickup_wait = 0;

            for _ in 0..40 {
                now += Duration::seconds(rng.gen_range(0..30));
                let courier = couriers[rng.gen_range(0..couriers.len())];
                let before = booking.clone();

                let result = match rng.gen_range(0..10) {
                    0 => booking.start_searching(now),
                    1 | 2 => booking.offer_to_candidate(courier, ttl(), now),
                    3 => booking.accept_by_courier(courier, rider(courier), now),
                    4 => {
                        let outcome = booking.decline_by_courier(courier, now);
                        if outcome.is_ok() {
                            declined.push(courier.to_string());
                        }
                        outcome
                    }
                    5 => booking.expire_offer(now).map(|_| ()),
                    6 => booking.mark_unmatched(now),
                    7 => {
                        let next = booking.status().next_progress();
                        booking.advance_progress(next.unwrap_or(BookingStatus::EnRoute), now)
                    }
                    8 => booking.edit_details(BookingPatch::default(), now),
                    _ => {
                        if rng.gen_range(0..8) == 0 {
                            booking.cancel("customer_request", now)
                        } else {
                            booking.complete(now)
                        }
                    }
                };

                if result.is_err() {
                    assert_eq!(booking.status(), before.status());
                    assert_eq!(booking.offered_to(), before.offered_to());
                    assert_eq!(booking.updated_at(), before.updated_at());
                }

                if let Some(offer) = booking.offer() {
                    assert!(!declined.contains(&offer.courier_id));
                }

                let pickup_wait = booking.wait_times(now).pickup_sec;
                assert!(pickup_wait >= last_pickup_wait);
                last_pickup_wait = pickup_wait;

                assert_invariants(&booking);
            }
        }
    }
}
