use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::engine::candidates::{Candidate, CandidateQuery, CandidateSource, RiderDirectory};
use crate::engine::notifier::{DispatchEvent, NotificationSink};
use crate::engine::store::{load_booking, retry_once, update_booking, BookingStore};
use crate::error::{BookingError, DispatchError};
use crate::models::booking::{Booking, BookingId, BookingPatch, BookingRequest, BookingSnapshot};
use crate::models::status::BookingStatus;
use crate::models::wait_timer::WaitTimes;
use crate::observability::metrics::Metrics;

const SIGNAL_BUFFER: usize = 8;

/// Statuses whose bookings still need a dispatch loop.
const PENDING_STATUSES: [BookingStatus; 3] = [
    BookingStatus::Created,
    BookingStatus::Searching,
    BookingStatus::Offered,
];

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub search_radius_km: f64,
    pub offer_ttl: Duration,
    pub conflict_retries: u32,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            search_radius_km: 10.0,
            offer_ttl: Duration::seconds(45),
            conflict_retries: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accept,
    Decline,
}

/// Wake-ups delivered to a running dispatch loop. The loop always re-reads
/// the booking, so these carry no state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchSignal {
    Responded,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Accepted { courier_id: String },
    Unmatched,
    Cancelled,
}

impl DispatchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::Accepted { .. } => "accepted",
            DispatchOutcome::Unmatched => "unmatched",
            DispatchOutcome::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeReceipt {
    pub booking_id: BookingId,
    pub status: BookingStatus,
    pub estimated_search_sec: i64,
}

/// Drives bookings from `searching` to `accepted` or `unmatched`, one task
/// per booking, and applies every external command through the store.
pub struct Dispatcher {
    store: Arc<dyn BookingStore>,
    candidates: Arc<dyn CandidateSource>,
    riders: Arc<dyn RiderDirectory>,
    notifier: Arc<dyn NotificationSink>,
    settings: DispatchSettings,
    metrics: Metrics,
    running: DashMap<BookingId, mpsc::Sender<DispatchSignal>>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn BookingStore>,
        candidates: Arc<dyn CandidateSource>,
        riders: Arc<dyn RiderDirectory>,
        notifier: Arc<dyn NotificationSink>,
        settings: DispatchSettings,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            candidates,
            riders,
            notifier,
            settings,
            metrics,
            running: DashMap::new(),
        }
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn active_dispatches(&self) -> usize {
        self.running.len()
    }

    pub fn is_dispatching(&self, id: &BookingId) -> bool {
        self.running.contains_key(id)
    }

    pub async fn intake(&self, request: BookingRequest) -> Result<IntakeReceipt, DispatchError> {
        let now = Utc::now();
        let mut booking = Booking::create(request, now)?;
        booking.start_searching(now)?;

        let booking_id = booking.booking_id().clone();
        retry_once("insert", || self.store.insert(booking.clone())).await?;

        info!(
            booking_id = %booking_id,
            delivery_id = %booking.delivery_id(),
            "booking created"
        );

        Ok(IntakeReceipt {
            booking_id,
            status: booking.status(),
            estimated_search_sec: self.settings.offer_ttl.num_seconds(),
        })
    }

    pub async fn snapshot(&self, id: &BookingId) -> Result<BookingSnapshot, DispatchError> {
        let record = load_booking(self.store.as_ref(), id).await?;
        Ok(record.value.snapshot(Utc::now()))
    }

    pub async fn timers(&self, id: &BookingId) -> Result<WaitTimes, DispatchError> {
        let record = load_booking(self.store.as_ref(), id).await?;
        Ok(record.value.wait_times(Utc::now()))
    }

    pub async fn respond(
        self: &Arc<Self>,
        id: &BookingId,
        courier_id: &str,
        decision: Decision,
    ) -> Result<BookingSnapshot, DispatchError> {
        match decision {
            Decision::Accept => {
                let rider = self
                    .riders
                    .rider_info(courier_id)
                    .await?
                    .ok_or_else(|| DispatchError::UnknownCourier(courier_id.to_string()))?;

                let (booking, ()) = self
                    .update(id, |b| {
                        b.accept_by_courier(courier_id, rider.clone(), Utc::now())
                    })
                    .await?;

                self.metrics.record_offer("accepted");
                info!(booking_id = %id, courier_id, "offer accepted");
                self.notifier.publish(DispatchEvent::OfferAccepted {
                    booking_id: id.clone(),
                    rider,
                });
                self.signal(id, DispatchSignal::Responded);
                Ok(booking.snapshot(Utc::now()))
            }
            Decision::Decline => {
                let (booking, ()) = self
                    .update(id, |b| b.decline_by_courier(courier_id, Utc::now()))
                    .await?;

                self.metrics.record_offer("declined");
                info!(booking_id = %id, courier_id, "offer declined");
                self.notifier.publish(DispatchEvent::OfferDeclined {
                    booking_id: id.clone(),
                    courier_id: courier_id.to_string(),
                });
                self.wake_or_spawn(id);
                Ok(booking.snapshot(Utc::now()))
            }
        }
    }

    pub async fn advance_progress(
        &self,
        id: &BookingId,
        stage: BookingStatus,
    ) -> Result<BookingSnapshot, DispatchError> {
        let (booking, ()) = self
            .update(id, |b| b.advance_progress(stage, Utc::now()))
            .await?;

        info!(booking_id = %id, stage = %stage, "progress updated");
        self.notifier.publish(DispatchEvent::Progress {
            booking_id: id.clone(),
            status: booking.status(),
            timestamp: booking.updated_at(),
        });
        Ok(booking.snapshot(Utc::now()))
    }

    pub async fn edit(
        &self,
        id: &BookingId,
        patch: BookingPatch,
    ) -> Result<BookingSnapshot, DispatchError> {
        let (booking, ()) = self
            .update(id, |b| b.edit_details(patch.clone(), Utc::now()))
            .await?;

        info!(booking_id = %id, "booking edited");
        self.notifier.publish(DispatchEvent::Edited {
            booking_id: id.clone(),
        });
        Ok(booking.snapshot(Utc::now()))
    }

    pub async fn cancel(
        &self,
        id: &BookingId,
        reason: &str,
    ) -> Result<BookingSnapshot, DispatchError> {
        let (booking, ()) = self.update(id, |b| b.cancel(reason, Utc::now())).await?;

        info!(booking_id = %id, reason, "booking cancelled");
        self.notifier.publish(DispatchEvent::Cancelled {
            booking_id: id.clone(),
            reason: reason.to_string(),
        });
        self.signal(id, DispatchSignal::Cancelled);
        Ok(booking.snapshot(Utc::now()))
    }

    pub async fn complete(&self, id: &BookingId) -> Result<BookingSnapshot, DispatchError> {
        let (booking, ()) = self.update(id, |b| b.complete(Utc::now())).await?;

        let now = Utc::now();
        let wait_times = booking.wait_times(now);
        info!(
            booking_id = %id,
            pickup_wait_sec = wait_times.pickup_sec,
            dropoff_wait_sec = wait_times.dropoff_sec,
            "booking completed"
        );
        self.notifier.publish(DispatchEvent::Completed {
            booking_id: id.clone(),
            wait_times,
        });
        Ok(booking.snapshot(now))
    }

    /// Starts the dispatch loop for a booking unless one is already running.
    pub fn spawn(
        self: &Arc<Self>,
        id: BookingId,
    ) -> Option<JoinHandle<Result<DispatchOutcome, DispatchError>>> {
        let signals = match self.running.entry(id.clone()) {
            Entry::Occupied(_) => {
                debug!(booking_id = %id, "dispatch already running");
                return None;
            }
            Entry::Vacant(slot) => {
                let (tx, rx) = mpsc::channel(SIGNAL_BUFFER);
                slot.insert(tx);
                rx
            }
        };

        let dispatcher = Arc::clone(self);
        Some(tokio::spawn(async move { dispatcher.run(id, signals).await }))
    }

    /// Re-enters the loop for every booking still waiting on a match that
    /// has no live task. Stale offers expire on the first iteration.
    pub async fn resume_pending(self: &Arc<Self>) -> Result<usize, DispatchError> {
        let pending = retry_once("find_by_status", || {
            self.store.find_by_status(&PENDING_STATUSES)
        })
        .await?;

        let mut resumed = 0;
        for booking in pending {
            if self.spawn(booking.booking_id().clone()).is_some() {
                resumed += 1;
                info!(
                    booking_id = %booking.booking_id(),
                    status = %booking.status(),
                    "dispatch resumed"
                );
            }
        }
        Ok(resumed)
    }

    async fn run(
        &self,
        id: BookingId,
        signals: mpsc::Receiver<DispatchSignal>,
    ) -> Result<DispatchOutcome, DispatchError> {
        let started = Instant::now();
        self.metrics.active_dispatches.inc();

        let result = self.drive(&id, signals).await;

        // A failed task is resumed later, so only final outcomes count as bookings.
        let outcome = match &result {
            Ok(outcome) => {
                self.metrics
                    .bookings_total
                    .with_label_values(&[outcome.label()])
                    .inc();
                outcome.label()
            }
            Err(_) => {
                self.metrics.dispatch_failures_total.inc();
                "failed"
            }
        };
        self.metrics
            .dispatch_duration_seconds
            .with_label_values(&[outcome])
            .observe(started.elapsed().as_secs_f64());
        self.metrics.active_dispatches.dec();
        self.running.remove(&id);

        match &result {
            Ok(_) => info!(booking_id = %id, outcome, "dispatch finished"),
            Err(err) => error!(
                booking_id = %id,
                error = %err,
                "dispatch stopped; booking kept in its last stored state"
            ),
        }
        result
    }

    async fn drive(
        &self,
        id: &BookingId,
        mut signals: mpsc::Receiver<DispatchSignal>,
    ) -> Result<DispatchOutcome, DispatchError> {
        loop {
            let booking = load_booking(self.store.as_ref(), id).await?.value;

            match booking.status() {
                BookingStatus::Created => {
                    let started = self.update(id, |b| b.start_searching(Utc::now())).await;
                    self.settle(id, started)?;
                }
                BookingStatus::Searching => {
                    if let Some(outcome) = self.offer_next(id, &booking).await? {
                        return Ok(outcome);
                    }
                }
                BookingStatus::Offered => {
                    self.await_resolution(id, &booking, &mut signals).await?;
                }
                BookingStatus::Cancelled => return Ok(DispatchOutcome::Cancelled),
                BookingStatus::Unmatched => return Ok(DispatchOutcome::Unmatched),
                _ => {
                    let courier_id = booking
                        .rider()
                        .map(|rider| rider.user_id.clone())
                        .unwrap_or_default();
                    return Ok(DispatchOutcome::Accepted { courier_id });
                }
            }
        }
    }

    async fn offer_next(
        &self,
        id: &BookingId,
        booking: &Booking,
    ) -> Result<Option<DispatchOutcome>, DispatchError> {
        let candidates = self.query_candidates(booking).await?;
        let next = candidates
            .into_iter()
            .find(|candidate| !booking.has_been_offered(&candidate.courier_id));

        let Some(candidate) = next else {
            let unmatched = self.update(id, |b| b.mark_unmatched(Utc::now())).await;
            if self.settle(id, unmatched)?.is_none() {
                return Ok(None);
            }

            info!(
                booking_id = %id,
                offered = booking.offered_to().len(),
                "no candidates left; booking unmatched"
            );
            self.notifier.publish(DispatchEvent::Unmatched {
                booking_id: id.clone(),
            });
            return Ok(Some(DispatchOutcome::Unmatched));
        };

        let ttl = self.settings.offer_ttl;
        let offered = self
            .update(id, |b| {
                b.offer_to_candidate(&candidate.courier_id, ttl, Utc::now())
            })
            .await;

        if let Some((booking, ())) = self.settle(id, offered)? {
            if let Some(offer) = booking.offer() {
                self.metrics.record_offer("made");
                info!(
                    booking_id = %id,
                    courier_id = %offer.courier_id,
                    score = candidate.score,
                    "offer made"
                );
                self.notifier.publish(DispatchEvent::OfferMade {
                    booking_id: id.clone(),
                    courier_id: offer.courier_id.clone(),
                    expires_at: offer.expires_at,
                });
            }
        }
        Ok(None)
    }

    async fn await_resolution(
        &self,
        id: &BookingId,
        booking: &Booking,
        signals: &mut mpsc::Receiver<DispatchSignal>,
    ) -> Result<(), DispatchError> {
        let Some(offer) = booking.offer() else {
            return Err(DispatchError::Orchestration(format!(
                "booking {id} is offered without an active offer"
            )));
        };

        let remaining = (offer.expires_at - Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);

        tokio::select! {
            Some(signal) = signals.recv() => {
                debug!(booking_id = %id, ?signal, "dispatch woken");
            }
            _ = tokio::time::sleep(remaining) => {
                let expired = self.update(id, |b| b.expire_offer(Utc::now())).await;
                if let Some((_, courier_id)) = self.settle(id, expired)? {
                    self.metrics.record_offer("expired");
                    info!(booking_id = %id, courier_id = %courier_id, "offer expired");
                    self.notifier.publish(DispatchEvent::OfferExpired {
                        booking_id: id.clone(),
                        courier_id,
                    });
                }
            }
        }
        Ok(())
    }

    async fn query_candidates(&self, booking: &Booking) -> Result<Vec<Candidate>, DispatchError> {
        let query = CandidateQuery {
            pickup: booking.pickup().clone(),
            vehicle_type: booking.vehicle_type(),
            radius_km: self.settings.search_radius_km,
        };

        match self.candidates.find_candidates(&query).await {
            Ok(candidates) => Ok(candidates),
            Err(err) => {
                warn!(
                    booking_id = %booking.booking_id(),
                    error = %err,
                    "candidate query failed; retrying once"
                );
                Ok(self.candidates.find_candidates(&query).await?)
            }
        }
    }

    async fn update<T, F>(&self, id: &BookingId, apply: F) -> Result<(Booking, T), DispatchError>
    where
        F: FnMut(&mut Booking) -> Result<T, BookingError> + Send,
        T: Send,
    {
        update_booking(
            self.store.as_ref(),
            id,
            self.settings.conflict_retries,
            apply,
        )
        .await
    }

    /// Aggregate precondition failures inside the loop mean another writer
    /// got there first; the next iteration re-reads and reacts.
    fn settle<T>(
        &self,
        id: &BookingId,
        result: Result<T, DispatchError>,
    ) -> Result<Option<T>, DispatchError> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(DispatchError::Booking(BookingError::DuplicateCandidate(courier_id))) => {
                warn!(
                    booking_id = %id,
                    courier_id = %courier_id,
                    "candidate source returned an already-offered courier"
                );
                Ok(None)
            }
            Err(DispatchError::Booking(err)) => {
                debug!(booking_id = %id, error = %err, "lost race to another writer");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn signal(&self, id: &BookingId, signal: DispatchSignal) -> bool {
        let Some(tx) = self.running.get(id).map(|entry| entry.value().clone()) else {
            return false;
        };
        !matches!(
            tx.try_send(signal),
            Err(mpsc::error::TrySendError::Closed(_))
        )
    }

    fn wake_or_spawn(self: &Arc<Self>, id: &BookingId) {
        if !self.signal(id, DispatchSignal::Responded) {
            self.spawn(id.clone());
        }
    }
}
