use std::future::Future;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::error::{BookingError, DispatchError, StoreError};
use crate::models::booking::{Booking, BookingId};
use crate::models::status::BookingStatus;

#[derive(Debug, Clone)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

/// Durable keyed storage for bookings with optimistic versioning. A write
/// only lands when the caller's expected version is still current.
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Stores a new booking at version 1.
    async fn insert(&self, booking: Booking) -> Result<u64, StoreError>;

    async fn load(&self, id: &BookingId) -> Result<Option<Versioned<Booking>>, StoreError>;

    /// Replaces the booking if its stored version equals `expected_version`
    /// and returns the new version.
    async fn compare_and_swap(
        &self,
        booking: Booking,
        expected_version: u64,
    ) -> Result<u64, StoreError>;

    async fn find_by_status(&self, statuses: &[BookingStatus])
        -> Result<Vec<Booking>, StoreError>;
}

#[derive(Default)]
pub struct InMemoryBookingStore {
    records: DashMap<BookingId, Versioned<Booking>>,
}

impl InMemoryBookingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl BookingStore for InMemoryBookingStore {
    async fn insert(&self, booking: Booking) -> Result<u64, StoreError> {
        match self.records.entry(booking.booking_id().clone()) {
            Entry::Occupied(entry) => Err(StoreError::AlreadyExists(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(Versioned {
                    version: 1,
                    value: booking,
                });
                Ok(1)
            }
        }
    }

    async fn load(&self, id: &BookingId) -> Result<Option<Versioned<Booking>>, StoreError> {
        Ok(self.records.get(id).map(|entry| entry.value().clone()))
    }

    async fn compare_and_swap(
        &self,
        booking: Booking,
        expected_version: u64,
    ) -> Result<u64, StoreError> {
        let id = booking.booking_id().clone();
        let mut record = self
            .records
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;

        if record.version != expected_version {
            return Err(StoreError::VersionConflict {
                id,
                expected: expected_version,
                actual: record.version,
            });
        }

        record.version += 1;
        record.value = booking;
        Ok(record.version)
    }

    async fn find_by_status(
        &self,
        statuses: &[BookingStatus],
    ) -> Result<Vec<Booking>, StoreError> {
        Ok(self
            .records
            .iter()
            .filter(|entry| statuses.contains(&entry.value().value.status()))
            .map(|entry| entry.value().value.clone())
            .collect())
    }
}

/// Runs a store call, repeating it once if the store reports itself
/// unavailable.
pub async fn retry_once<T, F, Fut>(operation: &'static str, mut call: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    match call().await {
        Err(StoreError::Unavailable(reason)) => {
            warn!(operation, reason = %reason, "booking store unavailable; retrying once");
            call().await
        }
        other => other,
    }
}

pub async fn load_booking(
    store: &dyn BookingStore,
    id: &BookingId,
) -> Result<Versioned<Booking>, DispatchError> {
    retry_once("load", || store.load(id))
        .await?
        .ok_or_else(|| DispatchError::NotFound(id.clone()))
}

/// Read-apply-conditional-write cycle for one booking. Version conflicts
/// re-run the whole cycle against the fresh record, up to `max_conflicts`
/// times; a failing `apply` aborts without writing.
pub async fn update_booking<T, F>(
    store: &dyn BookingStore,
    id: &BookingId,
    max_conflicts: u32,
    mut apply: F,
) -> Result<(Booking, T), DispatchError>
where
    F: FnMut(&mut Booking) -> Result<T, BookingError> + Send,
    T: Send,
{
    let mut conflicts = 0;

    loop {
        let Versioned { version, value } = load_booking(store, id).await?;
        let mut booking = value;
        let output = apply(&mut booking)?;

        let written = retry_once("compare_and_swap", || {
            store.compare_and_swap(booking.clone(), version)
        })
        .await;

        match written {
            Ok(_) => return Ok((booking, output)),
            Err(StoreError::VersionConflict { actual, .. }) if conflicts < max_conflicts => {
                conflicts += 1;
                debug!(
                    booking_id = %id,
                    expected = version,
                    actual,
                    "version conflict; re-applying on fresh state"
                );
            }
            Err(err) => return Err(err.into()),
        }
    }
}
