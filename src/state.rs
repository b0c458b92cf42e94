use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use crate::engine::dispatch::{DispatchSettings, Dispatcher};
use crate::engine::fleet::FleetCandidateSource;
use crate::engine::notifier::BroadcastNotifier;
use crate::engine::store::InMemoryBookingStore;
use crate::models::booking::BookingId;
use crate::observability::metrics::Metrics;

pub struct AppState {
    pub fleet: Arc<FleetCandidateSource>,
    pub bookings: Arc<InMemoryBookingStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub notifier: BroadcastNotifier,
    pub booking_tx: mpsc::Sender<BookingId>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(
        settings: DispatchSettings,
        booking_queue_size: usize,
        event_buffer_size: usize,
    ) -> (Self, mpsc::Receiver<BookingId>) {
        let (booking_tx, booking_rx) = mpsc::channel(booking_queue_size);
        let (events_tx, _unused_rx) = broadcast::channel(event_buffer_size);

        let fleet = Arc::new(FleetCandidateSource::new());
        let bookings = Arc::new(InMemoryBookingStore::new());
        let notifier = BroadcastNotifier::new(events_tx);
        let metrics = Metrics::new();

        let dispatcher = Arc::new(Dispatcher::new(
            bookings.clone(),
            fleet.clone(),
            fleet.clone(),
            Arc::new(notifier.clone()),
            settings,
            metrics.clone(),
        ));

        (
            Self {
                fleet,
                bookings,
                dispatcher,
                notifier,
                booking_tx,
                metrics,
            },
            booking_rx,
        )
    }
}
