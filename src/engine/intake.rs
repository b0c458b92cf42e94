use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::models::booking::BookingId;
use crate::state::AppState;

/// Pulls newly created bookings off the intake queue and hands each one to
/// its own dispatch task.
pub async fn run_dispatch_engine(state: Arc<AppState>, mut booking_rx: mpsc::Receiver<BookingId>) {
    info!("dispatch engine started");

    while let Some(booking_id) = booking_rx.recv().await {
        state.metrics.bookings_in_queue.dec();

        if state.dispatcher.spawn(booking_id.clone()).is_none() {
            debug!(booking_id = %booking_id, "booking already has a dispatch task");
        }
    }

    warn!("dispatch engine stopped: queue channel closed");
}
