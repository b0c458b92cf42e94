use crate::error::AppError;
use crate::models::booking::BookingId;
use crate::state::AppState;

/// Hands a stored booking to the dispatch engine. The gauge is raised before
/// the send so the engine's decrement can never run ahead of it.
pub async fn enqueue_booking(state: &AppState, booking_id: BookingId) -> Result<(), AppError> {
    state.metrics.bookings_in_queue.inc();

    if let Err(err) = state.booking_tx.send(booking_id).await {
        state.metrics.bookings_in_queue.dec();
        return Err(AppError::Internal(format!("booking queue send failed: {err}")));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::enqueue_booking;
    use crate::engine::dispatch::DispatchSettings;
    use crate::models::booking::BookingId;
    use crate::state::AppState;

    #[tokio::test]
    async fn gauge_counts_queued_bookings() {
        let (state, mut rx) = AppState::new(DispatchSettings::default(), 4, 4);

        enqueue_booking(&state, BookingId::from("bkg_1")).await.unwrap();
        assert_eq!(state.metrics.bookings_in_queue.get(), 1);
        assert_eq!(rx.recv().await.unwrap().as_str(), "bkg_1");
    }

    #[tokio::test]
    async fn failed_send_leaves_gauge_unchanged() {
        let (state, rx) = AppState::new(DispatchSettings::default(), 4, 4);
        drop(rx);

        assert!(enqueue_booking(&state, BookingId::from("bkg_1")).await.is_err());
        assert_eq!(state.metrics.bookings_in_queue.get(), 0);
    }
}
