use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::engine::dispatch::Dispatcher;

/// Periodically restarts dispatch for bookings left in `created`, `searching`
/// or `offered` without a live task, e.g. after a restart or a failed loop.
pub async fn run_offer_sweeper(dispatcher: Arc<Dispatcher>, every: Duration) {
    info!(interval_secs = every.as_secs(), "offer sweeper started");

    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        match dispatcher.resume_pending().await {
            Ok(0) => debug!("sweep found nothing to resume"),
            Ok(resumed) => info!(resumed, "sweep resumed stalled bookings"),
            Err(err) => error!(error = %err, "sweep failed"),
        }
    }
}
