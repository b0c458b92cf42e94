use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub bookings_total: IntCounterVec,
    pub dispatch_failures_total: IntCounter,
    pub offers_total: IntCounterVec,
    pub bookings_in_queue: IntGauge,
    pub active_dispatches: IntGauge,
    pub dispatch_duration_seconds: HistogramVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let bookings_total = IntCounterVec::new(
            Opts::new(
                "bookings_total",
                "Bookings whose dispatch reached a final outcome, counted once per booking",
            ),
            &["outcome"],
        )
        .expect("valid bookings_total metric");

        let dispatch_failures_total = IntCounter::new(
            "dispatch_failures_total",
            "Dispatch tasks that stopped on an error and await a sweeper resume",
        )
        .expect("valid dispatch_failures_total metric");

        let offers_total = IntCounterVec::new(
            Opts::new("offers_total", "Offers by resolution"),
            &["outcome"],
        )
        .expect("valid offers_total metric");

        let bookings_in_queue =
            IntGauge::new("bookings_in_queue", "Bookings waiting for a dispatch task")
                .expect("valid bookings_in_queue metric");

        let active_dispatches =
            IntGauge::new("active_dispatches", "Dispatch loops currently running")
                .expect("valid active_dispatches metric");

        let dispatch_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "dispatch_duration_seconds",
                "Time from dispatch start to match, unmatch or cancellation",
            )
            .buckets(vec![1.0, 5.0, 15.0, 45.0, 90.0, 180.0, 300.0, 600.0]),
            &["outcome"],
        )
        .expect("valid dispatch_duration_seconds metric");

        registry
            .register(Box::new(bookings_total.clone()))
            .expect("register bookings_total");
        registry
            .register(Box::new(dispatch_failures_total.clone()))
            .expect("register dispatch_failures_total");
        registry
            .register(Box::new(offers_total.clone()))
            .expect("register offers_total");
        registry
            .register(Box::new(bookings_in_queue.clone()))
            .expect("register bookings_in_queue");
        registry
            .register(Box::new(active_dispatches.clone()))
            .expect("register active_dispatches");
        registry
            .register(Box::new(dispatch_duration_seconds.clone()))
            .expect("register dispatch_duration_seconds");

        Self {
            registry,
            bookings_total,
            dispatch_failures_total,
            offers_total,
            bookings_in_queue,
            active_dispatches,
            dispatch_duration_seconds,
        }
    }

    pub fn record_offer(&self, outcome: &str) {
        self.offers_total.with_label_values(&[outcome]).inc();
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}
