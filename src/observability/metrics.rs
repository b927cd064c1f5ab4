use std::time::Instant;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub assignments_total: IntCounterVec,
    pub accept_attempts_total: IntCounterVec,
    pub notification_failures_total: IntCounter,
    pub notifications_in_queue: IntGauge,
    pub active_tracking_sessions: IntGauge,
    pub eta_recomputes_total: IntCounterVec,
    pub assignment_latency_seconds: HistogramVec,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let assignments_total = IntCounterVec::new(
            Opts::new("assignments_total", "Assignment lifecycle events by kind"),
            &["event"],
        )
        .expect("valid assignments_total metric");

        let accept_attempts_total = IntCounterVec::new(
            Opts::new("accept_attempts_total", "Courier accept attempts by outcome"),
            &["outcome"],
        )
        .expect("valid accept_attempts_total metric");

        let notification_failures_total = IntCounter::new(
            "notification_failures_total",
            "Notifications that could not be enqueued",
        )
        .expect("valid notification_failures_total metric");

        let notifications_in_queue = IntGauge::new(
            "notifications_in_queue",
            "Current number of notifications awaiting hand-off",
        )
        .expect("valid notifications_in_queue metric");

        let active_tracking_sessions = IntGauge::new(
            "active_tracking_sessions",
            "Orders currently being tracked",
        )
        .expect("valid active_tracking_sessions metric");

        let eta_recomputes_total = IntCounterVec::new(
            Opts::new("eta_recomputes_total", "Route/ETA recomputations by trigger"),
            &["trigger"],
        )
        .expect("valid eta_recomputes_total metric");

        let assignment_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "assignment_latency_seconds",
                "Latency of assignment operations in seconds",
            ),
            &["operation"],
        )
        .expect("valid assignment_latency_seconds metric");

        registry
            .register(Box::new(assignments_total.clone()))
            .expect("register assignments_total");
        registry
            .register(Box::new(accept_attempts_total.clone()))
            .expect("register accept_attempts_total");
        registry
            .register(Box::new(notification_failures_total.clone()))
            .expect("register notification_failures_total");
        registry
            .register(Box::new(notifications_in_queue.clone()))
            .expect("register notifications_in_queue");
        registry
            .register(Box::new(active_tracking_sessions.clone()))
            .expect("register active_tracking_sessions");
        registry
            .register(Box::new(eta_recomputes_total.clone()))
            .expect("register eta_recomputes_total");
        registry
            .register(Box::new(assignment_latency_seconds.clone()))
            .expect("register assignment_latency_seconds");

        Self {
            registry,
            assignments_total,
            accept_attempts_total,
            notification_failures_total,
            notifications_in_queue,
            active_tracking_sessions,
            eta_recomputes_total,
            assignment_latency_seconds,
        }
    }

    pub fn observe_latency(&self, operation: &str, start: Instant) {
        self.assignment_latency_seconds
            .with_label_values(&[operation])
            .observe(start.elapsed().as_secs_f64());
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
