#[cfg(feature = "metrics")]
use prometheus::{Encoder, IntGauge, Registry, TextEncoder};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetricsError {
    #[cfg(feature = "metrics")]
    #[error("Prometheus error: {0}")]
    PrometheusError(#[from] prometheus::Error),
    #[error("Encoding error: {0}")]
    Encoding(String),
}

/// Counters for everything that can happen to an event after `enqueue`.
///
/// Every enqueued event ends up in exactly one of `delivered`,
/// `dropped_overflow`, `dropped_exhausted`, `rejected`, `dropped_shutdown`,
/// or is still queued or in flight.
#[derive(Debug, Default)]
pub struct ForwarderMetrics {
    enqueued: AtomicU64,
    written_locally: AtomicU64,
    dropped_overflow: AtomicU64,
    dropped_exhausted: AtomicU64,
    dropped_shutdown: AtomicU64,
    rejected: AtomicU64,
    delivered: AtomicU64,
    batches_sealed: AtomicU64,
    batches_delivered: AtomicU64,
    batches_exhausted: AtomicU64,
    dispatch_attempts: AtomicU64,
    retries: AtomicU64,
    in_flight_events: AtomicUsize,
    in_flight_batches: AtomicUsize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub enqueued: u64,
    pub written_locally: u64,
    pub dropped_overflow: u64,
    pub dropped_exhausted: u64,
    pub dropped_shutdown: u64,
    pub rejected: u64,
    pub delivered: u64,
    pub batches_sealed: u64,
    pub batches_delivered: u64,
    pub batches_exhausted: u64,
    pub dispatch_attempts: u64,
    pub retries: u64,
    pub in_flight_events: usize,
    pub in_flight_batches: usize,
}

impl MetricsSnapshot {
    pub fn dropped_total(&self) -> u64 {
        self.dropped_overflow + self.dropped_exhausted + self.dropped_shutdown + self.rejected
    }
}

impl ForwarderMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_written_locally(&self) {
        self.written_locally.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the overflow total including this call.
    pub fn record_overflow(&self, dropped: u64) -> u64 {
        self.dropped_overflow.fetch_add(dropped, Ordering::Relaxed) + dropped
    }

    pub fn record_sealed(&self) {
        self.batches_sealed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_attempt(&self) {
        self.dispatch_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self, events: usize) {
        self.delivered.fetch_add(events as u64, Ordering::Relaxed);
    }

    pub fn record_batch_delivered(&self) {
        self.batches_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_exhausted(&self, events: usize) {
        self.dropped_exhausted.fetch_add(events as u64, Ordering::Relaxed);
        self.batches_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self, events: usize) {
        self.rejected.fetch_add(events as u64, Ordering::Relaxed);
    }

    pub fn record_shutdown_drop(&self, events: usize) {
        self.dropped_shutdown.fetch_add(events as u64, Ordering::Relaxed);
    }

    pub fn begin_dispatch(&self, events: usize) {
        self.in_flight_batches.fetch_add(1, Ordering::Relaxed);
        self.in_flight_events.fetch_add(events, Ordering::Relaxed);
    }

    pub fn end_dispatch(&self, events: usize) {
        self.in_flight_batches.fetch_sub(1, Ordering::Relaxed);
        self.in_flight_events.fetch_sub(events, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            written_locally: self.written_locally.load(Ordering::Relaxed),
            dropped_overflow: self.dropped_overflow.load(Ordering::Relaxed),
            dropped_exhausted: self.dropped_exhausted.load(Ordering::Relaxed),
            dropped_shutdown: self.dropped_shutdown.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            batches_sealed: self.batches_sealed.load(Ordering::Relaxed),
            batches_delivered: self.batches_delivered.load(Ordering::Relaxed),
            batches_exhausted: self.batches_exhausted.load(Ordering::Relaxed),
            dispatch_attempts: self.dispatch_attempts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            in_flight_events: self.in_flight_events.load(Ordering::Relaxed),
            in_flight_batches: self.in_flight_batches.load(Ordering::Relaxed),
        }
    }
}

/// Renders a snapshot in the Prometheus text exposition format.
#[cfg(feature = "metrics")]
pub struct PrometheusExporter {
    registry: Registry,
    gauges: Vec<(&'static str, IntGauge)>,
}

#[cfg(feature = "metrics")]
impl PrometheusExporter {
    const SERIES: [(&'static str, &'static str); 14] = [
        ("elk_forwarder_events_enqueued", "Events accepted by enqueue"),
        ("elk_forwarder_events_written_locally", "Events written to the local sink"),
        ("elk_forwarder_events_dropped_overflow", "Events dropped by the overflow policy"),
        ("elk_forwarder_events_dropped_exhausted", "Events dropped after exhausting retries"),
        ("elk_forwarder_events_dropped_shutdown", "Events dropped at shutdown"),
        ("elk_forwarder_events_rejected", "Events rejected by the destination"),
        ("elk_forwarder_events_delivered", "Events acknowledged by the destination"),
        ("elk_forwarder_batches_sealed", "Batches sealed by the dispatch loop"),
        ("elk_forwarder_batches_delivered", "Batches fully delivered"),
        ("elk_forwarder_batches_exhausted", "Batches dropped after exhausting retries"),
        ("elk_forwarder_dispatch_attempts", "Bulk requests sent"),
        ("elk_forwarder_retries", "Bulk requests that were retries"),
        ("elk_forwarder_in_flight_events", "Events currently being dispatched"),
        ("elk_forwarder_in_flight_batches", "Batches currently being dispatched"),
    ];

    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();
        let mut gauges = Vec::with_capacity(Self::SERIES.len());
        for (name, help) in Self::SERIES {
            let gauge = IntGauge::new(name, help)?;
            registry.register(Box::new(gauge.clone()))?;
            gauges.push((name, gauge));
        }
        Ok(Self { registry, gauges })
    }

    pub fn render(&self, snapshot: &MetricsSnapshot) -> Result<String, MetricsError> {
        let values = [
            snapshot.enqueued as i64,
            snapshot.written_locally as i64,
            snapshot.dropped_overflow as i64,
            snapshot.dropped_exhausted as i64,
            snapshot.dropped_shutdown as i64,
            snapshot.rejected as i64,
            snapshot.delivered as i64,
            snapshot.batches_sealed as i64,
            snapshot.batches_delivered as i64,
            snapshot.batches_exhausted as i64,
            snapshot.dispatch_attempts as i64,
            snapshot.retries as i64,
            snapshot.in_flight_events as i64,
            snapshot.in_flight_batches as i64,
        ];
        for ((_, gauge), value) in self.gauges.iter().zip(values) {
            gauge.set(value);
        }

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| MetricsError::Encoding(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_flight_accounting() {
        let metrics = ForwarderMetrics::new();
        metrics.begin_dispatch(5);
        metrics.begin_dispatch(2);
        metrics.end_dispatch(5);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.in_flight_batches, 1);
        assert_eq!(snapshot.in_flight_events, 2);
    }

    #[test]
    fn test_dropped_total() {
        let metrics = ForwarderMetrics::new();
        metrics.record_overflow(1);
        metrics.record_exhausted(3);
        metrics.record_rejected(2);
        metrics.record_shutdown_drop(4);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.dropped_total(), 10);
        assert_eq!(snapshot.batches_exhausted, 1);
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn test_prometheus_render() {
        let metrics = ForwarderMetrics::new();
        metrics.record_enqueued();
        metrics.record_delivered(1);

        let exporter = PrometheusExporter::new().unwrap();
        let text = exporter.render(&metrics.snapshot()).unwrap();
        assert!(text.contains("elk_forwarder_events_enqueued 1"));
        assert!(text.contains("elk_forwarder_events_delivered 1"));
        assert!(text.contains("# HELP elk_forwarder_retries"));
    }
}
