//! Counters for the NATS progress relay.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct NatsMetrics {
    events_published: AtomicU64,
    publish_failures: AtomicU64,
    events_received: AtomicU64,
    /// Messages on a progress subject that did not decode as an event.
    decode_failures: AtomicU64,
    bytes_published: AtomicU64,
    connected: AtomicBool,
}

impl NatsMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_publish(&self, bytes: u64) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
        self.bytes_published.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_receive(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_published: self.events_published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            events_received: self.events_received.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            bytes_published: self.bytes_published.load(Ordering::Relaxed),
            connected: self.connected.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of the counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub events_published: u64,
    pub publish_failures: u64,
    pub events_received: u64,
    pub decode_failures: u64,
    pub bytes_published: u64,
    pub connected: bool,
}

impl MetricsSnapshot {
    /// Share of publish attempts that failed, in `[0, 1]`.
    pub fn failure_ratio(&self) -> f64 {
        let attempts = self.events_published + self.publish_failures;
        if attempts == 0 {
            0.0
        } else {
            self.publish_failures as f64 / attempts as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = NatsMetrics::new();
        metrics.record_publish(120);
        metrics.record_publish(80);
        metrics.record_publish_failure();
        metrics.record_receive();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.events_published, 2);
        assert_eq!(snapshot.bytes_published, 200);
        assert_eq!(snapshot.events_received, 1);
        assert!((snapshot.failure_ratio() - 1.0 / 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_failure_ratio_without_traffic() {
        assert_eq!(MetricsSnapshot::default().failure_ratio(), 0.0);
    }
}
