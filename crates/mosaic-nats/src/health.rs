//! Health of the progress relay connection.

use crate::metrics::MetricsSnapshot;

/// Publish failure ratio above which the relay is reported degraded.
pub const DEGRADED_FAILURE_RATIO: f64 = 0.05;

#[derive(Debug, Clone, PartialEq)]
pub enum HealthStatus {
    Healthy,
    /// Connected, but losing events.
    Degraded { reason: String },
    Unhealthy { reason: String },
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    /// Healthy or degraded.
    pub fn is_operational(&self) -> bool {
        !matches!(self, HealthStatus::Unhealthy { .. })
    }
}

#[derive(Debug, Clone)]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub connected: bool,
    pub metrics: MetricsSnapshot,
}

impl HealthCheck {
    pub fn evaluate(metrics: MetricsSnapshot, connected: bool) -> Self {
        let ratio = metrics.failure_ratio();
        let status = if !connected {
            HealthStatus::Unhealthy {
                reason: "Not connected to NATS".to_string(),
            }
        } else if ratio > DEGRADED_FAILURE_RATIO {
            HealthStatus::Degraded {
                reason: format!(
                    "{} of {} progress publishes failed",
                    metrics.publish_failures,
                    metrics.publish_failures + metrics.events_published
                ),
            }
        } else {
            HealthStatus::Healthy
        };

        Self {
            status,
            connected,
            metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(published: u64, failures: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            events_published: published,
            publish_failures: failures,
            ..Default::default()
        }
    }

    #[test]
    fn test_occasional_failure_stays_healthy() {
        let check = HealthCheck::evaluate(snapshot(99, 1), true);
        assert!(check.status.is_healthy());
    }

    #[test]
    fn test_frequent_failures_degrade() {
        let check = HealthCheck::evaluate(snapshot(10, 5), true);
        assert!(matches!(check.status, HealthStatus::Degraded { .. }));
        assert!(check.status.is_operational());
    }

    #[test]
    fn test_disconnected_is_unhealthy() {
        let check = HealthCheck::evaluate(snapshot(0, 0), false);
        assert!(!check.status.is_operational());
    }
}
