//! Health reporting for the NATS event bus.

use dgm_core::metrics::MetricsSnapshot;
use serde::Serialize;

/// Health status of the bus connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum HealthStatus {
    /// Healthy and connected.
    Healthy,
    /// Connected but degraded (publish or handler failures recorded).
    Degraded(String),
    /// Not connected.
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    /// Healthy or degraded: the bus still moves messages.
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded(_))
    }
}

/// Broker identity, mirrored into the health report for monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct ServerInfoReport {
    pub server_id: String,
    pub version: String,
    pub max_payload: usize,
}

/// Full health report consumed by the external monitoring collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub connected: bool,
    pub jetstream_enabled: bool,
    pub server_info: Option<ServerInfoReport>,
    /// Active subscription count.
    pub subscriptions: u64,
    pub metrics: HealthMetrics,
    /// Round-trip time of a broker ping; absent when disconnected.
    pub rtt_ms: Option<f64>,
}

/// Counter subset exposed on the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct HealthMetrics {
    pub messages_published: u64,
    pub messages_received: u64,
    pub connection_errors: u64,
    pub reconnections: u64,
    pub last_connected: Option<i64>,
}

impl HealthReport {
    pub fn from_parts(
        connected: bool,
        jetstream_enabled: bool,
        server_info: Option<ServerInfoReport>,
        subscriptions: u64,
        snapshot: MetricsSnapshot,
        rtt_ms: Option<f64>,
    ) -> Self {
        let status = if !connected {
            HealthStatus::Unhealthy("Not connected to NATS".to_string())
        } else if snapshot.events_failed > 0 || snapshot.handler_errors > 0 {
            HealthStatus::Degraded(format!(
                "{} publish failures, {} handler errors recorded",
                snapshot.events_failed, snapshot.handler_errors
            ))
        } else {
            HealthStatus::Healthy
        };

        Self {
            status,
            connected,
            jetstream_enabled,
            server_info,
            subscriptions,
            metrics: HealthMetrics {
                messages_published: snapshot.events_published,
                messages_received: snapshot.messages_received,
                connection_errors: snapshot.connection_errors,
                reconnections: snapshot.reconnections,
                last_connected: snapshot.last_connected,
            },
            rtt_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dgm_core::metrics::BusMetrics;
    use dgm_core::{EventPriority, EventType};

    #[test]
    fn test_disconnected_is_unhealthy() {
        let report = HealthReport::from_parts(
            false,
            false,
            None,
            0,
            BusMetrics::new().snapshot(),
            None,
        );
        assert!(!report.status.is_healthy());
        assert!(!report.status.is_operational());
        assert!(report.rtt_ms.is_none());
    }

    #[test]
    fn test_publish_failures_degrade() {
        let metrics = BusMetrics::new();
        metrics.record_publish(EventType::ImprovementProposed, EventPriority::High);
        metrics.record_publish_failure(EventType::ImprovementProposed);

        let report =
            HealthReport::from_parts(true, true, None, 2, metrics.snapshot(), Some(0.4));
        assert_eq!(
            report.status,
            HealthStatus::Degraded("1 publish failures, 0 handler errors recorded".to_string())
        );
        assert!(report.status.is_operational());
        assert_eq!(report.metrics.messages_published, 1);
    }
}
