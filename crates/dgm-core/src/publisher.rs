//! Event publisher: envelope assembly, bounded retry, publish metrics.

use crate::correlation::CorrelationId;
use crate::envelope::EventEnvelope;
use crate::error::Result;
use crate::events::{EventPriority, EventType};
use crate::metrics::MetricsSnapshot;
use crate::ports::EventBus;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy for transient broker errors during publish.
#[derive(Debug, Clone)]
pub struct PublishRetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Wait between attempts, doubled each retry.
    pub initial_backoff: Duration,
}

impl Default for PublishRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
        }
    }
}

/// Turns logical events into durably published messages.
///
/// Generic over the [`EventBus`] port so the same publisher logic runs
/// against the NATS transport and the in-memory test transport.
pub struct EventPublisher<B: EventBus> {
    bus: Arc<B>,
    source_service: String,
    retry: PublishRetryPolicy,
}

impl<B: EventBus> EventPublisher<B> {
    pub fn new(bus: Arc<B>, source_service: impl Into<String>) -> Self {
        Self {
            bus,
            source_service: source_service.into(),
            retry: PublishRetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: PublishRetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Publish one event.
    ///
    /// Builds the envelope (event id, timestamp, constitutional hash),
    /// resolves the subject from the type registry, and publishes with
    /// bounded retries. Returns `Ok(true)` on delivery, `Ok(false)` once the
    /// retry budget is exhausted; expected broker errors never surface as
    /// `Err`. `Err` is reserved for caller mistakes (invalid envelope,
    /// non-serializable payload in the typed wrappers).
    pub async fn publish(
        &self,
        event_type: EventType,
        data: serde_json::Value,
        priority: Option<EventPriority>,
        correlation_id: Option<CorrelationId>,
    ) -> Result<bool> {
        let mut envelope = EventEnvelope::new(event_type, self.source_service.clone(), data);
        if let Some(priority) = priority {
            envelope = envelope.with_priority(priority);
        }
        if let Some(correlation_id) = correlation_id {
            envelope = envelope.with_correlation_id(correlation_id);
        }
        self.publish_envelope(envelope).await
    }

    /// Publish a pre-built envelope. Used by services that thread a prior
    /// envelope through [`EventEnvelope::correlate`].
    pub async fn publish_envelope(&self, envelope: EventEnvelope) -> Result<bool> {
        envelope.validate()?;
        let subject = envelope.subject();

        let mut backoff = self.retry.initial_backoff;
        let mut last_error = None;
        for attempt in 1..=self.retry.max_attempts {
            match self.bus.publish_raw(&envelope).await {
                Ok(()) => {
                    self.bus
                        .metrics()
                        .record_publish(envelope.event_type, envelope.priority);
                    debug!(%subject, event_id = %envelope.event_id, attempt, "Event published");
                    return Ok(true);
                }
                Err(e) => {
                    debug!(%subject, attempt, error = %e, "Publish attempt failed");
                    last_error = Some(e);
                    if attempt < self.retry.max_attempts {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }

        self.bus.metrics().record_publish_failure(envelope.event_type);
        warn!(
            %subject,
            event_id = %envelope.event_id,
            attempts = self.retry.max_attempts,
            error = %last_error.map(|e| e.to_string()).unwrap_or_default(),
            "Publish retry budget exhausted, event dropped"
        );
        Ok(false)
    }

    /// Snapshot of publish/receive counters for dashboards.
    pub fn get_performance_metrics(&self) -> MetricsSnapshot {
        self.bus.metrics().snapshot()
    }

    // Convenience wrappers per event family. All funnel through `publish`;
    // payload fields are not validated beyond JSON serializability.

    pub async fn publish_improvement_proposed(
        &self,
        improvement_id: &str,
        strategy: &str,
        correlation_id: Option<CorrelationId>,
    ) -> Result<bool> {
        self.publish(
            EventType::ImprovementProposed,
            json!({ "improvement_id": improvement_id, "strategy": strategy }),
            None,
            correlation_id,
        )
        .await
    }

    pub async fn publish_improvement_executed(
        &self,
        improvement_id: &str,
        success: bool,
        correlation_id: Option<CorrelationId>,
    ) -> Result<bool> {
        self.publish(
            EventType::ImprovementExecuted,
            json!({ "improvement_id": improvement_id, "success": success }),
            None,
            correlation_id,
        )
        .await
    }

    pub async fn publish_performance_metrics<T: Serialize>(
        &self,
        metrics: &T,
        correlation_id: Option<CorrelationId>,
    ) -> Result<bool> {
        let data = serde_json::to_value(metrics)?;
        self.publish(
            EventType::PerformanceMetricsUpdated,
            json!({ "metrics": data }),
            None,
            correlation_id,
        )
        .await
    }

    pub async fn publish_constitutional_assessment(
        &self,
        improvement_id: &str,
        compliance_score: f64,
        approved: bool,
        correlation_id: Option<CorrelationId>,
    ) -> Result<bool> {
        self.publish(
            EventType::ConstitutionalAssessmentCompleted,
            json!({
                "improvement_id": improvement_id,
                "compliance_score": compliance_score,
                "approved": approved,
            }),
            None,
            correlation_id,
        )
        .await
    }

    pub async fn publish_bandit_arm_selected(
        &self,
        arm: &str,
        context: serde_json::Value,
        correlation_id: Option<CorrelationId>,
    ) -> Result<bool> {
        self.publish(
            EventType::BanditArmSelected,
            json!({ "arm": arm, "context": context }),
            None,
            correlation_id,
        )
        .await
    }
}
