//! Port traits (hexagonal architecture).
//!
//! These traits define the seam between the messaging logic and a concrete
//! transport. `dgm-nats` provides the production implementation; the test
//! crate provides an in-memory double satisfying the same contract.

use crate::envelope::EventEnvelope;
use crate::error::Result;
use crate::metrics::BusMetrics;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error};

/// Async callback invoked once per delivered envelope. May fail; failures
/// are isolated at the dispatch boundary and never reach other messages.
pub type EventHandler = Arc<dyn Fn(EventEnvelope) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Wrap an async closure as an [`EventHandler`].
pub fn handler<F, Fut>(f: F) -> EventHandler
where
    F: Fn(EventEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |envelope| Box::pin(f(envelope)))
}

/// How a subscription binds to the subject space.
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Exact subject or wildcard pattern (`dgm.improvement.*`, `dgm.>`).
    pub subject_pattern: String,
    /// When set, matching messages are load-shared across the group:
    /// exactly one member receives each message.
    pub queue_group: Option<String>,
    /// When set, delivery goes through a durable stream consumer that
    /// survives subscriber restarts and redelivers on handler failure.
    pub durable_name: Option<String>,
}

impl SubscribeOptions {
    pub fn subject(pattern: impl Into<String>) -> Self {
        Self {
            subject_pattern: pattern.into(),
            ..Default::default()
        }
    }

    pub fn with_queue_group(mut self, group: impl Into<String>) -> Self {
        self.queue_group = Some(group.into());
        self
    }

    pub fn with_durable_name(mut self, name: impl Into<String>) -> Self {
        self.durable_name = Some(name.into());
        self
    }
}

/// A live subscription. Dropping the handle does not unsubscribe; call
/// [`Subscription::unsubscribe`] for an orderly teardown.
#[async_trait]
pub trait Subscription: Send + Sync {
    fn subject_pattern(&self) -> &str;

    fn queue_group(&self) -> Option<&str>;

    /// Stop delivery and release broker-side resources.
    async fn unsubscribe(self: Box<Self>) -> Result<()>;
}

pub type SubscriptionHandle = Box<dyn Subscription>;

/// Transport port for publishing and subscribing to events.
///
/// `publish_raw` is a single delivery attempt; retry policy lives in the
/// publisher above this port. Implementations own their inbound dispatch
/// loops and report through the shared [`BusMetrics`].
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish one envelope to its subject. One attempt, no retries.
    async fn publish_raw(&self, envelope: &EventEnvelope) -> Result<()>;

    /// Register a handler for all subjects matching the options. The
    /// handler runs on an independent task per message.
    async fn subscribe(
        &self,
        options: SubscribeOptions,
        handler: EventHandler,
    ) -> Result<SubscriptionHandle>;

    /// Shared metrics for this connection.
    fn metrics(&self) -> &Arc<BusMetrics>;

    /// Whether the transport currently has a live broker connection.
    fn is_connected(&self) -> bool;
}

/// Run one handler invocation at the dispatch boundary.
///
/// Counts the delivery, invokes the handler, and converts a handler failure
/// into a logged, counted event. Transports spawn this per message so a slow
/// or failing handler never blocks the subscription loop. Returns whether
/// the handler succeeded, which durable consumers use to ack or nak.
pub async fn dispatch(
    handler: EventHandler,
    envelope: EventEnvelope,
    metrics: Arc<BusMetrics>,
) -> bool {
    let subject = envelope.subject();
    let event_id = envelope.event_id;
    metrics.record_receive();
    debug!(%subject, %event_id, "Dispatching event");

    match handler(envelope).await {
        Ok(()) => true,
        Err(e) => {
            metrics.record_handler_error();
            error!(%subject, %event_id, error = %e, "Event handler failed");
            false
        }
    }
}
