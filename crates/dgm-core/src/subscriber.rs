//! Event subscriber: handler registration against subjects and patterns.

use crate::error::Result;
use crate::events::{EventFamily, EventType};
use crate::ports::{EventBus, EventHandler, SubscribeOptions, SubscriptionHandle};
use crate::subject;
use std::sync::Arc;
use tracing::info;

/// Registers handlers against the subject space.
///
/// Pattern validation happens here (programmer errors fail fast); delivery,
/// task-per-message dispatch, and error isolation are the transport's job
/// behind the [`EventBus`] port.
pub struct EventSubscriber<B: EventBus> {
    bus: Arc<B>,
}

impl<B: EventBus> EventSubscriber<B> {
    pub fn new(bus: Arc<B>) -> Self {
        Self { bus }
    }

    /// Subscribe to exactly one event type.
    pub async fn subscribe_to_event(
        &self,
        event_type: EventType,
        handler: EventHandler,
        queue_group: Option<&str>,
    ) -> Result<SubscriptionHandle> {
        let mut options = SubscribeOptions::subject(event_type.subject());
        if let Some(group) = queue_group {
            options = options.with_queue_group(group);
        }
        self.subscribe(options, handler).await
    }

    /// Subscribe to a wildcard pattern (`dgm.improvement.*`, `dgm.>`).
    pub async fn subscribe_to_pattern(
        &self,
        pattern: &str,
        handler: EventHandler,
        queue_group: Option<&str>,
    ) -> Result<SubscriptionHandle> {
        subject::validate_pattern(pattern)?;
        let mut options = SubscribeOptions::subject(pattern);
        if let Some(group) = queue_group {
            options = options.with_queue_group(group);
        }
        self.subscribe(options, handler).await
    }

    /// Subscribe to every subject of one event family.
    pub async fn subscribe_to_family(
        &self,
        family: EventFamily,
        handler: EventHandler,
        queue_group: Option<&str>,
    ) -> Result<SubscriptionHandle> {
        self.subscribe_to_pattern(&family.wildcard(), handler, queue_group)
            .await
    }

    /// Subscribe through a named durable consumer. Delivery survives
    /// subscriber restarts; a failing handler triggers redelivery.
    pub async fn subscribe_durable(
        &self,
        pattern: &str,
        durable_name: &str,
        handler: EventHandler,
    ) -> Result<SubscriptionHandle> {
        subject::validate_pattern(pattern)?;
        let options = SubscribeOptions::subject(pattern).with_durable_name(durable_name);
        self.subscribe(options, handler).await
    }

    async fn subscribe(
        &self,
        options: SubscribeOptions,
        handler: EventHandler,
    ) -> Result<SubscriptionHandle> {
        let pattern = options.subject_pattern.clone();
        let handle = self.bus.subscribe(options, handler).await?;
        self.bus.metrics().record_handler_registered();
        info!(%pattern, "Handler registered");
        Ok(handle)
    }
}
