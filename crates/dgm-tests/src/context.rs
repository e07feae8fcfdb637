//! Test context wiring publisher and subscriber to a transport.

use crate::containers::NatsContainer;
use crate::memory::MemoryEventBus;
use dgm_core::{EventPublisher, EventSubscriber};
use dgm_nats::NatsEventBus;
use std::sync::Arc;

/// Default source service name used by test publishers.
pub const TEST_SOURCE: &str = "dgm-service";

/// In-memory context: publisher and subscriber over the memory transport.
pub struct MemoryContext {
    pub bus: Arc<MemoryEventBus>,
    pub publisher: EventPublisher<MemoryEventBus>,
    pub subscriber: EventSubscriber<MemoryEventBus>,
}

impl MemoryContext {
    pub fn new() -> Self {
        crate::init_test_logging();
        let bus = MemoryEventBus::new();
        Self {
            publisher: EventPublisher::new(bus.clone(), TEST_SOURCE),
            subscriber: EventSubscriber::new(bus.clone()),
            bus,
        }
    }
}

impl Default for MemoryContext {
    fn default() -> Self {
        Self::new()
    }
}

/// NATS context backed by a throwaway container.
///
/// Drop this to stop the container.
pub struct NatsContext {
    pub nats: NatsContainer,
    pub bus: Arc<NatsEventBus>,
    pub publisher: EventPublisher<NatsEventBus>,
    pub subscriber: EventSubscriber<NatsEventBus>,
}

impl NatsContext {
    pub async fn new() -> anyhow::Result<Self> {
        crate::init_test_logging();
        let nats = NatsContainer::start().await?;
        let bus = Arc::new(NatsEventBus::connect(nats.url()).await?);
        Ok(Self {
            nats,
            publisher: EventPublisher::new(bus.clone(), TEST_SOURCE),
            subscriber: EventSubscriber::new(bus.clone()),
            bus,
        })
    }

    pub fn nats_url(&self) -> &str {
        self.nats.url()
    }
}
