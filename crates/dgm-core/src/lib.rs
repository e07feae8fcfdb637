//! DGM Events Core
//!
//! Shared vocabulary for the DGM event bus: envelope schema, event type
//! registry, subject grammar, correlation tracking, metrics, and the port
//! traits implemented by the NATS transport and the in-memory test double.

pub mod correlation;
pub mod envelope;
pub mod error;
pub mod events;
pub mod metrics;
pub mod ports;
pub mod publisher;
pub mod subject;
pub mod subscriber;

pub use correlation::CorrelationId;
pub use envelope::EventEnvelope;
pub use error::{Error, Result};
pub use events::{CONSTITUTIONAL_HASH, EventFamily, EventPriority, EventType, SUBJECT_ROOT};
pub use metrics::{BusMetrics, MetricsSnapshot};
pub use ports::{EventBus, EventHandler, SubscribeOptions, Subscription, SubscriptionHandle};
pub use publisher::{EventPublisher, PublishRetryPolicy};
pub use subscriber::EventSubscriber;
