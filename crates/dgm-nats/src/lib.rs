//! NATS/JetStream transport for the DGM event bus.

mod bus;
pub mod config;
pub mod health;

pub use bus::{NatsEventBus, SubscriptionInfo};
pub use config::{DEFAULT_STREAM_NAME, DgmBusConfig};
pub use health::{HealthMetrics, HealthReport, HealthStatus, ServerInfoReport};
