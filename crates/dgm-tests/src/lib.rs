//! Test infrastructure for the DGM event bus.
//!
//! Provides an in-memory transport satisfying the same `EventBus` contract
//! as the NATS implementation, plus a testcontainers-backed context for
//! integration suites against a real broker.
//!
//! # Usage
//!
//! ```ignore
//! use dgm_tests::MemoryContext;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let ctx = MemoryContext::new();
//!     // Use ctx.publisher, ctx.subscriber, ctx.bus.
//! }
//! ```

pub mod containers;
pub mod context;
pub mod fixtures;
pub mod memory;

pub use context::{MemoryContext, NatsContext, TEST_SOURCE};
pub use fixtures::*;
pub use memory::MemoryEventBus;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,dgm_tests=debug")),
        )
        .with_test_writer()
        .try_init();
}
