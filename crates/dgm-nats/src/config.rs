//! Configuration for the NATS event bus.

use std::time::Duration;

/// Base name of the durable stream; an environment suffix may be appended.
pub const DEFAULT_STREAM_NAME: &str = "DGM_EVENTS";

/// Configuration for the DGM NATS event bus.
#[derive(Debug, Clone)]
pub struct DgmBusConfig {
    /// NATS server URLs (comma-joined for cluster connect).
    pub urls: Vec<String>,
    /// Client name reported to the broker.
    pub client_name: String,
    /// Optional environment suffix for the stream (`DGM_EVENTS_STAGING`).
    pub environment: Option<String>,
    /// Base stream name.
    pub stream_name: String,
    /// Initial-connect retry budget (total attempts).
    pub connect_max_attempts: u32,
    /// First wait between connect attempts, doubled per failure.
    pub reconnect_initial_wait: Duration,
    /// Upper bound on the backoff interval.
    pub reconnect_max_wait: Duration,
    /// Per-attempt connection timeout.
    pub connection_timeout: Duration,
    /// Request timeout for JetStream operations.
    pub request_timeout: Duration,
    /// How long a durable consumer waits for an ack before redelivery.
    pub ack_wait: Duration,
    /// Maximum delivery attempts for a durable consumer.
    pub max_deliver: i64,
    /// Message retention period on the stream.
    pub max_age: Duration,
    /// How long shutdown waits for in-flight handlers before abandoning them.
    pub shutdown_grace: Duration,
}

impl Default for DgmBusConfig {
    fn default() -> Self {
        Self {
            urls: vec!["nats://localhost:4222".to_string()],
            client_name: "dgm-service".to_string(),
            environment: None,
            stream_name: DEFAULT_STREAM_NAME.to_string(),
            connect_max_attempts: 5,
            reconnect_initial_wait: Duration::from_millis(500),
            reconnect_max_wait: Duration::from_secs(10),
            connection_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
            ack_wait: Duration::from_secs(30),
            max_deliver: 3,
            max_age: Duration::from_secs(86400 * 7),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl DgmBusConfig {
    /// Create a new config with a single URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            ..Default::default()
        }
    }

    /// Create configuration from environment variables with defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("NATS_URL") {
            config.urls = url.split(',').map(str::to_string).collect();
        }
        if let Ok(name) = std::env::var("DGM_CLIENT_NAME") {
            config.client_name = name;
        }
        if let Ok(env) = std::env::var("DGM_ENVIRONMENT") {
            if !env.is_empty() {
                config.environment = Some(env);
            }
        }
        config
    }

    /// Set multiple server URLs for cluster support.
    pub fn with_urls(mut self, urls: Vec<String>) -> Self {
        self.urls = urls;
        self
    }

    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn with_stream_name(mut self, name: impl Into<String>) -> Self {
        self.stream_name = name.into();
        self
    }

    pub fn with_max_connect_attempts(mut self, attempts: u32) -> Self {
        self.connect_max_attempts = attempts;
        self
    }

    pub fn with_max_deliver(mut self, max: i64) -> Self {
        self.max_deliver = max;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Effective stream name including the environment suffix.
    pub fn effective_stream_name(&self) -> String {
        match &self.environment {
            Some(env) => format!("{}_{}", self.stream_name, env.to_uppercase()),
            None => self.stream_name.clone(),
        }
    }
}
