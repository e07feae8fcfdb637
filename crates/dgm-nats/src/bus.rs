//! NATS-backed event bus with JetStream durability.

use async_nats::jetstream::{
    self, AckKind, consumer::pull::Config as ConsumerConfig, stream::Config as StreamConfig,
};
use async_trait::async_trait;
use chrono::Utc;
use dgm_core::envelope::EventEnvelope;
use dgm_core::metrics::BusMetrics;
use dgm_core::ports::{self, EventBus, EventHandler, SubscribeOptions, Subscription, SubscriptionHandle};
use dgm_core::{Error, Result};
use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::DgmBusConfig;
use crate::health::{HealthReport, ServerInfoReport};

/// A registered subscription, kept in registration order for introspection
/// and for the health report.
#[derive(Debug, Clone)]
pub struct SubscriptionInfo {
    pub id: Uuid,
    pub subject_pattern: String,
    pub queue_group: Option<String>,
    pub durable_name: Option<String>,
}

type SubscriptionRegistry = Arc<RwLock<Vec<SubscriptionInfo>>>;

/// NATS event bus for the DGM subject space (`dgm.>`).
///
/// One instance per process, shared by publisher and subscriber call sites.
/// Reconnection is handled by the underlying client: core subscriptions are
/// replayed in registration order before pending traffic resumes, and
/// durable consumers pick up where the stream left them. The bus records
/// reconnects and connection errors through the shared metrics.
#[derive(Clone)]
pub struct NatsEventBus {
    client: async_nats::Client,
    jetstream: jetstream::Context,
    config: DgmBusConfig,
    metrics: Arc<BusMetrics>,
    shutdown: Arc<AtomicBool>,
    in_flight: Arc<AtomicU64>,
    subscriptions: SubscriptionRegistry,
}

impl NatsEventBus {
    /// Connect to a single NATS server with default settings.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_config(DgmBusConfig::new(url)).await
    }

    /// Connect with custom configuration.
    ///
    /// Dials with a bounded retry budget and exponential backoff, then
    /// idempotently provisions the durable stream over `dgm.>`.
    pub async fn connect_with_config(config: DgmBusConfig) -> Result<Self> {
        let urls = config.urls.join(",");
        let metrics = Arc::new(BusMetrics::new());

        let mut backoff = config.reconnect_initial_wait;
        let mut last_error = String::new();
        let mut client = None;

        for attempt in 1..=config.connect_max_attempts {
            info!(%urls, attempt, "Connecting to NATS");
            match Self::dial(&config, &urls, metrics.clone()).await {
                Ok(c) => {
                    client = Some(c);
                    break;
                }
                Err(e) => {
                    metrics.record_connection_error();
                    warn!(%urls, attempt, error = %e, "NATS connect attempt failed");
                    last_error = e.to_string();
                    if attempt < config.connect_max_attempts {
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(config.reconnect_max_wait);
                    }
                }
            }
        }

        let client = client.ok_or(Error::ConnectionExhausted {
            attempts: config.connect_max_attempts,
            last_error,
        })?;
        metrics.record_connected(true, Utc::now().timestamp());

        let jetstream = jetstream::new(client.clone());
        let stream_name = config.effective_stream_name();

        jetstream
            .get_or_create_stream(StreamConfig {
                name: stream_name.clone(),
                subjects: vec![format!("{}.>", dgm_core::SUBJECT_ROOT)],
                retention: jetstream::stream::RetentionPolicy::Limits,
                max_age: config.max_age,
                storage: jetstream::stream::StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(|e| Error::Connection(format!("Failed to create stream {stream_name}: {e}")))?;

        info!(stream = %stream_name, "Connected to NATS and initialized JetStream");

        Ok(Self {
            client,
            jetstream,
            config,
            metrics,
            shutdown: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(AtomicU64::new(0)),
            subscriptions: Arc::new(RwLock::new(Vec::new())),
        })
    }

    async fn dial(
        config: &DgmBusConfig,
        urls: &str,
        metrics: Arc<BusMetrics>,
    ) -> Result<async_nats::Client> {
        // The client emits Connected for the initial handshake as well;
        // only later ones are reconnections.
        let initial_connect = Arc::new(AtomicBool::new(true));
        async_nats::ConnectOptions::new()
            .name(&config.client_name)
            .connection_timeout(config.connection_timeout)
            .request_timeout(Some(config.request_timeout))
            .event_callback(move |event| {
                let metrics = metrics.clone();
                let initial_connect = initial_connect.clone();
                async move {
                    match event {
                        async_nats::Event::Connected => {
                            if initial_connect.swap(false, Ordering::SeqCst) {
                                debug!("Connected to NATS");
                            } else {
                                metrics.record_connected(false, Utc::now().timestamp());
                                info!("Reconnected to NATS, subscriptions re-established");
                            }
                        }
                        async_nats::Event::Disconnected => {
                            metrics.record_disconnected();
                            warn!("Disconnected from NATS");
                        }
                        async_nats::Event::ClientError(e) => {
                            metrics.record_connection_error();
                            error!(error = %e, "NATS client error");
                        }
                        other => debug!(event = %other, "NATS connection event"),
                    }
                }
            })
            .connect(urls)
            .await
            .map_err(|e| Error::Connection(e.to_string()))
    }

    /// Get the underlying NATS client.
    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }

    /// Get the JetStream context.
    pub fn jetstream(&self) -> &jetstream::Context {
        &self.jetstream
    }

    pub fn config(&self) -> &DgmBusConfig {
        &self.config
    }

    /// Active subscriptions in registration order.
    pub async fn subscription_info(&self) -> Vec<SubscriptionInfo> {
        self.subscriptions.read().await.clone()
    }

    /// Check if shutdown was requested.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Check connection and stream health.
    ///
    /// Answers even when disconnected or mid-reconnect; the RTT probe is
    /// bounded by the request timeout.
    pub async fn health_check(&self) -> HealthReport {
        let connected =
            self.client.connection_state() == async_nats::connection::State::Connected;

        let rtt_ms = if connected {
            let start = Instant::now();
            match tokio::time::timeout(self.config.request_timeout, self.client.flush()).await {
                Ok(Ok(())) => Some(start.elapsed().as_secs_f64() * 1000.0),
                _ => None,
            }
        } else {
            None
        };

        let info = self.client.server_info();
        let server_info = ServerInfoReport {
            server_id: info.server_id.clone(),
            version: info.version.clone(),
            max_payload: info.max_payload,
        };

        let jetstream_enabled = self
            .jetstream
            .get_stream(self.config.effective_stream_name())
            .await
            .is_ok();

        HealthReport::from_parts(
            connected,
            jetstream_enabled,
            Some(server_info),
            self.subscriptions.read().await.len() as u64,
            self.metrics.snapshot(),
            rtt_ms,
        )
    }

    /// Graceful shutdown: wait for in-flight handlers up to the grace
    /// period, then drain the connection.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Initiating event bus shutdown");
        self.shutdown.store(true, Ordering::SeqCst);

        let deadline = Instant::now() + self.config.shutdown_grace;
        while self.in_flight.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        let abandoned = self.in_flight.load(Ordering::SeqCst);
        if abandoned > 0 {
            warn!(abandoned, "Shutdown grace period elapsed with handlers in flight");
        }

        if let Err(e) = self.client.drain().await {
            error!(error = %e, "Error draining NATS connection");
        }

        self.metrics.record_disconnected();
        info!("NATS connection drained");
        Ok(())
    }

    fn spawn_handler(&self, handler: EventHandler, envelope: EventEnvelope) {
        let metrics = self.metrics.clone();
        let in_flight = self.in_flight.clone();
        in_flight.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            ports::dispatch(handler, envelope, metrics).await;
            in_flight.fetch_sub(1, Ordering::SeqCst);
        });
    }

    async fn subscribe_core(
        &self,
        options: SubscribeOptions,
        handler: EventHandler,
    ) -> Result<SubscriptionHandle> {
        let pattern = options.subject_pattern.clone();
        let mut subscriber = match &options.queue_group {
            Some(group) => self
                .client
                .queue_subscribe(pattern.clone(), group.clone())
                .await,
            None => self.client.subscribe(pattern.clone()).await,
        }
        .map_err(|e| Error::Subscribe {
            subject: pattern.clone(),
            reason: e.to_string(),
        })?;

        let info = SubscriptionInfo {
            id: Uuid::new_v4(),
            subject_pattern: pattern.clone(),
            queue_group: options.queue_group.clone(),
            durable_name: None,
        };
        self.register(info.clone()).await;

        let bus = self.clone();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let task_pattern = pattern.clone();
        let sub_id = info.id;
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => {
                        if let Err(e) = subscriber.unsubscribe().await {
                            warn!(pattern = %task_pattern, error = %e, "Unsubscribe failed");
                        }
                        break;
                    }
                    maybe = subscriber.next() => {
                        let Some(message) = maybe else { break };
                        if bus.is_shutdown() {
                            break;
                        }
                        match EventEnvelope::from_bytes(&message.payload) {
                            Ok(envelope) => bus.spawn_handler(handler.clone(), envelope),
                            Err(e) => {
                                bus.metrics.record_decode_failure();
                                warn!(
                                    subject = %message.subject,
                                    error = %e,
                                    "Dropping malformed message"
                                );
                            }
                        }
                    }
                }
            }
            bus.deregister(sub_id).await;
        });

        Ok(Box::new(NatsSubscription {
            info,
            stop: Some(stop_tx),
            task: Some(task),
        }))
    }

    async fn subscribe_durable(
        &self,
        options: SubscribeOptions,
        handler: EventHandler,
    ) -> Result<SubscriptionHandle> {
        let pattern = options.subject_pattern.clone();
        let durable = options.durable_name.clone().ok_or_else(|| Error::Subscribe {
            subject: pattern.clone(),
            reason: "durable subscribe requires a durable name".to_string(),
        })?;

        let consumer = self
            .jetstream
            .create_consumer_on_stream(
                ConsumerConfig {
                    durable_name: Some(durable.clone()),
                    filter_subject: pattern.clone(),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    ack_wait: self.config.ack_wait,
                    max_deliver: self.config.max_deliver,
                    ..Default::default()
                },
                self.config.effective_stream_name(),
            )
            .await
            .map_err(|e| Error::Subscribe {
                subject: pattern.clone(),
                reason: format!("Failed to create durable consumer: {e}"),
            })?;

        let mut messages = consumer.messages().await.map_err(|e| Error::Subscribe {
            subject: pattern.clone(),
            reason: format!("Failed to open consumer stream: {e}"),
        })?;

        let info = SubscriptionInfo {
            id: Uuid::new_v4(),
            subject_pattern: pattern.clone(),
            queue_group: None,
            durable_name: Some(durable),
        };
        self.register(info.clone()).await;

        let bus = self.clone();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let sub_id = info.id;
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    // The durable consumer outlives the handle; delivery
                    // resumes from the stream on the next subscribe.
                    _ = &mut stop_rx => break,
                    maybe = messages.next() => {
                        let Some(result) = maybe else { break };
                        if bus.is_shutdown() {
                            break;
                        }
                        let message = match result {
                            Ok(m) => m,
                            Err(e) => {
                                warn!(error = %e, "Durable consumer message error");
                                continue;
                            }
                        };
                        match EventEnvelope::from_bytes(&message.payload) {
                            Ok(envelope) => {
                                let metrics = bus.metrics.clone();
                                let in_flight = bus.in_flight.clone();
                                let handler = handler.clone();
                                in_flight.fetch_add(1, Ordering::SeqCst);
                                tokio::spawn(async move {
                                    let succeeded =
                                        ports::dispatch(handler, envelope, metrics).await;
                                    let ack = if succeeded {
                                        message.ack().await
                                    } else {
                                        // Nak for redelivery, bounded by the
                                        // consumer's max_deliver.
                                        message.ack_with(AckKind::Nak(None)).await
                                    };
                                    if let Err(e) = ack {
                                        warn!(error = %e, "Failed to (n)ack message");
                                    }
                                    in_flight.fetch_sub(1, Ordering::SeqCst);
                                });
                            }
                            Err(e) => {
                                bus.metrics.record_decode_failure();
                                warn!(error = %e, "Dropping malformed message");
                                // Terminate delivery; redelivering a payload
                                // that cannot parse only burns attempts.
                                if let Err(e) = message.ack_with(AckKind::Term).await {
                                    warn!(error = %e, "Failed to terminate message");
                                }
                            }
                        }
                    }
                }
            }
            bus.deregister(sub_id).await;
        });

        Ok(Box::new(NatsSubscription {
            info,
            stop: Some(stop_tx),
            task: Some(task),
        }))
    }

    async fn register(&self, info: SubscriptionInfo) {
        self.metrics.subscription_opened();
        self.subscriptions.write().await.push(info);
    }

    async fn deregister(&self, id: Uuid) {
        self.metrics.subscription_closed();
        self.subscriptions.write().await.retain(|s| s.id != id);
    }
}

#[async_trait]
impl EventBus for NatsEventBus {
    async fn publish_raw(&self, envelope: &EventEnvelope) -> Result<()> {
        if self.is_shutdown() {
            return Err(Error::Shutdown);
        }

        let subject = envelope.subject();
        let payload = envelope.to_bytes()?;

        let mut headers = async_nats::HeaderMap::new();
        headers.insert("priority", envelope.priority.as_str());
        if let Some(correlation_id) = &envelope.correlation_id {
            headers.insert("correlation_id", correlation_id.as_str());
        }

        debug!(%subject, event_id = %envelope.event_id, "Publishing event");

        let ack = self
            .jetstream
            .publish_with_headers(subject.clone(), headers, payload.into())
            .await
            .map_err(|e| Error::Publish {
                subject: subject.clone(),
                reason: e.to_string(),
            })?;

        ack.await.map_err(|e| Error::Publish {
            subject,
            reason: format!("Publish not confirmed: {e}"),
        })?;

        Ok(())
    }

    async fn subscribe(
        &self,
        options: SubscribeOptions,
        handler: EventHandler,
    ) -> Result<SubscriptionHandle> {
        if self.is_shutdown() {
            return Err(Error::Shutdown);
        }
        debug!(
            pattern = %options.subject_pattern,
            queue_group = ?options.queue_group,
            durable = ?options.durable_name,
            "Subscribing"
        );
        if options.durable_name.is_some() {
            self.subscribe_durable(options, handler).await
        } else {
            self.subscribe_core(options, handler).await
        }
    }

    fn metrics(&self) -> &Arc<BusMetrics> {
        &self.metrics
    }

    fn is_connected(&self) -> bool {
        self.client.connection_state() == async_nats::connection::State::Connected
    }
}

/// Handle to a live NATS subscription.
struct NatsSubscription {
    info: SubscriptionInfo,
    stop: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

#[async_trait]
impl Subscription for NatsSubscription {
    fn subject_pattern(&self) -> &str {
        &self.info.subject_pattern
    }

    fn queue_group(&self) -> Option<&str> {
        self.info.queue_group.as_deref()
    }

    async fn unsubscribe(mut self: Box<Self>) -> Result<()> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| Error::Internal(format!("Subscription task failed: {e}")))?;
        }
        Ok(())
    }
}
