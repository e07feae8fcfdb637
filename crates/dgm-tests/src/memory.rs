//! In-memory event bus satisfying the same `EventBus` contract as the NATS
//! transport, with fault injection for connection and publish failures.
//!
//! Delivery per subscription is sequential so tests can observe publish
//! order at the handler; error isolation and queue-group semantics match
//! the production transport.

use async_trait::async_trait;
use dgm_core::envelope::EventEnvelope;
use dgm_core::metrics::BusMetrics;
use dgm_core::ports::{self, EventBus, EventHandler, SubscribeOptions, Subscription, SubscriptionHandle};
use dgm_core::{Error, Result, subject};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Redelivery budget for durable subscriptions, mirroring the NATS
/// consumer's max_deliver default.
const MAX_DELIVER: u32 = 3;

struct Sub {
    id: Uuid,
    pattern: String,
    queue_group: Option<String>,
    tx: mpsc::UnboundedSender<EventEnvelope>,
}

#[derive(Default)]
struct State {
    /// Registration order is registry order, preserved across reconnects.
    subs: Vec<Sub>,
    /// Round-robin cursors per (pattern, queue group).
    cursors: HashMap<String, usize>,
}

/// In-memory test double for the event bus.
pub struct MemoryEventBus {
    metrics: Arc<BusMetrics>,
    state: Arc<Mutex<State>>,
    connected: AtomicBool,
    shutdown: AtomicBool,
    /// Scripted failures consumed by the next connect attempts.
    fail_connects: AtomicU32,
    /// Scripted failures consumed by the next publish attempts.
    fail_publishes: AtomicU32,
}

impl MemoryEventBus {
    /// Create a bus that starts connected.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            metrics: Arc::new(BusMetrics::new()),
            state: Arc::new(Mutex::new(State::default())),
            connected: AtomicBool::new(true),
            shutdown: AtomicBool::new(false),
            fail_connects: AtomicU32::new(0),
            fail_publishes: AtomicU32::new(0),
        })
    }

    /// Script the next `n` connect attempts to fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.fail_connects.store(n, Ordering::SeqCst);
    }

    /// Script the next `n` publish attempts to fail.
    pub fn fail_next_publishes(&self, n: u32) {
        self.fail_publishes.store(n, Ordering::SeqCst);
    }

    /// Simulate an unexpected connection drop. Registered subscriptions
    /// stay in the registry and resume after [`reconnect`](Self::reconnect).
    pub fn force_disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.metrics.record_disconnected();
    }

    /// Reconnect with backoff, consuming any scripted connect failures.
    ///
    /// Resolves only once the connection is up and every previously
    /// registered subscription is active again, so a `publish` after this
    /// returns reaches them all.
    pub async fn reconnect(&self) -> Result<()> {
        while self
            .fail_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            self.metrics.record_connection_error();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        // Subscriptions were never dropped from the registry; flipping the
        // connected flag re-activates them in registration order.
        self.connected.store(true, Ordering::SeqCst);
        self.metrics
            .record_connected(false, chrono::Utc::now().timestamp());
        Ok(())
    }

    /// Deliver a raw payload as if it arrived off the wire. Malformed
    /// payloads are dropped and counted, matching the production receive
    /// path; returns whether the payload decoded.
    pub fn inject_raw(&self, payload: &[u8]) -> bool {
        match EventEnvelope::from_bytes(payload) {
            Ok(envelope) => {
                self.route(&envelope);
                true
            }
            Err(e) => {
                self.metrics.record_decode_failure();
                debug!(error = %e, "Dropping malformed payload");
                false
            }
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Stop accepting publishes and close all subscriptions.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.state.lock().unwrap().subs.clear();
        self.metrics.record_disconnected();
    }

    fn route(&self, envelope: &EventEnvelope) {
        let subject = envelope.subject();
        let mut state = self.state.lock().unwrap();

        // Fan-out to every matching non-grouped subscription.
        for sub in &state.subs {
            if sub.queue_group.is_none() && subject::matches(&sub.pattern, &subject) {
                let _ = sub.tx.send(envelope.clone());
            }
        }

        // Exactly one member per (pattern, group) receives the message.
        let mut group_targets: Vec<(String, Vec<usize>)> = Vec::new();
        for (idx, sub) in state.subs.iter().enumerate() {
            let Some(group) = &sub.queue_group else { continue };
            if !subject::matches(&sub.pattern, &subject) {
                continue;
            }
            let key = format!("{}|{}", sub.pattern, group);
            match group_targets.iter_mut().find(|(k, _)| *k == key) {
                Some((_, members)) => members.push(idx),
                None => group_targets.push((key, vec![idx])),
            }
        }
        for (key, members) in group_targets {
            let cursor = state.cursors.entry(key).or_insert(0);
            let chosen = members[*cursor % members.len()];
            *cursor += 1;
            let _ = state.subs[chosen].tx.send(envelope.clone());
        }
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish_raw(&self, envelope: &EventEnvelope) -> Result<()> {
        if self.is_shutdown() {
            return Err(Error::Shutdown);
        }
        if self
            .fail_publishes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::Publish {
                subject: envelope.subject(),
                reason: "scripted broker failure".to_string(),
            });
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }

        debug!(subject = %envelope.subject(), "Routing event");
        self.route(envelope);
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
        subject::validate_pattern(&options.subject_pattern)?;

        let (tx, mut rx) = mpsc::unbounded_channel::<EventEnvelope>();
        let id = Uuid::new_v4();
        let durable = options.durable_name.is_some();
        self.state.lock().unwrap().subs.push(Sub {
            id,
            pattern: options.subject_pattern.clone(),
            queue_group: options.queue_group.clone(),
            tx,
        });
        self.metrics.subscription_opened();

        let metrics = self.metrics.clone();
        let task = tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                if durable {
                    // Emulate nak-driven redelivery for durable consumers.
                    for _ in 0..MAX_DELIVER {
                        if ports::dispatch(handler.clone(), envelope.clone(), metrics.clone())
                            .await
                        {
                            break;
                        }
                    }
                } else {
                    ports::dispatch(handler.clone(), envelope.clone(), metrics.clone()).await;
                }
            }
        });

        Ok(Box::new(MemorySubscription {
            id,
            pattern: options.subject_pattern,
            queue_group: options.queue_group,
            state: self.state.clone(),
            metrics: self.metrics.clone(),
            task: Some(task),
        }))
    }

    fn metrics(&self) -> &Arc<BusMetrics> {
        &self.metrics
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

struct MemorySubscription {
    id: Uuid,
    pattern: String,
    queue_group: Option<String>,
    state: Arc<Mutex<State>>,
    metrics: Arc<BusMetrics>,
    task: Option<tokio::task::JoinHandle<()>>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    fn subject_pattern(&self) -> &str {
        &self.pattern
    }

    fn queue_group(&self) -> Option<&str> {
        self.queue_group.as_deref()
    }

    async fn unsubscribe(mut self: Box<Self>) -> Result<()> {
        // Dropping the sender ends the dispatch loop after queued messages.
        self.state.lock().unwrap().subs.retain(|s| s.id != self.id);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.metrics.subscription_closed();
        Ok(())
    }
}
