//! Bus metrics for observability dashboards and alerts.
//!
//! One `BusMetrics` instance is shared by the connection, publisher, and
//! subscriber of a process. Counters are append-only atomics; the per-type
//! and per-subject breakdowns sit behind short-lived mutexes and are never
//! held across await points.

use crate::events::{EventPriority, EventType};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Shared counters for the event bus.
#[derive(Debug, Default)]
pub struct BusMetrics {
    /// Publish calls that reached the broker.
    pub events_published: AtomicU64,
    /// Publish calls that exhausted their retry budget.
    pub events_failed: AtomicU64,
    /// Messages handed to dispatch (after decode).
    pub messages_received: AtomicU64,
    /// Inbound payloads dropped as malformed.
    pub decode_failures: AtomicU64,
    /// Handler invocations that returned an error.
    pub handler_errors: AtomicU64,
    /// Total handlers ever registered.
    pub handlers_registered: AtomicU64,
    /// Currently open subscriptions.
    pub active_subscriptions: AtomicU64,
    /// Failed connection attempts.
    pub connection_errors: AtomicU64,
    /// Successful (re)connections after the first.
    pub reconnections: AtomicU64,
    /// Unix timestamp of the most recent successful connect, -1 if never.
    pub last_connected: AtomicI64,
    /// Current connection state (0 = disconnected, 1 = connected).
    pub connected: AtomicU64,

    by_type: Mutex<HashMap<EventType, u64>>,
    by_priority: Mutex<HashMap<EventPriority, u64>>,
    by_subject: Mutex<HashMap<String, SubjectCounters>>,
}

/// Per-subject publish outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubjectCounters {
    pub success: u64,
    pub error: u64,
}

impl BusMetrics {
    pub fn new() -> Self {
        Self {
            last_connected: AtomicI64::new(-1),
            ..Default::default()
        }
    }

    /// Record a successful publish.
    pub fn record_publish(&self, event_type: EventType, priority: EventPriority) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
        *self.by_type.lock().unwrap().entry(event_type).or_insert(0) += 1;
        *self
            .by_priority
            .lock()
            .unwrap()
            .entry(priority)
            .or_insert(0) += 1;
        self.by_subject
            .lock()
            .unwrap()
            .entry(event_type.subject())
            .or_default()
            .success += 1;
    }

    /// Record a publish that exhausted its retry budget.
    pub fn record_publish_failure(&self, event_type: EventType) {
        self.events_failed.fetch_add(1, Ordering::Relaxed);
        self.by_subject
            .lock()
            .unwrap()
            .entry(event_type.subject())
            .or_default()
            .error += 1;
    }

    /// Record a received, decoded message.
    pub fn record_receive(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an inbound payload dropped as malformed.
    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a handler invocation that failed.
    pub fn record_handler_error(&self) {
        self.handler_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handler_registered(&self) {
        self.handlers_registered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn subscription_opened(&self) {
        self.active_subscriptions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn subscription_closed(&self) {
        // Saturating: a handle dropped twice must not wrap the gauge.
        let _ = self.active_subscriptions.fetch_update(
            Ordering::Relaxed,
            Ordering::Relaxed,
            |n| n.checked_sub(1),
        );
    }

    pub fn record_connection_error(&self) {
        self.connection_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful connect. `initial` distinguishes the first
    /// connection of the process from reconnections after a drop.
    pub fn record_connected(&self, initial: bool, now_unix: i64) {
        if !initial {
            self.reconnections.fetch_add(1, Ordering::Relaxed);
        }
        self.connected.store(1, Ordering::Relaxed);
        self.last_connected.store(now_unix, Ordering::Relaxed);
    }

    pub fn record_disconnected(&self) {
        self.connected.store(0, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed) == 1
    }

    /// Get a point-in-time snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_published: self.events_published.load(Ordering::Relaxed),
            events_failed: self.events_failed.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            handlers_registered: self.handlers_registered.load(Ordering::Relaxed),
            active_subscriptions: self.active_subscriptions.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            reconnections: self.reconnections.load(Ordering::Relaxed),
            last_connected: match self.last_connected.load(Ordering::Relaxed) {
                ts if ts >= 0 => Some(ts),
                _ => None,
            },
            connected: self.is_connected(),
            by_type: self.by_type.lock().unwrap().clone(),
            by_priority: self.by_priority.lock().unwrap().clone(),
            by_subject: self.by_subject.lock().unwrap().clone(),
        }
    }
}

/// A point-in-time snapshot of bus metrics.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub events_published: u64,
    pub events_failed: u64,
    pub messages_received: u64,
    pub decode_failures: u64,
    pub handler_errors: u64,
    pub handlers_registered: u64,
    pub active_subscriptions: u64,
    pub connection_errors: u64,
    pub reconnections: u64,
    pub last_connected: Option<i64>,
    pub connected: bool,
    pub by_type: HashMap<EventType, u64>,
    pub by_priority: HashMap<EventPriority, u64>,
    pub by_subject: HashMap<String, SubjectCounters>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_counters() {
        let metrics = BusMetrics::new();
        metrics.record_publish(EventType::ImprovementProposed, EventPriority::High);
        metrics.record_publish(EventType::ImprovementProposed, EventPriority::High);
        metrics.record_publish_failure(EventType::BanditArmSelected);

        let snap = metrics.snapshot();
        assert_eq!(snap.events_published, 2);
        assert_eq!(snap.events_failed, 1);
        assert_eq!(snap.by_type[&EventType::ImprovementProposed], 2);
        assert_eq!(snap.by_priority[&EventPriority::High], 2);
        assert_eq!(snap.by_subject["dgm.improvement.proposed"].success, 2);
        assert_eq!(snap.by_subject["dgm.bandit.arm.selected"].error, 1);
    }

    #[test]
    fn test_subscription_gauge_saturates() {
        let metrics = BusMetrics::new();
        metrics.subscription_opened();
        metrics.subscription_closed();
        metrics.subscription_closed();
        assert_eq!(metrics.snapshot().active_subscriptions, 0);
    }

    #[test]
    fn test_reconnections_count_successes_only() {
        let metrics = BusMetrics::new();
        metrics.record_connection_error();
        metrics.record_connection_error();
        metrics.record_connection_error();
        metrics.record_connected(true, 1_700_000_000);
        metrics.record_disconnected();
        metrics.record_connected(false, 1_700_000_100);

        let snap = metrics.snapshot();
        assert_eq!(snap.connection_errors, 3);
        assert_eq!(snap.reconnections, 1);
        assert_eq!(snap.last_connected, Some(1_700_000_100));
    }
}
