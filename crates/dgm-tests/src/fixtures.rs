//! Payload fixtures and helpers for bus tests.

use dgm_core::envelope::EventEnvelope;
use dgm_core::ports::{EventHandler, handler};
use dgm_core::Error;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

pub fn improvement_payload(improvement_id: &str) -> serde_json::Value {
    json!({
        "improvement_id": improvement_id,
        "strategy": "performance_optimization",
        "target_service": "policy-engine",
    })
}

pub fn performance_payload() -> serde_json::Value {
    json!({
        "p99_latency_ms": 4.2,
        "throughput_rps": 1250,
        "error_rate": 0.001,
    })
}

pub fn assessment_payload(improvement_id: &str, score: f64) -> serde_json::Value {
    json!({
        "improvement_id": improvement_id,
        "compliance_score": score,
        "approved": score >= 0.9,
    })
}

/// Handler that forwards every envelope into a channel.
pub fn collecting_handler() -> (EventHandler, mpsc::UnboundedReceiver<EventEnvelope>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let h = handler(move |envelope| {
        let tx = tx.clone();
        async move {
            tx.send(envelope).ok();
            Ok(())
        }
    });
    (h, rx)
}

/// Handler that fails on chosen invocations (1-based) and forwards the rest.
pub fn failing_handler(
    fail_on: &'static [u64],
) -> (EventHandler, mpsc::UnboundedReceiver<EventEnvelope>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let calls = Arc::new(AtomicU64::new(0));
    let h = handler(move |envelope| {
        let tx = tx.clone();
        let calls = calls.clone();
        async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if fail_on.contains(&n) {
                return Err(Error::Internal(format!("handler failure on message {n}")));
            }
            tx.send(envelope).ok();
            Ok(())
        }
    });
    (h, rx)
}

/// Receive with a bounded wait, panicking with context on timeout.
pub async fn recv_timeout<T>(rx: &mut mpsc::UnboundedReceiver<T>, what: &str) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
        .unwrap_or_else(|| panic!("channel closed waiting for {what}"))
}

/// Assert that nothing arrives within a short settle window.
pub async fn assert_no_message<T: std::fmt::Debug>(rx: &mut mpsc::UnboundedReceiver<T>) {
    if let Ok(Some(extra)) = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
        panic!("unexpected extra message: {extra:?}");
    }
}
