//! End-to-end bus behavior over the in-memory transport.
//!
//! Everything here runs without a broker; the same publisher and subscriber
//! code paths are exercised against real NATS in `eventbus_tests.rs`.

use std::collections::HashSet;
use std::sync::Arc;

use dgm_core::{CorrelationId, EventBus, EventEnvelope, EventFamily, EventPriority, EventType};
use dgm_tests::*;
use serde_json::json;

#[tokio::test]
async fn test_publish_reaches_exact_subject_subscriber() {
    let ctx = MemoryContext::new();
    let (handler, mut rx) = collecting_handler();

    let _sub = ctx
        .subscriber
        .subscribe_to_event(EventType::ImprovementProposed, handler, None)
        .await
        .unwrap();

    let delivered = ctx
        .publisher
        .publish_improvement_proposed("I1", "performance_optimization", None)
        .await
        .unwrap();
    assert!(delivered);

    let envelope = recv_timeout(&mut rx, "improvement.proposed").await;
    assert_eq!(envelope.event_type, EventType::ImprovementProposed);
    assert_eq!(envelope.source_service, TEST_SOURCE);
    assert_eq!(envelope.data["improvement_id"], "I1");
}

#[tokio::test]
async fn test_wildcard_pattern_receives_family_events() {
    let ctx = MemoryContext::new();
    let (handler, mut rx) = collecting_handler();

    let _sub = ctx
        .subscriber
        .subscribe_to_pattern("dgm.improvement.*", handler, None)
        .await
        .unwrap();

    ctx.publisher
        .publish_improvement_proposed("I1", "prompt_refinement", None)
        .await
        .unwrap();
    ctx.publisher
        .publish_improvement_executed("I1", true, None)
        .await
        .unwrap();
    // Outside the pattern, must not arrive.
    ctx.publisher
        .publish(EventType::PerformanceDegraded, json!({}), None, None)
        .await
        .unwrap();

    let first = recv_timeout(&mut rx, "improvement.proposed").await;
    let second = recv_timeout(&mut rx, "improvement.executed").await;
    assert_eq!(first.event_type, EventType::ImprovementProposed);
    assert_eq!(second.event_type, EventType::ImprovementExecuted);
    assert_no_message(&mut rx).await;
}

#[tokio::test]
async fn test_family_subscription_spans_nested_subjects() {
    let ctx = MemoryContext::new();
    let (handler, mut rx) = collecting_handler();

    // `dgm.bandit.>` must match both two- and three-token tails.
    let _sub = ctx
        .subscriber
        .subscribe_to_family(EventFamily::Bandit, handler, None)
        .await
        .unwrap();

    ctx.publisher
        .publish_bandit_arm_selected("arm-3", json!({"epsilon": 0.1}), None)
        .await
        .unwrap();
    ctx.publisher
        .publish(EventType::BanditRewardRecorded, json!({"reward": 1.0}), None, None)
        .await
        .unwrap();

    assert_eq!(
        recv_timeout(&mut rx, "bandit.arm.selected").await.event_type,
        EventType::BanditArmSelected
    );
    assert_eq!(
        recv_timeout(&mut rx, "bandit.reward.recorded").await.event_type,
        EventType::BanditRewardRecorded
    );
}

#[tokio::test]
async fn test_delivery_order_matches_publish_order() {
    let ctx = MemoryContext::new();
    let (handler, mut rx) = collecting_handler();

    let _sub = ctx
        .subscriber
        .subscribe_to_event(EventType::PerformanceMetricsUpdated, handler, None)
        .await
        .unwrap();

    for seq in 0..5u64 {
        ctx.publisher
            .publish(
                EventType::PerformanceMetricsUpdated,
                json!({ "seq": seq }),
                None,
                None,
            )
            .await
            .unwrap();
    }

    for expected in 0..5u64 {
        let envelope = recv_timeout(&mut rx, "ordered metrics event").await;
        assert_eq!(envelope.data["seq"], expected);
    }
}

#[tokio::test]
async fn test_correlation_id_propagates_across_lifecycle() {
    let ctx = MemoryContext::new();
    let (handler, mut rx) = collecting_handler();

    let _sub = ctx
        .subscriber
        .subscribe_to_pattern("dgm.improvement.*", handler, None)
        .await
        .unwrap();

    ctx.publisher
        .publish_improvement_proposed("I1", "caching", Some(CorrelationId::from_string("C1")))
        .await
        .unwrap();

    let proposed = recv_timeout(&mut rx, "improvement.proposed").await;
    assert_eq!(proposed.correlation_id.as_ref().unwrap().as_str(), "C1");

    // Downstream service publishes the follow-up from the received envelope.
    let executed = proposed.correlate(
        EventType::ImprovementExecuted,
        "execution-engine",
        json!({"improvement_id": "I1", "success": true}),
    );
    ctx.publisher.publish_envelope(executed).await.unwrap();

    let executed = recv_timeout(&mut rx, "improvement.executed").await;
    assert_eq!(executed.correlation_id.as_ref().unwrap().as_str(), "C1");
    assert_eq!(executed.source_service, "execution-engine");
}

#[tokio::test]
async fn test_uncorrelated_parent_roots_chain_at_its_event_id() {
    let ctx = MemoryContext::new();
    let (handler, mut rx) = collecting_handler();

    let _sub = ctx
        .subscriber
        .subscribe_to_pattern("dgm.improvement.*", handler, None)
        .await
        .unwrap();

    ctx.publisher
        .publish_improvement_proposed("I2", "caching", None)
        .await
        .unwrap();
    let proposed = recv_timeout(&mut rx, "improvement.proposed").await;
    assert!(proposed.correlation_id.is_none());

    let executed = proposed.correlate(
        EventType::ImprovementExecuted,
        "execution-engine",
        json!({"improvement_id": "I2", "success": false}),
    );
    ctx.publisher.publish_envelope(executed).await.unwrap();

    let executed = recv_timeout(&mut rx, "improvement.executed").await;
    assert_eq!(
        executed.correlation_id.unwrap().as_str(),
        proposed.event_id.to_string()
    );
}

#[tokio::test]
async fn test_subscriptions_survive_reconnect() {
    let ctx = MemoryContext::new();
    let (handler, mut rx) = collecting_handler();

    let _sub = ctx
        .subscriber
        .subscribe_to_event(EventType::ConstitutionalViolationDetected, handler, None)
        .await
        .unwrap();

    ctx.bus.force_disconnect();
    ctx.bus.fail_next_connects(3);
    ctx.bus.reconnect().await.unwrap();

    let delivered = ctx
        .publisher
        .publish(
            EventType::ConstitutionalViolationDetected,
            json!({"rule": "privacy"}),
            Some(EventPriority::Critical),
            None,
        )
        .await
        .unwrap();
    assert!(delivered);

    let envelope = recv_timeout(&mut rx, "violation after reconnect").await;
    assert_eq!(envelope.priority, EventPriority::Critical);

    let snap = ctx.bus.metrics().snapshot();
    assert_eq!(snap.connection_errors, 3);
    assert_eq!(snap.reconnections, 1);
    assert!(snap.connected);
}

#[tokio::test]
async fn test_failing_handler_does_not_affect_other_subscribers() {
    let ctx = MemoryContext::new();
    let (bad, mut bad_rx) = failing_handler(&[1, 2, 3]);
    let (good, mut good_rx) = collecting_handler();

    let _bad_sub = ctx
        .subscriber
        .subscribe_to_event(EventType::PerformanceDegraded, bad, None)
        .await
        .unwrap();
    let _good_sub = ctx
        .subscriber
        .subscribe_to_event(EventType::PerformanceDegraded, good, None)
        .await
        .unwrap();

    for _ in 0..3 {
        ctx.publisher
            .publish(EventType::PerformanceDegraded, performance_payload(), None, None)
            .await
            .unwrap();
    }

    for _ in 0..3 {
        recv_timeout(&mut good_rx, "event at healthy subscriber").await;
    }
    assert_no_message(&mut bad_rx).await;
    assert_eq!(ctx.bus.metrics().snapshot().handler_errors, 3);
}

#[tokio::test]
async fn test_handler_failure_skips_one_message_not_the_stream() {
    let ctx = MemoryContext::new();
    let (handler, mut rx) = failing_handler(&[2]);

    let _sub = ctx
        .subscriber
        .subscribe_to_pattern("dgm.performance.*", handler, None)
        .await
        .unwrap();

    for seq in 1..=3u64 {
        ctx.publisher
            .publish(
                EventType::PerformanceDegraded,
                json!({ "seq": seq }),
                None,
                None,
            )
            .await
            .unwrap();
    }

    assert_eq!(recv_timeout(&mut rx, "message 1").await.data["seq"], 1);
    assert_eq!(recv_timeout(&mut rx, "message 3").await.data["seq"], 3);
    assert_no_message(&mut rx).await;

    let snap = ctx.bus.metrics().snapshot();
    assert_eq!(snap.handler_errors, 1);
    assert_eq!(snap.messages_received, 3);
}

#[tokio::test]
async fn test_durable_subscription_redelivers_after_handler_failure() {
    let ctx = MemoryContext::new();
    let (handler, mut rx) = failing_handler(&[1]);

    let _sub = ctx
        .subscriber
        .subscribe_durable("dgm.constitutional.>", "compliance-auditor", handler)
        .await
        .unwrap();

    ctx.publisher
        .publish_constitutional_assessment("I1", 0.97, true, None)
        .await
        .unwrap();

    // First delivery fails, redelivery succeeds.
    let envelope = recv_timeout(&mut rx, "redelivered assessment").await;
    assert_eq!(envelope.data["compliance_score"], 0.97);
    assert_no_message(&mut rx).await;
    assert_eq!(ctx.bus.metrics().snapshot().handler_errors, 1);
}

#[tokio::test]
async fn test_queue_group_delivers_to_one_member() {
    let ctx = MemoryContext::new();
    let (first, mut first_rx) = collecting_handler();
    let (second, mut second_rx) = collecting_handler();

    let _a = ctx
        .subscriber
        .subscribe_to_event(EventType::ImprovementValidated, first, Some("validators"))
        .await
        .unwrap();
    let _b = ctx
        .subscriber
        .subscribe_to_event(EventType::ImprovementValidated, second, Some("validators"))
        .await
        .unwrap();

    for seq in 0..4u64 {
        ctx.publisher
            .publish(
                EventType::ImprovementValidated,
                json!({ "seq": seq }),
                None,
                None,
            )
            .await
            .unwrap();
    }

    let mut seen = Vec::new();
    for _ in 0..2 {
        seen.push(recv_timeout(&mut first_rx, "queue member one").await.data["seq"].clone());
        seen.push(recv_timeout(&mut second_rx, "queue member two").await.data["seq"].clone());
    }
    assert_no_message(&mut first_rx).await;
    assert_no_message(&mut second_rx).await;

    // All four messages delivered, none twice.
    let seen: HashSet<u64> = seen.iter().map(|v| v.as_u64().unwrap()).collect();
    assert_eq!(seen.len(), 4);
}

#[tokio::test]
async fn test_publish_retries_through_transient_failures() {
    let ctx = MemoryContext::new();
    let (handler, mut rx) = collecting_handler();

    let _sub = ctx
        .subscriber
        .subscribe_to_event(EventType::BanditRewardRecorded, handler, None)
        .await
        .unwrap();

    // Two scripted failures fit inside the three-attempt budget.
    ctx.bus.fail_next_publishes(2);
    let delivered = ctx
        .publisher
        .publish(EventType::BanditRewardRecorded, json!({"reward": 0.5}), None, None)
        .await
        .unwrap();
    assert!(delivered);
    recv_timeout(&mut rx, "event after retries").await;

    let snap = ctx.bus.metrics().snapshot();
    assert_eq!(snap.events_published, 1);
    assert_eq!(snap.events_failed, 0);
}

#[tokio::test]
async fn test_publish_reports_failure_once_budget_exhausted() {
    let ctx = MemoryContext::new();

    ctx.bus.fail_next_publishes(3);
    let delivered = ctx
        .publisher
        .publish(EventType::ImprovementFailed, json!({"improvement_id": "I9"}), None, None)
        .await
        .unwrap();
    assert!(!delivered);

    let snap = ctx.bus.metrics().snapshot();
    assert_eq!(snap.events_published, 0);
    assert_eq!(snap.events_failed, 1);
    assert_eq!(
        snap.by_subject["dgm.improvement.failed"].error, 1
    );
}

#[tokio::test]
async fn test_concurrent_publishes_are_neither_lost_nor_duplicated() {
    let ctx = MemoryContext::new();
    let (handler, mut rx) = collecting_handler();

    let _sub = ctx
        .subscriber
        .subscribe_to_pattern("dgm.improvement.*", handler, None)
        .await
        .unwrap();

    let publisher = Arc::new(ctx.publisher);
    let mut tasks = Vec::new();
    for i in 0..10 {
        let publisher = publisher.clone();
        tasks.push(tokio::spawn(async move {
            publisher
                .publish_improvement_proposed(&format!("I{i}"), "parallel", None)
                .await
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap().unwrap());
    }

    let mut event_ids = HashSet::new();
    let mut improvement_ids = HashSet::new();
    for _ in 0..10 {
        let envelope = recv_timeout(&mut rx, "concurrent publish").await;
        event_ids.insert(envelope.event_id);
        improvement_ids.insert(envelope.data["improvement_id"].as_str().unwrap().to_string());
    }
    assert_no_message(&mut rx).await;
    assert_eq!(event_ids.len(), 10);
    assert_eq!(improvement_ids.len(), 10);
    assert_eq!(ctx.bus.metrics().snapshot().events_published, 10);
}

#[tokio::test]
async fn test_metrics_account_for_every_publish_and_registration() {
    let ctx = MemoryContext::new();
    let (h1, _rx1) = collecting_handler();
    let (h2, _rx2) = collecting_handler();

    let _a = ctx
        .subscriber
        .subscribe_to_event(EventType::ImprovementProposed, h1, None)
        .await
        .unwrap();
    let _b = ctx
        .subscriber
        .subscribe_to_family(EventFamily::Performance, h2, None)
        .await
        .unwrap();

    ctx.publisher
        .publish_improvement_proposed("I1", "caching", None)
        .await
        .unwrap();
    ctx.publisher
        .publish_performance_metrics(&json!({"p99_latency_ms": 3.1}), None)
        .await
        .unwrap();
    ctx.bus.fail_next_publishes(3);
    ctx.publisher
        .publish(EventType::BanditArmSelected, json!({}), None, None)
        .await
        .unwrap();

    let snap = ctx.publisher.get_performance_metrics();
    assert_eq!(snap.events_published + snap.events_failed, 3);
    assert_eq!(snap.events_published, 2);
    assert_eq!(snap.handlers_registered, 2);
    assert_eq!(snap.active_subscriptions, 2);
    assert_eq!(snap.by_type[&EventType::ImprovementProposed], 1);
    assert_eq!(snap.by_priority[&EventPriority::High], 1);
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery_and_updates_gauge() {
    let ctx = MemoryContext::new();
    let (handler, mut rx) = collecting_handler();

    let sub = ctx
        .subscriber
        .subscribe_to_event(EventType::ImprovementCompleted, handler, None)
        .await
        .unwrap();
    assert_eq!(sub.subject_pattern(), "dgm.improvement.completed");

    ctx.publisher
        .publish(EventType::ImprovementCompleted, json!({"seq": 1}), None, None)
        .await
        .unwrap();
    recv_timeout(&mut rx, "event before unsubscribe").await;

    sub.unsubscribe().await.unwrap();

    ctx.publisher
        .publish(EventType::ImprovementCompleted, json!({"seq": 2}), None, None)
        .await
        .unwrap();
    assert_no_message(&mut rx).await;
    assert_eq!(ctx.bus.metrics().snapshot().active_subscriptions, 0);
}

#[tokio::test]
async fn test_malformed_payloads_dropped_and_counted() {
    let ctx = MemoryContext::new();
    let (handler, mut rx) = collecting_handler();

    let _sub = ctx
        .subscriber
        .subscribe_to_pattern("dgm.>", handler, None)
        .await
        .unwrap();

    // Not JSON at all, then valid JSON missing required envelope fields.
    assert!(!ctx.bus.inject_raw(b"{not json"));
    assert!(!ctx.bus.inject_raw(br#"{"event_type": "improvement.proposed"}"#));
    assert_no_message(&mut rx).await;

    let snap = ctx.bus.metrics().snapshot();
    assert_eq!(snap.decode_failures, 2);
    assert_eq!(snap.messages_received, 0);

    // A well-formed payload on the same path still reaches the handler.
    let envelope = EventEnvelope::new(
        EventType::ImprovementProposed,
        TEST_SOURCE,
        improvement_payload("I1"),
    );
    assert!(ctx.bus.inject_raw(&envelope.to_bytes().unwrap()));
    let received = recv_timeout(&mut rx, "decoded payload").await;
    assert_eq!(received.event_id, envelope.event_id);
    assert_eq!(ctx.bus.metrics().snapshot().decode_failures, 2);
}

#[tokio::test]
async fn test_invalid_patterns_rejected_before_registration() {
    let ctx = MemoryContext::new();

    for pattern in ["dgm.>.improvement", "dgm..proposed", ""] {
        let (handler, _rx) = collecting_handler();
        let result = ctx
            .subscriber
            .subscribe_to_pattern(pattern, handler, None)
            .await;
        assert!(result.is_err(), "pattern {pattern:?} should be rejected");
    }
    assert_eq!(ctx.bus.metrics().snapshot().handlers_registered, 0);
}

#[tokio::test]
async fn test_publish_after_shutdown_reports_undelivered() {
    let ctx = MemoryContext::new();
    ctx.bus.shutdown();

    let delivered = ctx
        .publisher
        .publish_improvement_proposed("I1", "caching", None)
        .await
        .unwrap();
    assert!(!delivered);

    let (handler, _rx) = collecting_handler();
    assert!(ctx
        .subscriber
        .subscribe_to_event(EventType::ImprovementProposed, handler, None)
        .await
        .is_err());
}
