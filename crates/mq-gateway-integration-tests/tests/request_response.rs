//! Integration tests for request/response
//!
//! These tests verify:
//! - Replies are correlated back to the requestor's dynamic queue
//! - Session tokens partition requests between responders
//! - Failing requests are backed out, then quarantined

mod common;

use common::{create_gateway, message_count, message_text, test_config};
use mq_gateway_core::{GatewayMessage, MessageEnvelope, ProcessOutcome};
use std::time::Duration;

fn shout(request: &MessageEnvelope) -> Result<String, String> {
    GatewayMessage::from_envelope(request)
        .map(|document| format!("{} {}", document.message.to_uppercase(), document.count))
        .ok_or_else(|| "not a gateway message".to_string())
}

#[tokio::test(start_paused = true)]
async fn test_every_request_gets_its_reply() {
    let (transport, gateway) = create_gateway(test_config());

    let descriptor = gateway
        .request("client", "REQUESTS", "ping", 3, None)
        .await
        .unwrap();
    assert_eq!(descriptor.request_ids.len(), 3);
    assert!(transport.queue_exists(&descriptor.name));

    for _ in 0..3 {
        let outcome = gateway
            .process_next_request("server", "REQUESTS", None, shout)
            .await
            .unwrap();
        assert!(matches!(outcome, ProcessOutcome::Replied(_)));
    }

    tokio::time::sleep(Duration::from_millis(1500)).await;

    let reply = gateway
        .reply_for("client", &descriptor.name)
        .await
        .unwrap()
        .unwrap();
    assert!(message_text(&reply).starts_with("PING "));
    assert_eq!(message_count(&reply), "1 of 1");
    // Every request was answered, so the reply queue is gone
    assert!(!transport.queue_exists(&descriptor.name));
}

#[tokio::test(start_paused = true)]
async fn test_session_tokens_partition_requests() {
    let (_transport, gateway) = create_gateway(test_config());

    let alpha = gateway
        .request("client-a", "REQUESTS", "alpha", 1, Some("alpha"))
        .await
        .unwrap();
    let beta = gateway
        .request("client-b", "REQUESTS", "beta", 1, Some("beta"))
        .await
        .unwrap();

    let outcome = gateway
        .process_next_request("server-alpha", "REQUESTS", Some("alpha"), shout)
        .await
        .unwrap();
    assert!(matches!(outcome, ProcessOutcome::Replied(_)));

    // The alpha responder never sees the beta request
    let outcome = gateway
        .process_next_request("server-alpha", "REQUESTS", Some("alpha"), shout)
        .await
        .unwrap();
    assert_eq!(outcome, ProcessOutcome::NoRequest);

    tokio::time::sleep(Duration::from_millis(1500)).await;

    let reply = gateway
        .reply_for("client-a", &alpha.name)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message_text(&reply), "ALPHA 1 of 1");
    assert!(gateway
        .reply_for("client-b", &beta.name)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test(start_paused = true)]
async fn test_manual_request_reply_cycle() {
    let (_transport, gateway) = create_gateway(test_config());
    let descriptor = gateway
        .request("client", "REQUESTS", "ping", 1, None)
        .await
        .unwrap();

    let request = gateway
        .next_request("server", "REQUESTS", None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(request.reply_to.as_deref(), Some(descriptor.name.as_str()));
    gateway
        .respond("server", &descriptor.name, "pong")
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    let reply = gateway
        .reply_for("client", &descriptor.name)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message_text(&reply), "pong");
    assert_eq!(reply.correlation_id.as_str(), request.message_id.as_str());
}

#[tokio::test(start_paused = true)]
async fn test_poison_request_is_quarantined() {
    let (transport, gateway) = create_gateway(test_config());
    let threshold = gateway.config().limits.backout_threshold;
    let quarantine = gateway.config().destinations.quarantine_queue.clone();
    gateway
        .request("client", "REQUESTS", "garbage", 1, None)
        .await
        .unwrap();

    for attempt in 0..threshold {
        let outcome = gateway
            .process_next_request("server", "REQUESTS", None, |_| {
                Err::<String, _>("cannot parse")
            })
            .await
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::RolledBack, "attempt {}", attempt);
    }

    let outcome = gateway
        .process_next_request("server", "REQUESTS", None, |_| Err::<String, _>("cannot parse"))
        .await
        .unwrap();
    assert_eq!(outcome, ProcessOutcome::Quarantined);
    assert_eq!(transport.queue_depth("REQUESTS"), 0);
    assert_eq!(transport.messages(&quarantine).len(), 1);
}
