//! Common test utilities for mq-gateway integration tests
//!
//! This module provides:
//! - A gateway over a fresh in-memory transport with one-second poll cadence
//! - Helpers for decoding the gateway message documents

use mq_gateway_core::{Gateway, GatewayConfig, GatewayMessage, InMemoryTransport, MessageEnvelope};
use std::sync::Arc;

/// Configuration whose subscribers and correlators poll exactly once per second
#[allow(dead_code)]
pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.polling.subscriber_min_delay_ms = 1000;
    config.polling.subscriber_max_delay_ms = 1000;
    config.polling.reply_interval_ms = 1000;
    config
}

/// Gateway and the transport behind it
#[allow(dead_code)]
pub fn create_gateway(config: GatewayConfig) -> (Arc<InMemoryTransport>, Arc<Gateway>) {
    let transport = Arc::new(InMemoryTransport::new());
    let gateway = Gateway::new(transport.clone(), config).expect("valid test configuration");
    (transport, Arc::new(gateway))
}

/// The `Message` field of a gateway document
#[allow(dead_code)]
pub fn message_text(envelope: &MessageEnvelope) -> String {
    GatewayMessage::from_envelope(envelope)
        .expect("body is a gateway message document")
        .message
}

/// The `Count` field of a gateway document
#[allow(dead_code)]
pub fn message_count(envelope: &MessageEnvelope) -> String {
    GatewayMessage::from_envelope(envelope)
        .expect("body is a gateway message document")
        .count
}
