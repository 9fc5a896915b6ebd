//! # MQ Gateway Core
//!
//! Session and correlation layer of the messaging gateway.
//!
//! This crate multiplexes three interaction patterns, point-to-point,
//! publish/subscribe and request/response, onto a small set of reusable
//! transport sessions against a queue manager.
//!
//! ## Architecture
//!
//! - [`transport`] defines the [`QueueTransport`] boundary; native clients
//!   implement it and [`providers::InMemoryTransport`] is a process-local broker
//! - [`session`] owns one connection and its handles under a single lock
//! - [`patterns`] builds the producer, consumer, publisher, subscriber,
//!   requestor and responder façades on sessions
//! - [`correlation`] and [`quarantine`] hold the reply matching and
//!   poison-message rules
//! - [`registry`] tracks live façades per application with a capacity bound
//! - [`gateway`] is the controller-facing entry point
//!
//! ## Usage
//!
//! ```rust
//! use mq_gateway_core::{Gateway, GatewayConfig, InMemoryTransport};
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let gateway = Gateway::new(Arc::new(InMemoryTransport::new()), GatewayConfig::default()).unwrap();
//!
//! gateway.put("app-1", "DEV.QUEUE.1", "hello", 2, &HashMap::new()).await.unwrap();
//! let messages = gateway.get("app-1", "DEV.QUEUE.1", 10, None).await.unwrap();
//! assert_eq!(messages.len(), 2);
//!
//! gateway.shutdown().await;
//! # });
//! ```

pub mod config;
pub mod correlation;
pub mod error;
pub mod gateway;
pub mod message;
pub mod patterns;
pub mod poller;
pub mod providers;
pub mod quarantine;
pub mod registry;
pub mod session;
pub mod transport;

pub use config::GatewayConfig;
pub use correlation::{Correlator, DynamicReplyDescriptor, ReplyFilter};
pub use error::{
    ConfigurationError, GatewayError, ReasonCode, SessionError, TransportError, ValidationError,
};
pub use gateway::{normalize_quantity, Gateway, LatestMessage, SubscribeOutcome};
pub use message::{
    CorrelationId, DestinationName, GatewayMessage, MessageEnvelope, MessageFormat, MessageId,
    MessageType, OutboundMessage, Payload, TopicName,
};
pub use patterns::{
    Consumer, ProcessOutcome, Producer, PublishReport, Publisher, Requestor, Responder, Subscriber,
    SubscriberState,
};
pub use providers::InMemoryTransport;
pub use quarantine::{QuarantineDecision, QuarantinePolicy};
pub use registry::{BoundedRegistry, FacadeKind, Identified};
pub use session::{OpenKind, SessionFactory, TransportSession};
pub use transport::{MessageFilter, QueueTransport};

/// Standard result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;
