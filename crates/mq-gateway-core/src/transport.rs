//! Boundary to the queueing transport.
//!
//! [`QueueTransport`] mirrors the native client's primitives: connect, open,
//! put, get, close, disconnect and the unit-of-work calls. Every call is
//! asynchronous and fails with a [`TransportError`] carrying the transport's
//! reason code. Handles returned by the transport are owned values; the
//! [`TransportSession`](crate::session::TransportSession) holding them is the
//! only code that passes them back.

use crate::config::{ConnectionConfig, Credentials, TlsConfig};
use crate::error::TransportError;
use crate::message::{CorrelationId, MessageEnvelope, MessageId, OutboundMessage};
use async_trait::async_trait;

#[cfg(test)]
#[path = "transport_tests.rs"]
mod tests;

// ============================================================================
// Handles
// ============================================================================

/// Opaque handle to an established queue manager connection.
#[derive(Debug, PartialEq, Eq)]
pub struct ConnectionHandle {
    id: u64,
}

impl ConnectionHandle {
    pub fn new(id: u64) -> Self {
        Self { id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Opaque handle to an open queue, topic or subscription.
#[derive(Debug, PartialEq, Eq)]
pub struct ObjectHandle {
    id: u64,
    connection_id: u64,
    name: String,
}

impl ObjectHandle {
    pub fn new(id: u64, connection_id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            connection_id,
            name: name.into(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// Resolved object name. For dynamic queues this is the name the
    /// transport assigned on open.
    pub fn name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// Call Parameters
// ============================================================================

/// Parameters for establishing a connection
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionParams {
    pub queue_manager: String,
    /// Endpoint list in `host(port),host2(port2)` form
    pub connection_name: String,
    pub channel: String,
    pub credentials: Credentials,
    pub tls: Option<TlsConfig>,
}

impl From<&ConnectionConfig> for ConnectionParams {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            queue_manager: config.queue_manager.clone(),
            connection_name: config.connection_name(),
            channel: config.channel.clone(),
            credentials: config.credentials.clone(),
            tls: config.tls.clone(),
        }
    }
}

/// How a queue is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenIntent {
    Output,
    Input,
    InputOutput,
}

/// Object to open
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectDescriptor {
    /// A named local or alias queue
    Queue { name: String, intent: OpenIntent },
    /// A topic opened for publishing
    Topic { topic_string: String },
    /// A temporary queue created from a model; `name_pattern` may end in `*`
    DynamicQueue { model: String, name_pattern: String },
}

impl ObjectDescriptor {
    pub fn queue(name: impl Into<String>, intent: OpenIntent) -> Self {
        Self::Queue {
            name: name.into(),
            intent,
        }
    }

    pub fn topic(topic_string: impl Into<String>) -> Self {
        Self::Topic {
            topic_string: topic_string.into(),
        }
    }

    /// Name or topic string for log output
    pub fn target(&self) -> &str {
        match self {
            Self::Queue { name, .. } => name,
            Self::Topic { topic_string } => topic_string,
            Self::DynamicQueue { model, .. } => model,
        }
    }
}

/// Options for a put call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PutOptions {
    /// Defer visibility until the connection's unit of work is committed
    pub syncpoint: bool,
}

impl PutOptions {
    pub fn syncpoint() -> Self {
        Self { syncpoint: true }
    }
}

/// Selection applied to a get call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageFilter {
    MessageId(MessageId),
    CorrelationId(CorrelationId),
    Property { name: String, value: String },
}

impl MessageFilter {
    pub fn property(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Property {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Check whether an envelope satisfies this filter
    pub fn matches(&self, envelope: &MessageEnvelope) -> bool {
        match self {
            Self::MessageId(id) => envelope.message_id == *id,
            Self::CorrelationId(id) => envelope.correlation_id == *id,
            Self::Property { name, value } => envelope.property(name) == Some(value.as_str()),
        }
    }
}

/// Options for a get call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetOptions {
    /// Hold the message in the unit of work until commit or rollback
    pub syncpoint: bool,
    pub filter: Option<MessageFilter>,
}

impl GetOptions {
    pub fn with_syncpoint(mut self) -> Self {
        self.syncpoint = true;
        self
    }

    pub fn with_filter(mut self, filter: Option<MessageFilter>) -> Self {
        self.filter = filter;
        self
    }
}

// ============================================================================
// Transport Trait
// ============================================================================

/// Asynchronous queueing transport client.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Establish a connection to the queue manager
    async fn connect(&self, params: &ConnectionParams) -> Result<ConnectionHandle, TransportError>;

    /// Open a queue, topic or dynamic queue
    async fn open(
        &self,
        connection: &ConnectionHandle,
        descriptor: &ObjectDescriptor,
    ) -> Result<ObjectHandle, TransportError>;

    /// Create a managed, non-durable subscription; the returned handle
    /// receives publications and removes the subscription when closed
    async fn subscribe(
        &self,
        connection: &ConnectionHandle,
        topic_string: &str,
    ) -> Result<ObjectHandle, TransportError>;

    /// Put one message. Fails with a warning-class reason when a publication
    /// matched no subscriptions; the call has still completed.
    async fn put(
        &self,
        object: &ObjectHandle,
        message: &OutboundMessage,
        options: &PutOptions,
    ) -> Result<MessageId, TransportError>;

    /// Get one message without waiting; fails with `NoMessageAvailable` when empty
    async fn get(
        &self,
        object: &ObjectHandle,
        options: &GetOptions,
    ) -> Result<MessageEnvelope, TransportError>;

    async fn close(&self, object: ObjectHandle) -> Result<(), TransportError>;

    async fn disconnect(&self, connection: ConnectionHandle) -> Result<(), TransportError>;

    async fn commit(&self, connection: &ConnectionHandle) -> Result<(), TransportError>;

    async fn rollback(&self, connection: &ConnectionHandle) -> Result<(), TransportError>;
}
