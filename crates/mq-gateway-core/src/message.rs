//! Message types for gateway operations including core domain identifiers.

use crate::error::ValidationError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// Length in bytes of message and correlation identifiers.
pub const IDENTIFIER_LENGTH: usize = 24;

/// Property carrying the requestor's session token on request messages.
pub const SESSION_TOKEN_PROPERTY: &str = "sessionID";

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Validated queue name following the queue manager's object naming rules
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DestinationName(String);

impl DestinationName {
    /// Maximum object name length accepted by the queue manager
    pub const MAX_LENGTH: usize = 48;

    /// Create new destination name with validation
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        if name.is_empty() || name.len() > Self::MAX_LENGTH {
            return Err(ValidationError::OutOfRange {
                field: "queue_name".to_string(),
                message: format!("must be 1-{} characters", Self::MAX_LENGTH),
            });
        }

        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '/' | '%'))
        {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "only ASCII alphanumeric, '.', '_', '/' and '%' allowed".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Get destination name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DestinationName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DestinationName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Validated topic string (the part after the configured topic prefix)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicName(String);

impl TopicName {
    pub const MAX_LENGTH: usize = 256;

    /// Create new topic name with validation
    pub fn new(topic: impl Into<String>) -> Result<Self, ValidationError> {
        let topic = topic.into();
        if topic.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "topic".to_string(),
            });
        }

        if topic.len() > Self::MAX_LENGTH {
            return Err(ValidationError::OutOfRange {
                field: "topic".to_string(),
                message: format!("maximum {} characters", Self::MAX_LENGTH),
            });
        }

        // Wildcards belong to subscriptions administered elsewhere
        if topic.contains('#') || topic.contains('+') {
            return Err(ValidationError::InvalidFormat {
                field: "topic".to_string(),
                message: "wildcard characters are not allowed".to_string(),
            });
        }

        Ok(Self(topic))
    }

    /// Get topic as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TopicName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn parse_identifier(field: &str, s: &str) -> Result<String, ValidationError> {
    if s.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    let bytes = hex::decode(s).map_err(|e| ValidationError::InvalidFormat {
        field: field.to_string(),
        message: e.to_string(),
    })?;

    if bytes.len() != IDENTIFIER_LENGTH {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            message: format!("must be {} bytes", IDENTIFIER_LENGTH),
        });
    }

    Ok(s.to_ascii_lowercase())
}

/// Transport-assigned message identifier, rendered as lowercase hex
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        let bytes: [u8; IDENTIFIER_LENGTH] = rand::random();
        Self(hex::encode(bytes))
    }

    /// Get message ID as hex string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_identifier("message_id", s).map(Self)
    }
}

/// Correlation identifier linking a reply to its request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// The "no correlation" value: all zero bytes
    pub fn none() -> Self {
        Self(hex::encode([0u8; IDENTIFIER_LENGTH]))
    }

    /// Check whether this is the all-zero identifier
    pub fn is_none(&self) -> bool {
        self.0.bytes().all(|b| b == b'0')
    }

    /// Get correlation ID as hex string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::none()
    }
}

impl From<&MessageId> for CorrelationId {
    fn from(id: &MessageId) -> Self {
        Self(id.as_str().to_string())
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CorrelationId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_identifier("correlation_id", s).map(Self)
    }
}

// ============================================================================
// Message Descriptors
// ============================================================================

/// Body format as recorded in the message descriptor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageFormat {
    /// Character data
    #[default]
    String,
    /// Opaque bytes
    Binary,
}

/// Message type as recorded in the message descriptor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    #[default]
    Datagram,
    Request,
    Reply,
}

/// Decoded view of a message body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(serde_json::Value),
    /// UTF-8 text that is not valid JSON
    Text(String),
    Binary(Bytes),
}

impl Payload {
    /// Render the payload as text for logging and display
    pub fn to_text(&self) -> String {
        match self {
            Self::Json(value) => value.to_string(),
            Self::Text(text) => text.clone(),
            Self::Binary(bytes) => hex::encode(bytes),
        }
    }
}

/// A message retrieved from the transport with its descriptor fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub body: Bytes,
    pub format: MessageFormat,
    pub message_type: MessageType,
    pub message_id: MessageId,
    pub correlation_id: CorrelationId,
    pub reply_to: Option<String>,
    pub properties: HashMap<String, String>,
    pub backout_count: u32,
    pub put_time: DateTime<Utc>,
}

impl MessageEnvelope {
    /// Decode the body. Never fails: malformed JSON degrades to text.
    pub fn payload(&self) -> Payload {
        if self.format == MessageFormat::Binary {
            return Payload::Binary(self.body.clone());
        }

        match std::str::from_utf8(&self.body) {
            Ok(text) => match serde_json::from_str::<serde_json::Value>(text) {
                Ok(value) => Payload::Json(value),
                Err(_) => Payload::Text(text.to_string()),
            },
            Err(_) => Payload::Binary(self.body.clone()),
        }
    }

    /// Body as UTF-8 text, if it is text
    pub fn body_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Look up a message property
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    /// Session token carried by a request, if any
    pub fn session_token(&self) -> Option<&str> {
        self.property(SESSION_TOKEN_PROPERTY)
    }

    /// Build an outbound copy of this message for forwarding.
    ///
    /// The transport assigns a fresh message id on put; correlation id,
    /// reply-to and properties are carried over.
    pub fn to_outbound(&self) -> OutboundMessage {
        OutboundMessage {
            body: self.body.clone(),
            format: self.format,
            message_type: self.message_type,
            correlation_id: Some(self.correlation_id.clone()),
            reply_to: self.reply_to.clone(),
            properties: self.properties.clone(),
        }
    }
}

/// A message to be put through the transport
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OutboundMessage {
    pub body: Bytes,
    pub format: MessageFormat,
    pub message_type: MessageType,
    pub correlation_id: Option<CorrelationId>,
    pub reply_to: Option<String>,
    pub properties: HashMap<String, String>,
}

impl OutboundMessage {
    /// Create a character-data message
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: Bytes::from(body.into()),
            ..Self::default()
        }
    }

    /// Create a binary message
    pub fn binary(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            format: MessageFormat::Binary,
            ..Self::default()
        }
    }

    /// Set message type
    pub fn with_message_type(mut self, message_type: MessageType) -> Self {
        self.message_type = message_type;
        self
    }

    /// Set the destination the reply should be sent to
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Set correlation ID
    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Add a message property
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Add several message properties
    pub fn with_properties(mut self, properties: &HashMap<String, String>) -> Self {
        self.properties
            .extend(properties.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }
}

// ============================================================================
// Gateway Message Document
// ============================================================================

/// JSON document put by producers and publishers, one per requested copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayMessage {
    #[serde(rename = "Message")]
    pub message: String,
    #[serde(rename = "Count")]
    pub count: String,
    #[serde(rename = "Sent")]
    pub sent: String,
}

impl GatewayMessage {
    /// Document for copy `index` (1-based) of `quantity`
    pub fn new(message: &str, index: u32, quantity: u32) -> Self {
        Self {
            message: message.to_string(),
            count: format!("{} of {}", index, quantity),
            sent: Utc::now().to_rfc3339(),
        }
    }

    /// Serialize into an outbound character-data message
    pub fn to_outbound(&self) -> Result<OutboundMessage, serde_json::Error> {
        Ok(OutboundMessage::text(serde_json::to_string(self)?))
    }

    /// Parse from a received envelope; `None` if the body is not this document
    pub fn from_envelope(envelope: &MessageEnvelope) -> Option<Self> {
        serde_json::from_slice(&envelope.body).ok()
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
