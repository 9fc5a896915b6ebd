//! Error types for transport, session and façade operations.

use crate::registry::FacadeKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Transport Reason Codes
// ============================================================================

/// Reason code reported by the queueing transport alongside a failed call.
///
/// The numeric values follow the queue manager's reason code table so they
/// can be matched against transport logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReasonCode {
    /// Queue or subscription is empty (not an error for callers)
    NoMessageAvailable,
    /// Publication had no matching subscriptions (warning class)
    NoSubscribersMatched,
    /// Connection to the queue manager was lost
    ConnectionBroken,
    /// Credentials were rejected
    NotAuthorized,
    /// Queue, model queue or topic does not exist
    UnknownObjectName,
    /// Object handle is closed or was never opened
    ObjectHandleInvalid,
    /// Connection handle is closed or was never connected
    ConnectionHandleInvalid,
    /// Message selector could not be parsed
    SelectorSyntaxError,
    /// Any other transport reason code
    Other(u32),
}

impl ReasonCode {
    /// Numeric reason code.
    pub fn code(&self) -> u32 {
        match self {
            Self::NoMessageAvailable => 2033,
            Self::NoSubscribersMatched => 2550,
            Self::ConnectionBroken => 2009,
            Self::NotAuthorized => 2035,
            Self::UnknownObjectName => 2085,
            Self::ObjectHandleInvalid => 2019,
            Self::ConnectionHandleInvalid => 2018,
            Self::SelectorSyntaxError => 2459,
            Self::Other(code) => *code,
        }
    }

    /// Warning-class codes complete the call; the operation took effect.
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::NoSubscribersMatched)
    }

    /// Codes after which the connection and its handles must be discarded.
    pub fn invalidates_connection(&self) -> bool {
        matches!(
            self,
            Self::ConnectionBroken | Self::ConnectionHandleInvalid | Self::NotAuthorized
        )
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Other(code) => write!(f, "MQRC {}", code),
            other => write!(f, "MQRC {} ({:?})", other.code(), other),
        }
    }
}

// ============================================================================
// Error Enums
// ============================================================================

/// Failure reported by a [`QueueTransport`](crate::transport::QueueTransport) call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{reason}: {message}")]
pub struct TransportError {
    pub reason: ReasonCode,
    pub message: String,
}

impl TransportError {
    /// Create a transport error with a reason code and detail message
    pub fn new(reason: ReasonCode, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }

    /// Shortcut for the empty-queue condition
    pub fn no_message() -> Self {
        Self::new(ReasonCode::NoMessageAvailable, "no message available")
    }

    /// True when the failure only means "nothing to read"
    pub fn is_no_message(&self) -> bool {
        self.reason == ReasonCode::NoMessageAvailable
    }
}

/// Errors raised by a [`TransportSession`](crate::session::TransportSession).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session is not connected")]
    NotConnected,

    #[error("Session has no open object for {purpose}")]
    NotOpen { purpose: String },

    #[error("Session is unhealthy and must be cleaned up before reuse")]
    Unhealthy,

    #[error("Connect to '{connection_name}' failed: {source}")]
    ConnectFailed {
        connection_name: String,
        #[source]
        source: TransportError,
    },

    #[error("Open of '{target}' failed: {source}")]
    OpenFailed {
        target: String,
        #[source]
        source: TransportError,
    },

    #[error("Transport call failed: {0}")]
    Transport(#[from] TransportError),
}

impl SessionError {
    /// Underlying transport reason, when there is one
    pub fn reason(&self) -> Option<ReasonCode> {
        match self {
            Self::ConnectFailed { source, .. } | Self::OpenFailed { source, .. } => {
                Some(source.reason)
            }
            Self::Transport(source) => Some(source.reason),
            _ => None,
        }
    }
}

/// Error surfaced by the pattern façades and the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Registry for {kind} is full ({capacity} entries); request shed")]
    RegistryFull { kind: FacadeKind, capacity: usize },

    #[error("No {kind} registered for application '{app_id}'")]
    NotFound { kind: FacadeKind, app_id: String },

    #[error("Unknown reply destination: {name}")]
    UnknownReplyDestination { name: String },

    #[error("No pending request expects a reply on '{reply_queue}'")]
    NoPendingRequest { reply_queue: String },

    #[error("Message encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

impl GatewayError {
    /// Check if error is transient and the operation may be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Session(SessionError::NotConnected) => true,
            Self::Session(SessionError::Unhealthy) => true,
            Self::Session(SessionError::NotOpen { .. }) => false,
            Self::Session(e) => matches!(
                e.reason(),
                Some(ReasonCode::ConnectionBroken)
                    | Some(ReasonCode::ConnectionHandleInvalid)
                    | Some(ReasonCode::ObjectHandleInvalid)
                    | Some(ReasonCode::Other(_))
            ),
            Self::RegistryFull { .. } => true,
            Self::NotFound { .. } => false,
            Self::UnknownReplyDestination { .. } => false,
            Self::NoPendingRequest { .. } => false,
            Self::Encoding(_) => false,
            Self::Validation(_) => false,
            Self::Configuration(_) => false,
        }
    }

    /// Get suggested retry delay
    pub fn retry_after(&self) -> Option<Duration> {
        if !self.is_transient() {
            return None;
        }
        match self {
            Self::RegistryFull { .. } => Some(Duration::from_secs(1)),
            _ => Some(Duration::from_secs(5)),
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    #[error("Configuration parsing failed: {message}")]
    Parsing { message: String },
}

/// Validation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
