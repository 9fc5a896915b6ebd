//! Transport sessions: one connection plus the handles opened on it.
//!
//! A [`TransportSession`] owns exactly one connection handle, at most one
//! primary handle (queue, topic or subscription) and any number of dynamic
//! queue handles. All lifecycle state sits behind a single async lock, so a
//! connect-then-open sequence started by one caller can never interleave with
//! another caller's sequence on the same session.
//!
//! # Health
//!
//! A failed connect or open, or any transport call failing with a reason that
//! invalidates the connection, marks the session unhealthy. An unhealthy
//! session releases its handles before the next connect, so callers recover
//! by simply retrying the operation.
//!
//! # Example
//!
//! ```rust
//! use mq_gateway_core::config::GatewayConfig;
//! use mq_gateway_core::message::OutboundMessage;
//! use mq_gateway_core::providers::InMemoryTransport;
//! use mq_gateway_core::session::{OpenKind, SessionFactory};
//! use mq_gateway_core::transport::GetOptions;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let factory = SessionFactory::new(
//!     Arc::new(InMemoryTransport::new()),
//!     Arc::new(GatewayConfig::default()),
//! );
//!
//! let session = factory.create_session();
//! session.ensure_open(OpenKind::Put, "DEV.QUEUE.1").await.unwrap();
//! session.put(&OutboundMessage::text("hello"), false).await.unwrap();
//! session.cleanup().await.unwrap();
//!
//! let reader = factory.create_session();
//! reader.ensure_open(OpenKind::Get, "DEV.QUEUE.1").await.unwrap();
//! let messages = reader.get(10, &GetOptions::default()).await.unwrap();
//! assert_eq!(messages.len(), 1);
//! reader.cleanup().await.unwrap();
//! # });
//! ```

use crate::config::GatewayConfig;
use crate::error::{SessionError, TransportError};
use crate::message::{MessageEnvelope, MessageId, OutboundMessage};
use crate::transport::{
    ConnectionHandle, ConnectionParams, GetOptions, ObjectDescriptor, ObjectHandle, OpenIntent,
    PutOptions, QueueTransport,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;

// ============================================================================
// Session Factory
// ============================================================================

/// Creates sessions sharing one transport and one configuration.
#[derive(Clone)]
pub struct SessionFactory {
    transport: Arc<dyn QueueTransport>,
    config: Arc<GatewayConfig>,
}

impl SessionFactory {
    pub fn new(transport: Arc<dyn QueueTransport>, config: Arc<GatewayConfig>) -> Self {
        Self { transport, config }
    }

    /// Create a new, unconnected session
    pub fn create_session(&self) -> TransportSession {
        TransportSession::new(self.transport.clone(), self.config.clone())
    }

    pub fn config(&self) -> &Arc<GatewayConfig> {
        &self.config
    }

    pub fn transport(&self) -> &Arc<dyn QueueTransport> {
        &self.transport
    }
}

// ============================================================================
// Open Kinds
// ============================================================================

/// Purpose a session's primary handle is opened for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenKind {
    /// Queue opened for output
    Put,
    /// Queue opened for input
    Get,
    /// Topic opened for publishing; the target is prefixed with the configured topic prefix
    Publish,
    /// Queue opened for output plus a dynamic reply queue created from the model
    DynamicPut,
    /// Request queue opened for input by a responder
    DynamicReply,
}

impl OpenKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Put => "put",
            Self::Get => "get",
            Self::Publish => "publish",
            Self::DynamicPut => "dynamic put",
            Self::DynamicReply => "dynamic reply",
        }
    }
}

impl std::fmt::Display for OpenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the primary handle is currently bound to
#[derive(Debug, Clone, PartialEq, Eq)]
enum Binding {
    Opened { kind: OpenKind, target: String },
    Subscribed { topic: String },
}

impl Binding {
    fn target(&self) -> &str {
        match self {
            Self::Opened { target, .. } => target,
            Self::Subscribed { topic } => topic,
        }
    }
}

// ============================================================================
// Transport Session
// ============================================================================

struct SessionState {
    connection: Option<ConnectionHandle>,
    primary: Option<ObjectHandle>,
    dynamic: Vec<ObjectHandle>,
    healthy: bool,
    binding: Option<Binding>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            connection: None,
            primary: None,
            dynamic: Vec::new(),
            healthy: true,
            binding: None,
        }
    }

    fn is_ready(&self) -> bool {
        self.healthy
            && self.connection.is_some()
            && (self.primary.is_some() || !self.dynamic.is_empty())
    }
}

/// One logical connection-plus-handle set to the queue manager.
pub struct TransportSession {
    id: Uuid,
    transport: Arc<dyn QueueTransport>,
    config: Arc<GatewayConfig>,
    state: Mutex<SessionState>,
}

impl TransportSession {
    pub fn new(transport: Arc<dyn QueueTransport>, config: Arc<GatewayConfig>) -> Self {
        Self {
            id: Uuid::new_v4(),
            transport,
            config,
            state: Mutex::new(SessionState::new()),
        }
    }

    /// Instance id attached to this session's log events
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Connect if not already connected.
    ///
    /// Idempotent while the session is healthy. An unhealthy session first
    /// releases whatever handles it still holds. A failure marks the session
    /// unhealthy and is returned to the caller.
    pub async fn connect(&self) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;
        self.connect_locked(&mut state).await
    }

    /// Open the primary handle on an established connection.
    ///
    /// Fails with [`SessionError::NotConnected`] when [`connect`](Self::connect)
    /// has not succeeded; the session never reconnects implicitly here. Any
    /// primary handle already open is closed first.
    ///
    /// # Arguments
    ///
    /// * `kind` - What the handle is used for
    /// * `target` - Queue name, or topic for [`OpenKind::Publish`]
    ///
    /// # Returns
    ///
    /// The resolved name: the dynamic queue's assigned name for
    /// [`OpenKind::DynamicPut`], otherwise the opened object's name.
    pub async fn open(&self, kind: OpenKind, target: &str) -> Result<String, SessionError> {
        let mut state = self.state.lock().await;
        if state.connection.is_none() {
            return Err(SessionError::NotConnected);
        }
        if !state.healthy {
            return Err(SessionError::Unhealthy);
        }
        self.open_locked(&mut state, kind, target).await
    }

    /// Connect and open in one critical section, reusing the current primary
    /// handle when it is already bound to `kind` and `target`.
    ///
    /// For [`OpenKind::DynamicPut`] every call creates a new dynamic queue
    /// and returns its name, while the request queue handle is reused.
    pub async fn ensure_open(&self, kind: OpenKind, target: &str) -> Result<String, SessionError> {
        let mut state = self.state.lock().await;
        self.connect_locked(&mut state).await?;

        let wanted = Binding::Opened {
            kind,
            target: target.to_string(),
        };
        if state.binding.as_ref() == Some(&wanted) && state.primary.is_some() {
            if kind == OpenKind::DynamicPut {
                return self.open_dynamic_locked(&mut state).await;
            }
            return Ok(state
                .primary
                .as_ref()
                .map(|handle| handle.name().to_string())
                .unwrap_or_default());
        }

        self.open_locked(&mut state, kind, target).await
    }

    /// Connect if needed and create a managed non-durable subscription on
    /// `topic`, replacing any primary handle
    pub async fn subscribe(&self, topic: &str) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;
        self.connect_locked(&mut state).await?;
        self.close_primary_locked(&mut state).await;

        let topic_string = self.config.destinations.topic_string(topic);
        let result = match state.connection.as_ref() {
            Some(connection) => self.transport.subscribe(connection, &topic_string).await,
            None => return Err(SessionError::NotConnected),
        };

        match result {
            Ok(handle) => {
                info!(session_id = %self.id, topic = %topic_string, "Subscription created");
                state.primary = Some(handle);
                state.binding = Some(Binding::Subscribed {
                    topic: topic.to_string(),
                });
                Ok(())
            }
            Err(source) => {
                warn!(session_id = %self.id, topic = %topic_string, error = %source, "Subscribe failed");
                state.healthy = false;
                self.release_locked(&mut state).await;
                Err(SessionError::OpenFailed {
                    target: topic_string,
                    source,
                })
            }
        }
    }

    /// Put one message on the primary handle.
    ///
    /// With `syncpoint` the message becomes visible only on [`commit`](Self::commit).
    pub async fn put(
        &self,
        message: &OutboundMessage,
        syncpoint: bool,
    ) -> Result<MessageId, SessionError> {
        let mut state = self.state.lock().await;
        let options = PutOptions { syncpoint };
        let result = match state.primary.as_ref() {
            Some(handle) => self.transport.put(handle, message, &options).await,
            None => {
                return Err(SessionError::NotOpen {
                    purpose: "put".to_string(),
                })
            }
        };
        self.observe(&mut state, result)
    }

    /// Put one message to `target` on this session's connection, opening and
    /// closing the queue around the put. Used for replies and quarantine so
    /// the put joins the connection's unit of work.
    pub async fn put_to(
        &self,
        target: &str,
        message: &OutboundMessage,
        syncpoint: bool,
    ) -> Result<MessageId, SessionError> {
        let mut state = self.state.lock().await;
        let opened = match state.connection.as_ref() {
            Some(connection) => {
                self.transport
                    .open(connection, &ObjectDescriptor::queue(target, OpenIntent::Output))
                    .await
            }
            None => return Err(SessionError::NotConnected),
        };

        let handle = match opened {
            Ok(handle) => handle,
            Err(source) => {
                if source.reason.invalidates_connection() {
                    state.healthy = false;
                }
                return Err(SessionError::OpenFailed {
                    target: target.to_string(),
                    source,
                });
            }
        };

        let result = self
            .transport
            .put(&handle, message, &PutOptions { syncpoint })
            .await;
        if let Err(e) = self.transport.close(handle).await {
            debug!(session_id = %self.id, target = %target, error = %e, "Close after put failed");
        }
        self.observe(&mut state, result)
    }

    /// Drain up to `limit` messages from the primary handle without waiting.
    ///
    /// Returns fewer messages, possibly none, when the queue runs dry. A
    /// failure after some messages were retrieved is logged and the
    /// retrieved messages are returned.
    pub async fn get(
        &self,
        limit: usize,
        options: &GetOptions,
    ) -> Result<Vec<MessageEnvelope>, SessionError> {
        let mut state = self.state.lock().await;
        let Some(handle) = state.primary.as_ref() else {
            return Err(SessionError::NotOpen {
                purpose: "get".to_string(),
            });
        };

        let result = self.drain(handle, limit, options).await;
        self.observe_drain(&mut state, result)
    }

    /// Drain up to `limit` messages from the dynamic queue named `name`
    pub async fn get_from_dynamic(
        &self,
        name: &str,
        limit: usize,
        options: &GetOptions,
    ) -> Result<Vec<MessageEnvelope>, SessionError> {
        let mut state = self.state.lock().await;
        let Some(handle) = state.dynamic.iter().find(|h| h.name() == name) else {
            return Err(SessionError::NotOpen {
                purpose: format!("dynamic queue {}", name),
            });
        };

        let result = self.drain(handle, limit, options).await;
        self.observe_drain(&mut state, result)
    }

    /// Commit the connection's unit of work
    pub async fn commit(&self) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;
        let result = match state.connection.as_ref() {
            Some(connection) => self.transport.commit(connection).await,
            None => return Err(SessionError::NotConnected),
        };
        self.observe(&mut state, result)
    }

    /// Back out the connection's unit of work; retrieved messages become
    /// visible again with their backout count incremented
    pub async fn rollback(&self) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;
        let result = match state.connection.as_ref() {
            Some(connection) => self.transport.rollback(connection).await,
            None => return Err(SessionError::NotConnected),
        };
        self.observe(&mut state, result)
    }

    /// Close the dynamic queue named `name`, deleting it. Unknown names are ignored.
    pub async fn close_dynamic(&self, name: &str) {
        let mut state = self.state.lock().await;
        if let Some(index) = state.dynamic.iter().position(|h| h.name() == name) {
            let handle = state.dynamic.remove(index);
            if let Err(e) = self.transport.close(handle).await {
                debug!(session_id = %self.id, queue = %name, error = %e, "Dynamic queue close failed");
            }
        }
    }

    /// Close every open handle, then disconnect.
    ///
    /// Each step is attempted even if an earlier one failed. Failures are
    /// logged and swallowed, so this always succeeds; a session with nothing
    /// open is a no-op.
    pub async fn cleanup(&self) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;
        self.release_locked(&mut state).await;
        state.healthy = true;
        Ok(())
    }

    /// True iff healthy, connected and holding at least one open handle
    pub async fn is_ready(&self) -> bool {
        self.state.lock().await.is_ready()
    }

    pub async fn is_healthy(&self) -> bool {
        self.state.lock().await.healthy
    }

    /// Queue or topic the primary handle is bound to
    pub async fn bound_target(&self) -> Option<String> {
        let state = self.state.lock().await;
        state.binding.as_ref().map(|b| b.target().to_string())
    }

    /// Names of the dynamic queues currently open
    pub async fn dynamic_queue_names(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state.dynamic.iter().map(|h| h.name().to_string()).collect()
    }

    // ------------------------------------------------------------------------
    // Lock-held helpers
    // ------------------------------------------------------------------------

    async fn connect_locked(&self, state: &mut SessionState) -> Result<(), SessionError> {
        if state.connection.is_some() && state.healthy {
            return Ok(());
        }

        if !state.healthy {
            debug!(session_id = %self.id, "Releasing unhealthy session before reconnect");
            self.release_locked(state).await;
        }

        let params = ConnectionParams::from(&self.config.connection);
        match self.transport.connect(&params).await {
            Ok(connection) => {
                debug!(
                    session_id = %self.id,
                    connection_name = %params.connection_name,
                    "Connected to queue manager"
                );
                state.connection = Some(connection);
                state.healthy = true;
                Ok(())
            }
            Err(source) => {
                warn!(
                    session_id = %self.id,
                    connection_name = %params.connection_name,
                    error = %source,
                    "Connect failed"
                );
                state.healthy = false;
                Err(SessionError::ConnectFailed {
                    connection_name: params.connection_name,
                    source,
                })
            }
        }
    }

    async fn open_locked(
        &self,
        state: &mut SessionState,
        kind: OpenKind,
        target: &str,
    ) -> Result<String, SessionError> {
        self.close_primary_locked(state).await;

        let descriptor = match kind {
            OpenKind::Put | OpenKind::DynamicPut => {
                ObjectDescriptor::queue(target, OpenIntent::Output)
            }
            OpenKind::Get | OpenKind::DynamicReply => {
                ObjectDescriptor::queue(target, OpenIntent::Input)
            }
            OpenKind::Publish => {
                ObjectDescriptor::topic(self.config.destinations.topic_string(target))
            }
        };

        let opened = match state.connection.as_ref() {
            Some(connection) => self.transport.open(connection, &descriptor).await,
            None => return Err(SessionError::NotConnected),
        };

        match opened {
            Ok(handle) => {
                debug!(session_id = %self.id, kind = %kind, target = %handle.name(), "Object opened");
                let name = handle.name().to_string();
                state.primary = Some(handle);
                state.binding = Some(Binding::Opened {
                    kind,
                    target: target.to_string(),
                });
                if kind == OpenKind::DynamicPut {
                    return self.open_dynamic_locked(state).await;
                }
                Ok(name)
            }
            Err(source) => Err(self.fail_open(state, descriptor.target(), source).await),
        }
    }

    async fn open_dynamic_locked(&self, state: &mut SessionState) -> Result<String, SessionError> {
        let destinations = &self.config.destinations;
        let descriptor = ObjectDescriptor::DynamicQueue {
            model: destinations.dynamic_model_queue.clone(),
            name_pattern: destinations.dynamic_queue_pattern.clone(),
        };

        let opened = match state.connection.as_ref() {
            Some(connection) => self.transport.open(connection, &descriptor).await,
            None => return Err(SessionError::NotConnected),
        };

        match opened {
            Ok(handle) => {
                let name = handle.name().to_string();
                debug!(session_id = %self.id, queue = %name, "Dynamic queue created");
                state.dynamic.push(handle);
                Ok(name)
            }
            Err(source) => Err(self.fail_open(state, descriptor.target(), source).await),
        }
    }

    /// Mark unhealthy and release everything after a failed open
    async fn fail_open(
        &self,
        state: &mut SessionState,
        target: &str,
        source: TransportError,
    ) -> SessionError {
        warn!(session_id = %self.id, target = %target, error = %source, "Open failed");
        state.healthy = false;
        self.release_locked(state).await;
        SessionError::OpenFailed {
            target: target.to_string(),
            source,
        }
    }

    async fn close_primary_locked(&self, state: &mut SessionState) {
        state.binding = None;
        if let Some(handle) = state.primary.take() {
            if let Err(e) = self.transport.close(handle).await {
                debug!(session_id = %self.id, error = %e, "Close of previous object failed");
            }
        }
    }

    /// Best-effort release of every handle and the connection
    async fn release_locked(&self, state: &mut SessionState) {
        for handle in state.dynamic.drain(..) {
            let name = handle.name().to_string();
            if let Err(e) = self.transport.close(handle).await {
                debug!(session_id = %self.id, queue = %name, error = %e, "Cleanup: dynamic close failed");
            }
        }

        self.close_primary_locked(state).await;

        if let Some(connection) = state.connection.take() {
            match self.transport.disconnect(connection).await {
                Ok(()) => debug!(session_id = %self.id, "Disconnected"),
                Err(e) => debug!(session_id = %self.id, error = %e, "Cleanup: disconnect failed"),
            }
        }
    }

    async fn drain(
        &self,
        handle: &ObjectHandle,
        limit: usize,
        options: &GetOptions,
    ) -> (Vec<MessageEnvelope>, Option<TransportError>) {
        let mut messages = Vec::new();
        while messages.len() < limit {
            match self.transport.get(handle, options).await {
                Ok(envelope) => messages.push(envelope),
                Err(e) if e.is_no_message() => break,
                Err(e) => return (messages, Some(e)),
            }
        }
        (messages, None)
    }

    fn observe_drain(
        &self,
        state: &mut SessionState,
        (messages, error): (Vec<MessageEnvelope>, Option<TransportError>),
    ) -> Result<Vec<MessageEnvelope>, SessionError> {
        match error {
            None => Ok(messages),
            Some(e) => {
                if e.reason.invalidates_connection() {
                    state.healthy = false;
                }
                if messages.is_empty() {
                    warn!(session_id = %self.id, error = %e, "Get failed");
                    Err(SessionError::Transport(e))
                } else {
                    warn!(
                        session_id = %self.id,
                        retrieved = messages.len(),
                        error = %e,
                        "Get stopped early"
                    );
                    Ok(messages)
                }
            }
        }
    }

    /// Record connection-invalidating failures before handing the result back
    fn observe<T>(
        &self,
        state: &mut SessionState,
        result: Result<T, TransportError>,
    ) -> Result<T, SessionError> {
        result.map_err(|e| {
            if e.reason.invalidates_connection() {
                warn!(session_id = %self.id, error = %e, "Connection invalidated");
                state.healthy = false;
            }
            SessionError::Transport(e)
        })
    }
}
