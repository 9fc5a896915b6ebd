//! In-memory queue transport for testing and development.
//!
//! This module provides a fully functional process-local broker that:
//! - Delivers queue messages in FIFO order, creating queues on first use
//! - Fans publications out to managed non-durable subscriptions
//! - Creates and deletes dynamic queues from model queues
//! - Tracks a unit of work per connection for syncpoint gets and puts
//! - Supports one-shot fault injection and operation counters
//!
//! This transport is intended for:
//! - Unit and integration testing of the gateway façades
//! - The command line demonstrations
//! - Reference semantics for native transport adapters

use crate::config::Credentials;
use crate::error::{ReasonCode, TransportError};
use crate::message::{CorrelationId, MessageEnvelope, MessageId, OutboundMessage};
use crate::transport::{
    ConnectionHandle, ConnectionParams, GetOptions, ObjectDescriptor, ObjectHandle, OpenIntent,
    PutOptions, QueueTransport,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

/// Reason code returned for a put on a handle not opened for output.
const NOT_OPEN_FOR_OUTPUT: u32 = 2039;
/// Reason code returned for a get on a handle not opened for input.
const NOT_OPEN_FOR_INPUT: u32 = 2037;

/// Transport calls, used to address fault injection and counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportOperation {
    Connect,
    Open,
    Subscribe,
    Put,
    Get,
    Close,
    Disconnect,
    Commit,
    Rollback,
}

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// What an open handle refers to
#[derive(Debug, Clone)]
enum OpenObject {
    Queue { name: String, intent: OpenIntent },
    Topic { topic_string: String },
    DynamicQueue { name: String },
    Subscription { topic_string: String, queue: String },
}

impl OpenObject {
    /// Queue read by a get on this handle
    fn input_queue(&self) -> Option<&str> {
        match self {
            Self::Queue { name, intent } if *intent != OpenIntent::Output => Some(name),
            Self::DynamicQueue { name } => Some(name),
            Self::Subscription { queue, .. } => Some(queue),
            _ => None,
        }
    }
}

struct ObjectState {
    connection_id: u64,
    object: OpenObject,
}

/// Messages retrieved or put under syncpoint and not yet resolved
#[derive(Default)]
struct UnitOfWork {
    in_flight: Vec<(String, MessageEnvelope)>,
    pending_puts: Vec<(String, MessageEnvelope)>,
}

impl UnitOfWork {
    fn is_empty(&self) -> bool {
        self.in_flight.is_empty() && self.pending_puts.is_empty()
    }
}

#[derive(Default)]
struct ConnectionState {
    broken: bool,
    unit_of_work: UnitOfWork,
}

struct BrokerState {
    next_id: u64,
    queues: HashMap<String, VecDeque<MessageEnvelope>>,
    model_queues: HashSet<String>,
    deleted_dynamic_queues: HashSet<String>,
    connections: HashMap<u64, ConnectionState>,
    objects: HashMap<u64, ObjectState>,
    faults: HashMap<TransportOperation, VecDeque<TransportError>>,
    counters: HashMap<TransportOperation, u64>,
    required_credentials: Option<Credentials>,
}

impl BrokerState {
    fn new() -> Self {
        Self {
            next_id: 1,
            queues: HashMap::new(),
            model_queues: HashSet::from(["DEV.APP.MODEL.QUEUE".to_string()]),
            deleted_dynamic_queues: HashSet::new(),
            connections: HashMap::new(),
            objects: HashMap::new(),
            faults: HashMap::new(),
            counters: HashMap::new(),
            required_credentials: None,
        }
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Count the call and fire any injected fault for it
    fn enter(&mut self, operation: TransportOperation) -> Result<(), TransportError> {
        *self.counters.entry(operation).or_insert(0) += 1;
        match self.faults.get_mut(&operation).and_then(VecDeque::pop_front) {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }

    fn live_connection(&mut self, id: u64) -> Result<&mut ConnectionState, TransportError> {
        match self.connections.get_mut(&id) {
            Some(state) if state.broken => Err(TransportError::new(
                ReasonCode::ConnectionBroken,
                "connection to queue manager lost",
            )),
            Some(state) => Ok(state),
            None => Err(TransportError::new(
                ReasonCode::ConnectionHandleInvalid,
                format!("connection {} is not open", id),
            )),
        }
    }

    /// Resolve a handle, checking its connection is still usable
    fn object(&mut self, handle: &ObjectHandle) -> Result<OpenObject, TransportError> {
        self.live_connection(handle.connection_id())?;
        self.objects
            .get(&handle.id())
            .map(|state| state.object.clone())
            .ok_or_else(|| {
                TransportError::new(
                    ReasonCode::ObjectHandleInvalid,
                    format!("object '{}' is not open", handle.name()),
                )
            })
    }

    fn subscription_queues(&self, topic_string: &str) -> Vec<String> {
        self.objects
            .values()
            .filter_map(|state| match &state.object {
                OpenObject::Subscription {
                    topic_string: subscribed,
                    queue,
                } if subscribed == topic_string => Some(queue.clone()),
                _ => None,
            })
            .collect()
    }

    /// Remove an open object, deleting whatever it owns
    fn release_object(&mut self, id: u64) -> Option<ObjectState> {
        let state = self.objects.remove(&id)?;
        match &state.object {
            OpenObject::DynamicQueue { name } => {
                self.queues.remove(name);
                self.deleted_dynamic_queues.insert(name.clone());
            }
            OpenObject::Subscription { queue, .. } => {
                self.queues.remove(queue);
            }
            _ => {}
        }
        Some(state)
    }

    /// Return in-flight messages to the head of their queues and drop buffered puts
    fn back_out(&mut self, unit_of_work: UnitOfWork) {
        for (queue, mut envelope) in unit_of_work.in_flight.into_iter().rev() {
            envelope.backout_count += 1;
            if let Some(messages) = self.queues.get_mut(&queue) {
                messages.push_front(envelope);
            }
        }
    }
}

// ============================================================================
// InMemoryTransport
// ============================================================================

/// Process-local queue manager implementing [`QueueTransport`]
pub struct InMemoryTransport {
    state: Mutex<BrokerState>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BrokerState::new()),
        }
    }

    /// Require these credentials on connect
    pub fn with_credentials(self, credentials: Credentials) -> Self {
        self.lock().required_credentials = Some(credentials);
        self
    }

    /// Register an additional model queue for dynamic queue creation
    pub fn with_model_queue(self, name: impl Into<String>) -> Self {
        self.lock().model_queues.insert(name.into());
        self
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ------------------------------------------------------------------------
    // Test controls
    // ------------------------------------------------------------------------

    /// Fail the next call of `operation` with `error`. Faults queue up per operation.
    pub fn inject_fault(&self, operation: TransportOperation, error: TransportError) {
        self.lock()
            .faults
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Mark every open connection as broken; subsequent calls on them fail
    /// with `ConnectionBroken`
    pub fn break_connections(&self) {
        for connection in self.lock().connections.values_mut() {
            connection.broken = true;
        }
    }

    /// Number of times `operation` has been called
    pub fn operation_count(&self, operation: TransportOperation) -> u64 {
        self.lock().counters.get(&operation).copied().unwrap_or(0)
    }

    /// Place a prepared envelope at the tail of a queue
    pub fn enqueue(&self, queue: &str, envelope: MessageEnvelope) {
        self.lock()
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(envelope);
    }

    /// Copy of the messages currently visible on a queue
    pub fn messages(&self, queue: &str) -> Vec<MessageEnvelope> {
        self.lock()
            .queues
            .get(queue)
            .map(|messages| messages.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn queue_depth(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, VecDeque::len)
    }

    pub fn queue_exists(&self, queue: &str) -> bool {
        self.lock().queues.contains_key(queue)
    }

    pub fn subscription_count(&self, topic_string: &str) -> usize {
        self.lock().subscription_queues(topic_string).len()
    }

    pub fn open_connection_count(&self) -> usize {
        self.lock().connections.len()
    }

    pub fn open_object_count(&self) -> usize {
        self.lock().objects.len()
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueTransport for InMemoryTransport {
    async fn connect(&self, params: &ConnectionParams) -> Result<ConnectionHandle, TransportError> {
        let mut state = self.lock();
        state.enter(TransportOperation::Connect)?;

        if let Some(required) = &state.required_credentials {
            if *required != params.credentials {
                return Err(TransportError::new(
                    ReasonCode::NotAuthorized,
                    format!("user '{}' is not authorized", params.credentials.user),
                ));
            }
        }

        let id = state.allocate_id();
        state.connections.insert(id, ConnectionState::default());
        debug!(
            connection_id = id,
            queue_manager = %params.queue_manager,
            connection_name = %params.connection_name,
            "In-memory connection established"
        );
        Ok(ConnectionHandle::new(id))
    }

    async fn open(
        &self,
        connection: &ConnectionHandle,
        descriptor: &ObjectDescriptor,
    ) -> Result<ObjectHandle, TransportError> {
        let mut state = self.lock();
        state.enter(TransportOperation::Open)?;
        state.live_connection(connection.id())?;

        let (object, name) = match descriptor {
            ObjectDescriptor::Queue { name, intent } => {
                if state.deleted_dynamic_queues.contains(name) {
                    return Err(TransportError::new(ReasonCode::UnknownObjectName, name.clone()));
                }
                state.queues.entry(name.clone()).or_default();
                (
                    OpenObject::Queue {
                        name: name.clone(),
                        intent: *intent,
                    },
                    name.clone(),
                )
            }
            ObjectDescriptor::Topic { topic_string } => (
                OpenObject::Topic {
                    topic_string: topic_string.clone(),
                },
                topic_string.clone(),
            ),
            ObjectDescriptor::DynamicQueue {
                model,
                name_pattern,
            } => {
                if !state.model_queues.contains(model) {
                    return Err(TransportError::new(ReasonCode::UnknownObjectName, model.clone()));
                }
                let name = if name_pattern.ends_with('*') {
                    let suffix: u64 = rand::random();
                    format!(
                        "{}{:016X}",
                        name_pattern.trim_end_matches('*'),
                        suffix
                    )
                } else {
                    name_pattern.clone()
                };
                state.queues.entry(name.clone()).or_default();
                (OpenObject::DynamicQueue { name: name.clone() }, name)
            }
        };

        let id = state.allocate_id();
        state.objects.insert(
            id,
            ObjectState {
                connection_id: connection.id(),
                object,
            },
        );
        Ok(ObjectHandle::new(id, connection.id(), name))
    }

    async fn subscribe(
        &self,
        connection: &ConnectionHandle,
        topic_string: &str,
    ) -> Result<ObjectHandle, TransportError> {
        let mut state = self.lock();
        state.enter(TransportOperation::Subscribe)?;
        state.live_connection(connection.id())?;

        let id = state.allocate_id();
        let queue = format!("SYSTEM.MANAGED.NDURABLE.{:016X}", id);
        state.queues.insert(queue.clone(), VecDeque::new());
        state.objects.insert(
            id,
            ObjectState {
                connection_id: connection.id(),
                object: OpenObject::Subscription {
                    topic_string: topic_string.to_string(),
                    queue,
                },
            },
        );
        Ok(ObjectHandle::new(id, connection.id(), topic_string))
    }

    async fn put(
        &self,
        object: &ObjectHandle,
        message: &OutboundMessage,
        options: &PutOptions,
    ) -> Result<MessageId, TransportError> {
        let mut state = self.lock();
        state.enter(TransportOperation::Put)?;

        let targets = match state.object(object)? {
            OpenObject::Queue { name, intent } if intent != OpenIntent::Input => vec![name],
            OpenObject::DynamicQueue { name } => vec![name],
            OpenObject::Topic { topic_string } => state.subscription_queues(&topic_string),
            _ => {
                return Err(TransportError::new(
                    ReasonCode::Other(NOT_OPEN_FOR_OUTPUT),
                    format!("'{}' is not open for output", object.name()),
                ))
            }
        };

        let message_id = MessageId::new();
        let envelope = MessageEnvelope {
            body: message.body.clone(),
            format: message.format,
            message_type: message.message_type,
            message_id: message_id.clone(),
            correlation_id: message
                .correlation_id
                .clone()
                .unwrap_or_else(CorrelationId::none),
            reply_to: message.reply_to.clone(),
            properties: message.properties.clone(),
            backout_count: 0,
            put_time: Utc::now(),
        };

        if targets.is_empty() {
            return Err(TransportError::new(
                ReasonCode::NoSubscribersMatched,
                format!("no subscriptions matched '{}'", object.name()),
            ));
        }

        if options.syncpoint {
            let connection = state.live_connection(object.connection_id())?;
            for queue in targets {
                connection
                    .unit_of_work
                    .pending_puts
                    .push((queue, envelope.clone()));
            }
        } else {
            for queue in targets {
                state
                    .queues
                    .entry(queue)
                    .or_default()
                    .push_back(envelope.clone());
            }
        }

        Ok(message_id)
    }

    async fn get(
        &self,
        object: &ObjectHandle,
        options: &GetOptions,
    ) -> Result<MessageEnvelope, TransportError> {
        let mut state = self.lock();
        state.enter(TransportOperation::Get)?;

        let resolved = state.object(object)?;
        let queue = resolved.input_queue().map(str::to_string).ok_or_else(|| {
            TransportError::new(
                ReasonCode::Other(NOT_OPEN_FOR_INPUT),
                format!("'{}' is not open for input", object.name()),
            )
        })?;

        let messages = state
            .queues
            .get_mut(&queue)
            .ok_or_else(|| TransportError::new(ReasonCode::UnknownObjectName, queue.clone()))?;

        let position = match &options.filter {
            Some(filter) => messages.iter().position(|m| filter.matches(m)),
            None => (!messages.is_empty()).then_some(0),
        };
        let envelope = position
            .and_then(|index| messages.remove(index))
            .ok_or_else(TransportError::no_message)?;

        if options.syncpoint {
            state
                .live_connection(object.connection_id())?
                .unit_of_work
                .in_flight
                .push((queue, envelope.clone()));
        }

        Ok(envelope)
    }

    async fn close(&self, object: ObjectHandle) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.enter(TransportOperation::Close)?;
        state.live_connection(object.connection_id())?;

        state.release_object(object.id()).map(|_| ()).ok_or_else(|| {
            TransportError::new(
                ReasonCode::ObjectHandleInvalid,
                format!("object '{}' is not open", object.name()),
            )
        })
    }

    async fn disconnect(&self, connection: ConnectionHandle) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.enter(TransportOperation::Disconnect)?;

        let Some(removed) = state.connections.remove(&connection.id()) else {
            return Err(TransportError::new(
                ReasonCode::ConnectionHandleInvalid,
                format!("connection {} is not open", connection.id()),
            ));
        };

        // Disconnect backs out any open unit of work and closes remaining handles
        if !removed.unit_of_work.is_empty() {
            state.back_out(removed.unit_of_work);
        }
        let owned: Vec<u64> = state
            .objects
            .iter()
            .filter(|(_, object)| object.connection_id == connection.id())
            .map(|(id, _)| *id)
            .collect();
        for id in owned {
            state.release_object(id);
        }

        if removed.broken {
            return Err(TransportError::new(
                ReasonCode::ConnectionBroken,
                "connection was already broken",
            ));
        }
        Ok(())
    }

    async fn commit(&self, connection: &ConnectionHandle) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.enter(TransportOperation::Commit)?;

        let unit_of_work = std::mem::take(&mut state.live_connection(connection.id())?.unit_of_work);
        for (queue, envelope) in unit_of_work.pending_puts {
            state.queues.entry(queue).or_default().push_back(envelope);
        }
        Ok(())
    }

    async fn rollback(&self, connection: &ConnectionHandle) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.enter(TransportOperation::Rollback)?;

        let unit_of_work = std::mem::take(&mut state.live_connection(connection.id())?.unit_of_work);
        state.back_out(unit_of_work);
        Ok(())
    }
}
