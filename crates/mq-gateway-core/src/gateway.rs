//! Controller-facing orchestration of the pattern façades.
//!
//! The [`Gateway`] owns one [`SessionFactory`] and one [`BoundedRegistry`]
//! per façade kind. Each operation validates its inputs, finds or creates
//! the caller's façade by application id and delegates to it. Registries
//! shed load once full, surfacing [`GatewayError::RegistryFull`].
//!
//! Quantities arrive as signed integers from callers: negative values are
//! taken by absolute value and zero means one. Quantities above
//! `limits.max_quantity` are rejected before anything is sent.

use crate::config::GatewayConfig;
use crate::correlation::DynamicReplyDescriptor;
use crate::error::{GatewayError, ValidationError};
use crate::message::{DestinationName, MessageEnvelope, MessageId, TopicName};
use crate::patterns::{
    Consumer, ProcessOutcome, Producer, PublishReport, Publisher, Requestor, Responder, Subscriber,
};
use crate::registry::{BoundedRegistry, FacadeKind, Registration};
use crate::session::SessionFactory;
use crate::transport::{MessageFilter, QueueTransport};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;
use tracing::{info, instrument};

#[cfg(test)]
#[path = "gateway_tests.rs"]
mod tests;

/// Result of a subscribe call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscribeOutcome {
    /// No subscriber existed for the application; one was created
    Subscribed,
    /// The application's previous subscriber was replaced by a fresh one
    Refreshed,
}

/// Result of reading a subscriber's stash
#[derive(Debug, Clone, PartialEq)]
pub enum LatestMessage {
    Message(MessageEnvelope),
    /// The subscriber exists but has nothing stashed
    Empty,
    /// No subscriber existed; one was created and starts polling
    Subscribed,
}

/// Normalise a caller-supplied quantity: absolute value, zero becomes one
pub fn normalize_quantity(quantity: i64) -> u32 {
    match quantity.unsigned_abs() {
        0 => 1,
        n => u32::try_from(n).unwrap_or(u32::MAX),
    }
}

fn validate_app_id(app_id: &str) -> Result<(), ValidationError> {
    if app_id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "app_id".to_string(),
        });
    }
    Ok(())
}

/// Entry point used by the controller layer.
pub struct Gateway {
    factory: SessionFactory,
    subscribers: BoundedRegistry<Subscriber>,
    publishers: BoundedRegistry<Publisher>,
    consumers: BoundedRegistry<Consumer>,
    requestors: BoundedRegistry<Requestor>,
    responders: BoundedRegistry<Responder>,
}

impl Gateway {
    /// Create a gateway over `transport` after validating `config`
    pub fn new(
        transport: Arc<dyn QueueTransport>,
        config: GatewayConfig,
    ) -> Result<Self, GatewayError> {
        config.validate()?;
        let capacity = config.limits.registry_capacity;
        Ok(Self {
            factory: SessionFactory::new(transport, Arc::new(config)),
            subscribers: BoundedRegistry::new(FacadeKind::Subscriber, capacity),
            publishers: BoundedRegistry::new(FacadeKind::Publisher, capacity),
            consumers: BoundedRegistry::new(FacadeKind::Consumer, capacity),
            requestors: BoundedRegistry::new(FacadeKind::Requestor, capacity),
            responders: BoundedRegistry::new(FacadeKind::Responder, capacity),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        self.factory.config()
    }

    /// Normalise `quantity` and reject it when above the configured maximum
    fn checked_quantity(&self, quantity: i64) -> Result<u32, ValidationError> {
        let max = self.config().limits.max_quantity;
        let normalized = normalize_quantity(quantity);
        if normalized > max {
            return Err(ValidationError::OutOfRange {
                field: "quantity".to_string(),
                message: format!("{} exceeds the maximum of {}", quantity, max),
            });
        }
        Ok(normalized)
    }

    /// Number of live façades of `kind`
    pub async fn registered(&self, kind: FacadeKind) -> usize {
        match kind {
            FacadeKind::Subscriber => self.subscribers.len().await,
            FacadeKind::Publisher => self.publishers.len().await,
            FacadeKind::Consumer => self.consumers.len().await,
            FacadeKind::Requestor => self.requestors.len().await,
            FacadeKind::Responder => self.responders.len().await,
        }
    }

    // ------------------------------------------------------------------------
    // Point-to-point
    // ------------------------------------------------------------------------

    /// Put `quantity` messages on `queue` using a producer that is closed
    /// once the put completes
    #[instrument(skip(self, message, properties))]
    pub async fn put(
        &self,
        app_id: &str,
        queue: &str,
        message: &str,
        quantity: i64,
        properties: &HashMap<String, String>,
    ) -> Result<Vec<MessageId>, GatewayError> {
        validate_app_id(app_id)?;
        let queue = DestinationName::new(queue)?;
        let quantity = self.checked_quantity(quantity)?;

        let producer = Producer::new(app_id, &self.factory);
        let result = producer
            .put_messages(message, quantity, &queue, properties)
            .await;
        producer.close_connection().await;
        result
    }

    /// Get up to `limit` messages from `queue` through the application's consumer
    #[instrument(skip(self, property_filter))]
    pub async fn get(
        &self,
        app_id: &str,
        queue: &str,
        limit: i64,
        property_filter: Option<MessageFilter>,
    ) -> Result<Vec<MessageEnvelope>, GatewayError> {
        validate_app_id(app_id)?;
        let queue = DestinationName::new(queue)?;

        let factory = &self.factory;
        let consumer = self
            .consumers
            .find_or_insert_with(app_id, || Arc::new(Consumer::new(app_id, factory)))
            .await?
            .into_entry();
        consumer
            .get_messages(&queue, normalize_quantity(limit) as usize, property_filter)
            .await
    }

    // ------------------------------------------------------------------------
    // Publish/subscribe
    // ------------------------------------------------------------------------

    /// Subscribe the application to `topic`.
    ///
    /// An existing subscriber is replaced in the same critical section that
    /// installs the new one, then deleted.
    #[instrument(skip(self))]
    pub async fn subscribe(
        &self,
        app_id: &str,
        topic: &str,
    ) -> Result<SubscribeOutcome, GatewayError> {
        validate_app_id(app_id)?;
        let topic = TopicName::new(topic)?;

        let factory = &self.factory;
        let (subscriber, previous) = self
            .subscribers
            .replace_with(app_id, || Arc::new(Subscriber::new(app_id, factory)))
            .await?;

        let outcome = match previous {
            Some(previous) => {
                previous.delete_subscription().await;
                SubscribeOutcome::Refreshed
            }
            None => SubscribeOutcome::Subscribed,
        };

        if let Err(e) = subscriber.make_subscription(&topic).await {
            self.subscribers.remove_entry(&subscriber).await;
            return Err(e);
        }
        info!(app_id = %app_id, topic = %topic, outcome = ?outcome, "Subscription in place");
        Ok(outcome)
    }

    /// Delete the application's subscription
    #[instrument(skip(self))]
    pub async fn unsubscribe(&self, app_id: &str) -> Result<(), GatewayError> {
        validate_app_id(app_id)?;
        match self.subscribers.remove_by_app_id(app_id).await {
            Some(subscriber) => {
                subscriber.delete_subscription().await;
                Ok(())
            }
            None => Err(GatewayError::NotFound {
                kind: FacadeKind::Subscriber,
                app_id: app_id.to_string(),
            }),
        }
    }

    /// Next stashed message for the application, subscribing it to `topic`
    /// first if it has no subscriber
    #[instrument(skip(self))]
    pub async fn latest_message(
        &self,
        app_id: &str,
        topic: &str,
    ) -> Result<LatestMessage, GatewayError> {
        validate_app_id(app_id)?;
        let topic = TopicName::new(topic)?;

        let factory = &self.factory;
        match self
            .subscribers
            .find_or_insert_with(app_id, || Arc::new(Subscriber::new(app_id, factory)))
            .await?
        {
            Registration::Existing(subscriber) => Ok(match subscriber.get_messages(1).await.pop() {
                Some(message) => LatestMessage::Message(message),
                None => LatestMessage::Empty,
            }),
            Registration::Created(subscriber) => {
                if let Err(e) = subscriber.make_subscription(&topic).await {
                    self.subscribers.remove_entry(&subscriber).await;
                    return Err(e);
                }
                Ok(LatestMessage::Subscribed)
            }
        }
    }

    /// Publish `quantity` messages to `topic` through the application's publisher
    #[instrument(skip(self, message))]
    pub async fn publish(
        &self,
        app_id: &str,
        topic: &str,
        message: &str,
        quantity: i64,
    ) -> Result<PublishReport, GatewayError> {
        validate_app_id(app_id)?;
        let topic = TopicName::new(topic)?;
        let quantity = self.checked_quantity(quantity)?;

        let factory = &self.factory;
        let publisher = self
            .publishers
            .find_or_insert_with(app_id, || Arc::new(Publisher::new(app_id, factory)))
            .await?
            .into_entry();
        publisher
            .publish_messages(&topic, quantity, message)
            .await
    }

    // ------------------------------------------------------------------------
    // Request/response
    // ------------------------------------------------------------------------

    /// Send requests to `queue` and return the dynamic reply destination
    #[instrument(skip(self, message))]
    pub async fn request(
        &self,
        app_id: &str,
        queue: &str,
        message: &str,
        quantity: i64,
        session_token: Option<&str>,
    ) -> Result<DynamicReplyDescriptor, GatewayError> {
        validate_app_id(app_id)?;
        let queue = DestinationName::new(queue)?;
        let quantity = self.checked_quantity(quantity)?;

        let factory = &self.factory;
        let requestor = self
            .requestors
            .find_or_insert_with(app_id, || Arc::new(Requestor::new(app_id, factory)))
            .await?
            .into_entry();
        requestor
            .put_to_queue(&queue, message, quantity, session_token)
            .await
    }

    /// Most recent reply received on `reply_queue`, if any
    #[instrument(skip(self))]
    pub async fn reply_for(
        &self,
        app_id: &str,
        reply_queue: &str,
    ) -> Result<Option<MessageEnvelope>, GatewayError> {
        validate_app_id(app_id)?;
        let requestor = self.requestors.find_by_app_id(app_id).await.ok_or_else(|| {
            GatewayError::NotFound {
                kind: FacadeKind::Requestor,
                app_id: app_id.to_string(),
            }
        })?;
        requestor.get_message_from_queue(reply_queue).await
    }

    /// Next request on `queue` for the application's responder
    #[instrument(skip(self))]
    pub async fn next_request(
        &self,
        app_id: &str,
        queue: &str,
        session_token: Option<&str>,
    ) -> Result<Option<MessageEnvelope>, GatewayError> {
        validate_app_id(app_id)?;
        let queue = DestinationName::new(queue)?;

        let factory = &self.factory;
        let responder = self
            .responders
            .find_or_insert_with(app_id, || Arc::new(Responder::new(app_id, factory)))
            .await?
            .into_entry();
        responder.get_message_from_queue(&queue, session_token).await
    }

    /// Reply to the application's pending request
    #[instrument(skip(self, message))]
    pub async fn respond(
        &self,
        app_id: &str,
        reply_queue: &str,
        message: &str,
    ) -> Result<MessageId, GatewayError> {
        validate_app_id(app_id)?;
        let responder = self.responders.find_by_app_id(app_id).await.ok_or_else(|| {
            GatewayError::NotFound {
                kind: FacadeKind::Responder,
                app_id: app_id.to_string(),
            }
        })?;
        responder.put_to_queue(reply_queue, message).await
    }

    /// Handle the next request on `queue` with `handler`, quarantining it
    /// when it keeps failing
    #[instrument(skip(self, handler))]
    pub async fn process_next_request<F, E>(
        &self,
        app_id: &str,
        queue: &str,
        session_token: Option<&str>,
        handler: F,
    ) -> Result<ProcessOutcome, GatewayError>
    where
        F: FnOnce(&MessageEnvelope) -> Result<String, E>,
        E: Display,
    {
        validate_app_id(app_id)?;
        let queue = DestinationName::new(queue)?;

        let factory = &self.factory;
        let responder = self
            .responders
            .find_or_insert_with(app_id, || Arc::new(Responder::new(app_id, factory)))
            .await?
            .into_entry();
        responder.process_next(&queue, session_token, handler).await
    }

    /// Stop every poll loop and release every session
    pub async fn shutdown(&self) {
        for subscriber in self.subscribers.drain().await {
            subscriber.delete_subscription().await;
        }
        for publisher in self.publishers.drain().await {
            publisher.close_connection().await;
        }
        self.consumers.drain().await;
        for requestor in self.requestors.drain().await {
            requestor.close().await;
        }
        for responder in self.responders.drain().await {
            responder.close_connection().await;
        }
        info!("Gateway shut down");
    }
}
