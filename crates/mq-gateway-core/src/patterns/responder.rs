//! Responder: takes requests under syncpoint and answers them.
//!
//! A request is retrieved inside a unit of work and held pending until the
//! reply is put, at which point reply and retrieval are committed together.
//! A request whose processing fails is resolved by the [`QuarantinePolicy`]:
//! backed out for redelivery, or moved to the quarantine queue once its
//! backout count reaches the threshold.

use crate::error::GatewayError;
use crate::message::{
    CorrelationId, DestinationName, GatewayMessage, MessageEnvelope, MessageId, MessageType,
    SESSION_TOKEN_PROPERTY,
};
use crate::quarantine::{QuarantineDecision, QuarantinePolicy};
use crate::registry::Identified;
use crate::session::{OpenKind, SessionFactory, TransportSession};
use crate::transport::{GetOptions, MessageFilter};
use std::fmt::Display;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[cfg(test)]
#[path = "responder_tests.rs"]
mod tests;

/// What [`Responder::process_next`] did with the next request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// No request was waiting
    NoRequest,
    /// The handler succeeded and its reply was committed
    Replied(MessageId),
    /// The handler failed and the request was backed out for redelivery
    RolledBack,
    /// The handler failed too often and the request was quarantined
    Quarantined,
}

/// Answers requests read from a queue.
pub struct Responder {
    id: Uuid,
    app_id: String,
    session: TransportSession,
    quarantine: QuarantinePolicy,
    pending: Mutex<Option<MessageEnvelope>>,
}

impl Responder {
    pub fn new(app_id: impl Into<String>, factory: &SessionFactory) -> Self {
        Self {
            id: Uuid::new_v4(),
            app_id: app_id.into(),
            session: factory.create_session(),
            quarantine: QuarantinePolicy::from_config(factory.config()),
            pending: Mutex::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn quarantine_policy(&self) -> &QuarantinePolicy {
        &self.quarantine
    }

    /// Get the next request from `queue` under syncpoint.
    ///
    /// With a `session_token`, only requests carrying that token are
    /// considered. A message without `reply_to` is not a request: it is
    /// committed off the queue and `None` is returned. A request still
    /// pending from an earlier call is backed out first.
    pub async fn get_message_from_queue(
        &self,
        queue: &DestinationName,
        session_token: Option<&str>,
    ) -> Result<Option<MessageEnvelope>, GatewayError> {
        let mut pending = self.pending.lock().await;
        if let Some(abandoned) = pending.take() {
            warn!(responder_id = %self.id, message_id = %abandoned.message_id, "Backing out unanswered request");
            if let Err(e) = self.session.rollback().await {
                warn!(responder_id = %self.id, error = %e, "Backout of unanswered request failed");
            }
        }

        if let Err(e) = self.session.ensure_open(OpenKind::DynamicReply, queue.as_str()).await {
            warn!(responder_id = %self.id, app_id = %self.app_id, queue = %queue, error = %e, "Open for requests failed");
            self.session.cleanup().await?;
            return Err(e.into());
        }

        let filter = session_token.map(|token| MessageFilter::property(SESSION_TOKEN_PROPERTY, token));
        let options = GetOptions::default().with_syncpoint().with_filter(filter);
        let request = match self.session.get(1, &options).await {
            Ok(mut messages) => messages.pop(),
            Err(e) => {
                if !self.session.is_healthy().await {
                    self.session.cleanup().await?;
                }
                return Err(e.into());
            }
        };

        let Some(request) = request else {
            return Ok(None);
        };

        if request.reply_to.is_none() {
            warn!(responder_id = %self.id, message_id = %request.message_id, "Discarding message without reply-to");
            self.session.commit().await?;
            return Ok(None);
        }

        debug!(responder_id = %self.id, message_id = %request.message_id, "Request received");
        *pending = Some(request.clone());
        Ok(Some(request))
    }

    /// Reply to the pending request on `reply_queue` and commit.
    ///
    /// The reply's correlation id is the request's message id and any session
    /// token on the request is copied across. Fails with
    /// [`GatewayError::NoPendingRequest`] unless the pending request asked for
    /// a reply on `reply_queue`. A failed put backs the request out.
    pub async fn put_to_queue(
        &self,
        reply_queue: &str,
        message: &str,
    ) -> Result<MessageId, GatewayError> {
        let mut pending = self.pending.lock().await;
        let request = match pending.as_ref() {
            Some(request) if request.reply_to.as_deref() == Some(reply_queue) => request.clone(),
            _ => {
                return Err(GatewayError::NoPendingRequest {
                    reply_queue: reply_queue.to_string(),
                })
            }
        };

        let mut reply = GatewayMessage::new(message, 1, 1)
            .to_outbound()?
            .with_message_type(MessageType::Reply)
            .with_correlation_id(CorrelationId::from(&request.message_id));
        if let Some(token) = request.session_token() {
            reply = reply.with_property(SESSION_TOKEN_PROPERTY, token);
        }

        let reply_id = match self.session.put_to(reply_queue, &reply, true).await {
            Ok(id) => id,
            Err(e) => {
                warn!(responder_id = %self.id, reply_queue = %reply_queue, error = %e, "Reply put failed, backing out request");
                pending.take();
                if let Err(rollback_error) = self.session.rollback().await {
                    warn!(responder_id = %self.id, error = %rollback_error, "Backout after failed reply failed");
                }
                return Err(e.into());
            }
        };

        self.session.commit().await?;
        pending.take();
        info!(
            responder_id = %self.id,
            app_id = %self.app_id,
            reply_queue = %reply_queue,
            request_id = %request.message_id,
            "Reply sent"
        );
        Ok(reply_id)
    }

    /// Run `handler` on the next request from `queue`.
    ///
    /// The handler's output becomes the reply. When it fails, the request is
    /// backed out or quarantined depending on its backout count.
    pub async fn process_next<F, E>(
        &self,
        queue: &DestinationName,
        session_token: Option<&str>,
        handler: F,
    ) -> Result<ProcessOutcome, GatewayError>
    where
        F: FnOnce(&MessageEnvelope) -> Result<String, E>,
        E: Display,
    {
        let Some(request) = self.get_message_from_queue(queue, session_token).await? else {
            return Ok(ProcessOutcome::NoRequest);
        };

        match handler(&request) {
            Ok(answer) => {
                let reply_queue = request.reply_to.clone().unwrap_or_default();
                let reply_id = self.put_to_queue(&reply_queue, &answer).await?;
                Ok(ProcessOutcome::Replied(reply_id))
            }
            Err(e) => {
                warn!(
                    responder_id = %self.id,
                    message_id = %request.message_id,
                    backout_count = request.backout_count,
                    error = %e,
                    "Request processing failed"
                );
                self.pending.lock().await.take();
                match self.quarantine.apply(&self.session, &request).await? {
                    QuarantineDecision::Rollback => Ok(ProcessOutcome::RolledBack),
                    QuarantineDecision::Redirect => Ok(ProcessOutcome::Quarantined),
                }
            }
        }
    }

    /// Message id of the request awaiting a reply, if any
    pub async fn pending_request(&self) -> Option<MessageId> {
        self.pending
            .lock()
            .await
            .as_ref()
            .map(|request| request.message_id.clone())
    }

    /// Release the session; an unanswered request is backed out by the disconnect
    pub async fn close_connection(&self) {
        self.pending.lock().await.take();
        let _ = self.session.cleanup().await;
    }
}

impl Identified for Responder {
    fn app_id(&self) -> &str {
        &self.app_id
    }
}
