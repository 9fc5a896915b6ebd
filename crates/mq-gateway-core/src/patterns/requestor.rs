//! Requestor: sends requests and correlates replies in the background.
//!
//! Each call to [`Requestor::put_to_queue`] creates a fresh dynamic reply
//! queue, sends the requests with `reply_to` naming it and returns the
//! destination descriptor at once. A poll loop per destination gets matching
//! replies on a fixed interval until every request has been answered, then
//! deletes the dynamic queue. Callers read accumulated replies with
//! [`Requestor::get_message_from_queue`], which never blocks.
//!
//! A dynamic queue does not outlive its connection. When the destination is
//! lost the correlator is abandoned and its poll loop stops. A destination is
//! forgotten once it is settled (answered or abandoned) and every reply it
//! received has been taken.

use super::numbered_message;
use crate::correlation::{Correlator, DynamicReplyDescriptor, ReplyFilter};
use crate::error::{GatewayError, ReasonCode, SessionError};
use crate::message::{
    DestinationName, MessageEnvelope, MessageId, MessageType, SESSION_TOKEN_PROPERTY,
};
use crate::poller::{spawn_poller, CancellationFlag, PollOutcome, PollSchedule, PollerHandle};
use crate::registry::Identified;
use crate::session::{OpenKind, SessionFactory, TransportSession};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[cfg(test)]
#[path = "requestor_tests.rs"]
mod tests;

struct TrackedDestination {
    correlator: Arc<Correlator>,
    poller: PollerHandle,
}

/// Issues requests and collects their replies.
pub struct Requestor {
    id: Uuid,
    app_id: String,
    session: Arc<TransportSession>,
    schedule: PollSchedule,
    destinations: Mutex<HashMap<String, TrackedDestination>>,
}

impl Requestor {
    pub fn new(app_id: impl Into<String>, factory: &SessionFactory) -> Self {
        Self {
            id: Uuid::new_v4(),
            app_id: app_id.into(),
            session: Arc::new(factory.create_session()),
            schedule: PollSchedule::fixed(factory.config().polling.reply_interval()),
            destinations: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Send `quantity` requests (at least one) to `queue` and start
    /// correlating their replies.
    ///
    /// # Arguments
    ///
    /// * `queue` - Request queue the responder reads from
    /// * `message` - Text carried in each request document
    /// * `quantity` - Number of requests; zero is treated as one
    /// * `session_token` - When given, requests carry it as a property and
    ///   replies are selected by it instead of by correlation id
    ///
    /// # Returns
    ///
    /// The dynamic reply destination, available before any reply arrives
    pub async fn put_to_queue(
        &self,
        queue: &DestinationName,
        message: &str,
        quantity: u32,
        session_token: Option<&str>,
    ) -> Result<DynamicReplyDescriptor, GatewayError> {
        let reply_queue = match self.session.ensure_open(OpenKind::DynamicPut, queue.as_str()).await {
            Ok(name) => name,
            Err(e) => {
                warn!(requestor_id = %self.id, app_id = %self.app_id, queue = %queue, error = %e, "Open for request failed");
                self.session.cleanup().await?;
                return Err(e.into());
            }
        };

        let request_ids = match self
            .send_requests(message, quantity.max(1), &reply_queue, session_token)
            .await
        {
            Ok(ids) => ids,
            Err(e) => {
                warn!(requestor_id = %self.id, queue = %queue, error = %e, "Request put failed");
                self.session.close_dynamic(&reply_queue).await;
                return Err(e);
            }
        };

        let filter = match session_token {
            Some(token) => ReplyFilter::SessionToken(token.to_string()),
            None => ReplyFilter::CorrelationId,
        };
        let descriptor = DynamicReplyDescriptor::new(reply_queue.clone(), request_ids, filter);
        let correlator = Arc::new(Correlator::new(descriptor.clone()));
        let poller = self.start_correlating(correlator.clone());

        let mut destinations = self.destinations.lock().await;
        self.forget_settled(&mut destinations).await;
        destinations.insert(reply_queue.clone(), TrackedDestination { correlator, poller });
        drop(destinations);

        info!(
            requestor_id = %self.id,
            app_id = %self.app_id,
            queue = %queue,
            reply_queue = %reply_queue,
            requests = descriptor.request_ids.len(),
            "Requests sent"
        );
        Ok(descriptor)
    }

    async fn send_requests(
        &self,
        message: &str,
        quantity: u32,
        reply_queue: &str,
        session_token: Option<&str>,
    ) -> Result<Vec<MessageId>, GatewayError> {
        let mut ids = Vec::new();
        for index in 1..=quantity {
            let mut request = numbered_message(message, index, quantity)?
                .with_message_type(MessageType::Request)
                .with_reply_to(reply_queue);
            if let Some(token) = session_token {
                request = request.with_property(SESSION_TOKEN_PROPERTY, token);
            }
            ids.push(self.session.put(&request, false).await?);
        }
        Ok(ids)
    }

    fn start_correlating(&self, correlator: Arc<Correlator>) -> PollerHandle {
        let session = self.session.clone();
        let requestor_id = self.id;
        spawn_poller("reply-correlator", self.schedule, CancellationFlag::new(), move || {
            let session = session.clone();
            let correlator = correlator.clone();
            async move {
                if let Err(e) = correlator.poll_once(&session).await {
                    if destination_lost(&e) {
                        warn!(requestor_id = %requestor_id, queue = %correlator.name(), error = %e, "Reply destination lost, abandoning");
                        correlator.abandon().await;
                        session.close_dynamic(correlator.name()).await;
                        return PollOutcome::Stop;
                    }
                    warn!(requestor_id = %requestor_id, queue = %correlator.name(), error = %e, "Reply poll failed");
                }
                if correlator.is_complete().await {
                    debug!(requestor_id = %requestor_id, queue = %correlator.name(), "All replies received");
                    session.close_dynamic(correlator.name()).await;
                    return PollOutcome::Stop;
                }
                PollOutcome::Continue
            }
        })
    }

    /// Take the most recent reply received on `reply_queue`.
    ///
    /// Returns `Ok(None)` when no reply has arrived yet. Fails for a
    /// destination this requestor did not create or has already forgotten.
    pub async fn get_message_from_queue(
        &self,
        reply_queue: &str,
    ) -> Result<Option<MessageEnvelope>, GatewayError> {
        let mut destinations = self.destinations.lock().await;
        let correlator = match destinations.get(reply_queue) {
            Some(tracked) => tracked.correlator.clone(),
            None => {
                return Err(GatewayError::UnknownReplyDestination {
                    name: reply_queue.to_string(),
                })
            }
        };

        let reply = correlator.take_latest().await;
        self.forget_settled(&mut destinations).await;
        Ok(reply)
    }

    /// Replies still expected on `reply_queue`, if it is known
    pub async fn outstanding(&self, reply_queue: &str) -> Option<usize> {
        let correlator = self
            .destinations
            .lock()
            .await
            .get(reply_queue)
            .map(|tracked| tracked.correlator.clone())?;
        Some(correlator.remaining().await)
    }

    /// Names of the reply destinations still tracked
    pub async fn reply_destinations(&self) -> Vec<String> {
        let mut destinations = self.destinations.lock().await;
        self.forget_settled(&mut destinations).await;
        destinations.keys().cloned().collect()
    }

    /// Drop destinations that are settled and have no reply left to take
    async fn forget_settled(&self, destinations: &mut HashMap<String, TrackedDestination>) {
        let mut settled = Vec::new();
        for (name, tracked) in destinations.iter() {
            let correlator = &tracked.correlator;
            if correlator.is_settled().await && correlator.pending_replies().await == 0 {
                settled.push(name.clone());
            }
        }

        for name in settled {
            if let Some(tracked) = destinations.remove(&name) {
                tracked.poller.cancel();
                debug!(requestor_id = %self.id, queue = %name, "Reply destination forgotten");
            }
        }
    }

    /// Stop all correlation, forget every destination and release the session
    pub async fn close(&self) {
        for (_, tracked) in self.destinations.lock().await.drain() {
            tracked.poller.cancel();
        }
        let _ = self.session.cleanup().await;
        debug!(requestor_id = %self.id, app_id = %self.app_id, "Requestor closed");
    }
}

/// Whether a poll failure means the dynamic queue is gone for good
fn destination_lost(error: &SessionError) -> bool {
    match error {
        SessionError::NotOpen { .. } | SessionError::NotConnected => true,
        other => other.reason().is_some_and(|reason| {
            matches!(
                reason,
                ReasonCode::UnknownObjectName | ReasonCode::ObjectHandleInvalid
            ) || reason.invalidates_connection()
        }),
    }
}

impl Identified for Requestor {
    fn app_id(&self) -> &str {
        &self.app_id
    }
}

impl Drop for Requestor {
    fn drop(&mut self) {
        for tracked in self.destinations.get_mut().values() {
            tracked.poller.cancel();
        }
    }
}
