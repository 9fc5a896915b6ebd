//! Reply correlation for request/response.
//!
//! A requestor sends requests whose `reply_to` names a dynamic queue created
//! for them. Replies are matched back in one of two ways:
//!
//! - **Correlation id** (default): the responder copies the request's message
//!   id into the reply's correlation id, and the correlator gets from the
//!   dynamic queue selecting on each outstanding request id.
//! - **Session token**: requests carry a token property and the responder
//!   copies it onto the reply. The correlator selects on the token, which
//!   lets several logical requestors share one transport session.

use crate::error::SessionError;
use crate::message::{CorrelationId, MessageEnvelope, MessageId, SESSION_TOKEN_PROPERTY};
use crate::session::TransportSession;
use crate::transport::{GetOptions, MessageFilter};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[cfg(test)]
#[path = "correlation_tests.rs"]
mod tests;

/// How replies on a dynamic destination are selected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyFilter {
    /// Reply correlation id equals a request's message id
    CorrelationId,
    /// Reply carries the given session token property
    SessionToken(String),
}

/// A dynamic reply destination and the requests waiting on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicReplyDescriptor {
    /// Name assigned by the transport when the dynamic queue was opened
    pub name: String,
    /// Message ids of the requests sent with this destination as `reply_to`
    pub request_ids: Vec<MessageId>,
    pub filter: ReplyFilter,
    pub created_at: DateTime<Utc>,
}

impl DynamicReplyDescriptor {
    pub fn new(name: impl Into<String>, request_ids: Vec<MessageId>, filter: ReplyFilter) -> Self {
        Self {
            name: name.into(),
            request_ids,
            filter,
            created_at: Utc::now(),
        }
    }
}

/// Accumulates the replies for one dynamic destination.
pub struct Correlator {
    descriptor: DynamicReplyDescriptor,
    state: Mutex<CorrelatorState>,
}

struct CorrelatorState {
    outstanding: HashSet<CorrelationId>,
    expected: usize,
    received: usize,
    replies: Vec<MessageEnvelope>,
    abandoned: bool,
}

impl Correlator {
    pub fn new(descriptor: DynamicReplyDescriptor) -> Self {
        let outstanding = descriptor
            .request_ids
            .iter()
            .map(CorrelationId::from)
            .collect();
        let expected = descriptor.request_ids.len();
        Self {
            descriptor,
            state: Mutex::new(CorrelatorState {
                outstanding,
                expected,
                received: 0,
                replies: Vec::new(),
                abandoned: false,
            }),
        }
    }

    pub fn descriptor(&self) -> &DynamicReplyDescriptor {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Check whether an envelope is a reply to one of this destination's requests
    pub async fn accepts(&self, envelope: &MessageEnvelope) -> bool {
        match &self.descriptor.filter {
            ReplyFilter::CorrelationId => self
                .state
                .lock()
                .await
                .outstanding
                .contains(&envelope.correlation_id),
            ReplyFilter::SessionToken(token) => {
                envelope.property(SESSION_TOKEN_PROPERTY) == Some(token.as_str())
            }
        }
    }

    /// Record a received reply. Returns `false` for an envelope that does
    /// not belong to this destination, which is dropped.
    pub async fn record(&self, envelope: MessageEnvelope) -> bool {
        if !self.accepts(&envelope).await {
            debug!(
                queue = %self.descriptor.name,
                correlation_id = %envelope.correlation_id,
                "Discarding uncorrelated reply"
            );
            return false;
        }

        let mut state = self.state.lock().await;
        state.outstanding.remove(&envelope.correlation_id);
        state.received += 1;
        state.replies.push(envelope);
        true
    }

    /// Poll the dynamic destination once, recording any replies found.
    ///
    /// # Returns
    ///
    /// Number of replies recorded by this poll
    pub async fn poll_once(&self, session: &TransportSession) -> Result<usize, SessionError> {
        let mut recorded = 0;
        for filter in self.pending_filters().await {
            let replies = session
                .get_from_dynamic(
                    &self.descriptor.name,
                    self.remaining().await.max(1),
                    &GetOptions::default().with_filter(Some(filter)),
                )
                .await?;
            for reply in replies {
                if self.record(reply).await {
                    recorded += 1;
                }
            }
        }

        if recorded > 0 {
            info!(queue = %self.descriptor.name, recorded, "Replies correlated");
        }
        Ok(recorded)
    }

    /// Filters still worth polling with
    async fn pending_filters(&self) -> Vec<MessageFilter> {
        if self.is_complete().await {
            return Vec::new();
        }
        match &self.descriptor.filter {
            ReplyFilter::CorrelationId => {
                let state = self.state.lock().await;
                state
                    .outstanding
                    .iter()
                    .cloned()
                    .map(MessageFilter::CorrelationId)
                    .collect()
            }
            ReplyFilter::SessionToken(token) => {
                vec![MessageFilter::property(SESSION_TOKEN_PROPERTY, token.clone())]
            }
        }
    }

    /// Replies still expected
    pub async fn remaining(&self) -> usize {
        let state = self.state.lock().await;
        state.expected.saturating_sub(state.received)
    }

    /// True once a reply has arrived for every request
    pub async fn is_complete(&self) -> bool {
        self.remaining().await == 0
    }

    /// Give up on the replies still outstanding, e.g. after the dynamic
    /// queue was lost with its connection
    pub async fn abandon(&self) {
        self.state.lock().await.abandoned = true;
    }

    pub async fn is_abandoned(&self) -> bool {
        self.state.lock().await.abandoned
    }

    /// True once nothing more will be recorded: every reply arrived or the
    /// destination was abandoned
    pub async fn is_settled(&self) -> bool {
        let state = self.state.lock().await;
        state.abandoned || state.received >= state.expected
    }

    /// Remove and return the most recently received reply
    pub async fn take_latest(&self) -> Option<MessageEnvelope> {
        self.state.lock().await.replies.pop()
    }

    /// Replies received and not yet taken
    pub async fn pending_replies(&self) -> usize {
        self.state.lock().await.replies.len()
    }
}
