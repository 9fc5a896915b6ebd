//! Poison-message quarantine.
//!
//! A request retrieved under syncpoint whose processing fails is either
//! backed out for redelivery or, once its backout count reaches the
//! threshold, moved to the quarantine queue and committed away from the
//! source queue.

use crate::config::GatewayConfig;
use crate::error::SessionError;
use crate::message::MessageEnvelope;
use crate::session::TransportSession;
use tracing::{error, warn};

#[cfg(test)]
#[path = "quarantine_tests.rs"]
mod tests;

/// Outcome chosen for a failed message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuarantineDecision {
    /// Back out the unit of work so the message is redelivered
    Rollback,
    /// Put the message to the quarantine queue and commit
    Redirect,
}

/// Backout threshold and quarantine destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuarantinePolicy {
    threshold: u32,
    destination: String,
}

impl QuarantinePolicy {
    pub fn new(threshold: u32, destination: impl Into<String>) -> Self {
        Self {
            threshold,
            destination: destination.into(),
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(
            config.limits.backout_threshold,
            config.destinations.quarantine_queue.clone(),
        )
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Decide what to do with a message that failed processing
    pub fn decide(&self, backout_count: u32) -> QuarantineDecision {
        if backout_count >= self.threshold {
            QuarantineDecision::Redirect
        } else {
            QuarantineDecision::Rollback
        }
    }

    /// Resolve the session's open unit of work for a failed `envelope`.
    ///
    /// On a failed redirect the unit of work is backed out so the message
    /// stays on its source queue.
    pub async fn apply(
        &self,
        session: &TransportSession,
        envelope: &MessageEnvelope,
    ) -> Result<QuarantineDecision, SessionError> {
        let decision = self.decide(envelope.backout_count);
        match decision {
            QuarantineDecision::Rollback => {
                warn!(
                    session_id = %session.id(),
                    message_id = %envelope.message_id,
                    backout_count = envelope.backout_count,
                    threshold = self.threshold,
                    "Processing failed, backing out for redelivery"
                );
                session.rollback().await?;
            }
            QuarantineDecision::Redirect => {
                error!(
                    session_id = %session.id(),
                    message_id = %envelope.message_id,
                    backout_count = envelope.backout_count,
                    destination = %self.destination,
                    "Backout threshold reached, quarantining message"
                );
                if let Err(e) = session
                    .put_to(&self.destination, &envelope.to_outbound(), true)
                    .await
                {
                    if let Err(rollback_error) = session.rollback().await {
                        warn!(session_id = %session.id(), error = %rollback_error, "Backout after failed quarantine failed");
                    }
                    return Err(e);
                }
                session.commit().await?;
            }
        }
        Ok(decision)
    }
}
