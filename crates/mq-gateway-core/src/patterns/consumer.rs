//! Point-to-point consumer.

use crate::error::GatewayError;
use crate::message::{DestinationName, MessageEnvelope};
use crate::registry::Identified;
use crate::session::{OpenKind, SessionFactory, TransportSession};
use crate::transport::{GetOptions, MessageFilter};
use tracing::{debug, warn};
use uuid::Uuid;

#[cfg(test)]
#[path = "consumer_tests.rs"]
mod tests;

/// Drains messages from a queue, one connection per call.
pub struct Consumer {
    id: Uuid,
    app_id: String,
    session: TransportSession,
}

impl Consumer {
    pub fn new(app_id: impl Into<String>, factory: &SessionFactory) -> Self {
        Self {
            id: Uuid::new_v4(),
            app_id: app_id.into(),
            session: factory.create_session(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Get up to `limit` messages from `queue`, optionally selecting on a
    /// property such as `currency`.
    ///
    /// Connects, opens, drains and then always cleans up, whether or not the
    /// get succeeded.
    pub async fn get_messages(
        &self,
        queue: &DestinationName,
        limit: usize,
        property_filter: Option<MessageFilter>,
    ) -> Result<Vec<MessageEnvelope>, GatewayError> {
        let result = self.drain(queue, limit, property_filter).await;
        if let Err(e) = &result {
            warn!(consumer_id = %self.id, app_id = %self.app_id, queue = %queue, error = %e, "Get failed");
        }
        self.session.cleanup().await?;
        result
    }

    async fn drain(
        &self,
        queue: &DestinationName,
        limit: usize,
        property_filter: Option<MessageFilter>,
    ) -> Result<Vec<MessageEnvelope>, GatewayError> {
        self.session.ensure_open(OpenKind::Get, queue.as_str()).await?;
        let options = GetOptions::default().with_filter(property_filter);
        let messages = self.session.get(limit, &options).await?;
        debug!(consumer_id = %self.id, queue = %queue, count = messages.len(), "Messages retrieved");
        Ok(messages)
    }
}

impl Identified for Consumer {
    fn app_id(&self) -> &str {
        &self.app_id
    }
}
