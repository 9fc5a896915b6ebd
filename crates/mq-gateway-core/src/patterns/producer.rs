//! Point-to-point producer.

use super::numbered_message;
use crate::error::GatewayError;
use crate::message::{DestinationName, MessageId};
use crate::registry::Identified;
use crate::session::{OpenKind, SessionFactory, TransportSession};
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

#[cfg(test)]
#[path = "producer_tests.rs"]
mod tests;

/// Puts numbered gateway messages on a queue.
pub struct Producer {
    id: Uuid,
    app_id: String,
    session: TransportSession,
}

impl Producer {
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

    /// Put `quantity` messages on `queue`, each tagged with `properties`.
    ///
    /// The queue is opened lazily and reopened when it differs from the
    /// previous call. On failure the session is cleaned up before the error
    /// is returned, so the next call starts from a fresh connection.
    pub async fn put_messages(
        &self,
        message: &str,
        quantity: u32,
        queue: &DestinationName,
        properties: &HashMap<String, String>,
    ) -> Result<Vec<MessageId>, GatewayError> {
        let result = self.put_all(message, quantity, queue, properties).await;
        if let Err(e) = &result {
            warn!(producer_id = %self.id, app_id = %self.app_id, queue = %queue, error = %e, "Put failed");
            self.session.cleanup().await?;
        }
        result
    }

    async fn put_all(
        &self,
        message: &str,
        quantity: u32,
        queue: &DestinationName,
        properties: &HashMap<String, String>,
    ) -> Result<Vec<MessageId>, GatewayError> {
        self.session.ensure_open(OpenKind::Put, queue.as_str()).await?;

        let mut ids = Vec::new();
        for index in 1..=quantity {
            let outbound = numbered_message(message, index, quantity)?.with_properties(properties);
            ids.push(self.session.put(&outbound, false).await?);
        }

        info!(producer_id = %self.id, app_id = %self.app_id, queue = %queue, count = ids.len(), "Messages put");
        Ok(ids)
    }

    /// Release the connection and any open handle
    pub async fn close_connection(&self) {
        // Cleanup never fails; its errors are logged by the session
        let _ = self.session.cleanup().await;
    }
}

impl Identified for Producer {
    fn app_id(&self) -> &str {
        &self.app_id
    }
}
