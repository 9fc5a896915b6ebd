//! Topic publisher.

use super::numbered_message;
use crate::error::{GatewayError, ReasonCode};
use crate::message::TopicName;
use crate::registry::Identified;
use crate::session::{OpenKind, SessionFactory, TransportSession};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[cfg(test)]
#[path = "publisher_tests.rs"]
mod tests;

/// Result of one publish call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    pub topic: String,
    /// Messages accepted by the transport, including those nobody received
    pub published: u32,
    /// Messages the transport reported as matching no subscription
    pub without_subscribers: u32,
}

/// Publishes numbered gateway messages to a topic.
///
/// The topic handle is kept open between calls and reopened when a call
/// names a different topic.
pub struct Publisher {
    id: Uuid,
    app_id: String,
    session: TransportSession,
}

impl Publisher {
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

    /// Publish `quantity` copies of `message` to `topic`.
    ///
    /// A "no subscribers matched" warning counts as a successful publish.
    /// Any other failure cleans up the session and is returned.
    pub async fn publish_messages(
        &self,
        topic: &TopicName,
        quantity: u32,
        message: &str,
    ) -> Result<PublishReport, GatewayError> {
        if let Some(bound) = self.session.bound_target().await {
            if bound != topic.as_str() {
                debug!(publisher_id = %self.id, from = %bound, to = %topic, "Topic changed, reconnecting");
                self.session.cleanup().await?;
            }
        }

        match self.publish_all(topic, quantity, message).await {
            Ok(report) => {
                info!(
                    publisher_id = %self.id,
                    app_id = %self.app_id,
                    topic = %topic,
                    published = report.published,
                    without_subscribers = report.without_subscribers,
                    "Messages published"
                );
                Ok(report)
            }
            Err(e) => {
                warn!(publisher_id = %self.id, app_id = %self.app_id, topic = %topic, error = %e, "Publish failed");
                self.session.cleanup().await?;
                Err(e)
            }
        }
    }

    async fn publish_all(
        &self,
        topic: &TopicName,
        quantity: u32,
        message: &str,
    ) -> Result<PublishReport, GatewayError> {
        self.session.ensure_open(OpenKind::Publish, topic.as_str()).await?;

        let mut report = PublishReport {
            topic: topic.to_string(),
            published: 0,
            without_subscribers: 0,
        };
        for index in 1..=quantity {
            let outbound = numbered_message(message, index, quantity)?;
            match self.session.put(&outbound, false).await {
                Ok(_) => report.published += 1,
                Err(e) if e.reason() == Some(ReasonCode::NoSubscribersMatched) => {
                    report.published += 1;
                    report.without_subscribers += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        if report.without_subscribers > 0 {
            debug!(publisher_id = %self.id, topic = %topic, "Published without subscribers");
        }
        Ok(report)
    }

    /// Release the connection and topic handle
    pub async fn close_connection(&self) {
        let _ = self.session.cleanup().await;
    }
}

impl Identified for Publisher {
    fn app_id(&self) -> &str {
        &self.app_id
    }
}
