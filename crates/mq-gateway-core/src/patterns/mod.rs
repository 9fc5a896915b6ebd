//! Pattern façades built on [`TransportSession`](crate::session::TransportSession).
//!
//! - [`producer`] / [`consumer`]: point-to-point put and get
//! - [`publisher`] / [`subscriber`]: publish/subscribe with background polling
//! - [`requestor`] / [`responder`]: request/response with dynamic reply queues
//!
//! Each façade owns one session and carries the application id it serves,
//! so it can be tracked in a [`BoundedRegistry`](crate::registry::BoundedRegistry).

pub mod consumer;
pub mod producer;
pub mod publisher;
pub mod requestor;
pub mod responder;
pub mod subscriber;

pub use consumer::Consumer;
pub use producer::Producer;
pub use publisher::{PublishReport, Publisher};
pub use requestor::Requestor;
pub use responder::{ProcessOutcome, Responder};
pub use subscriber::{Subscriber, SubscriberState};

use crate::error::GatewayError;
use crate::message::{GatewayMessage, OutboundMessage};

/// Encode the `GatewayMessage` document for copy `index` of `quantity`
pub(crate) fn numbered_message(
    message: &str,
    index: u32,
    quantity: u32,
) -> Result<OutboundMessage, GatewayError> {
    GatewayMessage::new(message, index, quantity)
        .to_outbound()
        .map_err(GatewayError::from)
}
