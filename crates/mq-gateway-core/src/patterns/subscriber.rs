//! Topic subscriber with a background poll loop and a bounded stash.
//!
//! A subscriber moves through these states:
//!
//! ```text
//! Unsubscribed -> Subscribing -> Polling -> (re-)Subscribing | Terminated
//! ```
//!
//! While polling, a background task gets one message per tick, after a
//! randomized delay within the configured window, and pushes it into the
//! stash. Callers read from the stash, never from the transport, so the poll
//! cadence is independent of the read cadence.
//!
//! When the stash is full the polled message is dropped and a warning is
//! counted. After the configured number of consecutive warnings the
//! subscriber terminates itself: polling stops and the session is released.
//! A successful stash resets the count.
//!
//! The stash is FIFO: [`Subscriber::get_messages`] returns the oldest
//! messages first.

use crate::error::GatewayError;
use crate::message::{MessageEnvelope, TopicName};
use crate::poller::{spawn_poller, CancellationFlag, PollOutcome, PollSchedule, PollerHandle};
use crate::registry::Identified;
use crate::session::{SessionFactory, TransportSession};
use crate::transport::GetOptions;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[cfg(test)]
#[path = "subscriber_tests.rs"]
mod tests;

/// Lifecycle state of a subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriberState {
    Unsubscribed,
    Subscribing,
    Polling,
    Terminated,
}

impl std::fmt::Display for SubscriberState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unsubscribed => "unsubscribed",
            Self::Subscribing => "subscribing",
            Self::Polling => "polling",
            Self::Terminated => "terminated",
        };
        write!(f, "{}", s)
    }
}

struct SubscriberInner {
    state: SubscriberState,
    topic: Option<String>,
    stash: VecDeque<MessageEnvelope>,
    warnings: u32,
}

/// State shared between the subscriber and its poll loop
struct SubscriberCore {
    id: Uuid,
    session: TransportSession,
    stash_capacity: usize,
    max_warnings: u32,
    inner: Mutex<SubscriberInner>,
}

impl SubscriberCore {
    async fn poll_step(&self, flag: &CancellationFlag) -> PollOutcome {
        let result = self.session.get(1, &GetOptions::default()).await;
        if flag.is_cancelled() {
            debug!(subscriber_id = %self.id, "Poll result discarded after cancellation");
            return PollOutcome::Stop;
        }

        let messages = match result {
            Ok(messages) => messages,
            Err(e) => {
                warn!(subscriber_id = %self.id, error = %e, "Poll failed");
                if !self.session.is_healthy().await {
                    self.resubscribe(flag).await;
                }
                return PollOutcome::Continue;
            }
        };

        let mut inner = self.inner.lock().await;
        for message in messages {
            if inner.stash.len() >= self.stash_capacity {
                inner.warnings += 1;
                warn!(
                    subscriber_id = %self.id,
                    warnings = inner.warnings,
                    capacity = self.stash_capacity,
                    "Stash full, message dropped"
                );
                if inner.warnings >= self.max_warnings {
                    error!(subscriber_id = %self.id, warnings = inner.warnings, "Terminating subscriber");
                    inner.state = SubscriberState::Terminated;
                    flag.cancel();
                    drop(inner);
                    let _ = self.session.cleanup().await;
                    return PollOutcome::Stop;
                }
            } else {
                inner.stash.push_back(message);
                inner.warnings = 0;
            }
        }
        PollOutcome::Continue
    }

    /// Recreate the subscription after the connection was lost.
    ///
    /// A cancellation that lands while the subscribe is in flight wins: the
    /// new subscription is released and the subscriber stays terminated.
    async fn resubscribe(&self, flag: &CancellationFlag) {
        let topic = {
            let mut inner = self.inner.lock().await;
            if flag.is_cancelled() {
                return;
            }
            inner.state = SubscriberState::Subscribing;
            inner.topic.clone()
        };
        let Some(topic) = topic else {
            return;
        };

        let result = self.session.subscribe(&topic).await;

        let mut inner = self.inner.lock().await;
        if flag.is_cancelled() {
            inner.state = SubscriberState::Terminated;
            drop(inner);
            let _ = self.session.cleanup().await;
            debug!(subscriber_id = %self.id, topic = %topic, "Resubscribe superseded by cancellation");
            return;
        }

        match result {
            Ok(()) => {
                inner.state = SubscriberState::Polling;
                info!(subscriber_id = %self.id, topic = %topic, "Resubscribed");
            }
            Err(e) => {
                warn!(subscriber_id = %self.id, topic = %topic, error = %e, "Resubscribe failed, retrying on next poll");
            }
        }
    }
}

/// Subscribes to a topic and stashes what it receives.
pub struct Subscriber {
    app_id: String,
    core: Arc<SubscriberCore>,
    schedule: PollSchedule,
    poller: Mutex<Option<PollerHandle>>,
}

impl Subscriber {
    pub fn new(app_id: impl Into<String>, factory: &SessionFactory) -> Self {
        let config = factory.config();
        Self {
            app_id: app_id.into(),
            core: Arc::new(SubscriberCore {
                id: Uuid::new_v4(),
                session: factory.create_session(),
                stash_capacity: config.limits.stash_capacity,
                max_warnings: config.limits.max_stash_warnings,
                inner: Mutex::new(SubscriberInner {
                    state: SubscriberState::Unsubscribed,
                    topic: None,
                    stash: VecDeque::new(),
                    warnings: 0,
                }),
            }),
            schedule: PollSchedule::jittered(
                config.polling.subscriber_min_delay(),
                config.polling.subscriber_max_delay(),
            ),
            poller: Mutex::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.core.id
    }

    /// Create a managed non-durable subscription on `topic` and start polling.
    ///
    /// Any previous poll loop is cancelled first. On failure the session is
    /// released and the subscriber returns to `Unsubscribed`.
    pub async fn make_subscription(&self, topic: &TopicName) -> Result<(), GatewayError> {
        let mut poller = self.poller.lock().await;
        if let Some(previous) = poller.take() {
            previous.cancel();
        }

        {
            let mut inner = self.core.inner.lock().await;
            inner.state = SubscriberState::Subscribing;
            inner.topic = Some(topic.to_string());
            inner.warnings = 0;
        }

        if let Err(e) = self.core.session.subscribe(topic.as_str()).await {
            warn!(subscriber_id = %self.core.id, app_id = %self.app_id, topic = %topic, error = %e, "Subscribe failed");
            let _ = self.core.session.cleanup().await;
            self.core.inner.lock().await.state = SubscriberState::Unsubscribed;
            return Err(e.into());
        }
        self.core.inner.lock().await.state = SubscriberState::Polling;

        let flag = CancellationFlag::new();
        let core = self.core.clone();
        let step_flag = flag.clone();
        *poller = Some(spawn_poller("subscriber", self.schedule, flag, move || {
            let core = core.clone();
            let flag = step_flag.clone();
            async move { core.poll_step(&flag).await }
        }));

        info!(subscriber_id = %self.core.id, app_id = %self.app_id, topic = %topic, "Subscribed");
        Ok(())
    }

    /// Stop polling, release the session and terminate.
    ///
    /// The non-durable subscription ends with the session. Messages already
    /// stashed stay readable.
    pub async fn delete_subscription(&self) {
        if let Some(handle) = self.poller.lock().await.take() {
            handle.cancel();
        }
        self.core.inner.lock().await.state = SubscriberState::Terminated;
        let _ = self.core.session.cleanup().await;
        debug!(subscriber_id = %self.core.id, app_id = %self.app_id, "Subscription deleted");
    }

    /// Take up to `limit` stashed messages, oldest first
    pub async fn get_messages(&self, limit: usize) -> Vec<MessageEnvelope> {
        let mut inner = self.core.inner.lock().await;
        let count = limit.min(inner.stash.len());
        inner.stash.drain(..count).collect()
    }

    pub async fn state(&self) -> SubscriberState {
        self.core.inner.lock().await.state
    }

    pub async fn stash_len(&self) -> usize {
        self.core.inner.lock().await.stash.len()
    }

    /// Consecutive stash-full warnings
    pub async fn warning_count(&self) -> u32 {
        self.core.inner.lock().await.warnings
    }

    pub async fn topic(&self) -> Option<String> {
        self.core.inner.lock().await.topic.clone()
    }
}

impl Identified for Subscriber {
    fn app_id(&self) -> &str {
        &self.app_id
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        if let Some(handle) = self.poller.get_mut().take() {
            handle.cancel();
        }
    }
}
