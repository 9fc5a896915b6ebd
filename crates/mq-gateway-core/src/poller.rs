//! Timer-driven background polling with cooperative cancellation.
//!
//! Subscribers and reply correlators poll the transport on a schedule. A
//! poll loop sleeps, checks its [`CancellationFlag`], runs one step and then
//! checks the flag again before rescheduling. Cancellation never interrupts a
//! step that is already running.

use rand::Rng;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

#[cfg(test)]
#[path = "poller_tests.rs"]
mod tests;

/// Shared flag used to stop a poll loop.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Delay between polls, optionally randomized within a window.
///
/// # Examples
///
/// ```rust
/// use mq_gateway_core::poller::PollSchedule;
/// use std::time::Duration;
///
/// let schedule = PollSchedule::jittered(Duration::from_millis(1000), Duration::from_millis(2000));
/// let delay = schedule.next_delay();
/// assert!(delay >= Duration::from_millis(1000) && delay <= Duration::from_millis(2000));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    min_delay: Duration,
    max_delay: Duration,
}

impl PollSchedule {
    /// Same delay before every poll
    pub fn fixed(delay: Duration) -> Self {
        Self {
            min_delay: delay,
            max_delay: delay,
        }
    }

    /// Uniformly random delay in `[min_delay, max_delay]`; the bounds are
    /// swapped if given in the wrong order
    pub fn jittered(min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            min_delay: min_delay.min(max_delay),
            max_delay: min_delay.max(max_delay),
        }
    }

    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Delay to wait before the next poll
    pub fn next_delay(&self) -> Duration {
        if self.min_delay == self.max_delay {
            return self.min_delay;
        }

        let min_ms = self.min_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(min_ms..=max_ms))
    }
}

/// Whether a poll loop keeps going after a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Continue,
    Stop,
}

/// Handle to a running poll loop
#[derive(Debug)]
pub struct PollerHandle {
    flag: CancellationFlag,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Stop rescheduling; a step already running completes normally
    pub fn cancel(&self) {
        self.flag.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the loop to exit
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            debug!(error = %e, "Poll loop task ended abnormally");
        }
    }
}

/// Spawn a poll loop running `step` on `schedule` until it returns
/// [`PollOutcome::Stop`] or `flag` is cancelled.
///
/// The first step runs after one scheduled delay.
pub fn spawn_poller<F, Fut>(
    name: &'static str,
    schedule: PollSchedule,
    flag: CancellationFlag,
    mut step: F,
) -> PollerHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = PollOutcome> + Send + 'static,
{
    let loop_flag = flag.clone();
    let task = tokio::spawn(async move {
        loop {
            tokio::time::sleep(schedule.next_delay()).await;
            if loop_flag.is_cancelled() {
                break;
            }

            let outcome = step().await;
            if outcome == PollOutcome::Stop || loop_flag.is_cancelled() {
                break;
            }
        }
        debug!(poller = name, "Poll loop stopped");
    });

    PollerHandle { flag, task }
}
