//! Poll-until-condition primitive shared by every wait step
//!
//! Waiting suspends the calling task only; other project workers keep
//! running. Deadlines use `tokio::time::Instant`, which is monotonic and can
//! be paused in tests.

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::trace;

/// How often to check and for how long
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay before the second check
    pub interval: Duration,
    /// Added to the delay after every check
    pub step: Duration,
    /// Upper bound for the delay
    pub max_interval: Duration,
    /// Overall time budget
    pub timeout: Duration,
    /// Suspend once before the first check
    pub delay_first: bool,
}

impl PollPolicy {
    /// Check every `interval` until `timeout`
    pub const fn fixed(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            step: Duration::ZERO,
            max_interval: interval,
            timeout,
            delay_first: false,
        }
    }

    /// Start at `initial`, grow by `step` after each check, never exceed `max`
    pub const fn backoff(initial: Duration, step: Duration, max: Duration, timeout: Duration) -> Self {
        Self {
            interval: initial,
            step,
            max_interval: max,
            timeout,
            delay_first: false,
        }
    }

    /// Suspend for one interval before probing the first time
    #[must_use]
    pub const fn with_initial_delay(mut self) -> Self {
        self.delay_first = true;
        self
    }

    /// The delays this policy would sleep, in order (unbounded)
    pub fn intervals(&self) -> impl Iterator<Item = Duration> + use<> {
        let step = self.step;
        let max = self.max_interval;
        std::iter::successors(Some(self.interval), move |d| Some((*d + step).min(max)))
    }
}

/// Poll `fetch` until `done` holds for its result
///
/// Returns the state that satisfied `done`. Fails with `Error::Timeout`
/// (message `timeout_message`) once the policy's budget is spent, and
/// propagates any error from `fetch` or `done` immediately. `done` may fail
/// to stop early on a terminal bad state.
pub async fn poll_until<S, P, Fut, D>(
    policy: &PollPolicy,
    timeout_message: &str,
    mut fetch: P,
    mut done: D,
) -> Result<S>
where
    P: FnMut() -> Fut,
    Fut: Future<Output = Result<S>>,
    D: FnMut(&S) -> Result<bool>,
{
    let deadline = Instant::now() + policy.timeout;
    let mut intervals = policy.intervals();
    let mut next_interval = || intervals.next().unwrap_or(policy.max_interval);

    if policy.delay_first {
        sleep(next_interval().min(policy.timeout)).await;
    }

    loop {
        // nothing is fetched at or past the deadline
        if Instant::now() >= deadline {
            return Err(Error::Timeout(timeout_message.to_string()));
        }

        let state = fetch().await?;
        if done(&state)? {
            return Ok(state);
        }

        let delay = next_interval().min(deadline.saturating_duration_since(Instant::now()));
        trace!(?delay, "condition not met yet");
        sleep(delay).await;
    }
}
