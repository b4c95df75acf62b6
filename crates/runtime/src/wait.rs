//! Bounded polling for an element to become ready.
//!
//! One wait owns one timer. The interval starts at `initial_interval` and
//! doubles up to `max_interval`; the whole wait gives up at `timeout`.

use pipsync_core::PipConfig;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitState {
    Waiting,
    Ready,
    /// The probe reported the target can no longer appear, e.g. the page
    /// navigated away.
    Unavailable,
    Timeout,
}

/// One probe result.
#[derive(Debug, Clone, PartialEq)]
pub enum Probe<T> {
    Ready(T),
    Pending,
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub timeout: Duration,
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl From<&PipConfig> for WaitPolicy {
    fn from(config: &PipConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.wait_timeout_ms),
            initial_interval: Duration::from_millis(config.wait_initial_interval_ms.max(1)),
            max_interval: Duration::from_millis(config.wait_max_interval_ms.max(1)),
        }
    }
}

#[derive(Debug)]
pub struct ElementWait {
    label: &'static str,
    policy: WaitPolicy,
    state: WaitState,
}

impl ElementWait {
    pub fn new(label: &'static str, policy: WaitPolicy) -> Self {
        Self {
            label,
            policy,
            state: WaitState::Waiting,
        }
    }

    pub fn state(&self) -> WaitState {
        self.state
    }

    /// Poll `probe` until it is ready, gives up, or the timeout elapses.
    pub async fn until<T>(&mut self, mut probe: impl FnMut() -> Probe<T>) -> Option<T> {
        self.state = WaitState::Waiting;
        let deadline = Instant::now() + self.policy.timeout;
        let mut interval = self.policy.initial_interval;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match probe() {
                Probe::Ready(value) => {
                    debug!(wait = self.label, attempts, "Wait satisfied");
                    self.state = WaitState::Ready;
                    return Some(value);
                }
                Probe::Unavailable => {
                    debug!(wait = self.label, attempts, "Wait target unavailable");
                    self.state = WaitState::Unavailable;
                    return None;
                }
                Probe::Pending => {}
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(wait = self.label, attempts, "Wait timed out");
                self.state = WaitState::Timeout;
                return None;
            }
            tokio::time::sleep(interval.min(deadline - now)).await;
            interval = (interval * 2).min(self.policy.max_interval);
        }
    }
}
