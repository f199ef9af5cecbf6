//! Bounded retry policy shared by discovery and cluster assembly.

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Limits for a retry loop: attempts per target, a total attempt budget,
/// a fixed pause between attempts and a wall-clock deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub budget: u32,
    pub deadline: Duration,
}

/// Answer to "may I make another attempt?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Granted,
    /// Total attempt budget spent
    Exhausted,
    /// Wall-clock deadline passed
    Expired,
}

/// The wait between attempts was interrupted by the cancellation token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration, budget: u32, deadline: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            budget,
            deadline,
        }
    }

    /// Start tracking one run of the loop.
    pub fn begin(&self) -> RetryBudget {
        RetryBudget {
            policy: *self,
            used: 0,
            started: Instant::now(),
        }
    }
}

/// Consumption state of a [`RetryPolicy`] for a single run
#[derive(Debug)]
pub struct RetryBudget {
    policy: RetryPolicy,
    used: u32,
    started: Instant,
}

impl RetryBudget {
    /// Consume one attempt if both the budget and the deadline allow it.
    pub fn admit(&mut self) -> Admission {
        if self.expired() {
            return Admission::Expired;
        }
        if self.used >= self.policy.budget {
            return Admission::Exhausted;
        }
        self.used += 1;
        Admission::Granted
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn expired(&self) -> bool {
        self.elapsed() >= self.policy.deadline
    }

    /// Time left before the deadline.
    pub fn remaining(&self) -> Duration {
        self.policy.deadline.saturating_sub(self.elapsed())
    }

    /// Sleep the fixed delay, clipped to the deadline. Returns early on cancellation.
    pub async fn pause(&self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        let wait = self.policy.delay.min(self.remaining());

        tokio::select! {
            _ = cancel.cancelled() => Err(Cancelled),
            _ = tokio::time::sleep(wait) => Ok(()),
        }
    }
}
