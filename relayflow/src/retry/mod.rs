//! Scheduler-side retry decisions.
//!
//! The executor never retries. The scheduler feeds each outcome through a
//! [`RetryPolicy`] to learn whether the job is done, must be retried later,
//! or must be discarded.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::{Outcome, Schedule};

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BackoffStrategy {
    /// delay = base * 2^attempt
    #[default]
    Exponential,
    /// delay = base * (attempt + 1)
    Linear,
    /// delay = base
    Constant,
}

/// Jitter applied to a computed delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum JitterStrategy {
    /// No jitter.
    None,
    /// Random from 0 to delay.
    #[default]
    Full,
    /// Half fixed, half random.
    Equal,
}

/// What the scheduler must do with a job after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Mark the job as delivered.
    Succeeded,
    /// Queue the job again after the delay.
    Retry(Duration),
    /// Mark the job as discarded. No further attempt.
    Discard,
}

/// Turns outcomes into dispositions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Base delay in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound of a delay in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Backoff strategy.
    #[serde(default)]
    pub backoff: BackoffStrategy,
    /// Jitter strategy.
    #[serde(default)]
    pub jitter: JitterStrategy,
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    3_600_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff: BackoffStrategy::default(),
            jitter: JitterStrategy::default(),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter = strategy;
        self
    }

    /// Decides what happens to the jobs of an outcome.
    ///
    /// `attempt` counts the attempts already made, including this one. A
    /// forced discard is final regardless of the remaining budget; once
    /// `schedule.max_retries` retries are used up the job is discarded.
    #[must_use]
    pub fn decide(&self, outcome: &Outcome, attempt: u16, schedule: &Schedule) -> Disposition {
        if outcome.is_success() {
            return Disposition::Succeeded;
        }
        if outcome.force_discard {
            return Disposition::Discard;
        }
        let retries_used = attempt.saturating_sub(1);
        if retries_used >= schedule.max_retries {
            return Disposition::Discard;
        }
        Disposition::Retry(self.delay(retries_used))
    }

    /// Computes the delay before the retry following `retries_used`
    /// previous retries.
    #[must_use]
    pub fn delay(&self, retries_used: u16) -> Duration {
        let base = self.base_delay_ms;
        let max = self.max_delay_ms;

        let delay = match self.backoff {
            BackoffStrategy::Exponential => base
                .saturating_mul(2u64.saturating_pow(u32::from(retries_used)))
                .min(max),
            BackoffStrategy::Linear => base
                .saturating_mul(u64::from(retries_used) + 1)
                .min(max),
            BackoffStrategy::Constant => base.min(max),
        };

        let jittered = match self.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };

        Duration::from_millis(jittered)
    }
}
