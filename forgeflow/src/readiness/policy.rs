//! Probe timing: initial delay, retry interval, backoff and jitter.

use crate::core::Language;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff strategy for the interval between probe attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = interval (constant)
    #[default]
    Fixed,
    /// delay = interval * attempt
    Linear,
    /// delay = interval * 2^(attempt - 1)
    Exponential,
}

/// Jitter applied on top of the backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    #[default]
    None,
    /// Random from 0 to delay
    Full,
    /// Half fixed, half random
    Equal,
}

/// How a service is polled until it answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbePolicy {
    /// Wait before the first attempt, in milliseconds.
    pub initial_delay_ms: u64,
    /// Base interval between attempts, in milliseconds.
    pub interval_ms: u64,
    /// Cap on the backed-off interval, in milliseconds.
    pub max_interval_ms: u64,
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Backoff strategy.
    pub backoff: BackoffStrategy,
    /// Jitter strategy.
    pub jitter: JitterStrategy,
    /// Per-request timeout, in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(1), 15)
    }
}

impl ProbePolicy {
    /// Fixed-interval policy with no initial delay.
    #[must_use]
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        let interval_ms = millis(interval);
        Self {
            initial_delay_ms: 0,
            interval_ms,
            max_interval_ms: interval_ms,
            max_attempts,
            backoff: BackoffStrategy::Fixed,
            jitter: JitterStrategy::None,
            request_timeout_ms: 2_000,
        }
    }

    /// Default policy for a language target.
    ///
    /// Julia services compile on first start, so they get a long warm-up
    /// delay and many attempts.
    #[must_use]
    pub fn for_language(language: Language) -> Self {
        match language {
            Language::Html => Self::fixed(Duration::from_millis(500), 10)
                .with_initial_delay(Duration::from_millis(200)),
            Language::Python => Self::fixed(Duration::from_secs(1), 15)
                .with_initial_delay(Duration::from_secs(1)),
            Language::Julia => Self::fixed(Duration::from_secs(2), 60)
                .with_initial_delay(Duration::from_secs(15))
                .with_request_timeout(Duration::from_secs(5)),
        }
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay_ms = millis(delay);
        self
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Switches to exponential backoff capped at `max_interval`.
    #[must_use]
    pub fn with_exponential_backoff(mut self, max_interval: Duration) -> Self {
        self.backoff = BackoffStrategy::Exponential;
        self.max_interval_ms = millis(max_interval).max(self.interval_ms);
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = millis(timeout);
        self
    }

    /// Wait before the first attempt.
    #[must_use]
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Per-request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Sleep after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let base = self.interval_ms;
        let cap = self.max_interval_ms.max(base);
        let step = attempt.max(1);

        let delay = match self.backoff {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Linear => base.saturating_mul(u64::from(step)).min(cap),
            BackoffStrategy::Exponential => base
                .saturating_mul(2u64.saturating_pow(step - 1))
                .min(cap),
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

    /// Upper bound on the time a full probe can take, ignoring jitter.
    #[must_use]
    pub fn worst_case(&self) -> Duration {
        let sleeps: u64 = (1..self.max_attempts)
            .map(|a| {
                let no_jitter = Self {
                    jitter: JitterStrategy::None,
                    ..self.clone()
                };
                millis(no_jitter.delay_after(a))
            })
            .sum();
        let requests = self
            .request_timeout_ms
            .saturating_mul(u64::from(self.max_attempts));
        Duration::from_millis(
            self.initial_delay_ms
                .saturating_add(sleeps)
                .saturating_add(requests),
        )
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
