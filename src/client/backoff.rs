//! Retry policy and sleeping between attempts

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

/// Wait recommended to the caller when a rate limit carries no hint
pub const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(30);

/// Exponential backoff parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Wait after the first failed attempt; doubled after each further one
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Create a policy
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Wait after failed attempt number `attempt` (numbered from 1)
    ///
    /// `base_delay * 2^(attempt-1)`, raised to `retry_after` when the
    /// server asked for longer.
    ///
    /// # Examples
    ///
    /// ```
    /// use chatroom::client::backoff::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::new(3, Duration::from_millis(1000));
    /// assert_eq!(policy.delay_for(1, None), Duration::from_millis(1000));
    /// assert_eq!(policy.delay_for(2, None), Duration::from_millis(2000));
    /// assert_eq!(
    ///     policy.delay_for(1, Some(Duration::from_secs(5))),
    ///     Duration::from_secs(5)
    /// );
    /// ```
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let backoff = self.base_delay.saturating_mul(1u32 << exponent);
        match retry_after {
            Some(hint) => backoff.max(hint),
            None => backoff,
        }
    }

    /// Whether another attempt follows attempt number `attempt`
    pub fn has_attempts_after(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Parse a retry-after value given in whole seconds
///
/// Accepts `"5"`, `" 5 "` and `"5s"`; anything else yields `None`.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let trimmed = value.trim();
    let digits = trimmed.strip_suffix('s').unwrap_or(trimmed).trim();
    digits.parse::<u64>().ok().map(Duration::from_secs)
}

/// Parse a retry-after value from a JSON body (number or string)
pub fn parse_retry_after_json(value: &serde_json::Value) -> Option<Duration> {
    match value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.ceil() as u64))
            .map(Duration::from_secs),
        serde_json::Value::String(s) => parse_retry_after(s),
        _ => None,
    }
}

/// Suspension between attempts
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Wait for `duration`
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Records requested waits and returns immediately
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Every wait requested so far, in order
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().map(|d| d.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut delays) = self.delays.lock() {
            delays.push(duration);
        }
    }
}
