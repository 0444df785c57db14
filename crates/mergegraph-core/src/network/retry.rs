//! Bounded retry for hub requests and graph store statements.
//!
//! A [`RetryConfig`] says how many attempts an operation gets and how long to
//! wait between them. The caller decides which errors are worth another
//! attempt: the hub client retries 5xx/429/timeouts, the SQLite stores retry
//! lock and busy errors. [`retry_async`] sleeps on the tokio timer,
//! [`retry_blocking`] on the current thread.

use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Delay growth between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// `base * (attempt + 1)`
    Linear,
    /// `base * factor ^ attempt`
    Exponential(f64),
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Upper bound for any single delay, jitter included.
    pub max_delay: Duration,
    pub backoff: Backoff,
    /// Scale each delay by a random factor in `[0.5, 1.5)`.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::hub_requests()
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hub requests: three attempts, doubling from one second, jittered.
    pub fn hub_requests() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff: Backoff::Exponential(2.0),
            jitter: true,
        }
    }

    /// Store lock/busy conflicts: ten attempts, one more second each time,
    /// never above ten seconds.
    pub fn store_conflicts() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff: Backoff::Linear,
            jitter: false,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay after the failed attempt `attempt` (0-based).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let factor = match self.backoff {
            Backoff::Linear => f64::from(attempt.saturating_add(1)),
            Backoff::Exponential(base) => base.powi(attempt.min(i32::MAX as u32) as i32),
        };
        let cap = self.max_delay.as_secs_f64();
        let mut secs = (self.base_delay.as_secs_f64() * factor).min(cap);
        if self.jitter {
            secs = (secs * rand::rng().random_range(0.5..1.5)).min(cap);
        }
        Duration::from_secs_f64(secs)
    }
}

/// Outcome bookkeeping of one retried operation.
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    pub attempts: u32,
    /// Time spent waiting between attempts.
    pub total_delay: Duration,
    pub success: bool,
    pub last_error: Option<String>,
}

impl RetryStats {
    fn succeeded(&mut self) {
        self.success = true;
        if self.attempts > 1 {
            debug!("Succeeded on attempt {}", self.attempts);
        }
    }

    /// Record a failure and return the delay before the next attempt, or
    /// `None` when the operation should give up.
    fn failed<E: Display>(&mut self, config: &RetryConfig, error: &E, retryable: bool) -> Option<Duration> {
        self.last_error = Some(error.to_string());
        if !retryable {
            debug!("Not retrying: {}", error);
            return None;
        }
        if self.attempts >= config.max_attempts {
            warn!("Giving up after {} attempts: {}", self.attempts, error);
            return None;
        }
        let delay = config.calculate_delay(self.attempts - 1);
        self.total_delay += delay;
        warn!(
            "Attempt {} of {} failed ({}); next attempt in {:?}",
            self.attempts, config.max_attempts, error, delay
        );
        Some(delay)
    }
}

/// Run `operation` until it succeeds, fails with an error `should_retry`
/// rejects, or runs out of attempts.
pub async fn retry_async<F, Fut, T, E>(
    config: &RetryConfig,
    mut operation: F,
    should_retry: impl Fn(&E) -> bool,
) -> (Result<T, E>, RetryStats)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut stats = RetryStats::default();
    loop {
        stats.attempts += 1;
        match operation().await {
            Ok(value) => {
                stats.succeeded();
                return (Ok(value), stats);
            }
            Err(e) => match stats.failed(config, &e, should_retry(&e)) {
                Some(delay) => tokio::time::sleep(delay).await,
                None => return (Err(e), stats),
            },
        }
    }
}

/// Blocking counterpart of [`retry_async`] for synchronous SQLite calls.
pub fn retry_blocking<F, T, E>(
    config: &RetryConfig,
    mut operation: F,
    should_retry: impl Fn(&E) -> bool,
) -> (Result<T, E>, RetryStats)
where
    F: FnMut() -> Result<T, E>,
    E: Display,
{
    let mut stats = RetryStats::default();
    loop {
        stats.attempts += 1;
        match operation() {
            Ok(value) => {
                stats.succeeded();
                return (Ok(value), stats);
            }
            Err(e) => match stats.failed(config, &e, should_retry(&e)) {
                Some(delay) => std::thread::sleep(delay),
                None => return (Err(e), stats),
            },
        }
    }
}
