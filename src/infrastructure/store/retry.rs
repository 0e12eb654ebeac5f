//! Exponential backoff for store connection attempts

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::domain::DomainError;

/// Retry behaviour for connection-level failures
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first; 1 disables retry
    pub max_attempts: u32,
    pub initial_delay: Duration,
    /// Caps exponential growth
    pub max_delay: Duration,
    /// Adds up to 50% random delay so clients do not retry in lockstep
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n.max(1);
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// `initial_delay * 2^attempt`, capped at `max_delay`, without jitter
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.initial_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay)
    }

    fn effective_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt);

        if !self.jitter || delay.is_zero() {
            return delay;
        }

        let extra = rand::thread_rng().gen_range(0..=delay.as_millis() as u64 / 2);
        delay + Duration::from_millis(extra)
    }
}

/// Runs `f` until it succeeds, retrying only connection errors
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: &str, f: F) -> Result<T, DomainError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, DomainError>>,
{
    let mut last_err = None;

    for attempt in 0..config.max_attempts.max(1) {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_connection() => {
                if attempt + 1 < config.max_attempts {
                    let delay = config.effective_delay(attempt);
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        max_attempts = config.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after connection error"
                    );
                    tokio::time::sleep(delay).await;
                }
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_err.unwrap_or_else(|| DomainError::connection(format!("{} failed", operation))))
}
