//! Bounded retry helpers shared by every operation category.
//!
//! A single [`RetryPolicy`] shape (`max_attempts`, `backoff_delay_ms`) is
//! injected per category (deployment, funding, transport) instead of
//! hard-coding attempt counts at each call site.

use anyhow::{Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Never less than 1.
    pub max_attempts: u32,
    /// Base delay between attempts in milliseconds
    pub backoff_delay_ms: u64,
    /// Multiplier applied per attempt (1.0 = constant delay)
    #[serde(default = "default_exponential_base")]
    pub exponential_base: f64,
    /// Upper bound for a single delay in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Whether to add ±25% random jitter
    #[serde(default)]
    pub jitter: bool,
}

fn default_exponential_base() -> f64 {
    1.0
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_delay_ms: 1000,
            exponential_base: default_exponential_base(),
            max_delay_ms: default_max_delay_ms(),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            backoff_delay_ms,
            max_delay_ms: backoff_delay_ms.saturating_mul(30).max(backoff_delay_ms),
            ..Default::default()
        }
    }

    /// Helper-contract deployment: few attempts, long settle between them.
    pub fn for_deployment() -> Self {
        Self::new(5, 3000)
    }

    /// Funding transfer to one temp wallet.
    pub fn for_funding() -> Self {
        Self::new(2, 2000)
    }

    /// Single JSON-RPC call (estimate, gas price, balance, nonce, receipt).
    pub fn for_transport() -> Self {
        Self::new(3, 500)
    }

    /// Fail fast
    pub fn no_retry() -> Self {
        Self::new(1, 0)
    }

    pub fn with_exponential_base(mut self, base: f64) -> Self {
        self.exponential_base = base;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    pub fn backoff_delay(&self) -> Duration {
        Duration::from_millis(self.backoff_delay_ms)
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay_ms = self.backoff_delay_ms as f64 * self.exponential_base.powi(attempt as i32);
        let delay_ms = delay_ms.min(self.max_delay_ms as f64);

        let delay_ms = if self.jitter && delay_ms > 0.0 {
            let jitter_range = delay_ms / 4.0;
            delay_ms + rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            delay_ms
        };

        Duration::from_millis(delay_ms.max(0.0) as u64)
    }
}

/// Runs `operation` until it succeeds or the policy's attempts are spent.
///
/// The last error is returned with the operation name attached as context.
pub async fn with_retry<T, F, Fut>(
    policy: RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.attempts();

    for attempt in 0..attempts {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!("{} succeeded on attempt {}", operation_name, attempt + 1);
                }
                return Ok(result);
            }
            Err(e) => {
                if attempt + 1 == attempts {
                    let error_msg = format!("{}", e);
                    return Err(e).context(format!(
                        "{} failed after {} attempts. Last error: {}",
                        operation_name, attempts, error_msg
                    ));
                }

                let delay = policy.delay_for(attempt);
                debug!(
                    "{} failed (attempt {}/{}). Retrying in {:?}: {}",
                    operation_name,
                    attempt + 1,
                    attempts,
                    delay,
                    e
                );

                tokio::time::sleep(delay).await;
            }
        }
    }

    unreachable!("attempts() is never zero")
}

/// Same loop as [`with_retry`] but keeps the caller's error type, so typed
/// errors survive the retries untouched.
pub async fn retry_typed<T, E, F, Fut>(
    policy: RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = policy.attempts();
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                attempt += 1;
                if attempt >= attempts {
                    debug!("{} gave up after {} attempts: {}", operation_name, attempts, e);
                    return Err(e);
                }
                let delay = policy.delay_for(attempt - 1);
                debug!(
                    "{} failed (attempt {}/{}). Retrying in {:?}: {}",
                    operation_name, attempt, attempts, delay, e
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
