//! Retry policy for collaborator calls

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::errors::CollaboratorError;
use crate::storage::settings::RetrySettings;
use crate::utils::{calc_exp_backoff, BackoffOptions};

/// How often and how patiently to retry one kind of call
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,

    /// Delay shape between attempts
    pub backoff: BackoffOptions,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: BackoffOptions) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Single attempt, no retries
    pub fn once() -> Self {
        Self::new(1, BackoffOptions::none())
    }

    /// Capped exponential policy from the configured bounds
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(
            settings.attempts,
            BackoffOptions {
                base_delay: settings.base_delay,
                max_delay: settings.max_delay,
                multiplier: 2.0,
            },
        )
    }

    /// Delay before retry number `retry` (zero based)
    pub fn delay(&self, retry: u32) -> Duration {
        calc_exp_backoff(&self.backoff, retry)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, BackoffOptions::default())
    }
}

/// Run `op` until it succeeds, fails permanently, or attempts run out.
///
/// Only [`CollaboratorError::Transient`] failures are retried; a rate limit
/// or rejection is returned immediately.
pub async fn retry<T, Op, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: Op,
) -> Result<T, CollaboratorError>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CollaboratorError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() || attempt >= max_attempts => return Err(e),
            Err(e) => {
                let delay = policy.delay(attempt - 1);
                warn!(
                    error = %e,
                    "{} failed (attempt {}/{}), retrying in {:?}",
                    what,
                    attempt,
                    max_attempts,
                    delay
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}
