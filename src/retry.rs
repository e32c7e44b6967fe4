//! Shared retry-with-backoff utility.
//!
//! Every retrying call site in the crate (store operations, cloud
//! discovery, compression, local save, whole-library load) goes through
//! [`retry`] with its own [`RetryPolicy`] so the semantics stay uniform:
//! a non-retryable error fails immediately with the original error, and
//! an exhausted budget fails with [`MediaError::RetriesExhausted`]
//! naming the operation and the attempt count.

use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::MediaError;

#[derive(Debug, Clone, Copy)]
pub enum Backoff {
    /// The same delay between every attempt.
    Fixed(Duration),
    /// `step * attempt` after the n-th failed attempt.
    Linear(Duration),
    /// `base * 2^attempt` plus up to `max_jitter_ms` of random jitter.
    ExponentialJitter { base: Duration, max_jitter_ms: u64 },
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub const fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed(delay),
        }
    }

    pub const fn linear(max_attempts: u32, step: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Linear(step),
        }
    }

    pub const fn exponential(max_attempts: u32, base: Duration, max_jitter_ms: u64) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::ExponentialJitter { base, max_jitter_ms },
        }
    }

    /// Delay to sleep after `attempt` (1-based) has failed.
    fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed(delay) => delay,
            Backoff::Linear(step) => step * attempt,
            Backoff::ExponentialJitter { base, max_jitter_ms } => {
                let scaled = base * 2u32.saturating_pow(attempt);
                scaled + Duration::from_millis(jitter_ms(max_jitter_ms))
            }
        }
    }
}

/// Cheap jitter from the wall clock; good enough to de-synchronize
/// concurrent reconnect attempts without pulling in an RNG.
fn jitter_ms(max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0);
    nanos % max
}

/// Run `attempt_fn` until it succeeds, the error is non-retryable, or the
/// policy's attempt budget is spent.
pub async fn retry<T, F, Fut>(
    operation: &str,
    policy: RetryPolicy,
    retryable: impl Fn(&MediaError) -> bool,
    mut attempt_fn: F,
) -> Result<T, MediaError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, MediaError>>,
{
    let mut attempt = 1u32;
    loop {
        match attempt_fn().await {
            Ok(value) => return Ok(value),
            Err(err) if !retryable(&err) => return Err(err),
            Err(err) if attempt < policy.max_attempts => {
                tracing::debug!(operation, attempt, error = %err, "attempt failed, backing off");
                tokio::time::sleep(policy.delay_for(attempt)).await;
                attempt += 1;
            }
            Err(err) => {
                return Err(MediaError::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts: attempt,
                    source: Box::new(err),
                })
            }
        }
    }
}
