//! Bounded retries with jittered exponential backoff around one external call.
//!
//! Only [`CapabilityError::is_transient`] failures are retried. The nominal
//! wait doubles per attempt (500 ms, 1 s, 2 s with a 500 ms base) and the
//! actual wait is drawn from the upper half of it ("equal jitter"). A 429
//! that carries `Retry-After` waits at least that long.

use crate::error::CapabilityError;
use std::future::Future;
use tokio::time::{sleep, Duration};
use tracing::warn;

/// How many times to retry and how long to wait between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub const NONE: RetryPolicy = RetryPolicy {
        max_retries: 0,
        backoff_ms: 0,
    };

    pub fn new(max_retries: u32, backoff_ms: u64) -> Self {
        Self {
            max_retries,
            backoff_ms,
        }
    }

    /// Nominal delay before retry number `attempt` (1-based), before jitter.
    fn nominal_ms(&self, attempt: u32) -> u64 {
        self.backoff_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
    }

    /// Delay before retry number `attempt`: within `[nominal / 2, nominal]`,
    /// raised to `Retry-After` when the service sent one.
    fn delay_for(&self, attempt: u32, err: &CapabilityError) -> Duration {
        let nominal = self.nominal_ms(attempt);
        let half = nominal / 2;
        let jittered = (nominal - half) + fastrand::u64(0..=half);
        let floor = match err {
            CapabilityError::RateLimited {
                retry_after_secs: Some(secs),
            } => secs.saturating_mul(1000),
            _ => 0,
        };
        Duration::from_millis(jittered.max(floor))
    }
}

/// Run `call` until it succeeds, fails permanently, or retries run out.
pub async fn with_retries<T, F, Fut>(
    label: &str,
    policy: RetryPolicy,
    mut call: F,
) -> Result<T, CapabilityError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CapabilityError>>,
{
    let mut attempt = 0u32;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.delay_for(attempt, &err);
                warn!(
                    "{}: retry {}/{} after {}ms ({})",
                    label,
                    attempt,
                    policy.max_retries,
                    delay.as_millis(),
                    err
                );
                sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn no_retry_policy_makes_one_attempt() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = with_retries("test", RetryPolicy::NONE, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CapabilityError::Transport("down".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_error_is_retried_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_retries("test", RetryPolicy::new(3, 1), move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(CapabilityError::Server {
                    status: 503,
                    body: String::new(),
                })
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result, Ok(2));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = with_retries("test", RetryPolicy::new(5, 1), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CapabilityError::ContentPolicy("refused".into()))
        })
        .await;
        assert!(matches!(result, Err(CapabilityError::ContentPolicy(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = with_retries("test", RetryPolicy::new(2, 1), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CapabilityError::Timeout(1))
        })
        .await;
        assert_eq!(result, Err(CapabilityError::Timeout(1)));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn nominal_delay_doubles() {
        let p = RetryPolicy::new(3, 500);
        assert_eq!(p.nominal_ms(1), 500);
        assert_eq!(p.nominal_ms(2), 1000);
        assert_eq!(p.nominal_ms(3), 2000);
    }

    #[test]
    fn jittered_delay_stays_in_upper_half() {
        let p = RetryPolicy::new(3, 500);
        let transport = CapabilityError::Transport(String::new());
        for attempt in 1..=3 {
            let nominal = p.nominal_ms(attempt);
            for _ in 0..200 {
                let ms = p.delay_for(attempt, &transport).as_millis() as u64;
                assert!(
                    (nominal / 2..=nominal).contains(&ms),
                    "attempt {attempt}: {ms}ms outside [{}, {nominal}]",
                    nominal / 2
                );
            }
        }
    }

    #[test]
    fn jitter_varies_delay() {
        let p = RetryPolicy::new(1, 10_000);
        let transport = CapabilityError::Transport(String::new());
        let distinct: std::collections::HashSet<_> =
            (0..50).map(|_| p.delay_for(1, &transport)).collect();
        assert!(distinct.len() > 1);
    }

    #[test]
    fn retry_after_is_a_floor() {
        let p = RetryPolicy::new(3, 500);
        let limited = CapabilityError::RateLimited {
            retry_after_secs: Some(4),
        };
        assert_eq!(p.delay_for(1, &limited), Duration::from_millis(4000));
        assert_eq!(RetryPolicy::NONE.delay_for(1, &limited), Duration::from_millis(4000));
    }
}
