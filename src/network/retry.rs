//! Bounded retries for read-only calls against a flaky endpoint

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use super::CallError;
use crate::errors::{EngineError, EngineResult};

/// Doubling delay schedule with a little jitter, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct Backoff {
    pub attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl Backoff {
    /// Wait before retry number `retry` (0 for the first retry), within ±5 %.
    pub fn delay(&self, retry: u32) -> Duration {
        let base = self
            .initial_delay
            .saturating_mul(1u32 << retry.min(16))
            .min(self.max_delay);
        let jitter = (rand::random::<f64>() - 0.5) * 0.1;
        base.mul_f64(1.0 + jitter)
    }
}

/// Run `op` until it succeeds, retrying only [`CallError::Endpoint`]
/// failures. A [`CallError::Rejected`] answer is final. Never wrap
/// transaction submission in this: a failed flash loan is recorded, not
/// retried.
pub async fn retry_endpoint_errors<T, F, Fut>(what: &str, backoff: &Backoff, mut op: F) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CallError>>,
{
    let attempts = backoff.attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(CallError::Rejected(reason)) => {
                return Err(EngineError::Network {
                    message: format!("{} rejected: {}", what, reason),
                    source: None,
                    retry_count: attempt - 1,
                });
            }
            Err(CallError::Endpoint(e)) if attempt >= attempts => {
                return Err(EngineError::Network {
                    message: format!("{} failed after {} attempts", what, attempt),
                    source: Some(e),
                    retry_count: attempt - 1,
                });
            }
            Err(CallError::Endpoint(e)) => {
                let delay = backoff.delay(attempt - 1);
                warn!(
                    "Attempt {}/{} failed for {}: {}. Retrying in {}ms...",
                    attempt,
                    attempts,
                    what,
                    e,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> Backoff {
        Backoff {
            attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn endpoint_failures_are_retried() {
        let calls = AtomicU32::new(0);
        let result = retry_endpoint_errors("flaky read", &fast(), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(CallError::Endpoint(anyhow::anyhow!("connection reset")))
            } else {
                Ok(7)
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn rejection_is_not_retried() {
        let calls = AtomicU32::new(0);
        let err = retry_endpoint_errors("unknown ticker", &fast(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(CallError::Rejected("invalid symbol".into()))
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, EngineError::Network { retry_count: 0, .. }));
    }

    #[tokio::test]
    async fn gives_up_after_the_last_attempt() {
        let err = retry_endpoint_errors("dead read", &fast(), || async {
            Err::<(), _>(CallError::Endpoint(anyhow::anyhow!("down")))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::Network { retry_count: 2, .. }));
    }

    #[test]
    fn delay_doubles_up_to_the_cap() {
        let backoff = Backoff {
            attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
        };
        let within = |d: Duration, ms: u64| {
            let ms = ms as f64;
            let got = d.as_secs_f64() * 1000.0;
            got >= ms * 0.95 && got <= ms * 1.05
        };
        assert!(within(backoff.delay(0), 100));
        assert!(within(backoff.delay(1), 200));
        assert!(within(backoff.delay(2), 300));
        assert!(within(backoff.delay(30), 300));
    }
}
