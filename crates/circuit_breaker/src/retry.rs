//! `executeWithRetry`, spec.md §4.3: bounded by a per-attempt timeout and an
//! overall deadline, exponential backoff with jitter, honoring a
//! `Retry-After` override when the remote supplies one.

use std::time::{
    Duration,
    Instant,
};

use rand::Rng;
use sheet_common::Scope;
use sheet_errors::ErrorMetadataAnyhowExt;
use sheet_metrics::circuit_breaker as metrics;

#[derive(Debug, Clone)]
pub struct RetryOptions {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: f64,
    pub per_attempt_timeout: Duration,
}

impl From<&sheet_common::config::RetryConfig> for RetryOptions {
    fn from(cfg: &sheet_common::config::RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            base_delay: cfg.base_delay,
            max_delay: cfg.max_delay,
            jitter: cfg.jitter,
            per_attempt_timeout: cfg.request_timeout,
        }
    }
}

/// `delay = min(base * 2^attempt, max) +/- jitter * delay`.
pub fn compute_backoff(opts: &RetryOptions, attempt: u32, rng: &mut impl Rng) -> Duration {
    let exp = 2f64.powi(attempt as i32);
    let base_ms = (opts.base_delay.as_millis() as f64 * exp).min(opts.max_delay.as_millis() as f64);
    let jitter_span = base_ms * opts.jitter;
    let jittered = base_ms + rng.gen_range(-jitter_span..=jitter_span);
    Duration::from_millis(jittered.max(0.0) as u64)
}

/// Outcome of a single attempt; lets the op report a server-provided
/// `Retry-After` that overrides the computed backoff.
pub struct AttemptOutcome<T> {
    pub result: anyhow::Result<T>,
    pub retry_after_override: Option<Duration>,
}

impl<T> From<anyhow::Result<T>> for AttemptOutcome<T> {
    fn from(result: anyhow::Result<T>) -> Self {
        Self { result, retry_after_override: None }
    }
}

/// Runs `op` inside `scope`, retrying retryable errors up to
/// `opts.max_attempts`, skipping a retry whenever `now + delay` would exceed
/// the scope's deadline. Surfaces the last error unchanged once attempts or
/// deadline are exhausted.
#[tracing::instrument(skip(op, scope), fields(endpoint))]
pub async fn execute_with_retry<T, F, Fut>(endpoint: &str, scope: &Scope, opts: &RetryOptions, mut op: F) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = AttemptOutcome<T>>,
{
    let mut rng = rand::rng();
    let mut last_err = None;
    for attempt in 0..opts.max_attempts {
        if scope.is_cancelled() {
            anyhow::bail!(sheet_errors::ErrorMetadata::cancelled());
        }
        if attempt > 0 {
            metrics::log_retry_attempt(endpoint);
        }

        let timeout_at = Instant::now() + opts.per_attempt_timeout;
        let effective_timeout = opts.per_attempt_timeout.min(scope.remaining());
        let attempt_fut = op();
        let outcome = match tokio::time::timeout(effective_timeout, attempt_fut).await {
            Ok(outcome) => outcome,
            Err(_elapsed) => AttemptOutcome {
                result: Err(anyhow::anyhow!(sheet_errors::ErrorMetadata::timeout(format!(
                    "{endpoint} attempt timed out after {:?}",
                    timeout_at.elapsed()
                )))),
                retry_after_override: None,
            },
        };

        match outcome.result {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retryable() || attempt + 1 >= opts.max_attempts {
                    return Err(err);
                }
                let delay = outcome.retry_after_override.unwrap_or_else(|| compute_backoff(opts, attempt, &mut rng));
                let now = Instant::now();
                if now + delay > scope.deadline {
                    // Retrying would exceed the deadline; surface the error now.
                    return Err(err);
                }
                last_err = Some(err);
                tokio::time::sleep(delay).await;
            },
        }
    }
    Err(last_err.expect("loop always runs at least once"))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{
        AtomicU32,
        Ordering,
    };

    use anyhow::anyhow;
    use sheet_errors::ErrorMetadata;

    use super::*;

    fn opts() -> RetryOptions {
        RetryOptions {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            jitter: 0.0,
            per_attempt_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn succeeds_without_retry_on_first_try() {
        let scope = Scope::for_test();
        let calls = AtomicU32::new(0);
        let result = execute_with_retry("ep", &scope, &opts(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            AttemptOutcome::from(Ok::<_, anyhow::Error>(7))
        })
        .await
        .unwrap();
        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_retryable_errors_until_success() {
        let scope = Scope::for_test();
        let calls = AtomicU32::new(0);
        let result = execute_with_retry("ep", &scope, &opts(), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                AttemptOutcome::from(Err(anyhow!("x").context(ErrorMetadata::remote_unavailable("x"))))
            } else {
                AttemptOutcome::from(Ok(1))
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_non_retryable_errors() {
        let scope = Scope::for_test();
        let calls = AtomicU32::new(0);
        let result: anyhow::Result<()> = execute_with_retry("ep", &scope, &opts(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            AttemptOutcome::from(Err(anyhow!("bad").context(ErrorMetadata::invalid_params("x"))))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_after_override_is_honored() {
        let scope = Scope::for_test();
        let calls = AtomicU32::new(0);
        let result = execute_with_retry("ep", &scope, &opts(), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                AttemptOutcome {
                    result: Err(anyhow!("x").context(ErrorMetadata::remote_unavailable("x"))),
                    retry_after_override: Some(Duration::from_millis(1)),
                }
            } else {
                AttemptOutcome::from(Ok(5))
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 5);
    }

    #[tokio::test]
    async fn gives_up_past_deadline_without_retrying() {
        let scope = Scope::new("s", Duration::from_millis(1));
        tokio::time::sleep(Duration::from_millis(5)).await;
        let calls = AtomicU32::new(0);
        let result: anyhow::Result<()> = execute_with_retry("ep", &scope, &opts(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            AttemptOutcome::from(Err(anyhow!("x").context(ErrorMetadata::remote_unavailable("x"))))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
