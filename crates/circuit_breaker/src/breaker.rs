//! Per-endpoint circuit breaker state machine, spec.md §4.2.

use std::time::{
    Duration,
    Instant,
};

use dashmap::DashMap;
use parking_lot::Mutex;
use sheet_common::config::CircuitBreakerConfig;
use sheet_errors::ErrorMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    Open,
    HalfOpen,
}

struct EndpointState {
    state: State,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    next_attempt_at: Option<Instant>,
    /// `half_open` allows exactly one probe in flight at a time.
    probe_in_flight: bool,
}

impl EndpointState {
    fn new() -> Self {
        Self {
            state: State::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
            next_attempt_at: None,
            probe_in_flight: false,
        }
    }
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    endpoints: DashMap<String, Mutex<EndpointState>>,
}

/// Whether an observed failure counts toward tripping the breaker. Only
/// retryable categories (429/5xx, network, timeout) trip it; validation and
/// other 4xx errors do not (spec.md §4.2).
pub fn counts_toward_breaker(err: &anyhow::Error) -> bool {
    use sheet_errors::{
        ErrorKind,
        ErrorMetadataAnyhowExt,
    };
    matches!(err.kind(), ErrorKind::RemoteUnavailable | ErrorKind::Timeout | ErrorKind::RateLimit)
}

pub enum Admission {
    Proceed,
    Rejected { next_attempt_at: Instant },
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self { config, endpoints: DashMap::new() }
    }

    fn entry(&self, endpoint: &str) -> dashmap::mapref::one::Ref<'_, String, Mutex<EndpointState>> {
        if !self.endpoints.contains_key(endpoint) {
            self.endpoints.entry(endpoint.to_string()).or_insert_with(|| Mutex::new(EndpointState::new()));
        }
        self.endpoints.get(endpoint).expect("just inserted")
    }

    pub fn state(&self, endpoint: &str) -> State {
        let entry = self.entry(endpoint);
        entry.lock().state
    }

    /// Decide whether a call attempt may proceed. Transitions `open ->
    /// half_open` at `opened_at + timeout`; admits exactly one probe while
    /// `half_open`.
    fn admit(&self, endpoint: &str) -> Admission {
        let entry = self.entry(endpoint);
        let mut guard = entry.lock();
        match guard.state {
            State::Closed => Admission::Proceed,
            State::Open => {
                let next_attempt_at = guard.next_attempt_at.unwrap_or_else(Instant::now);
                if Instant::now() >= next_attempt_at {
                    guard.state = State::HalfOpen;
                    guard.probe_in_flight = true;
                    Admission::Proceed
                } else {
                    Admission::Rejected { next_attempt_at }
                }
            },
            State::HalfOpen => {
                if guard.probe_in_flight {
                    Admission::Rejected { next_attempt_at: guard.next_attempt_at.unwrap_or_else(Instant::now) }
                } else {
                    guard.probe_in_flight = true;
                    Admission::Proceed
                }
            },
        }
    }

    fn record_success(&self, endpoint: &str) {
        let entry = self.entry(endpoint);
        let mut guard = entry.lock();
        guard.probe_in_flight = false;
        match guard.state {
            State::Closed => {
                guard.consecutive_failures = 0;
            },
            State::HalfOpen => {
                guard.consecutive_successes += 1;
                if guard.consecutive_successes >= self.config.success_threshold {
                    guard.state = State::Closed;
                    guard.consecutive_failures = 0;
                    guard.consecutive_successes = 0;
                    sheet_metrics::circuit_breaker::log_recovered(endpoint);
                }
            },
            State::Open => {
                // Shouldn't normally observe a success while open; ignore.
            },
        }
    }

    fn record_failure(&self, endpoint: &str) {
        let entry = self.entry(endpoint);
        let mut guard = entry.lock();
        guard.probe_in_flight = false;
        match guard.state {
            State::Closed => {
                guard.consecutive_failures += 1;
                if guard.consecutive_failures >= self.config.failure_threshold {
                    self.trip(endpoint, &mut guard);
                }
            },
            State::HalfOpen => {
                self.trip(endpoint, &mut guard);
            },
            State::Open => {},
        }
    }

    fn trip(&self, endpoint: &str, guard: &mut EndpointState) {
        guard.state = State::Open;
        guard.consecutive_successes = 0;
        let now = Instant::now();
        guard.opened_at = Some(now);
        guard.next_attempt_at = Some(now + self.config.timeout);
        sheet_metrics::circuit_breaker::log_tripped(endpoint);
    }

    /// Run `op` through the breaker. Rejects immediately with `CIRCUIT_OPEN`
    /// while open (before `nextAttemptAt`) unless `fallback` is given.
    pub async fn execute<T, F, Fut>(&self, endpoint: &str, op: F, fallback: Option<T>) -> anyhow::Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<T>>,
    {
        match self.admit(endpoint) {
            Admission::Proceed => {},
            Admission::Rejected { next_attempt_at } => {
                sheet_metrics::circuit_breaker::log_rejected(endpoint);
                if let Some(value) = fallback {
                    return Ok(value);
                }
                let wait_ms = next_attempt_at.saturating_duration_since(Instant::now()).as_millis() as u64;
                anyhow::bail!(ErrorMetadata::circuit_open(wait_ms));
            },
        }

        match op().await {
            Ok(value) => {
                self.record_success(endpoint);
                Ok(value)
            },
            Err(err) => {
                if counts_toward_breaker(&err) {
                    self.record_failure(endpoint);
                } else {
                    // Non-retryable failures (validation, non-429 4xx) don't
                    // trip the breaker, but a half-open probe must still be
                    // released.
                    let entry = self.entry(endpoint);
                    entry.lock().probe_in_flight = false;
                }
                Err(err)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;

    fn cfg() -> CircuitBreakerConfig {
        CircuitBreakerConfig { failure_threshold: 2, success_threshold: 2, timeout: Duration::from_millis(30) }
    }

    #[tokio::test]
    async fn opens_after_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new(cfg());
        for _ in 0..2 {
            let _ = breaker
                .execute("ep", || async { anyhow::Result::<()>::Err(anyhow!("boom").context(ErrorMetadata::remote_unavailable("x"))) }, None)
                .await;
        }
        assert_eq!(breaker.state("ep"), State::Open);

        // Next call within timeout is rejected without invoking op.
        let mut invoked = false;
        let result = breaker
            .execute(
                "ep",
                || async {
                    invoked = true;
                    Ok::<_, anyhow::Error>(())
                },
                None,
            )
            .await;
        assert!(result.is_err());
        assert!(!invoked);
    }

    #[tokio::test]
    async fn half_open_then_closes_after_success_threshold() {
        let breaker = CircuitBreaker::new(cfg());
        for _ in 0..2 {
            let _ = breaker
                .execute("ep", || async { Err(anyhow!("boom").context(ErrorMetadata::remote_unavailable("x"))) }, None)
                .await;
        }
        assert_eq!(breaker.state("ep"), State::Open);
        tokio::time::sleep(Duration::from_millis(40)).await;

        breaker.execute("ep", || async { Ok::<_, anyhow::Error>(()) }, None).await.unwrap();
        assert_eq!(breaker.state("ep"), State::HalfOpen);
        breaker.execute("ep", || async { Ok::<_, anyhow::Error>(()) }, None).await.unwrap();
        assert_eq!(breaker.state("ep"), State::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(cfg());
        for _ in 0..2 {
            let _ = breaker
                .execute("ep", || async { Err(anyhow!("boom").context(ErrorMetadata::remote_unavailable("x"))) }, None)
                .await;
        }
        tokio::time::sleep(Duration::from_millis(40)).await;
        let _ = breaker
            .execute("ep", || async { Err(anyhow!("boom").context(ErrorMetadata::remote_unavailable("x"))) }, None)
            .await;
        assert_eq!(breaker.state("ep"), State::Open);
    }

    #[tokio::test]
    async fn non_retryable_errors_do_not_trip_breaker() {
        let breaker = CircuitBreaker::new(cfg());
        for _ in 0..5 {
            let _ = breaker
                .execute("ep", || async { Err(anyhow!("bad").context(ErrorMetadata::invalid_params("x"))) }, None)
                .await;
        }
        assert_eq!(breaker.state("ep"), State::Closed);
    }

    #[tokio::test]
    async fn fallback_used_when_open() {
        let breaker = CircuitBreaker::new(cfg());
        for _ in 0..2 {
            let _ = breaker
                .execute("ep", || async { Err(anyhow!("boom").context(ErrorMetadata::remote_unavailable("x"))) }, None)
                .await;
        }
        let value = breaker.execute("ep", || async { Ok::<_, anyhow::Error>(1) }, Some(42)).await.unwrap();
        assert_eq!(value, 42);
    }
}
