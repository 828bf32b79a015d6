//! End-to-end exercise of the circuit breaker's open -> half-open -> closed
//! cycle (spec.md §4.2, §8): two consecutive failures trip it, a third call
//! is rejected with `CIRCUIT_OPEN` and a `nextAttemptAt` hint, and after the
//! timeout elapses a single successful probe half-opens it while a second
//! closes it again.

use std::time::Duration;

use anyhow::anyhow;
use circuit_breaker::CircuitBreaker;
use sheet_common::config::CircuitBreakerConfig;
use sheet_errors::{
    ErrorKind,
    ErrorMetadataAnyhowExt,
};

fn config() -> CircuitBreakerConfig {
    CircuitBreakerConfig { failure_threshold: 2, success_threshold: 2, timeout: Duration::from_millis(30) }
}

async fn remote_unavailable() -> anyhow::Result<()> {
    Err(anyhow!("upstream 503").context(sheet_errors::ErrorMetadata::remote_unavailable("upstream 503")))
}

#[tokio::test]
async fn two_failures_trip_the_breaker_then_it_recovers_through_half_open() {
    let breaker = CircuitBreaker::new(config());

    for _ in 0..2 {
        let err = breaker.execute("sheets.values.get", remote_unavailable, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RemoteUnavailable);
    }

    // Third call: rejected without invoking the op, carrying CIRCUIT_OPEN
    // and a concrete retry hint.
    let err = breaker
        .execute("sheets.values.get", || async { panic!("op must not run while the breaker is open") }, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CircuitOpen);
    assert!(err.retry_after_ms().unwrap() > 0);

    tokio::time::sleep(Duration::from_millis(40)).await;

    // One successful probe half-opens the breaker without closing it yet.
    breaker.execute("sheets.values.get", || async { Ok::<_, anyhow::Error>(()) }, None).await.unwrap();
    assert_eq!(breaker.state("sheets.values.get"), circuit_breaker::State::HalfOpen);

    // A second success meets success_threshold and closes it.
    breaker.execute("sheets.values.get", || async { Ok::<_, anyhow::Error>(()) }, None).await.unwrap();
    assert_eq!(breaker.state("sheets.values.get"), circuit_breaker::State::Closed);
}
