pub mod breaker;
pub mod retry;

pub use breaker::{
    counts_toward_breaker,
    Admission,
    CircuitBreaker,
    State,
};
pub use retry::{
    compute_backoff,
    execute_with_retry,
    AttemptOutcome,
    RetryOptions,
};
