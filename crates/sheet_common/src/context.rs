//! Request-scoped context: deadline, request id, cancellation, and the
//! acting identity, threaded as an explicit first parameter through every
//! internal call per the Design Notes rather than carried on an ambient
//! global or task-local.

use std::time::{
    Duration,
    Instant,
};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A cancellable scope bounded by a deadline, per spec.md §5. Cancelling
/// `token` aborts any in-flight remote call and any waits on rate-limiter
/// or merger windows.
#[derive(Debug, Clone)]
pub struct Scope {
    pub request_id: RequestId,
    pub subject: String,
    pub deadline: Instant,
    pub token: CancellationToken,
}

impl Scope {
    pub fn new(subject: impl Into<String>, timeout: Duration) -> Self {
        Self {
            request_id: RequestId::new(),
            subject: subject.into(),
            deadline: Instant::now() + timeout,
            token: CancellationToken::new(),
        }
    }

    pub fn child(&self) -> Self {
        Self {
            request_id: self.request_id.clone(),
            subject: self.subject.clone(),
            deadline: self.deadline,
            token: self.token.child_token(),
        }
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[cfg(any(test, feature = "testing"))]
    pub fn for_test() -> Self {
        Self::new("test-subject", Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancelling_parent_cancels_child() {
        let scope = Scope::for_test();
        let child = scope.child();
        assert!(!child.is_cancelled());
        scope.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn remaining_shrinks_toward_zero_past_deadline() {
        let scope = Scope::new("s", Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(scope.is_expired());
        assert_eq!(scope.remaining(), Duration::ZERO);
    }
}
