//! The error taxonomy from the spec (ErrorKind, retryability, resolution
//! hints) realized as an `ErrorMetadata` object attached to `anyhow::Error`
//! chains via `.context(...)`, the way the rest of this workspace threads
//! errors across component boundaries.

use std::borrow::Cow;

use http::StatusCode;
use serde::Serialize;

/// Attachable error context. Downcast this out of an `anyhow::Error` chain
/// via `ErrorMetadataAnyhowExt` to classify a failure without string
/// matching on its display text.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
#[error("{msg}")]
pub struct ErrorMetadata {
    pub code: ErrorKind,
    /// Stable, ScreamingCamelCase tag. Safe to match on in tests.
    pub short_msg: Cow<'static, str>,
    /// Developer/user facing descriptive message.
    pub msg: Cow<'static, str>,
    /// What the caller should do about it, if anything.
    pub resolution: Option<Cow<'static, str>>,
    /// `RATE_LIMIT` / `CIRCUIT_OPEN` carry a concrete wait hint.
    pub retry_after_ms: Option<u64>,
    /// Structured extra context surfaced verbatim in the wire `ToolError`,
    /// e.g. `TRANSACTION_FAILED`'s `{"rollback": {"status": ...}}`.
    pub details: Option<serde_json::Value>,
}

#[cfg_attr(any(test, feature = "testing"), derive(proptest_derive::Arbitrary))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    InvalidParams,
    AuthError,
    AuthExpired,
    PermissionDenied,
    NotFound,
    Conflict,
    RateLimit,
    QuotaExceeded,
    CircuitOpen,
    Timeout,
    Cancelled,
    RemoteUnavailable,
    TransactionFailed,
    SnapshotTooLarge,
    SnapshotMissing,
    InternalError,
}

impl ErrorKind {
    /// The y/n column from spec.md §7.
    pub fn retryable(self) -> bool {
        use ErrorKind::*;
        matches!(
            self,
            AuthExpired | Conflict | RateLimit | CircuitOpen | Timeout | RemoteUnavailable
        )
    }

    pub fn http_status(self) -> StatusCode {
        use ErrorKind::*;
        match self {
            InvalidParams => StatusCode::BAD_REQUEST,
            AuthError | AuthExpired => StatusCode::UNAUTHORIZED,
            PermissionDenied => StatusCode::FORBIDDEN,
            NotFound | SnapshotMissing => StatusCode::NOT_FOUND,
            Conflict => StatusCode::CONFLICT,
            RateLimit | CircuitOpen | RemoteUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
            Timeout => StatusCode::REQUEST_TIMEOUT,
            Cancelled => StatusCode::BAD_REQUEST,
            TransactionFailed | SnapshotTooLarge => StatusCode::UNPROCESSABLE_ENTITY,
            InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn short_code_str(self) -> &'static str {
        use ErrorKind::*;
        match self {
            InvalidParams => "INVALID_PARAMS",
            AuthError => "AUTH_ERROR",
            AuthExpired => "AUTH_EXPIRED",
            PermissionDenied => "PERMISSION_DENIED",
            NotFound => "NOT_FOUND",
            Conflict => "CONFLICT",
            RateLimit => "RATE_LIMIT",
            QuotaExceeded => "QUOTA_EXCEEDED",
            CircuitOpen => "CIRCUIT_OPEN",
            Timeout => "TIMEOUT",
            Cancelled => "CANCELLED",
            RemoteUnavailable => "REMOTE_UNAVAILABLE",
            TransactionFailed => "TRANSACTION_FAILED",
            SnapshotTooLarge => "SNAPSHOT_TOO_LARGE",
            SnapshotMissing => "SNAPSHOT_MISSING",
            InternalError => "INTERNAL_ERROR",
        }
    }
}

impl ErrorMetadata {
    pub fn new(
        code: ErrorKind,
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code,
            short_msg: short_msg.into(),
            msg: msg.into(),
            resolution: None,
            retry_after_ms: None,
            details: None,
        }
    }

    pub fn with_resolution(mut self, resolution: impl Into<Cow<'static, str>>) -> Self {
        self.resolution = Some(resolution.into());
        self
    }

    pub fn with_retry_after_ms(mut self, ms: u64) -> Self {
        self.retry_after_ms = Some(ms);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn invalid_params(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::InvalidParams, "InvalidParams", msg)
    }

    pub fn not_found(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::NotFound, "NotFound", msg)
    }

    pub fn permission_denied(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::PermissionDenied, "PermissionDenied", msg)
    }

    pub fn conflict(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Conflict, "Conflict", msg)
            .with_resolution("Retry the operation; document state changed underneath it.")
    }

    pub fn rate_limit(retry_after_ms: u64) -> Self {
        Self::new(
            ErrorKind::RateLimit,
            "RateLimit",
            "Rate limit budget exhausted for this key.",
        )
        .with_retry_after_ms(retry_after_ms)
        .with_resolution("Wait for retryAfterMs and resubmit.")
    }

    pub fn circuit_open(next_attempt_ms: u64) -> Self {
        Self::new(
            ErrorKind::CircuitOpen,
            "CircuitOpen",
            "Circuit breaker is open for this endpoint.",
        )
        .with_retry_after_ms(next_attempt_ms)
        .with_resolution("Wait until nextAttemptAt before retrying.")
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "Cancelled", "The operation was cancelled.")
    }

    pub fn timeout(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Timeout, "Timeout", msg)
    }

    pub fn remote_unavailable(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::RemoteUnavailable, "RemoteUnavailable", msg)
    }

    pub fn transaction_failed(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::TransactionFailed, "TransactionFailed", msg)
    }

    pub fn snapshot_too_large(size: u64, limit: u64) -> Self {
        Self::new(
            ErrorKind::SnapshotTooLarge,
            "SnapshotTooLarge",
            format!("Snapshot size {size} bytes exceeds limit {limit} bytes."),
        )
    }

    pub fn snapshot_missing(snapshot_id: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorKind::SnapshotMissing,
            "SnapshotMissing",
            format!("Snapshot {snapshot_id} not found or already garbage collected."),
        )
    }

    pub fn quota_exceeded(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::QuotaExceeded, "QuotaExceeded", msg)
    }

    pub fn internal(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::InternalError, "InternalError", msg)
    }
}

/// Wire shape from spec.md §6: `{success:false, error:{code, message,
/// retryable, details?, resolution?}}`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolError {
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
    pub details: Option<serde_json::Value>,
    pub resolution: Option<String>,
}

pub trait ErrorMetadataAnyhowExt {
    fn metadata(&self) -> Option<&ErrorMetadata>;
    fn kind(&self) -> ErrorKind;
    fn is_retryable(&self) -> bool;
    fn retry_after_ms(&self) -> Option<u64>;
    fn to_tool_error(&self) -> ToolError;
}

impl ErrorMetadataAnyhowExt for anyhow::Error {
    fn metadata(&self) -> Option<&ErrorMetadata> {
        self.downcast_ref::<ErrorMetadata>()
    }

    fn kind(&self) -> ErrorKind {
        self.metadata().map(|e| e.code).unwrap_or(ErrorKind::InternalError)
    }

    fn is_retryable(&self) -> bool {
        self.kind().retryable()
    }

    fn retry_after_ms(&self) -> Option<u64> {
        self.metadata().and_then(|e| e.retry_after_ms)
    }

    fn to_tool_error(&self) -> ToolError {
        match self.metadata() {
            Some(e) => ToolError {
                code: e.code.short_code_str(),
                message: e.msg.to_string(),
                retryable: e.code.retryable(),
                details: e.details.clone(),
                resolution: e.resolution.as_ref().map(|r| r.to_string()),
            },
            None => ToolError {
                code: ErrorKind::InternalError.short_code_str(),
                message: "Your request couldn't be completed. Try again later.".to_string(),
                retryable: false,
                details: None,
                resolution: None,
            },
        }
    }
}

#[cfg(any(test, feature = "testing"))]
mod proptest_support {
    use proptest::prelude::*;

    use super::{
        ErrorKind,
        ErrorMetadata,
    };

    impl Arbitrary for ErrorMetadata {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with((): Self::Parameters) -> Self::Strategy {
            any::<ErrorKind>()
                .prop_map(|code| ErrorMetadata::new(code, "Tag", "message"))
                .boxed()
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;

    #[test]
    fn retryable_matches_spec_table() {
        assert!(ErrorKind::RateLimit.retryable());
        assert!(ErrorKind::CircuitOpen.retryable());
        assert!(ErrorKind::Conflict.retryable());
        assert!(ErrorKind::Timeout.retryable());
        assert!(ErrorKind::RemoteUnavailable.retryable());
        assert!(ErrorKind::AuthExpired.retryable());
        assert!(!ErrorKind::InvalidParams.retryable());
        assert!(!ErrorKind::PermissionDenied.retryable());
        assert!(!ErrorKind::Cancelled.retryable());
        assert!(!ErrorKind::QuotaExceeded.retryable());
    }

    #[test]
    fn bare_anyhow_error_classifies_as_internal() {
        let err = anyhow!("boom");
        assert_eq!(err.kind(), ErrorKind::InternalError);
        assert!(!err.is_retryable());
        let tool_err = err.to_tool_error();
        assert_eq!(tool_err.code, "INTERNAL_ERROR");
        assert!(!tool_err.retryable);
    }

    #[test]
    fn metadata_roundtrips_through_context() {
        let err = anyhow!("underlying").context(ErrorMetadata::rate_limit(500));
        assert_eq!(err.kind(), ErrorKind::RateLimit);
        assert_eq!(err.retry_after_ms(), Some(500));
        assert!(err.is_retryable());
    }
}
