//! Audit trail and RBAC (spec.md §4.12): every mutation, permission
//! change, authentication event, export, and configuration change is
//! recorded with secrets redacted, and every dispatch passes an RBAC
//! check first.

pub mod logger;
pub mod rbac;
pub mod record;
pub mod redact;
pub mod sink;

pub use logger::AuditLogger;
pub use rbac::{
    Effect,
    PolicyRule,
    RbacEngine,
    RoleDefinition,
};
pub use record::{
    AuditOutcome,
    AuditRecord,
    EffectCounts,
};
pub use redact::redact;
pub use sink::{
    AuditSink,
    TracingAuditSink,
};
