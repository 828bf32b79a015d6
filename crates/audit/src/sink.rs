//! Where audit records go. spec.md §A.1 treats the concrete destination
//! (SIEM, log pipeline) as out of scope; `AuditSink` is the seam a real
//! deployment plugs one into, and `TracingAuditSink` is the structured-log
//! backed default this workspace ships.

use async_trait::async_trait;

use crate::record::AuditRecord;

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: &AuditRecord) -> anyhow::Result<()>;
}

pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, record: &AuditRecord) -> anyhow::Result<()> {
        tracing::info!(
            actor = %record.actor,
            tool = %record.tool,
            action = %record.action,
            resource = %record.resource,
            outcome = ?record.outcome,
            duration_ms = record.duration_ms,
            request_id = %record.request_id,
            cells = record.effect.cells,
            rows = record.effect.rows,
            columns = record.effect.columns,
            "audit record"
        );
        Ok(())
    }
}
