//! Ties redaction, the sink, and metrics together into the one call site
//! the rest of the workspace reaches for.

use std::sync::Arc;

use crate::record::{
    AuditOutcome,
    AuditRecord,
};
use crate::redact::redact;
use crate::sink::AuditSink;

pub struct AuditLogger {
    sink: Arc<dyn AuditSink>,
}

impl AuditLogger {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    #[tracing::instrument(skip(self, record), fields(tool = %record.tool, action = %record.action))]
    pub async fn log(&self, mut record: AuditRecord) {
        if let Some(details) = record.details.take() {
            record.details = Some(redact(&details));
        }

        let outcome_label = match record.outcome {
            AuditOutcome::Success => "success",
            AuditOutcome::Failure => "failure",
        };

        match self.sink.record(&record).await {
            Ok(()) => sheet_metrics::audit::log_recorded(outcome_label),
            Err(err) => {
                sheet_metrics::audit::log_sink_failure();
                tracing::warn!(error = %err, "failed to write audit record");
            },
        }
    }
}
