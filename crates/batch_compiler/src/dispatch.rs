//! Dispatches compiled calls to the remote client: serially per document
//! (to preserve ordering), with an optional post-write verification pass,
//! and with progress reported through a caller-supplied sink (spec.md §4.7
//! "Dispatch"/"Verification").

use std::collections::HashMap;

use futures::future::join_all;
use remote_client::{
    MutationOutcome,
    SharedRemoteClient,
};
use sheet_common::{
    DocumentHandle,
    Mutation,
    Scope,
};

use crate::compile::{
    compile,
    MutationRequest,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Compile,
    Snapshot,
    Dispatch,
    Verify,
}

#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub phase: Phase,
    pub current: usize,
    pub total: usize,
    pub message: String,
}

/// Caller-supplied progress reporter; `sheet_tool_server` wires this to
/// whatever streaming/task-update mechanism the tool-call transport uses.
pub trait ProgressSink: Send + Sync {
    fn report(&self, update: ProgressUpdate);
}

pub struct NoopProgressSink;

impl ProgressSink for NoopProgressSink {
    fn report(&self, _update: ProgressUpdate) {}
}

#[derive(Debug, Clone, Default)]
pub struct DispatchOutcome {
    pub outcomes: Vec<MutationOutcome>,
    /// Ranges whose post-write re-read didn't match the expected values.
    pub verify_mismatches: Vec<String>,
}

impl DispatchOutcome {
    pub fn is_partial_failure(&self) -> bool {
        !self.verify_mismatches.is_empty()
    }
}

pub struct BatchDispatcher {
    client: SharedRemoteClient,
}

impl BatchDispatcher {
    pub fn new(client: SharedRemoteClient) -> Self {
        Self { client }
    }

    #[tracing::instrument(skip(self, scope, requests, progress), fields(document_id = %document_id, mutation_count = requests.len()))]
    pub async fn dispatch(
        &self,
        scope: &Scope,
        document_id: &DocumentHandle,
        requests: Vec<MutationRequest>,
        progress: &dyn ProgressSink,
    ) -> anyhow::Result<DispatchOutcome> {
        progress.report(ProgressUpdate { phase: Phase::Compile, current: 0, total: requests.len(), message: "compiling mutations".to_string() });
        let calls = compile(requests);
        let total_calls = calls.len();

        let mut outcomes = Vec::new();
        let mut verify_targets: Vec<(sheet_common::A1Range, Vec<Vec<serde_json::Value>>)> = Vec::new();

        for (idx, call) in calls.into_iter().enumerate() {
            progress.report(ProgressUpdate {
                phase: Phase::Dispatch,
                current: idx + 1,
                total: total_calls,
                message: format!("dispatching {} mutation(s)", call.requests.len()),
            });

            let family_label = call.families.join("+");
            let mutations: Vec<Mutation> = call.requests.iter().map(|r| r.mutation.clone()).collect();
            sheet_metrics::batch_compiler::log_call_issued(&family_label, mutations.len());

            let response = self.client.batch_mutate(scope, document_id, &mutations).await?;
            for request in &call.requests {
                if request.verify {
                    if let Mutation::UpdateValues { range, values, .. } = &request.mutation {
                        verify_targets.push((range.clone(), values.clone()));
                    }
                }
            }
            outcomes.extend(response.outcomes);
        }

        let mut verify_mismatches = Vec::new();
        if !verify_targets.is_empty() {
            let total = verify_targets.len();
            for (idx, (range, expected)) in verify_targets.iter().enumerate() {
                progress.report(ProgressUpdate {
                    phase: Phase::Verify,
                    current: idx + 1,
                    total,
                    message: format!("verifying {range}"),
                });
                let block = self.client.read_values(scope, document_id, range, &[]).await?;
                if &block.values != expected {
                    sheet_metrics::batch_compiler::log_verify_mismatch("values");
                    verify_mismatches.push(range.to_string());
                }
            }
        }

        Ok(DispatchOutcome { outcomes, verify_mismatches })
    }

    /// Dispatches each document's mutations serially (preserving
    /// per-document ordering) while documents run concurrently, per
    /// spec.md §4.7's dispatch rule.
    pub async fn dispatch_many(
        &self,
        scope: &Scope,
        requests_by_document: HashMap<DocumentHandle, Vec<MutationRequest>>,
        progress: &dyn ProgressSink,
    ) -> HashMap<DocumentHandle, anyhow::Result<DispatchOutcome>> {
        let futures = requests_by_document
            .into_iter()
            .map(|(document_id, requests)| async move {
                let result = self.dispatch(scope, &document_id, requests, progress).await;
                (document_id, result)
            });
        join_all(futures).await.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use remote_client::MockRemoteClient;
    use sheet_common::{
        A1Range,
        ValueInputMode,
    };
    use serde_json::json;
    use std::sync::Arc;

    use super::*;
    use crate::compile::MutationRequest;

    fn update(row: i64, value: i64) -> Mutation {
        Mutation::UpdateValues {
            range: A1Range::new("Sheet1", row, 0, row, 0).unwrap(),
            values: vec![vec![json!(value)]],
            value_input_mode: ValueInputMode::Raw,
        }
    }

    #[tokio::test]
    async fn dispatch_applies_mutations_and_reports_no_mismatch_on_verify() {
        let client = Arc::new(MockRemoteClient::new());
        let doc = DocumentHandle::new("d1");
        client.seed_document(&doc);
        let dispatcher = BatchDispatcher::new(client);
        let scope = Scope::for_test();

        let outcome = dispatcher
            .dispatch(&scope, &doc, vec![MutationRequest::verified(update(0, 42))], &NoopProgressSink)
            .await
            .unwrap();

        assert_eq!(outcome.outcomes.len(), 1);
        assert!(!outcome.is_partial_failure());
    }

    #[tokio::test]
    async fn dispatch_many_covers_every_document() {
        let client = Arc::new(MockRemoteClient::new());
        let doc_a = DocumentHandle::new("a");
        let doc_b = DocumentHandle::new("b");
        client.seed_document(&doc_a);
        client.seed_document(&doc_b);
        let dispatcher = BatchDispatcher::new(client);
        let scope = Scope::for_test();

        let mut requests = HashMap::new();
        requests.insert(doc_a.clone(), vec![MutationRequest::new(update(0, 1))]);
        requests.insert(doc_b.clone(), vec![MutationRequest::new(update(0, 2))]);

        let results = dispatcher.dispatch_many(&scope, requests, &NoopProgressSink).await;
        assert!(results[&doc_a].is_ok());
        assert!(results[&doc_b].is_ok());
    }
}
