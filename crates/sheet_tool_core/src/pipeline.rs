//! Wires every component crate into the one pipeline spec.md §A.2
//! describes: validate, RBAC check, dedupe, optional impact analysis,
//! optional transaction enlist, batch compile, rate-limit, circuit-breaker,
//! retry-with-backoff, remote API, response transform, audit log, reply.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use access_pattern::{
    AccessKind,
    AccessPatternTracker,
};
use audit::{
    AuditLogger,
    AuditOutcome,
    AuditRecord,
    EffectCounts,
    RbacEngine,
};
use batch_compiler::{
    BatchDispatcher,
    DispatchOutcome,
    MutationRequest,
    NoopProgressSink,
};
use circuit_breaker::{
    execute_with_retry,
    AttemptOutcome,
    CircuitBreaker,
    RetryOptions,
};
use dedup_merge::{
    DedupKey,
    Deduplicator,
    RequestMerger,
};
use dependency_graph::ImpactAnalyzer;
use rate_limiter::{
    RateKey,
    RateLimiter,
};
use remote_client::{
    SharedRemoteClient,
    ValuesBlock,
};
use serde_json::json;
use session_store::{
    Session,
    TaskStatus,
};
use sheet_common::config::PipelineConfig;
use sheet_common::{
    A1Range,
    Capability,
    DocumentHandle,
    Scope,
};
use transaction::{
    IsolationLevel,
    TransactionId,
    TransactionManager,
};

use crate::call::{
    ToolCall,
    ToolResponse,
};

/// Maps the capability scopes the (out-of-scope) auth subsystem hands the
/// core into the built-in RBAC role names `audit::RbacEngine` resolves
/// against. The core never mints or inspects credentials itself -- it just
/// treats these scope strings as opaque role grants.
fn scopes_to_roles(scopes: &HashSet<String>) -> Vec<String> {
    let mut roles = Vec::new();
    if scopes.contains("sheets.admin") {
        roles.push("admin".to_string());
    }
    if scopes.contains("sheets.write") {
        roles.push("editor".to_string());
    }
    if scopes.contains("sheets.read") {
        roles.push("viewer".to_string());
    }
    roles
}

pub struct ToolCore {
    rate_limiter: RateLimiter,
    breaker: CircuitBreaker,
    retry_opts: RetryOptions,
    deduplicator: Deduplicator<ValuesBlock>,
    merger: Arc<RequestMerger>,
    impact: ImpactAnalyzer,
    transactions: TransactionManager,
    dispatcher: BatchDispatcher,
    access_pattern: AccessPatternTracker,
    rbac: RbacEngine,
    audit: AuditLogger,
}

impl ToolCore {
    pub fn new(config: PipelineConfig, client: SharedRemoteClient, snapshots: Arc<snapshot::SnapshotStore>, audit: AuditLogger) -> Self {
        Self {
            rate_limiter: RateLimiter::new(config.rate.clone()),
            breaker: CircuitBreaker::new(config.circuit.clone()),
            retry_opts: RetryOptions::from(&config.retry),
            deduplicator: Deduplicator::new(&config.dedup),
            merger: RequestMerger::new(config.merger.clone(), client.clone()),
            impact: ImpactAnalyzer::new(client.clone()),
            transactions: TransactionManager::new(config.tx.clone(), client.clone(), snapshots),
            dispatcher: BatchDispatcher::new(client),
            access_pattern: AccessPatternTracker::new(config.access_pattern.clone()),
            rbac: RbacEngine::with_builtin_roles(),
            audit,
        }
    }

    /// Runs one tool call through the pipeline. When `session` is given, the
    /// call is additionally tracked as a task on that session (spec.md
    /// §4.10): callers polling or resuming a session see it move from
    /// `Working` to a terminal status, with the final response appended to
    /// the session's event stream for reconnect/resume.
    pub async fn handle(&self, scope: &Scope, capability: &Capability, call: ToolCall, session: Option<&Session>) -> ToolResponse {
        let started = Instant::now();
        let task_id = session.map(|session| session.tasks.create_task(call.tool()));

        let outcome = self.dispatch(scope, capability, &call).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (audit_outcome, response) = match outcome {
            Ok(response) => (AuditOutcome::Success, response),
            Err(err) => (AuditOutcome::Failure, ToolResponse::from_error(&err)),
        };

        self.record_audit(scope, capability, &call, audit_outcome, duration_ms).await;

        if let (Some(session), Some(task_id)) = (session, &task_id) {
            let final_status = if response.success { TaskStatus::Completed } else { TaskStatus::Failed };
            let result = serde_json::to_value(&response).unwrap_or(serde_json::Value::Null);
            if let Err(err) = session.tasks.store_result(task_id, final_status, result.clone()) {
                tracing::warn!(error = %err, task_id = %task_id, "failed to record task result");
            }
            if let Err(err) = session.events.append(&scope.request_id.0, result).await {
                tracing::warn!(error = %err, "failed to append tool-call event");
            }
        }

        response
    }

    async fn dispatch(&self, scope: &Scope, capability: &Capability, call: &ToolCall) -> anyhow::Result<ToolResponse> {
        self.check_rbac(capability, call)?;

        match call {
            ToolCall::ReadValues { document_id, range } => self.handle_read(scope, document_id, range).await,
            ToolCall::Mutate { document_id, mutations, transaction_id } => {
                self.handle_mutate(scope, document_id, mutations.clone(), transaction_id.clone()).await
            },
            ToolCall::BeginTransaction { document_id, isolation } => self.handle_begin(scope, document_id, *isolation).await,
            ToolCall::CommitTransaction { transaction_id } => self.handle_commit(scope, transaction_id).await,
            ToolCall::RollbackTransaction { transaction_id } => self.handle_rollback(scope, transaction_id).await,
        }
    }

    fn check_rbac(&self, capability: &Capability, call: &ToolCall) -> anyhow::Result<()> {
        let roles = scopes_to_roles(&capability.scopes);
        let allowed = self.rbac.check(&roles, call.tool(), call.action(), call.resource())?;
        if !allowed {
            anyhow::bail!(sheet_errors::ErrorMetadata::permission_denied(format!(
                "{} lacks {}/{} on {}",
                capability.subject,
                call.tool(),
                call.action(),
                call.resource()
            )));
        }
        Ok(())
    }

    async fn handle_read(&self, scope: &Scope, document_id: &DocumentHandle, range: &A1Range) -> anyhow::Result<ToolResponse> {
        let key = DedupKey::new(
            "read_values",
            [("document_id".to_string(), document_id.as_str().to_string()), ("range".to_string(), range.format())],
        );
        let block = self.deduplicator.deduplicate(&key, || self.read_with_governance(scope, document_id, range.clone())).await?;

        self.access_pattern.record(document_id, AccessKind::Range(range.clone()));
        let predictions = self.access_pattern.predict(document_id);

        let payload = json!({
            "range": block.range.format(),
            "values": block.values,
        });
        let mut response = ToolResponse::success(payload);
        if !predictions.is_empty() {
            let predicted = predictions
                .into_iter()
                .map(|p| json!({"range": p.range.format(), "confidence": p.confidence, "strategy": p.strategy}))
                .collect::<Vec<_>>();
            response = response.with_predictions(json!(predicted));
        }
        Ok(response)
    }

    /// Merges concurrent reads of overlapping ranges (§4.4), then carries
    /// the merged fetch through rate-limiting, the circuit breaker, and
    /// retry-with-backoff before it reaches the remote API.
    async fn read_with_governance(&self, scope: &Scope, document_id: &DocumentHandle, range: A1Range) -> anyhow::Result<ValuesBlock> {
        let key = RateKey::new(scope.subject.clone(), "read_values", Some(document_id.as_str().to_string()));
        self.rate_limiter.acquire(&key, 1, scope.deadline).await?;

        let merger = self.merger.clone();
        let scope_owned = scope.clone();
        let document_id_owned = document_id.clone();
        let retry_opts = self.retry_opts.clone();

        self.breaker
            .execute(
                "read_values",
                move || async move {
                    execute_with_retry("read_values", &scope_owned, &retry_opts, move || {
                        let merger = merger.clone();
                        let scope_owned = scope_owned.clone();
                        let document_id_owned = document_id_owned.clone();
                        let range = range.clone();
                        async move { AttemptOutcome::from(merger.read(&scope_owned, &document_id_owned, "", range).await) }
                    })
                    .await
                },
                None,
            )
            .await
    }

    async fn handle_mutate(
        &self,
        scope: &Scope,
        document_id: &DocumentHandle,
        mutations: Vec<MutationRequest>,
        transaction_id: Option<TransactionId>,
    ) -> anyhow::Result<ToolResponse> {
        let mut impact_meta = Vec::new();
        for request in &mutations {
            if request.mutation.is_risky() || request.mutation.is_structural() {
                let analysis = self.impact.analyze(scope, document_id, &request.mutation).await?;
                impact_meta.push(json!({
                    "severity": analysis.severity.as_str(),
                    "protectedRangeTouched": analysis.protected_range_touched,
                    "recommendations": analysis.recommendations,
                    "canProceed": analysis.can_proceed,
                    "requiresConfirmation": analysis.requires_confirmation,
                }));
            }
        }

        if let Some(tx_id) = transaction_id {
            for request in &mutations {
                self.transactions.queue(scope, &tx_id, request.mutation.clone()).await?;
            }
            return Ok(ToolResponse::success(json!({
                "enlisted": true,
                "transactionId": tx_id.0,
                "impact": impact_meta,
            })));
        }

        let outcome = self.dispatch_with_governance(scope, document_id, mutations).await?;
        let effect = EffectCounts { cells: outcome.outcomes.len() as u64, rows: 0, columns: 0 };
        Ok(ToolResponse::success(json!({
            "applied": outcome.outcomes.iter().filter(|o| o.applied).count(),
            "partialFailure": outcome.is_partial_failure(),
            "verifyMismatches": outcome.verify_mismatches,
            "impact": impact_meta,
            "effect": {"cells": effect.cells, "rows": effect.rows, "columns": effect.columns},
        })))
    }

    async fn dispatch_with_governance(
        &self,
        scope: &Scope,
        document_id: &DocumentHandle,
        mutations: Vec<MutationRequest>,
    ) -> anyhow::Result<DispatchOutcome> {
        let key = RateKey::new(scope.subject.clone(), "batch_mutate", Some(document_id.as_str().to_string()));
        self.rate_limiter.acquire(&key, mutations.len().max(1) as u32, scope.deadline).await?;

        let scope_owned = scope.clone();
        let document_id_owned = document_id.clone();
        let retry_opts = self.retry_opts.clone();

        self.breaker
            .execute(
                "batch_mutate",
                move || async move {
                    execute_with_retry("batch_mutate", &scope_owned, &retry_opts, move || {
                        let scope_owned = scope_owned.clone();
                        let document_id_owned = document_id_owned.clone();
                        let mutations = mutations.clone();
                        async move {
                            AttemptOutcome::from(self.dispatcher.dispatch(&scope_owned, &document_id_owned, mutations, &NoopProgressSink).await)
                        }
                    })
                    .await
                },
                None,
            )
            .await
    }

    async fn handle_begin(&self, scope: &Scope, document_id: &DocumentHandle, isolation: IsolationLevel) -> anyhow::Result<ToolResponse> {
        let tx_id = self.transactions.begin(scope, document_id, isolation).await?;
        Ok(ToolResponse::success(json!({"transactionId": tx_id.0})))
    }

    async fn handle_commit(&self, scope: &Scope, tx_id: &TransactionId) -> anyhow::Result<ToolResponse> {
        let response = self.transactions.commit(scope, tx_id).await?;
        Ok(ToolResponse::success(json!({"revision": response.revision.0, "applied": response.outcomes.len()})))
    }

    async fn handle_rollback(&self, scope: &Scope, tx_id: &TransactionId) -> anyhow::Result<ToolResponse> {
        self.transactions.rollback(scope, tx_id).await?;
        Ok(ToolResponse::success(json!({"rolledBack": true})))
    }

    async fn record_audit(&self, scope: &Scope, capability: &Capability, call: &ToolCall, outcome: AuditOutcome, duration_ms: u64) {
        let resource = call.document_id().map(|d| d.as_str().to_string()).unwrap_or_else(|| call.resource().to_string());
        let record = AuditRecord::new(
            capability.subject.clone(),
            call.tool(),
            call.action(),
            resource,
            outcome,
            duration_ms,
            scope.request_id.0.clone(),
        )
        .with_scopes(capability.scopes.iter().cloned());
        self.audit.log(record).await;
    }
}

#[cfg(test)]
mod tests {
    use audit::TracingAuditSink;
    use remote_client::MockRemoteClient;
    use sheet_common::config::PipelineConfig;

    use super::*;

    fn core(client: SharedRemoteClient) -> ToolCore {
        let snapshots = Arc::new(snapshot::SnapshotStore::new(PipelineConfig::default().snapshot, client.clone()));
        let audit = AuditLogger::new(Arc::new(TracingAuditSink));
        ToolCore::new(PipelineConfig::default(), client, snapshots, audit)
    }

    fn editor() -> Capability {
        Capability::new("u1", ["sheets.write".to_string()])
    }

    fn viewer() -> Capability {
        Capability::new("u1", ["sheets.read".to_string()])
    }

    #[tokio::test]
    async fn read_values_round_trips_through_the_full_pipeline() {
        let client = Arc::new(MockRemoteClient::new());
        let doc = DocumentHandle::new("d1");
        client.seed_document(&doc);
        let core = core(client);
        let scope = Scope::for_test();

        let response = core
            .handle(&scope, &viewer(), ToolCall::ReadValues { document_id: doc, range: A1Range::new("Sheet1", 0, 0, 0, 0).unwrap() }, None)
            .await;

        assert!(response.success);
        assert!(response.payload.is_some());
    }

    #[tokio::test]
    async fn viewer_cannot_mutate() {
        let client = Arc::new(MockRemoteClient::new());
        let doc = DocumentHandle::new("d1");
        client.seed_document(&doc);
        let core = core(client);
        let scope = Scope::for_test();

        let mutation = sheet_common::Mutation::UpdateValues {
            range: A1Range::new("Sheet1", 0, 0, 0, 0).unwrap(),
            values: vec![vec![serde_json::json!(1)]],
            value_input_mode: sheet_common::ValueInputMode::Raw,
        };
        let response = core
            .handle(
                &scope,
                &viewer(),
                ToolCall::Mutate { document_id: doc, mutations: vec![MutationRequest::new(mutation)], transaction_id: None },
                None,
            )
            .await;

        assert!(!response.success);
        assert_eq!(response.error.unwrap().code, "PERMISSION_DENIED");
    }

    #[tokio::test]
    async fn editor_mutate_dispatches_and_audits_success() {
        let client = Arc::new(MockRemoteClient::new());
        let doc = DocumentHandle::new("d1");
        client.seed_document(&doc);
        let core = core(client);
        let scope = Scope::for_test();

        let mutation = sheet_common::Mutation::UpdateValues {
            range: A1Range::new("Sheet1", 0, 0, 0, 0).unwrap(),
            values: vec![vec![serde_json::json!(7)]],
            value_input_mode: sheet_common::ValueInputMode::Raw,
        };
        let response = core
            .handle(
                &scope,
                &editor(),
                ToolCall::Mutate { document_id: doc, mutations: vec![MutationRequest::new(mutation)], transaction_id: None },
                None,
            )
            .await;

        assert!(response.success);
    }

    #[tokio::test]
    async fn mutation_enlisted_in_a_transaction_is_not_dispatched_directly() {
        let client = Arc::new(MockRemoteClient::new());
        let doc = DocumentHandle::new("d1");
        client.seed_document(&doc);
        let core = core(client);
        let scope = Scope::for_test();

        let tx_id = core.transactions.begin(&scope, &doc, IsolationLevel::ReadCommitted).await.unwrap();

        let mutation = sheet_common::Mutation::UpdateValues {
            range: A1Range::new("Sheet1", 0, 0, 0, 0).unwrap(),
            values: vec![vec![serde_json::json!(9)]],
            value_input_mode: sheet_common::ValueInputMode::Raw,
        };
        let response = core
            .handle(
                &scope,
                &editor(),
                ToolCall::Mutate {
                    document_id: doc,
                    mutations: vec![MutationRequest::new(mutation)],
                    transaction_id: Some(tx_id),
                },
                None,
            )
            .await;

        assert!(response.success);
        assert_eq!(response.payload.unwrap()["enlisted"], serde_json::json!(true));
    }

    #[tokio::test]
    async fn a_call_made_with_a_session_is_tracked_as_a_completed_task_and_appends_an_event() {
        let client = Arc::new(MockRemoteClient::new());
        let doc = DocumentHandle::new("d1");
        client.seed_document(&doc);
        let core = core(client);
        let scope = Scope::for_test();

        let sessions = session_store::SessionStore::new(
            sheet_common::config::SessionConfig::default(),
            sheet_common::config::EventsConfig::default(),
        );
        let session = sessions.create_session("u1", viewer());

        let response = core
            .handle(
                &scope,
                &viewer(),
                ToolCall::ReadValues { document_id: doc, range: A1Range::new("Sheet1", 0, 0, 0, 0).unwrap() },
                Some(&session),
            )
            .await;
        assert!(response.success);

        let (tasks, _) = session.tasks.list_tasks(None);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].status, TaskStatus::Completed);

        let mut replayed = Vec::new();
        let stream_id = session
            .events
            .replay_events_after(&format!("{}:0", scope.request_id.0), &mut |event| replayed.push(event.payload.clone()))
            .await
            .unwrap();
        assert_eq!(stream_id, scope.request_id.0);
        assert!(replayed.is_empty(), "the single appended event is sequence 0, so nothing comes after it");
    }
}
