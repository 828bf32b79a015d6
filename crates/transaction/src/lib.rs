//! Transaction lifecycle management (spec.md §4.8): `begin` opens a
//! transaction against a document at an observed revision, `queue` appends
//! mutations to it, `commit` re-validates (per isolation level) and applies
//! them in one batch call, `rollback`/auto-expiry restore a held snapshot
//! when one was taken. A `tokio::sync::Semaphore` gates total concurrent
//! transactions and a per-document `tokio::sync::Mutex` serializes commits
//! against the same document.

use std::{
    sync::Arc,
    time::Instant,
};

use dashmap::DashMap;
use parking_lot::Mutex;
use remote_client::{
    BatchMutateResponse,
    SharedRemoteClient,
};
use sheet_common::{
    config::TransactionConfig,
    revision::check_conflict,
    DocumentHandle,
    Mutation,
    RevisionToken,
    Scope,
};
use sheet_errors::ErrorMetadata;
use snapshot::{
    SnapshotId,
    SnapshotKind,
    SnapshotStore,
};
use tokio::sync::{
    OwnedSemaphorePermit,
    Semaphore,
};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    Serializable,
}

impl IsolationLevel {
    fn as_str(self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "read_uncommitted",
            IsolationLevel::ReadCommitted => "read_committed",
            IsolationLevel::Serializable => "serializable",
        }
    }

    /// `read_uncommitted` applies mutations blind to concurrent writers;
    /// the other two re-validate the observed revision token at commit.
    fn revalidates(self) -> bool {
        !matches!(self, IsolationLevel::ReadUncommitted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Pending,
    Queued,
    Executing,
    Committed,
    RolledBack,
    Failed,
}

impl TransactionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TransactionState::Committed | TransactionState::RolledBack | TransactionState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionId(pub String);

impl TransactionId {
    fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct TransactionStatus {
    pub id: TransactionId,
    pub document_id: DocumentHandle,
    pub isolation: IsolationLevel,
    pub state: TransactionState,
    pub operation_count: usize,
    pub error: Option<String>,
}

struct TransactionRecord {
    document_id: DocumentHandle,
    isolation: IsolationLevel,
    state: TransactionState,
    operations: Vec<Mutation>,
    observed_revision: RevisionToken,
    snapshot_id: Option<SnapshotId>,
    deadline: Instant,
    error: Option<String>,
    permit: Option<OwnedSemaphorePermit>,
}

impl TransactionRecord {
    fn to_status(&self, id: &TransactionId) -> TransactionStatus {
        TransactionStatus {
            id: id.clone(),
            document_id: self.document_id.clone(),
            isolation: self.isolation,
            state: self.state,
            operation_count: self.operations.len(),
            error: self.error.clone(),
        }
    }
}

pub struct TransactionManager {
    config: TransactionConfig,
    client: SharedRemoteClient,
    snapshots: Arc<SnapshotStore>,
    records: DashMap<TransactionId, Mutex<TransactionRecord>>,
    doc_locks: DashMap<DocumentHandle, Arc<tokio::sync::Mutex<()>>>,
    semaphore: Arc<Semaphore>,
}

impl TransactionManager {
    pub fn new(config: TransactionConfig, client: SharedRemoteClient, snapshots: Arc<SnapshotStore>) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
        Self { config, client, snapshots, records: DashMap::new(), doc_locks: DashMap::new(), semaphore }
    }

    fn doc_lock(&self, document_id: &DocumentHandle) -> Arc<tokio::sync::Mutex<()>> {
        self.doc_locks.entry(document_id.clone()).or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))).clone()
    }

    #[tracing::instrument(skip(self, scope), fields(document_id = %document_id))]
    pub async fn begin(&self, scope: &Scope, document_id: &DocumentHandle, isolation: IsolationLevel) -> anyhow::Result<TransactionId> {
        let permit = Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .map_err(|_| anyhow::anyhow!(ErrorMetadata::quota_exceeded("too many active transactions")))?;

        let observed_revision = self.client.current_revision(scope, document_id).await?;

        let id = TransactionId::new();
        let record = TransactionRecord {
            document_id: document_id.clone(),
            isolation,
            state: TransactionState::Pending,
            operations: Vec::new(),
            observed_revision,
            snapshot_id: None,
            deadline: Instant::now() + self.config.timeout,
            error: None,
            permit: Some(permit),
        };
        self.records.insert(id.clone(), Mutex::new(record));
        self.refresh_active_gauge(document_id);
        Ok(id)
    }

    /// Appends a mutation to a pending/queued transaction. When
    /// `auto_snapshot` is on, the snapshot is taken here, on the first
    /// *risky* mutation queued -- not necessarily the transaction's first
    /// operation overall -- rather than in `begin`, so a transaction that
    /// never queues a risky mutation, or is abandoned before queuing one,
    /// never pays for one.
    #[tracing::instrument(skip(self, scope, mutation))]
    pub async fn queue(&self, scope: &Scope, tx_id: &TransactionId, mutation: Mutation) -> anyhow::Result<()> {
        let (needs_snapshot, document_id) = {
            let entry = self.get_record(tx_id)?;
            let mut record = entry.lock();
            self.reject_if_terminal_or_expired(&mut record, tx_id)?;
            if record.operations.len() >= self.config.max_operations {
                anyhow::bail!(ErrorMetadata::invalid_params(format!(
                    "transaction {tx_id} exceeds max_operations ({})",
                    self.config.max_operations
                )));
            }
            let needs_snapshot = self.config.auto_snapshot && record.snapshot_id.is_none() && mutation.is_risky();
            (needs_snapshot, record.document_id.clone())
        };

        if needs_snapshot {
            // `Full`, not `Metadata`: a rollback needs to restore the cell
            // values and structure the transaction is about to risk, and
            // `SnapshotStore::restore` refuses a metadata-only snapshot.
            let snap = self.snapshots.create(scope, &document_id, SnapshotKind::Full).await?;
            self.snapshots.hold(&snap.id, &tx_id.0);
            if let Some(entry) = self.records.get(tx_id) {
                entry.lock().snapshot_id = Some(snap.id);
            }
        }

        let entry = self.get_record(tx_id)?;
        let mut record = entry.lock();
        self.reject_if_terminal_or_expired(&mut record, tx_id)?;
        if record.operations.len() >= self.config.max_operations {
            anyhow::bail!(ErrorMetadata::invalid_params(format!(
                "transaction {tx_id} exceeds max_operations ({})",
                self.config.max_operations
            )));
        }
        record.operations.push(mutation);
        record.state = TransactionState::Queued;
        Ok(())
    }

    #[tracing::instrument(skip(self, scope))]
    pub async fn commit(&self, scope: &Scope, tx_id: &TransactionId) -> anyhow::Result<BatchMutateResponse> {
        let (document_id, isolation, operations, observed_revision) = {
            let entry = self.get_record(tx_id)?;
            let mut record = entry.lock();
            self.reject_if_terminal_or_expired(&mut record, tx_id)?;
            record.state = TransactionState::Executing;
            (record.document_id.clone(), record.isolation, record.operations.clone(), record.observed_revision.clone())
        };

        let doc_lock = self.doc_lock(&document_id);
        let _guard = doc_lock.lock().await;

        if isolation.revalidates() {
            let current = self.client.current_revision(scope, &document_id).await?;
            if let Err(err) = check_conflict(&observed_revision, &current) {
                self.finish(tx_id, TransactionState::Failed, Some(err.to_string()));
                sheet_metrics::transaction::log_failed(isolation.as_str());
                return Err(err);
            }
        }

        let batch_result = match self.client.batch_mutate(scope, &document_id, &operations).await {
            Ok(response) => match response.outcomes.iter().find(|o| !o.applied) {
                // The remote call itself succeeded, but one of the batched
                // mutations was rejected server-side (e.g. a deleteSheet
                // against a sheet id that doesn't exist); treat that the
                // same as a transport-level failure for rollback purposes.
                Some(failed) => Err(anyhow::anyhow!(ErrorMetadata::transaction_failed(format!(
                    "mutation {} was rejected: {}",
                    failed.operation_key,
                    failed.error.as_deref().unwrap_or("unknown error")
                )))),
                None => Ok(response),
            },
            Err(err) => Err(err),
        };

        match batch_result {
            Ok(response) => {
                self.finish(tx_id, TransactionState::Committed, None);
                sheet_metrics::transaction::log_committed(isolation.as_str());
                Ok(response)
            },
            Err(err) => {
                let rolled_back = if self.config.auto_rollback { self.try_auto_rollback(scope, tx_id).await } else { false };
                let rollback_status = if rolled_back { "restored" } else { "failed" };
                if rolled_back {
                    self.finish(tx_id, TransactionState::RolledBack, Some(err.to_string()));
                    sheet_metrics::transaction::log_rolled_back(isolation.as_str());
                } else {
                    self.finish(tx_id, TransactionState::Failed, Some(err.to_string()));
                    sheet_metrics::transaction::log_failed(isolation.as_str());
                }
                let cause = err.to_string();
                Err(err.context(
                    ErrorMetadata::transaction_failed(format!("transaction {tx_id} failed to commit: {cause}"))
                        .with_details(serde_json::json!({"rollback": {"status": rollback_status}})),
                ))
            },
        }
    }

    #[tracing::instrument(skip(self, scope))]
    pub async fn rollback(&self, scope: &Scope, tx_id: &TransactionId) -> anyhow::Result<()> {
        let (isolation, snapshot_id, state) = {
            let entry = self.get_record(tx_id)?;
            let record = entry.lock();
            (record.isolation, record.snapshot_id.clone(), record.state)
        };
        if state.is_terminal() {
            anyhow::bail!(ErrorMetadata::conflict(format!("transaction {tx_id} is already {:?}", state)));
        }

        match (state, snapshot_id) {
            (TransactionState::Pending | TransactionState::Queued, _) => {
                // Nothing has reached the remote document yet; rolling
                // back is purely local bookkeeping.
                self.finish(tx_id, TransactionState::RolledBack, None);
            },
            (_, Some(sid)) => {
                self.snapshots.restore(scope, &sid).await?;
                self.finish(tx_id, TransactionState::RolledBack, None);
            },
            (_, None) => {
                anyhow::bail!(ErrorMetadata::transaction_failed(
                    "cannot roll back an executed transaction without a snapshot"
                ));
            },
        }
        sheet_metrics::transaction::log_rolled_back(isolation.as_str());
        Ok(())
    }

    pub fn status(&self, tx_id: &TransactionId) -> Option<TransactionStatus> {
        self.records.get(tx_id).map(|entry| entry.lock().to_status(tx_id))
    }

    pub fn list(&self, document_id: Option<&DocumentHandle>) -> Vec<TransactionStatus> {
        self.records
            .iter()
            .filter(|entry| match document_id {
                Some(doc) => &entry.value().lock().document_id == doc,
                None => true,
            })
            .map(|entry| entry.value().lock().to_status(entry.key()))
            .collect()
    }

    /// Sweeps transactions past their deadline into `failed` (auto-rolling
    /// back when a snapshot is held), freeing their concurrency slot.
    /// Intended to run on a periodic timer; safe to call any time.
    #[tracing::instrument(skip(self, scope))]
    pub async fn expire_overdue(&self, scope: &Scope) -> usize {
        let now = Instant::now();
        let overdue: Vec<TransactionId> = self
            .records
            .iter()
            .filter(|entry| {
                let record = entry.value().lock();
                !record.state.is_terminal() && now >= record.deadline
            })
            .map(|entry| entry.key().clone())
            .collect();

        for tx_id in &overdue {
            let rolled_back = if self.config.auto_rollback { self.try_auto_rollback(scope, tx_id).await } else { false };
            let isolation = self.status(tx_id).map(|s| s.isolation);
            let final_state = if rolled_back { TransactionState::RolledBack } else { TransactionState::Failed };
            self.finish(tx_id, final_state, Some("transaction deadline exceeded".to_string()));
            if let Some(isolation) = isolation {
                if rolled_back {
                    sheet_metrics::transaction::log_rolled_back(isolation.as_str());
                } else {
                    sheet_metrics::transaction::log_failed(isolation.as_str());
                }
            }
        }
        overdue.len()
    }

    fn get_record(&self, tx_id: &TransactionId) -> anyhow::Result<dashmap::mapref::one::Ref<'_, TransactionId, Mutex<TransactionRecord>>> {
        self.records.get(tx_id).ok_or_else(|| anyhow::anyhow!(ErrorMetadata::not_found(format!("transaction {tx_id} not found"))))
    }

    fn reject_if_terminal_or_expired(&self, record: &mut TransactionRecord, tx_id: &TransactionId) -> anyhow::Result<()> {
        if record.state.is_terminal() {
            anyhow::bail!(ErrorMetadata::conflict(format!("transaction {tx_id} is already {:?}", record.state)));
        }
        if Instant::now() >= record.deadline {
            record.state = TransactionState::Failed;
            record.error = Some("transaction deadline exceeded".to_string());
            anyhow::bail!(ErrorMetadata::timeout(format!("transaction {tx_id} exceeded its deadline")));
        }
        Ok(())
    }

    async fn try_auto_rollback(&self, scope: &Scope, tx_id: &TransactionId) -> bool {
        let snapshot_id = self.records.get(tx_id).and_then(|entry| entry.lock().snapshot_id.clone());
        match snapshot_id {
            Some(sid) => self.snapshots.restore(scope, &sid).await.is_ok(),
            None => false,
        }
    }

    fn finish(&self, tx_id: &TransactionId, state: TransactionState, error: Option<String>) {
        let (document_id, snapshot_id) = {
            let Some(entry) = self.records.get(tx_id) else { return };
            let mut record = entry.lock();
            record.state = state;
            record.error = error;
            record.permit = None;
            (record.document_id.clone(), record.snapshot_id.clone())
        };
        if let Some(sid) = snapshot_id {
            self.snapshots.release(&sid, &tx_id.0);
        }
        self.refresh_active_gauge(&document_id);
    }

    fn refresh_active_gauge(&self, document_id: &DocumentHandle) {
        let count = self
            .records
            .iter()
            .filter(|entry| {
                let record = entry.value().lock();
                &record.document_id == document_id && !record.state.is_terminal()
            })
            .count();
        sheet_metrics::transaction::set_active(document_id.as_str(), count as i64);
    }
}

#[cfg(test)]
mod tests {
    use remote_client::MockRemoteClient;
    use sheet_common::{
        config::SnapshotConfig,
        A1Range,
        ValueInputMode,
    };

    use super::*;

    fn manager(config: TransactionConfig) -> (TransactionManager, Arc<MockRemoteClient>) {
        let client = Arc::new(MockRemoteClient::new());
        let snapshots = Arc::new(SnapshotStore::new(SnapshotConfig::default(), client.clone()));
        (TransactionManager::new(config, client.clone(), snapshots), client)
    }

    fn update(row: i64) -> Mutation {
        Mutation::UpdateValues {
            range: A1Range::new("Sheet1", row, 0, row, 0).unwrap(),
            values: vec![vec![serde_json::json!(1)]],
            value_input_mode: ValueInputMode::Raw,
        }
    }

    #[tokio::test]
    async fn begin_queue_commit_happy_path() {
        let (mgr, client) = manager(TransactionConfig::default());
        let doc = DocumentHandle::new("d1");
        client.seed_document(&doc);
        let scope = Scope::for_test();

        let tx = mgr.begin(&scope, &doc, IsolationLevel::ReadCommitted).await.unwrap();
        mgr.queue(&scope, &tx, update(0)).await.unwrap();
        mgr.commit(&scope, &tx).await.unwrap();

        assert_eq!(mgr.status(&tx).unwrap().state, TransactionState::Committed);
    }

    #[tokio::test]
    async fn read_committed_fails_on_revision_conflict() {
        let (mgr, client) = manager(TransactionConfig::default());
        let doc = DocumentHandle::new("d1");
        client.seed_document(&doc);
        let scope = Scope::for_test();

        let tx = mgr.begin(&scope, &doc, IsolationLevel::ReadCommitted).await.unwrap();
        // A concurrent write moves the revision token before this tx commits.
        client.seed_formula(&doc, "Sheet1", 5, 5, "=A1");
        mgr.queue(&scope, &tx, update(0)).await.unwrap();

        let err = mgr.commit(&scope, &tx).await.unwrap_err();
        assert_eq!(err.downcast_ref::<ErrorMetadata>().unwrap().code, sheet_errors::ErrorKind::Conflict);
        assert_eq!(mgr.status(&tx).unwrap().state, TransactionState::Failed);
    }

    #[tokio::test]
    async fn read_uncommitted_ignores_revision_conflict() {
        let (mgr, client) = manager(TransactionConfig::default());
        let doc = DocumentHandle::new("d1");
        client.seed_document(&doc);
        let scope = Scope::for_test();

        let tx = mgr.begin(&scope, &doc, IsolationLevel::ReadUncommitted).await.unwrap();
        client.seed_formula(&doc, "Sheet1", 5, 5, "=A1");
        mgr.queue(&scope, &tx, update(0)).await.unwrap();

        mgr.commit(&scope, &tx).await.unwrap();
        assert_eq!(mgr.status(&tx).unwrap().state, TransactionState::Committed);
    }

    #[tokio::test]
    async fn concurrency_gate_rejects_past_max_concurrent() {
        let (mgr, client) = manager(TransactionConfig { max_concurrent: 1, ..TransactionConfig::default() });
        let doc = DocumentHandle::new("d1");
        client.seed_document(&doc);
        let scope = Scope::for_test();

        let _tx = mgr.begin(&scope, &doc, IsolationLevel::ReadCommitted).await.unwrap();
        let err = mgr.begin(&scope, &doc, IsolationLevel::ReadCommitted).await.unwrap_err();
        assert_eq!(err.downcast_ref::<ErrorMetadata>().unwrap().code, sheet_errors::ErrorKind::QuotaExceeded);
    }

    #[tokio::test]
    async fn rollback_of_a_never_committed_transaction_is_local_only() {
        let (mgr, client) = manager(TransactionConfig::default());
        let doc = DocumentHandle::new("d1");
        client.seed_document(&doc);
        let scope = Scope::for_test();

        let tx = mgr.begin(&scope, &doc, IsolationLevel::ReadCommitted).await.unwrap();
        mgr.queue(&scope, &tx, update(0)).await.unwrap();
        mgr.rollback(&scope, &tx).await.unwrap();
        assert_eq!(mgr.status(&tx).unwrap().state, TransactionState::RolledBack);
    }

    #[tokio::test]
    async fn committed_transaction_cannot_be_rolled_back_afterward() {
        let (mgr, client) = manager(TransactionConfig { auto_snapshot: true, auto_rollback: true, ..TransactionConfig::default() });
        let doc = DocumentHandle::new("d1");
        client.seed_document(&doc);
        let scope = Scope::for_test();

        let tx = mgr.begin(&scope, &doc, IsolationLevel::ReadCommitted).await.unwrap();
        mgr.queue(&scope, &tx, update(0)).await.unwrap();
        mgr.commit(&scope, &tx).await.unwrap();

        let err = mgr.rollback(&scope, &tx).await.unwrap_err();
        assert_eq!(err.downcast_ref::<ErrorMetadata>().unwrap().code, sheet_errors::ErrorKind::Conflict);
    }
}
