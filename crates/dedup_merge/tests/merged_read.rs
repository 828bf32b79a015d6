//! End-to-end exercises of the request merger (concurrent reads folding into
//! one remote call) and the in-flight deduplicator, against a counting
//! wrapper around `MockRemoteClient`.

use std::sync::{
    atomic::{
        AtomicUsize,
        Ordering,
    },
    Arc,
};

use async_trait::async_trait;
use dedup_merge::{
    DedupKey,
    Deduplicator,
    RequestMerger,
};
use remote_client::{
    BatchMutateResponse,
    DocumentMetadata,
    ExportedDocument,
    MockRemoteClient,
    RemoteClient,
    RestoreOutcome,
    ValuesBlock,
};
use sheet_common::{
    config::{
        DedupConfig,
        MergerConfig,
    },
    A1Range,
    DocumentHandle,
    Mutation,
    RevisionToken,
    Scope,
};

/// Counts `read_values` calls while delegating everything to the inner
/// `MockRemoteClient`; `RequestMerger` and `Deduplicator` only depend on the
/// `RemoteClient` trait, so swapping in a counting decorator exercises them
/// exactly as a real deployment's metrics would.
struct CountingClient {
    inner: MockRemoteClient,
    read_calls: AtomicUsize,
}

impl CountingClient {
    fn new() -> Self {
        Self { inner: MockRemoteClient::new(), read_calls: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl RemoteClient for CountingClient {
    async fn read_values(&self, scope: &Scope, doc: &DocumentHandle, range: &A1Range, field_mask: &[&str]) -> anyhow::Result<ValuesBlock> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.read_values(scope, doc, range, field_mask).await
    }

    async fn get_document_metadata(&self, scope: &Scope, doc: &DocumentHandle) -> anyhow::Result<DocumentMetadata> {
        self.inner.get_document_metadata(scope, doc).await
    }

    async fn batch_mutate(&self, scope: &Scope, doc: &DocumentHandle, mutations: &[Mutation]) -> anyhow::Result<BatchMutateResponse> {
        self.inner.batch_mutate(scope, doc, mutations).await
    }

    async fn export_full(&self, scope: &Scope, doc: &DocumentHandle) -> anyhow::Result<ExportedDocument> {
        self.inner.export_full(scope, doc).await
    }

    async fn restore_full(&self, scope: &Scope, doc: &DocumentHandle, export: &ExportedDocument) -> anyhow::Result<RestoreOutcome> {
        self.inner.restore_full(scope, doc, export).await
    }

    async fn create_document(&self, scope: &Scope, title: &str) -> anyhow::Result<DocumentHandle> {
        self.inner.create_document(scope, title).await
    }

    async fn current_revision(&self, scope: &Scope, doc: &DocumentHandle) -> anyhow::Result<RevisionToken> {
        self.inner.current_revision(scope, doc).await
    }
}

#[tokio::test]
async fn two_overlapping_reads_within_the_window_merge_into_one_remote_call() {
    let counting = Arc::new(CountingClient::new());
    let doc = DocumentHandle::new("d1");
    counting.inner.seed_document(&doc);
    counting
        .inner
        .batch_mutate(
            &Scope::for_test(),
            &doc,
            &[Mutation::UpdateValues {
                range: A1Range::new("Sheet1", 0, 0, 9, 2).unwrap(),
                values: (0..10).map(|r| vec![serde_json::json!(r), serde_json::json!(r * 2), serde_json::json!(r * 3)]).collect(),
                value_input_mode: sheet_common::ValueInputMode::Raw,
            }],
        )
        .await
        .unwrap();

    let merger = RequestMerger::new(MergerConfig { window: std::time::Duration::from_millis(50), ..MergerConfig::default() }, counting.clone());

    let merger_a = merger.clone();
    let doc_a = doc.clone();
    let request_a = tokio::spawn(async move {
        merger_a.read(&Scope::for_test(), &doc_a, "", A1Range::new("Sheet1", 0, 0, 9, 1).unwrap()).await
    });

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;

    let merger_b = merger.clone();
    let doc_b = doc.clone();
    let request_b = tokio::spawn(async move {
        merger_b.read(&Scope::for_test(), &doc_b, "", A1Range::new("Sheet1", 0, 0, 4, 2).unwrap()).await
    });

    let (result_a, result_b) = tokio::join!(request_a, request_b);
    let block_a = result_a.unwrap().unwrap();
    let block_b = result_b.unwrap().unwrap();

    assert_eq!(block_a.values.len(), 10);
    assert_eq!(block_a.values[0].len(), 2);
    assert_eq!(block_b.values.len(), 5);
    assert_eq!(block_b.values[0].len(), 3);
    assert_eq!(counting.read_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn ten_identical_concurrent_reads_join_a_single_factory_call() {
    let calls = Arc::new(AtomicUsize::new(0));
    let dedup: Arc<Deduplicator<i32>> = Arc::new(Deduplicator::new(&DedupConfig::default()));
    let key = DedupKey::new("read_values", vec![("range".to_string(), "Sheet1!A1:B2".to_string())]);

    let mut handles = Vec::new();
    for _ in 0..10 {
        let dedup = dedup.clone();
        let calls = calls.clone();
        let key = key.clone();
        handles.push(tokio::spawn(async move {
            dedup
                .deduplicate(&key, || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                    Ok(7)
                })
                .await
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), 7);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
