//! Snapshot creation, restore, and garbage collection (spec.md §4.6).
//! `metadata` snapshots are cheap: a single `get_document_metadata` call.
//! `full` snapshots export the whole document and are bounded by a size
//! limit. Snapshots are reference-counted by the transactions holding them
//! and swept once either their TTL elapses or their holder count drops to
//! zero, whichever comes first.

use std::{
    collections::HashSet,
    time::Instant,
};

use dashmap::DashMap;
use remote_client::{
    DocumentMetadata,
    ExportedDocument,
    RestoreOutcome,
    SharedRemoteClient,
};
use sheet_common::{
    config::SnapshotConfig,
    DocumentHandle,
    Scope,
};
use sheet_errors::ErrorMetadata;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotId(pub String);

impl SnapshotId {
    fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    Metadata,
    Full,
}

impl SnapshotKind {
    fn as_str(self) -> &'static str {
        match self {
            SnapshotKind::Metadata => "metadata",
            SnapshotKind::Full => "full",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub document_id: DocumentHandle,
    pub kind: SnapshotKind,
    pub created_at: Instant,
    pub size_bytes: u64,
}

enum Payload {
    Metadata(DocumentMetadata),
    Full(ExportedDocument),
}

struct StoredSnapshot {
    meta: Snapshot,
    payload: Payload,
    holders: HashSet<String>,
}

pub struct SnapshotStore {
    config: SnapshotConfig,
    client: SharedRemoteClient,
    snapshots: DashMap<SnapshotId, StoredSnapshot>,
}

impl SnapshotStore {
    pub fn new(config: SnapshotConfig, client: SharedRemoteClient) -> Self {
        Self { config, client, snapshots: DashMap::new() }
    }

    #[tracing::instrument(skip(self, scope), fields(document_id = %document_id))]
    pub async fn create(&self, scope: &Scope, document_id: &DocumentHandle, kind: SnapshotKind) -> anyhow::Result<Snapshot> {
        let (payload, size_bytes) = match kind {
            SnapshotKind::Metadata => {
                let metadata = self.client.get_document_metadata(scope, document_id).await?;
                let size = estimate_metadata_size(&metadata);
                (Payload::Metadata(metadata), size)
            },
            SnapshotKind::Full => {
                let export = self.client.export_full(scope, document_id).await?;
                let size = export.bytes.len() as u64;
                if size > self.config.max_full_size_bytes {
                    anyhow::bail!(ErrorMetadata::snapshot_too_large(size, self.config.max_full_size_bytes));
                }
                (Payload::Full(export), size)
            },
        };

        let meta = Snapshot {
            id: SnapshotId::new(),
            document_id: document_id.clone(),
            kind,
            created_at: Instant::now(),
            size_bytes,
        };
        sheet_metrics::snapshot::log_created(kind.as_str(), size_bytes);
        self.snapshots.insert(meta.id.clone(), StoredSnapshot { meta: meta.clone(), payload, holders: HashSet::new() });
        Ok(meta)
    }

    #[tracing::instrument(skip(self, scope))]
    pub async fn restore(&self, scope: &Scope, snapshot_id: &SnapshotId) -> anyhow::Result<RestoreOutcome> {
        let stored = self
            .snapshots
            .get(snapshot_id)
            .ok_or_else(|| anyhow::anyhow!(ErrorMetadata::snapshot_missing(snapshot_id)))?;
        match &stored.payload {
            Payload::Metadata(_) => {
                anyhow::bail!(ErrorMetadata::invalid_params("cannot restore a document from a metadata-only snapshot"))
            },
            Payload::Full(export) => {
                let document_id = stored.meta.document_id.clone();
                let export = export.clone();
                drop(stored);
                let outcome = self.client.restore_full(scope, &document_id, &export).await?;
                sheet_metrics::snapshot::log_restored("full");
                Ok(outcome)
            },
        }
    }

    pub fn get(&self, snapshot_id: &SnapshotId) -> Option<Snapshot> {
        self.snapshots.get(snapshot_id).map(|s| s.meta.clone())
    }

    /// Marks `tx_id` as holding `snapshot_id`, keeping it alive across the
    /// transaction's lifetime regardless of TTL.
    pub fn hold(&self, snapshot_id: &SnapshotId, tx_id: &str) {
        if let Some(mut stored) = self.snapshots.get_mut(snapshot_id) {
            stored.holders.insert(tx_id.to_string());
        }
    }

    /// Releases `tx_id`'s hold; if no transaction holds the snapshot
    /// afterward it is collected immediately rather than waiting for TTL.
    pub fn release(&self, snapshot_id: &SnapshotId, tx_id: &str) {
        let now_orphaned = self
            .snapshots
            .get_mut(snapshot_id)
            .map(|mut stored| {
                stored.holders.remove(tx_id);
                stored.holders.is_empty()
            })
            .unwrap_or(false);
        if now_orphaned {
            self.snapshots.remove(snapshot_id);
            sheet_metrics::snapshot::log_gc("released");
        }
    }

    /// Sweeps holder-free snapshots whose TTL has elapsed. Intended to run
    /// on a periodic timer from the binary crate; safe to call any time.
    pub fn gc_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0usize;
        self.snapshots.retain(|_, stored| {
            let expired = now.duration_since(stored.meta.created_at) >= self.config.ttl;
            let keep = !(stored.holders.is_empty() && expired);
            if !keep {
                removed += 1;
            }
            keep
        });
        for _ in 0..removed {
            sheet_metrics::snapshot::log_gc("ttl");
        }
        removed
    }
}

/// Rough size estimate for a metadata snapshot; used only to decide whether
/// it's worth reporting alongside full-snapshot sizes, not to enforce a
/// limit (only `full` snapshots are size-bounded, per spec.md §4.6).
fn estimate_metadata_size(metadata: &DocumentMetadata) -> u64 {
    let mut size = metadata.sheet_names.iter().map(|s| s.len() as u64).sum::<u64>();
    size += metadata
        .formulas
        .iter()
        .map(|f| f.formula.len() as u64 + f.sheet_name.len() as u64 + 16)
        .sum::<u64>();
    size += (metadata.chart_ids.len() + metadata.pivot_ids.len()) as u64 * 8;
    size += metadata.named_ranges.iter().map(|(name, _)| name.len() as u64 + 32).sum::<u64>();
    size += metadata.protected_ranges.len() as u64 * 32;
    size
}
