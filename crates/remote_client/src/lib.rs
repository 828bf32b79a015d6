//! The trait abstraction over the remote spreadsheet API (spec.md §6): a
//! REST-like service with values read/write/append/clear/batch, document
//! get/create/copy, sheet add/delete/copy, and a generic batch-mutation
//! endpoint. The core never talks to the wire directly; everything routes
//! through `RemoteClient` so the rest of the pipeline can be tested against
//! `MockRemoteClient` without a network.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sheet_common::{
    A1Range,
    DocumentHandle,
    Mutation,
    RevisionToken,
    Scope,
};

pub mod mock;

pub use mock::MockRemoteClient;

#[derive(Debug, Clone)]
pub struct ValuesBlock {
    pub range: A1Range,
    pub values: Vec<Vec<JsonValue>>,
}

#[derive(Debug, Clone, Default)]
pub struct FormulaCell {
    pub sheet_name: String,
    pub row: i64,
    pub col: i64,
    pub formula: String,
}

#[derive(Debug, Clone, Default)]
pub struct DocumentMetadata {
    pub revision: RevisionToken,
    pub sheet_names: Vec<String>,
    pub formulas: Vec<FormulaCell>,
    pub chart_ids: Vec<i64>,
    pub pivot_ids: Vec<i64>,
    pub named_ranges: Vec<(String, A1Range)>,
    pub protected_ranges: Vec<A1Range>,
}

#[derive(Debug, Clone)]
pub struct MutationOutcome {
    pub operation_key: String,
    pub applied: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BatchMutateResponse {
    pub revision: RevisionToken,
    pub outcomes: Vec<MutationOutcome>,
}

#[derive(Debug, Clone)]
pub struct RestoreOutcome {
    pub status: RestoreStatus,
    /// Remote-side state that best-effort restore cannot bring back (e.g.
    /// comments, revision history) -- reported, never silently dropped.
    pub unrestorable: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreStatus {
    Restored,
    PartiallyRestored,
}

/// A document snapshot payload, opaque to everything but the remote client
/// and the snapshot storage backend.
#[derive(Debug, Clone)]
pub struct ExportedDocument {
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn read_values(&self, scope: &Scope, doc: &DocumentHandle, range: &A1Range, field_mask: &[&str]) -> anyhow::Result<ValuesBlock>;

    async fn get_document_metadata(&self, scope: &Scope, doc: &DocumentHandle) -> anyhow::Result<DocumentMetadata>;

    async fn batch_mutate(&self, scope: &Scope, doc: &DocumentHandle, mutations: &[Mutation]) -> anyhow::Result<BatchMutateResponse>;

    async fn export_full(&self, scope: &Scope, doc: &DocumentHandle) -> anyhow::Result<ExportedDocument>;

    async fn restore_full(&self, scope: &Scope, doc: &DocumentHandle, export: &ExportedDocument) -> anyhow::Result<RestoreOutcome>;

    async fn create_document(&self, scope: &Scope, title: &str) -> anyhow::Result<DocumentHandle>;

    async fn current_revision(&self, scope: &Scope, doc: &DocumentHandle) -> anyhow::Result<RevisionToken>;
}

pub type SharedRemoteClient = std::sync::Arc<dyn RemoteClient>;

pub type FieldIndex = HashMap<&'static str, usize>;
