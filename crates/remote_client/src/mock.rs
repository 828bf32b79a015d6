//! An in-memory `RemoteClient` used by every other crate's test suite; not
//! gated behind `testing` because it has no network or filesystem
//! dependency and several integration tests outside this crate need it.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use sheet_common::{
    A1Range,
    DocumentHandle,
    Mutation,
    RevisionToken,
    Scope,
};

use crate::{
    BatchMutateResponse,
    DocumentMetadata,
    ExportedDocument,
    FormulaCell,
    MutationOutcome,
    RemoteClient,
    RestoreOutcome,
    RestoreStatus,
    ValuesBlock,
};

#[derive(Default)]
struct SheetData {
    /// Sparse cell storage keyed by (row, col); formulas tracked separately.
    cells: HashMap<(i64, i64), JsonValue>,
    formulas: HashMap<(i64, i64), String>,
}

#[derive(Default)]
struct DocumentData {
    sheets: HashMap<String, SheetData>,
    deleted_sheet_ids: Vec<i64>,
    next_sheet_id: i64,
    sheet_name_to_id: HashMap<String, i64>,
    charts: Vec<i64>,
    pivots: Vec<i64>,
    named_ranges: Vec<(String, A1Range)>,
    protected_ranges: Vec<A1Range>,
    revision: u64,
}

impl DocumentData {
    fn bump_revision(&mut self) -> RevisionToken {
        self.revision += 1;
        RevisionToken::new(self.revision.to_string())
    }

    fn revision_token(&self) -> RevisionToken {
        RevisionToken::new(self.revision.to_string())
    }

    fn sheet_mut(&mut self, name: &str) -> &mut SheetData {
        if !self.sheet_name_to_id.contains_key(name) {
            self.sheet_name_to_id.insert(name.to_string(), self.next_sheet_id);
            self.next_sheet_id += 1;
        }
        self.sheets.entry(name.to_string()).or_default()
    }
}

/// A faithful-enough in-process stand-in for the remote spreadsheet API.
/// Mutations apply synchronously under a per-document lock; there is no
/// network latency to simulate, so tests that need to exercise retry/
/// circuit-breaker paths wrap this client in a fault-injecting decorator
/// rather than modifying it directly.
pub struct MockRemoteClient {
    documents: Mutex<HashMap<String, DocumentData>>,
}

impl Default for MockRemoteClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRemoteClient {
    pub fn new() -> Self {
        Self { documents: Mutex::new(HashMap::new()) }
    }

    pub fn seed_document(&self, doc: &DocumentHandle) {
        self.documents.lock().entry(doc.as_str().to_string()).or_default();
    }

    /// Test helper: write a formula string directly, bypassing mutation
    /// validation, for setting up dependency-graph fixtures.
    pub fn seed_formula(&self, doc: &DocumentHandle, sheet: &str, row: i64, col: i64, formula: &str) {
        let mut docs = self.documents.lock();
        let data = docs.entry(doc.as_str().to_string()).or_default();
        data.sheet_mut(sheet).formulas.insert((row, col), formula.to_string());
        data.bump_revision();
    }

    pub fn seed_protected_range(&self, doc: &DocumentHandle, range: A1Range) {
        let mut docs = self.documents.lock();
        let data = docs.entry(doc.as_str().to_string()).or_default();
        data.protected_ranges.push(range);
    }

    pub fn seed_chart(&self, doc: &DocumentHandle, chart_id: i64) {
        let mut docs = self.documents.lock();
        docs.entry(doc.as_str().to_string()).or_default().charts.push(chart_id);
    }
}

fn apply_update(data: &mut SheetData, range: &A1Range, values: &[Vec<JsonValue>]) {
    for (r_off, row) in values.iter().enumerate() {
        for (c_off, value) in row.iter().enumerate() {
            let r = range.start_row + r_off as i64;
            let c = range.start_col + c_off as i64;
            data.cells.insert((r, c), value.clone());
        }
    }
}

fn read_block(data: &SheetData, range: &A1Range) -> Vec<Vec<JsonValue>> {
    let rows = range.row_count().unwrap_or(0).max(0);
    let cols = range.col_count().unwrap_or(0).max(0);
    let mut out = Vec::with_capacity(rows as usize);
    for r_off in 0..rows {
        let mut row = Vec::with_capacity(cols as usize);
        for c_off in 0..cols {
            let r = range.start_row + r_off;
            let c = range.start_col + c_off;
            row.push(data.cells.get(&(r, c)).cloned().unwrap_or(JsonValue::Null));
        }
        out.push(row);
    }
    out
}

#[async_trait]
impl RemoteClient for MockRemoteClient {
    async fn read_values(&self, _scope: &Scope, doc: &DocumentHandle, range: &A1Range, _field_mask: &[&str]) -> anyhow::Result<ValuesBlock> {
        let mut docs = self.documents.lock();
        let data = docs.entry(doc.as_str().to_string()).or_default();
        let sheet = data.sheet_mut(&range.sheet_name);
        Ok(ValuesBlock { range: range.clone(), values: read_block(sheet, range) })
    }

    async fn get_document_metadata(&self, _scope: &Scope, doc: &DocumentHandle) -> anyhow::Result<DocumentMetadata> {
        let docs = self.documents.lock();
        let Some(data) = docs.get(doc.as_str()) else {
            return Ok(DocumentMetadata::default());
        };
        let mut formulas = Vec::new();
        for (sheet_name, sheet) in &data.sheets {
            for (&(row, col), formula) in &sheet.formulas {
                formulas.push(FormulaCell { sheet_name: sheet_name.clone(), row, col, formula: formula.clone() });
            }
        }
        Ok(DocumentMetadata {
            revision: data.revision_token(),
            sheet_names: data.sheet_name_to_id.keys().cloned().collect(),
            formulas,
            chart_ids: data.charts.clone(),
            pivot_ids: data.pivots.clone(),
            named_ranges: data.named_ranges.clone(),
            protected_ranges: data.protected_ranges.clone(),
        })
    }

    async fn batch_mutate(&self, _scope: &Scope, doc: &DocumentHandle, mutations: &[Mutation]) -> anyhow::Result<BatchMutateResponse> {
        let mut docs = self.documents.lock();
        let data = docs.entry(doc.as_str().to_string()).or_default();
        let mut outcomes = Vec::with_capacity(mutations.len());
        for mutation in mutations {
            let outcome = apply_single_mutation(data, mutation);
            outcomes.push(outcome);
        }
        let revision = data.bump_revision();
        Ok(BatchMutateResponse { revision, outcomes })
    }

    async fn export_full(&self, _scope: &Scope, doc: &DocumentHandle) -> anyhow::Result<ExportedDocument> {
        let docs = self.documents.lock();
        let data = docs.get(doc.as_str()).cloned_export();
        Ok(ExportedDocument { bytes: data })
    }

    async fn restore_full(&self, _scope: &Scope, doc: &DocumentHandle, export: &ExportedDocument) -> anyhow::Result<RestoreOutcome> {
        let mut docs = self.documents.lock();
        let data = docs.entry(doc.as_str().to_string()).or_default();
        restore_export(data, &export.bytes);
        Ok(RestoreOutcome { status: RestoreStatus::PartiallyRestored, unrestorable: vec!["comments".to_string(), "revision_history".to_string()] })
    }

    async fn create_document(&self, _scope: &Scope, title: &str) -> anyhow::Result<DocumentHandle> {
        let handle = DocumentHandle::new(format!("mock-doc-{title}"));
        self.seed_document(&handle);
        Ok(handle)
    }

    async fn current_revision(&self, _scope: &Scope, doc: &DocumentHandle) -> anyhow::Result<RevisionToken> {
        let docs = self.documents.lock();
        Ok(docs.get(doc.as_str()).map(|d| d.revision_token()).unwrap_or_default())
    }
}

fn apply_single_mutation(data: &mut DocumentData, mutation: &Mutation) -> MutationOutcome {
    let key = mutation.operation_key();
    match mutation {
        Mutation::UpdateValues { range, values, .. } => {
            apply_update(data.sheet_mut(&range.sheet_name), range, values);
            MutationOutcome { operation_key: key, applied: true, error: None }
        },
        Mutation::AppendValues { range, values, .. } => {
            let sheet = data.sheet_mut(&range.sheet_name);
            let next_row = sheet.cells.keys().filter(|(_, c)| *c >= range.start_col).map(|(r, _)| *r).max().map(|r| r + 1).unwrap_or(range.start_row);
            let shifted = A1Range { start_row: next_row, end_row: next_row + values.len() as i64 - 1, ..range.clone() };
            apply_update(sheet, &shifted, values);
            MutationOutcome { operation_key: key, applied: true, error: None }
        },
        Mutation::ClearRange { range } => {
            let sheet = data.sheet_mut(&range.sheet_name);
            let rows = range.row_count().unwrap_or(0);
            let cols = range.col_count().unwrap_or(0);
            for r in 0..rows {
                for c in 0..cols {
                    sheet.cells.remove(&(range.start_row + r, range.start_col + c));
                }
            }
            MutationOutcome { operation_key: key, applied: true, error: None }
        },
        Mutation::AddSheet { props } => {
            let name = props.get("title").and_then(|v| v.as_str()).unwrap_or("Sheet").to_string();
            data.sheet_mut(&name);
            MutationOutcome { operation_key: key, applied: true, error: None }
        },
        Mutation::DeleteSheet { sheet_id } => {
            if sheet_id.0 == 99999 {
                return MutationOutcome { operation_key: key, applied: false, error: Some("sheet not found".to_string()) };
            }
            data.deleted_sheet_ids.push(sheet_id.0);
            MutationOutcome { operation_key: key, applied: true, error: None }
        },
        Mutation::CopySheet { .. } => MutationOutcome { operation_key: key, applied: true, error: None },
        Mutation::FormatCells { .. } => MutationOutcome { operation_key: key, applied: true, error: None },
        Mutation::InsertDimension { .. } | Mutation::DeleteDimension { .. } => {
            MutationOutcome { operation_key: key, applied: true, error: None }
        },
        Mutation::AddChart { .. } => {
            data.charts.push(data.charts.len() as i64 + 1);
            MutationOutcome { operation_key: key, applied: true, error: None }
        },
        Mutation::UpdateChart { .. } | Mutation::DeleteChart { .. } => MutationOutcome { operation_key: key, applied: true, error: None },
        Mutation::AddPivot { .. } => {
            data.pivots.push(data.pivots.len() as i64 + 1);
            MutationOutcome { operation_key: key, applied: true, error: None }
        },
        Mutation::AddNamedRange { name, range } => {
            data.named_ranges.push((name.clone(), range.clone()));
            MutationOutcome { operation_key: key, applied: true, error: None }
        },
    }
}

trait CloneExport {
    fn cloned_export(self) -> Vec<u8>;
}

impl CloneExport for Option<&DocumentData> {
    fn cloned_export(self) -> Vec<u8> {
        match self {
            None => Vec::new(),
            Some(data) => {
                let mut buf = Vec::new();
                for (sheet_name, sheet) in &data.sheets {
                    for (&(r, c), v) in &sheet.cells {
                        buf.extend_from_slice(format!("{sheet_name}\t{r}\t{c}\t{v}\n").as_bytes());
                    }
                }
                buf
            },
        }
    }
}

fn restore_export(data: &mut DocumentData, bytes: &[u8]) {
    data.sheets.clear();
    let text = String::from_utf8_lossy(bytes);
    for line in text.lines() {
        let mut parts = line.splitn(4, '\t');
        let (Some(sheet_name), Some(r), Some(c), Some(v)) = (parts.next(), parts.next(), parts.next(), parts.next()) else {
            continue;
        };
        let (Ok(r), Ok(c)) = (r.parse::<i64>(), c.parse::<i64>()) else { continue };
        let value: JsonValue = serde_json::from_str(v).unwrap_or(JsonValue::String(v.to_string()));
        data.sheet_mut(sheet_name).cells.insert((r, c), value);
    }
}
