//! The `Mutation` tagged union and `BatchRequest` from spec.md §3.

use serde::{
    Deserialize,
    Serialize,
};
use serde_json::Value as JsonValue;

use crate::{
    document::SheetId,
    range::A1Range,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueInputMode {
    Raw,
    UserEntered,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppendMode {
    Overwrite,
    Insert,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Mutation {
    UpdateValues {
        range: A1Range,
        values: Vec<Vec<JsonValue>>,
        value_input_mode: ValueInputMode,
    },
    AppendValues {
        range: A1Range,
        values: Vec<Vec<JsonValue>>,
        mode: AppendMode,
    },
    ClearRange {
        range: A1Range,
    },
    AddSheet {
        props: JsonValue,
    },
    DeleteSheet {
        sheet_id: SheetId,
    },
    CopySheet {
        sheet_id: SheetId,
        destination_document_id: String,
    },
    FormatCells {
        range: A1Range,
        format_spec: JsonValue,
        field_mask: Vec<String>,
    },
    InsertDimension {
        sheet_id: SheetId,
        axis: Axis,
        start: i64,
        end: i64,
    },
    DeleteDimension {
        sheet_id: SheetId,
        axis: Axis,
        start: i64,
        end: i64,
    },
    AddChart {
        spec: JsonValue,
    },
    UpdateChart {
        chart_id: i64,
        spec: JsonValue,
        field_mask: Vec<String>,
    },
    DeleteChart {
        chart_id: i64,
    },
    AddPivot {
        spec: JsonValue,
    },
    AddNamedRange {
        name: String,
        range: A1Range,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Axis {
    Rows,
    Columns,
}

impl Mutation {
    /// The remote endpoint "family" this mutation dispatches through; the
    /// batch compiler groups consecutive mutations in the same family into
    /// one call (spec.md §4.7 rule 1).
    pub fn endpoint_family(&self) -> &'static str {
        match self {
            Mutation::UpdateValues { .. } | Mutation::AppendValues { .. } | Mutation::ClearRange { .. } => "values",
            Mutation::AddSheet { .. } | Mutation::DeleteSheet { .. } => "sheets",
            Mutation::CopySheet { .. } => "copy_sheet",
            Mutation::FormatCells { .. } => "batch_update",
            Mutation::InsertDimension { .. } | Mutation::DeleteDimension { .. } => "batch_update",
            Mutation::AddChart { .. } | Mutation::UpdateChart { .. } | Mutation::DeleteChart { .. } => "batch_update",
            Mutation::AddPivot { .. } => "batch_update",
            Mutation::AddNamedRange { .. } => "batch_update",
        }
    }

    /// `copy_sheet` cannot be folded into a batch call with anything else.
    pub fn is_singleton(&self) -> bool {
        matches!(self, Mutation::CopySheet { .. })
    }

    /// True for mutations whose blast radius warrants a defensive snapshot
    /// before executing (used by the transaction manager's lazy
    /// auto-snapshot scheduling and by the impact analyzer).
    pub fn is_risky(&self) -> bool {
        matches!(
            self,
            Mutation::ClearRange { .. }
                | Mutation::DeleteSheet { .. }
                | Mutation::DeleteDimension { .. }
                | Mutation::DeleteChart { .. }
        )
    }

    /// True when this mutation creates structure (a sheet, typically) that
    /// a later mutation in the same batch might depend on; used by rule 3
    /// of the compiler to keep dependent mutations in one batch call.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Mutation::AddSheet { .. } | Mutation::InsertDimension { .. } | Mutation::DeleteDimension { .. }
        )
    }

    pub fn target_range(&self) -> Option<&A1Range> {
        match self {
            Mutation::UpdateValues { range, .. }
            | Mutation::AppendValues { range, .. }
            | Mutation::ClearRange { range }
            | Mutation::FormatCells { range, .. }
            | Mutation::AddNamedRange { range, .. } => Some(range),
            _ => None,
        }
    }

    /// Normalized key for dedup: same shape as the request deduplicator's
    /// key construction (canonical, not `serde_json`-derived).
    pub fn operation_key(&self) -> String {
        match self {
            Mutation::UpdateValues { range, value_input_mode, .. } => {
                format!("update_values:{}:{:?}", range, value_input_mode)
            },
            Mutation::AppendValues { range, mode, .. } => format!("append_values:{}:{:?}", range, mode),
            Mutation::ClearRange { range } => format!("clear_range:{}", range),
            Mutation::AddSheet { .. } => "add_sheet".to_string(),
            Mutation::DeleteSheet { sheet_id } => format!("delete_sheet:{}", sheet_id.0),
            Mutation::CopySheet { sheet_id, destination_document_id } => {
                format!("copy_sheet:{}:{}", sheet_id.0, destination_document_id)
            },
            Mutation::FormatCells { range, .. } => format!("format_cells:{}", range),
            Mutation::InsertDimension { sheet_id, axis, start, end } => {
                format!("insert_dim:{}:{:?}:{}:{}", sheet_id.0, axis, start, end)
            },
            Mutation::DeleteDimension { sheet_id, axis, start, end } => {
                format!("delete_dim:{}:{:?}:{}:{}", sheet_id.0, axis, start, end)
            },
            Mutation::AddChart { .. } => "add_chart".to_string(),
            Mutation::UpdateChart { chart_id, .. } => format!("update_chart:{chart_id}"),
            Mutation::DeleteChart { chart_id } => format!("delete_chart:{chart_id}"),
            Mutation::AddPivot { .. } => "add_pivot".to_string(),
            Mutation::AddNamedRange { name, .. } => format!("add_named_range:{name}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchRequestFlags {
    pub atomic_partition: bool,
    pub requires_snapshot: bool,
    pub transaction_id: Option<String>,
    pub idempotency_key: String,
}

#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub document_id: crate::document::DocumentHandle,
    pub mutations: Vec<Mutation>,
    pub flags: BatchRequestFlags,
}

impl BatchRequest {
    pub fn new(document_id: crate::document::DocumentHandle, mutations: Vec<Mutation>, flags: BatchRequestFlags) -> Self {
        Self { document_id, mutations, flags }
    }
}
