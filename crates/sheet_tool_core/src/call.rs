//! The tagged union of tool invocations the pipeline accepts, and the wire
//! response shape it replies with (spec.md §6): `{success: true, ...}` on
//! success, `{success: false, error: {...}}` on failure.

use batch_compiler::MutationRequest;
use serde::Serialize;
use sheet_common::{
    A1Range,
    DocumentHandle,
};
use sheet_errors::{
    ErrorMetadataAnyhowExt,
    ToolError,
};
use transaction::{
    IsolationLevel,
    TransactionId,
};

#[derive(Debug, Clone)]
pub enum ToolCall {
    ReadValues {
        document_id: DocumentHandle,
        range: A1Range,
    },
    Mutate {
        document_id: DocumentHandle,
        mutations: Vec<MutationRequest>,
        transaction_id: Option<TransactionId>,
    },
    BeginTransaction {
        document_id: DocumentHandle,
        isolation: IsolationLevel,
    },
    CommitTransaction {
        transaction_id: TransactionId,
    },
    RollbackTransaction {
        transaction_id: TransactionId,
    },
}

impl ToolCall {
    /// The `tool` field an [`audit::AuditRecord`] and RBAC check are
    /// evaluated against.
    pub fn tool(&self) -> &'static str {
        "sheets"
    }

    pub fn action(&self) -> &'static str {
        match self {
            ToolCall::ReadValues { .. } => "read",
            ToolCall::Mutate { mutations, .. } => {
                if mutations.iter().any(|r| r.mutation.is_structural()) {
                    "structural"
                } else {
                    "write"
                }
            },
            ToolCall::BeginTransaction { .. } | ToolCall::CommitTransaction { .. } | ToolCall::RollbackTransaction { .. } => "write",
        }
    }

    /// The RBAC/audit `resource` category this call falls under. Not a
    /// specific identifier -- just coarse enough for a policy rule to match
    /// against.
    pub fn resource(&self) -> &'static str {
        match self {
            ToolCall::ReadValues { .. } | ToolCall::Mutate { .. } => "range",
            ToolCall::BeginTransaction { .. } | ToolCall::CommitTransaction { .. } | ToolCall::RollbackTransaction { .. } => "transaction",
        }
    }

    pub fn document_id(&self) -> Option<&DocumentHandle> {
        match self {
            ToolCall::ReadValues { document_id, .. } => Some(document_id),
            ToolCall::Mutate { document_id, .. } => Some(document_id),
            ToolCall::BeginTransaction { document_id, .. } => Some(document_id),
            ToolCall::CommitTransaction { .. } | ToolCall::RollbackTransaction { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predictions: Option<serde_json::Value>,
}

impl ToolResponse {
    pub fn success(payload: serde_json::Value) -> Self {
        Self { success: true, payload: Some(payload), error: None, predictions: None }
    }

    pub fn with_predictions(mut self, predictions: serde_json::Value) -> Self {
        self.predictions = Some(predictions);
        self
    }

    pub fn from_error(err: &anyhow::Error) -> Self {
        Self { success: false, payload: None, error: Some(err.to_tool_error()), predictions: None }
    }
}
