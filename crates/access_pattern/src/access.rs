//! The unit of observation fed into the tracker: either a document being
//! opened fresh, or a range being read/written.

use std::time::Instant;

use sheet_common::A1Range;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessKind {
    DocumentOpen { sheet_name: String },
    Range(A1Range),
}

#[derive(Debug, Clone)]
pub struct AccessEvent {
    pub kind: AccessKind,
    pub at: Instant,
}
