pub mod capability;
pub mod config;
pub mod context;
pub mod document;
pub mod mutation;
pub mod range;
pub mod revision;

pub use capability::Capability;
pub use context::{
    RequestId,
    Scope,
};
pub use document::{
    CellRef,
    DocumentHandle,
    SheetId,
};
pub use mutation::{
    AppendMode,
    Axis,
    BatchRequest,
    BatchRequestFlags,
    Mutation,
    ValueInputMode,
};
pub use range::A1Range;
pub use revision::RevisionToken;
