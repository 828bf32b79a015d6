//! The tool-call facade (spec.md §A.2, §6): a `ToolCall` tagged union and a
//! `ToolCore` that carries every call through validate, RBAC, dedupe,
//! optional impact analysis, optional transaction enlist, batch compile,
//! rate-limit, circuit-breaker, retry, the remote API, and an audit record,
//! replying with the wire response shape spec.md §6 defines.

pub mod call;
pub mod pipeline;

pub use call::{
    ToolCall,
    ToolResponse,
};
pub use pipeline::ToolCore;
