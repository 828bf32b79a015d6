//! Compiles an ordered list of mutations into the minimum number of remote
//! batch calls and dispatches them (spec.md §4.7).

pub mod compile;
pub mod dispatch;

pub use compile::{
    compile,
    CompiledCall,
    MutationRequest,
};
pub use dispatch::{
    BatchDispatcher,
    DispatchOutcome,
    NoopProgressSink,
    Phase,
    ProgressSink,
    ProgressUpdate,
};
