//! Tracks per-document access history and predicts likely next accesses to
//! feed the request merger (spec.md §4.11). Predictions are advisory only:
//! they never block a real request and any internal failure is swallowed
//! rather than surfaced.

pub mod access;
pub mod pattern;
pub mod predict;
pub mod tracker;

pub use access::AccessKind;
pub use pattern::Pattern;
pub use predict::Prediction;
pub use tracker::AccessPatternTracker;
