pub mod dedup;
pub mod merger;

pub use dedup::{
    DedupKey,
    Deduplicator,
};
pub use merger::{
    merge_ranges,
    slice_values,
    MergedGroup,
    RequestMerger,
};
