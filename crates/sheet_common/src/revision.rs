//! Revision tokens: opaque version identifiers used to detect concurrent
//! modification. Named but left untyped in the spec's `read_committed`
//! isolation description; this gives it a concrete shape.

use serde::{
    Deserialize,
    Serialize,
};
use sheet_errors::ErrorMetadata;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RevisionToken(pub String);

impl RevisionToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

impl Default for RevisionToken {
    fn default() -> Self {
        Self::new("0")
    }
}

/// `read_committed`/`serializable` transactions re-validate every revision
/// token they observed against the current one before committing.
pub fn check_conflict(observed: &RevisionToken, current: &RevisionToken) -> anyhow::Result<()> {
    if observed != current {
        anyhow::bail!(ErrorMetadata::conflict(format!(
            "revision changed: observed {:?}, current {:?}",
            observed.0, current.0
        )));
    }
    Ok(())
}
