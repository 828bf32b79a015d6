//! The capability the core consumes from the (out-of-scope) auth
//! subsystem: scopes and a subject, never a credential the core could mint
//! or refresh itself.

use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    pub scopes: HashSet<String>,
    pub subject: String,
}

impl Capability {
    pub fn new(subject: impl Into<String>, scopes: impl IntoIterator<Item = String>) -> Self {
        Self {
            subject: subject.into(),
            scopes: scopes.into_iter().collect(),
        }
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }

    #[cfg(any(test, feature = "testing"))]
    pub fn for_test(subject: &str) -> Self {
        Self::new(subject, ["sheets.read", "sheets.write", "sheets.admin"].map(String::from))
    }
}
