//! The audit record shape spec.md §4.12 enumerates: who did what to what,
//! with what outcome, under which scopes, and how much it touched.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EffectCounts {
    pub cells: u64,
    pub rows: u64,
    pub columns: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub actor: String,
    pub tool: String,
    pub action: String,
    pub resource: String,
    pub outcome: AuditOutcome,
    pub duration_ms: u64,
    pub request_id: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub scopes: Vec<String>,
    pub effect: EffectCounts,
    /// Arbitrary extra context (e.g. mutation parameters); redacted before
    /// it reaches any sink.
    pub details: Option<serde_json::Value>,
}

impl AuditRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        actor: impl Into<String>,
        tool: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
        outcome: AuditOutcome,
        duration_ms: u64,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            actor: actor.into(),
            tool: tool.into(),
            action: action.into(),
            resource: resource.into(),
            outcome,
            duration_ms,
            request_id: request_id.into(),
            ip: None,
            user_agent: None,
            scopes: Vec::new(),
            effect: EffectCounts::default(),
            details: None,
        }
    }

    pub fn with_scopes(mut self, scopes: impl IntoIterator<Item = String>) -> Self {
        self.scopes = scopes.into_iter().collect();
        self
    }

    pub fn with_effect(mut self, effect: EffectCounts) -> Self {
        self.effect = effect;
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}
