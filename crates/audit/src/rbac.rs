//! RBAC check run before dispatch (spec.md §4.12): built-in roles,
//! allow/deny/inherit triples at tool/action/resource granularity, deny
//! overriding allow, default-deny, and role inheritance resolved by a
//! topological walk that detects cycles rather than looping forever.

use std::collections::HashMap;

use sheet_errors::ErrorMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Allow,
    Deny,
    /// No opinion at this role; defer to whatever an ancestor role (or the
    /// default-deny) decides.
    Inherit,
}

#[derive(Debug, Clone)]
pub struct PolicyRule {
    pub tool: String,
    pub action: String,
    pub resource: String,
    pub effect: Effect,
}

impl PolicyRule {
    pub fn new(tool: impl Into<String>, action: impl Into<String>, resource: impl Into<String>, effect: Effect) -> Self {
        Self { tool: tool.into(), action: action.into(), resource: resource.into(), effect }
    }

    fn matches(&self, tool: &str, action: &str, resource: &str) -> bool {
        field_matches(&self.tool, tool) && field_matches(&self.action, action) && field_matches(&self.resource, resource)
    }
}

fn field_matches(pattern: &str, value: &str) -> bool {
    pattern == "*" || pattern == value
}

#[derive(Debug, Clone, Default)]
pub struct RoleDefinition {
    pub inherits: Vec<String>,
    pub rules: Vec<PolicyRule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Gray,
    Black,
}

pub struct RbacEngine {
    roles: HashMap<String, RoleDefinition>,
}

impl Default for RbacEngine {
    fn default() -> Self {
        Self::with_builtin_roles()
    }
}

impl RbacEngine {
    pub fn new() -> Self {
        Self { roles: HashMap::new() }
    }

    /// The five built-in roles spec.md §4.12 names, in a small inheritance
    /// lattice: `collaborator`/`analyst` build on `viewer`, `editor` builds
    /// on `collaborator`, and `admin` builds on both `editor` and
    /// `analyst`.
    pub fn with_builtin_roles() -> Self {
        let mut engine = Self::new();
        engine.register(
            "viewer",
            RoleDefinition { inherits: vec![], rules: vec![PolicyRule::new("*", "read", "*", Effect::Allow)] },
        );
        engine.register(
            "collaborator",
            RoleDefinition {
                inherits: vec!["viewer".to_string()],
                rules: vec![PolicyRule::new("*", "write", "*", Effect::Allow)],
            },
        );
        engine.register(
            "analyst",
            RoleDefinition {
                inherits: vec!["viewer".to_string()],
                rules: vec![PolicyRule::new("*", "export", "*", Effect::Allow)],
            },
        );
        engine.register(
            "editor",
            RoleDefinition {
                inherits: vec!["collaborator".to_string()],
                rules: vec![
                    PolicyRule::new("*", "delete", "*", Effect::Allow),
                    PolicyRule::new("*", "structural", "*", Effect::Allow),
                ],
            },
        );
        engine.register(
            "admin",
            RoleDefinition {
                inherits: vec!["editor".to_string(), "analyst".to_string()],
                rules: vec![PolicyRule::new("*", "*", "*", Effect::Allow)],
            },
        );
        engine
    }

    pub fn register(&mut self, role: impl Into<String>, definition: RoleDefinition) {
        self.roles.insert(role.into(), definition);
    }

    /// Flattens a role and its ancestors into one rule list, most-specific
    /// (the role itself) first.
    fn resolve<'a>(&'a self, role: &'a str) -> anyhow::Result<Vec<&'a PolicyRule>> {
        let mut state: HashMap<&'a str, Color> = HashMap::new();
        let mut out = Vec::new();
        self.visit(role, &mut state, &mut out)?;
        Ok(out)
    }

    fn visit<'a>(&'a self, role: &'a str, state: &mut HashMap<&'a str, Color>, out: &mut Vec<&'a PolicyRule>) -> anyhow::Result<()> {
        match state.get(role) {
            Some(Color::Black) => return Ok(()),
            Some(Color::Gray) => {
                anyhow::bail!(ErrorMetadata::invalid_params(format!("role inheritance cycle detected at {role}")));
            },
            None => {},
        }
        state.insert(role, Color::Gray);
        if let Some(definition) = self.roles.get(role) {
            out.extend(definition.rules.iter());
            for parent in &definition.inherits {
                self.visit(parent, state, out)?;
            }
        }
        state.insert(role, Color::Black);
        Ok(())
    }

    /// Evaluates every role a subject holds against one `(tool, action,
    /// resource)` triple. Any matching `Deny` anywhere in the resolved
    /// rules wins; otherwise at least one matching `Allow` is required
    /// (default-deny).
    pub fn check(&self, roles: &[String], tool: &str, action: &str, resource: &str) -> anyhow::Result<bool> {
        let mut allowed = false;
        for role in roles {
            for rule in self.resolve(role)? {
                if !rule.matches(tool, action, resource) {
                    continue;
                }
                match rule.effect {
                    Effect::Deny => {
                        sheet_metrics::audit::log_rbac_denied(role);
                        return Ok(false);
                    },
                    Effect::Allow => allowed = true,
                    Effect::Inherit => {},
                }
            }
        }
        if !allowed {
            sheet_metrics::audit::log_rbac_denied(roles.first().map(String::as_str).unwrap_or("none"));
        }
        Ok(allowed)
    }
}
