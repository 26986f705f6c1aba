//! Per-agent scope resolution

use std::collections::BTreeMap;

/// Configured scopes per agent key, with a derived default
#[derive(Debug, Clone, Default)]
pub struct ScopePolicy {
    configured: BTreeMap<String, Vec<String>>,
}

impl ScopePolicy {
    pub fn new(configured: BTreeMap<String, Vec<String>>) -> Self {
        Self { configured }
    }

    /// Configured list, or `{prefix}:read` and `{prefix}:write`
    pub fn scopes_for(&self, agent_key: &str) -> Vec<String> {
        match self.configured.get(agent_key) {
            Some(scopes) if !scopes.is_empty() => scopes.clone(),
            _ => default_scopes(agent_key),
        }
    }
}

/// "hr_agent" -> ["hr:read", "hr:write"]
pub fn default_scopes(agent_key: &str) -> Vec<String> {
    let prefix = agent_key.strip_suffix("_agent").unwrap_or(agent_key);
    vec![format!("{}:read", prefix), format!("{}:write", prefix)]
}
