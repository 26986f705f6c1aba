//! Broker configuration
//!
//! Loaded from YAML. `${VAR}` placeholders are replaced with environment
//! values before parsing so secrets can stay in `.env`.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::identity::{ClientCredentials, IdentityEndpoints};
use crate::models::AgentDescriptor;

/// Top-level configuration file
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    pub identity: IdentityConfig,
    pub orchestrator: OrchestratorConfig,
    /// Client used for token exchange and worker actor tokens.
    /// Falls back to the orchestrator client when absent.
    #[serde(default)]
    pub token_exchanger: Option<ClientCredentials>,
    #[serde(default)]
    pub agents: BTreeMap<String, AgentConfig>,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub planner: Option<PlannerConfig>,
    #[serde(default)]
    pub discovery: DiscoveryMode,
}

/// How agents are discovered at the start of each run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMode {
    /// Fetch each configured agent's card
    #[default]
    Cards,
    /// Use the configured names and URLs as-is
    Static,
}

fn default_callback_url() -> String {
    "http://localhost:8000/callback".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    /// Base URL used to derive any endpoint not given explicitly
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub authorize_url: Option<String>,
    #[serde(default)]
    pub authn_url: Option<String>,
    #[serde(default)]
    pub token_url: Option<String>,
    #[serde(default = "default_callback_url")]
    pub callback_url: String,
}

impl IdentityConfig {
    pub fn endpoints(&self) -> Result<IdentityEndpoints> {
        let derived = self
            .base_url
            .as_deref()
            .filter(|b| !b.is_empty())
            .map(|base| IdentityEndpoints::from_base(base, self.callback_url.clone()));

        let pick = |explicit: &Option<String>, from_base: Option<&String>, name: &str| {
            explicit
                .clone()
                .filter(|u| !u.is_empty())
                .or_else(|| from_base.cloned())
                .ok_or_else(|| {
                    AppError::Config(format!("identity.{} or identity.base_url is required", name))
                })
        };

        Ok(IdentityEndpoints {
            authorize_url: pick(
                &self.authorize_url,
                derived.as_ref().map(|d| &d.authorize_url),
                "authorize_url",
            )?,
            authn_url: pick(&self.authn_url, derived.as_ref().map(|d| &d.authn_url), "authn_url")?,
            token_url: pick(&self.token_url, derived.as_ref().map(|d| &d.token_url), "token_url")?,
            callback_url: self.callback_url.clone(),
        })
    }
}

/// The orchestrator's own OAuth client and agent identity
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    pub client_id: String,
    pub client_secret: String,
    pub agent_id: String,
    pub agent_secret: String,
}

impl OrchestratorConfig {
    pub fn client(&self) -> ClientCredentials {
        ClientCredentials::new(&self.client_id, &self.client_secret)
    }
}

/// A downstream agent registration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub agent_id: String,
    pub agent_secret: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

fn default_request_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_request_secs")]
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: default_request_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }
}

fn default_safety_margin_secs() -> i64 {
    crate::cache::DEFAULT_SAFETY_MARGIN_SECS
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_safety_margin_secs")]
    pub safety_margin_secs: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            safety_margin_secs: default_safety_margin_secs(),
        }
    }
}

impl CacheConfig {
    pub fn safety_margin(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.safety_margin_secs)
    }
}

/// Chat-completion planner endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct PlannerConfig {
    pub endpoint: String,
    pub model: String,
    #[serde(default)]
    pub api_key: String,
}

impl BrokerConfig {
    /// Read, resolve `${VAR}` placeholders and parse
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_yaml_str(&resolve_env_vars(&raw, |name| std::env::var(name).ok()))?;
        tracing::info!(path = %path.display(), agents = config.agents.len(), "Config loaded");
        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| AppError::Config(format!("Invalid config: {}", e)))
    }

    pub fn exchanger_client(&self) -> ClientCredentials {
        self.token_exchanger
            .clone()
            .unwrap_or_else(|| self.orchestrator.client())
    }

    pub fn agent_urls(&self) -> Vec<String> {
        self.agents.values().filter_map(|a| a.url.clone()).collect()
    }

    /// Agents with a configured URL, as discovery descriptors
    pub fn static_agents(&self) -> Vec<AgentDescriptor> {
        self.agents
            .iter()
            .filter_map(|(key, agent)| {
                let url = agent.url.clone()?;
                let name = agent.name.clone().unwrap_or_else(|| display_name(key));
                Some(AgentDescriptor::new(name, url).with_description(agent.description.clone()))
            })
            .collect()
    }

    /// Configured scopes per agent key (only non-empty lists)
    pub fn agent_scopes(&self) -> BTreeMap<String, Vec<String>> {
        self.agents
            .iter()
            .filter(|(_, agent)| !agent.scopes.is_empty())
            .map(|(key, agent)| (key.clone(), agent.scopes.clone()))
            .collect()
    }
}

/// "hr_agent" -> "Hr Agent"; short role prefixes stay upper-case ("HR Agent")
fn display_name(key: &str) -> String {
    key.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            if part.len() <= 2 {
                part.to_uppercase()
            } else {
                let mut chars = part.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                }
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Replace every `${NAME}` with `lookup(NAME)`; unknown names become empty
pub fn resolve_env_vars(text: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match lookup(name) {
                    Some(value) if !value.is_empty() => out.push_str(&value),
                    _ => tracing::warn!(var = name, "Environment variable not set"),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
