//! Agent discovery

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::models::AgentDescriptor;

const AGENT_CARD_PATH: &str = "/.well-known/agent-card.json";

#[async_trait]
pub trait Discovery: Send + Sync {
    async fn list_agents(&self) -> Result<Vec<AgentDescriptor>>;
}

/// Fixed agent list, usually from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    agents: Vec<AgentDescriptor>,
}

impl StaticDiscovery {
    pub fn new(agents: Vec<AgentDescriptor>) -> Self {
        Self { agents }
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn list_agents(&self) -> Result<Vec<AgentDescriptor>> {
        Ok(self.agents.clone())
    }
}

#[derive(Debug, Deserialize)]
struct AgentCard {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    skills: Vec<AgentSkill>,
}

#[derive(Debug, Deserialize)]
struct AgentSkill {
    name: String,
}

/// Fetches each agent's card from its base URL
pub struct HttpDiscovery {
    client: Client,
    base_urls: Vec<String>,
}

impl HttpDiscovery {
    pub fn new(base_urls: Vec<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?;

        Ok(Self { client, base_urls })
    }

    async fn fetch_card(&self, base_url: &str) -> Result<AgentDescriptor> {
        let response = self
            .client
            .get(format!("{}{}", base_url.trim_end_matches('/'), AGENT_CARD_PATH))
            .send()
            .await
            .map_err(|e| AppError::Discovery(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::Discovery(format!(
                "Agent card request failed: {}",
                response.status()
            )));
        }

        let card: AgentCard = response
            .json()
            .await
            .map_err(|e| AppError::Discovery(e.to_string()))?;

        Ok(AgentDescriptor::new(card.name, base_url)
            .with_description(card.description.unwrap_or_default())
            .with_skills(card.skills.into_iter().map(|s| s.name).collect()))
    }
}

#[async_trait]
impl Discovery for HttpDiscovery {
    async fn list_agents(&self) -> Result<Vec<AgentDescriptor>> {
        let mut agents = Vec::new();
        let mut last_error = None;

        for base_url in &self.base_urls {
            match self.fetch_card(base_url).await {
                Ok(agent) => {
                    tracing::info!(name = %agent.name, url = %base_url, skills = ?agent.skills, "Discovered agent");
                    agents.push(agent);
                }
                Err(e) => {
                    tracing::warn!(url = %base_url, error = %e, "Failed to discover agent");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if agents.is_empty() => Err(e),
            _ => Ok(agents),
        }
    }
}
