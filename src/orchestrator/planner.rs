//! Task planners
//!
//! A planner turns a user request and the discovered agents into ordered
//! steps. An approval step always gates the step right after it, so a
//! planner that wants a step gated must place the approval immediately
//! before it.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::models::{AgentDescriptor, TaskStep};

#[async_trait]
pub trait Planner: Send + Sync {
    /// May fail or return nothing; the caller falls back
    async fn plan(&self, request: &str, agents: &[AgentDescriptor]) -> Result<Vec<TaskStep>>;
}

/// Worker role name and the request words that select it. The approval
/// role is never selected by keywords, only inserted ahead of gated steps.
const ROLE_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "hr",
        &["employee", "profile", "hr", "hire", "onboard", "new hire", "create"],
    ),
    (
        "it",
        &["vpn", "github", "aws", "provision", "access", "account", "laptop", "email"],
    ),
    (
        "booking",
        &["schedule", "task", "booking", "book", "orientation", "equipment", "pickup"],
    ),
];

const APPROVAL_ROLE: &str = "approval";

/// Words marking a request that needs an approval gate
const PRIVILEGE_KEYWORDS: &[&str] =
    &["privilege", "admin", "elevated", "role", "grant", "permission"];

/// Deterministic keyword-to-agent heuristic
#[derive(Debug, Clone, Default)]
pub struct KeywordPlanner;

impl KeywordPlanner {
    pub fn new() -> Self {
        Self
    }

    fn plan_sync(&self, request: &str, agents: &[AgentDescriptor]) -> Vec<TaskStep> {
        let lower = request.to_lowercase();
        let words = words(&lower);

        let matched: Vec<(&str, &AgentDescriptor)> = ROLE_KEYWORDS
            .iter()
            .filter(|(_, keywords)| keywords.iter().any(|k| keyword_matches(k, &lower, &words)))
            .filter_map(|(role, _)| agent_for_role(role, agents).map(|agent| (*role, agent)))
            .collect();

        let privileged = PRIVILEGE_KEYWORDS
            .iter()
            .any(|k| keyword_matches(k, &lower, &words));
        let approver = agent_for_role(APPROVAL_ROLE, agents);

        let mut steps = Vec::new();
        let mut push = |agent: &AgentDescriptor, instruction: String| {
            let index = steps.len() as u32 + 1;
            steps.push(TaskStep::new(index, agent, instruction));
        };

        match (privileged, approver) {
            (true, Some(approver)) => {
                for &(role, agent) in &matched {
                    tracing::debug!(role, "Gating privileged step behind approval");
                    push(approver, format!("Request approval for: {}", request));
                    push(agent, request.to_string());
                }
            }
            (privileged, _) => {
                if privileged {
                    tracing::warn!("Privileged request but no approval agent available");
                }
                for &(_, agent) in &matched {
                    push(agent, request.to_string());
                }
            }
        }

        steps
    }
}

#[async_trait]
impl Planner for KeywordPlanner {
    async fn plan(&self, request: &str, agents: &[AgentDescriptor]) -> Result<Vec<TaskStep>> {
        Ok(self.plan_sync(request, agents))
    }
}

fn words(lower: &str) -> Vec<&str> {
    lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Single words match word prefixes ("provision" matches "provisioning");
/// phrases match anywhere in the request.
fn keyword_matches(keyword: &str, lower: &str, words: &[&str]) -> bool {
    if keyword.contains(' ') {
        lower.contains(keyword)
    } else {
        words.iter().any(|w| w.starts_with(keyword))
    }
}

/// First agent whose derived key has `role` as one of its segments
fn agent_for_role<'a>(role: &str, agents: &'a [AgentDescriptor]) -> Option<&'a AgentDescriptor> {
    agents
        .iter()
        .find(|agent| agent.derived_key().split('_').any(|segment| segment == role))
}

/// Planner backed by an OpenAI-compatible chat completion endpoint
pub struct ChatPlanner {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct PlannedTask {
    #[serde(default)]
    step: Option<u32>,
    agent_name: String,
    #[serde(default)]
    agent_url: String,
    task: String,
}

impl ChatPlanner {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: api_key.into(),
        })
    }

    fn system_prompt(agents: &[AgentDescriptor]) -> String {
        let listing = agents
            .iter()
            .map(|a| {
                format!(
                    "  - name: \"{}\", url: \"{}\", skills: [{}]",
                    a.name,
                    a.url,
                    a.skills.join(", ")
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "You plan tasks for an agent orchestrator. Break the user request into \
             concrete, ordered tasks for the available agents.\n\n\
             Available agents:\n{}\n\n\
             Rules:\n\
             - Identify every distinct action; one sentence may need several agents.\n\
             - Give each task a specific instruction for its agent.\n\
             - When the request grants privileges, elevated access or roles, put an \
             Approval Agent task immediately before the task that applies them.\n\n\
             Reply with JSON only: {{\"tasks\": [{{\"step\": 1, \"agent_name\": \"<name>\", \
             \"agent_url\": \"<url>\", \"task\": \"<instruction>\"}}]}}",
            listing
        )
    }
}

#[async_trait]
impl Planner for ChatPlanner {
    async fn plan(&self, request: &str, agents: &[AgentDescriptor]) -> Result<Vec<TaskStep>> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": Self::system_prompt(agents)},
                {"role": "user", "content": request},
            ],
            "response_format": {"type": "json_object"},
            "temperature": 0.1,
        });

        let mut builder = self.client.post(&self.endpoint).json(&body);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AppError::Planning(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Planning(format!(
                "Planner request failed: {} - {}",
                status, text
            )));
        }

        let completion: Value = response
            .json()
            .await
            .map_err(|e| AppError::Planning(e.to_string()))?;

        let content = completion
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::Planning("Completion has no message content".to_string()))?;

        parse_plan(content, agents)
    }
}

/// Parse a planner reply: `{"tasks": [...]}` or a bare array
pub(crate) fn parse_plan(content: &str, agents: &[AgentDescriptor]) -> Result<Vec<TaskStep>> {
    let value: Value = serde_json::from_str(content.trim())
        .map_err(|e| AppError::Planning(format!("Planner reply is not JSON: {}", e)))?;

    let tasks = match value {
        Value::Array(_) => value,
        Value::Object(mut map) => map.remove("tasks").unwrap_or(Value::Array(Vec::new())),
        _ => return Err(AppError::Planning("Unexpected planner reply".to_string())),
    };

    let mut tasks: Vec<PlannedTask> = serde_json::from_value(tasks)
        .map_err(|e| AppError::Planning(format!("Malformed task list: {}", e)))?;
    tasks.sort_by_key(|t| t.step.unwrap_or(u32::MAX));

    let mut steps = Vec::new();
    for task in tasks {
        let agent = agents
            .iter()
            .find(|a| !task.agent_url.is_empty() && a.url == task.agent_url)
            .or_else(|| agents.iter().find(|a| a.name.eq_ignore_ascii_case(&task.agent_name)));

        match agent {
            Some(agent) => {
                let index = steps.len() as u32 + 1;
                steps.push(TaskStep::new(index, agent, task.task));
            }
            None => {
                tracing::warn!(agent = %task.agent_name, "Planner named an unknown agent");
            }
        }
    }

    Ok(steps)
}
