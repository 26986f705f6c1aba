//! Data models for sessions, credentials and workflow steps

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::pkce::PkcePair;

/// Per-user OAuth session state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    pub pkce_verifier: String,
    pub pkce_challenge: String,
    /// Set exactly once by a successful login completion
    pub delegated_token: Option<String>,
    pub token_expiry: Option<DateTime<Utc>>,
    pub user_subject: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Fresh session with new PKCE material and no token yet
    pub fn new(pkce: PkcePair) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            pkce_verifier: pkce.verifier,
            pkce_challenge: pkce.challenge,
            delegated_token: None,
            token_expiry: None,
            user_subject: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_logged_in(&self) -> bool {
        self.delegated_token.is_some()
    }

    /// Whether the delegated token has passed its expiry at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.token_expiry {
            Some(expiry) => expiry <= now,
            None => false,
        }
    }

    /// The delegated token, if present and not expired
    pub fn live_token(&self, now: DateTime<Utc>) -> Option<&str> {
        if self.is_expired_at(now) {
            return None;
        }
        self.delegated_token.as_deref()
    }
}

/// Public view of a session (no token material)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_id: Uuid,
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_expiry: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_subject: Option<String>,
}

impl From<&Session> for SessionStatus {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.session_id,
            authenticated: session.live_token(Utc::now()).is_some(),
            token_expiry: session.token_expiry,
            user_subject: session.user_subject.clone(),
        }
    }
}

/// A token proving an agent's own identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorToken {
    pub token: String,
    pub actor_identity: String,
    pub expires_at: DateTime<Utc>,
}

/// Snapshot of an agent as reported by discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub skills: Vec<String>,
}

impl AgentDescriptor {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            description: String::new(),
            skills: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_skills(mut self, skills: Vec<String>) -> Self {
        self.skills = skills;
        self
    }

    /// Registry key derived from the display name ("HR Agent" -> "hr_agent")
    pub fn derived_key(&self) -> String {
        derive_agent_key(&self.name)
    }
}

/// Lower-case the name and replace spaces with underscores
pub fn derive_agent_key(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "_")
}

/// One step of a task plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStep {
    pub step_index: u32,
    pub agent_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_key: Option<String>,
    pub agent_url: String,
    pub instruction: String,
}

impl TaskStep {
    pub fn new(
        step_index: u32,
        agent: &AgentDescriptor,
        instruction: impl Into<String>,
    ) -> Self {
        Self {
            step_index,
            agent_name: agent.name.clone(),
            agent_key: None,
            agent_url: agent.url.clone(),
            instruction: instruction.into(),
        }
    }

    /// Explicit key if given, else derived from the agent name
    pub fn resolved_key(&self) -> String {
        self.agent_key
            .clone()
            .unwrap_or_else(|| derive_agent_key(&self.agent_name))
    }

    /// Whether the target agent plays the approval role
    pub fn is_approval(&self) -> bool {
        self.agent_name.to_lowercase().contains("approval")
    }
}

/// Outcome status of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Error,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Success => "success",
            StepStatus::Error => "error",
            StepStatus::Skipped => "skipped",
        }
    }
}

/// Recorded outcome of one plan step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub step_index: u32,
    pub agent_name: String,
    pub instruction: String,
    pub status: StepStatus,
    pub response_text: String,
}

impl TaskResult {
    pub fn for_step(step: &TaskStep, status: StepStatus, response_text: impl Into<String>) -> Self {
        Self {
            step_index: step.step_index,
            agent_name: step.agent_name.clone(),
            instruction: step.instruction.clone(),
            status,
            response_text: response_text.into(),
        }
    }
}

/// Status of an approval decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Approved,
    Denied,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Denied => "denied",
        }
    }
}

/// Decision produced by an approval step, gating the step that follows it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub source_step_index: u32,
    pub status: ApprovalStatus,
    pub reason: String,
    /// None when the approval step was the last in the plan
    pub linked_step_index: Option<u32>,
}

impl ApprovalDecision {
    /// Whether this decision denies the given step
    pub fn denies(&self, step_index: u32) -> bool {
        self.status == ApprovalStatus::Denied && self.linked_step_index == Some(step_index)
    }
}
