//! Response types shared with the server

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_id: Uuid,
    pub authenticated: bool,
    #[serde(default)]
    pub token_expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user_subject: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizeResponse {
    pub session_id: Uuid,
    pub authorization_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowRequest {
    pub request: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Error,
    Skipped,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskResult {
    pub step_index: u32,
    pub agent_name: String,
    pub instruction: String,
    pub status: StepStatus,
    pub response_text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FinalReport {
    pub summary: String,
    pub steps: Vec<TaskResult>,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub overall_success: bool,
}

/// The subset of a workflow run the CLI displays
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowRun {
    pub run_id: Uuid,
    pub phase: String,
    #[serde(default)]
    pub report: Option<FinalReport>,
    #[serde(default)]
    pub failure: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    #[serde(default)]
    pub subject: Option<String>,
    pub actor: String,
    pub target: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}
