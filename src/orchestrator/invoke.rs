//! Agent invocation transport
//!
//! [`A2aInvoker`] sends a JSON-RPC 2.0 `message/send` request to the agent
//! URL with the exchanged token as bearer credential.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use uuid::Uuid;

use crate::error::{AppError, Result};

/// What an agent call produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationOutcome {
    pub success: bool,
    pub text: String,
}

impl InvocationOutcome {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            success: true,
            text: text.into(),
        }
    }

    pub fn failure(text: impl Into<String>) -> Self {
        Self {
            success: false,
            text: text.into(),
        }
    }
}

#[async_trait]
pub trait AgentInvoker: Send + Sync {
    /// Errors are transport failures; agent-reported failures come back
    /// as an unsuccessful outcome.
    async fn invoke(
        &self,
        agent_url: &str,
        instruction: &str,
        bearer_token: &str,
    ) -> Result<InvocationOutcome>;
}

pub struct A2aInvoker {
    client: Client,
}

impl A2aInvoker {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl AgentInvoker for A2aInvoker {
    async fn invoke(
        &self,
        agent_url: &str,
        instruction: &str,
        bearer_token: &str,
    ) -> Result<InvocationOutcome> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": Uuid::new_v4().to_string(),
            "method": "message/send",
            "params": {
                "message": {
                    "role": "user",
                    "parts": [{"kind": "text", "text": instruction}],
                    "messageId": Uuid::new_v4().simple().to_string(),
                }
            }
        });

        let response = self
            .client
            .post(agent_url)
            .bearer_auth(bearer_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::Step(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            tracing::warn!(agent_url, %status, "Agent returned an error status");
            return Ok(InvocationOutcome::failure(format!("Agent error: {}", status)));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AppError::Step(e.to_string()))?;

        Ok(outcome_from_response(&body))
    }
}

/// Interpret a JSON-RPC response body
pub(crate) fn outcome_from_response(body: &Value) -> InvocationOutcome {
    if let Some(error) = body.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return InvocationOutcome::failure(format!("Error: {}", message));
    }

    match body.get("result") {
        Some(result) => InvocationOutcome::success(
            extract_text(result).unwrap_or_else(|| result.to_string()),
        ),
        None => InvocationOutcome::failure(format!("Unexpected response: {}", body)),
    }
}

fn first_text(parts: &Value) -> Option<String> {
    parts.as_array()?.iter().find_map(|part| {
        let is_text = part.get("kind").and_then(Value::as_str) == Some("text")
            || part.get("type").and_then(Value::as_str) == Some("text")
            || part.get("kind").is_none();
        if is_text {
            part.get("text").and_then(Value::as_str).map(str::to_string)
        } else {
            None
        }
    })
}

fn extract_text(result: &Value) -> Option<String> {
    result
        .get("parts")
        .and_then(first_text)
        .or_else(|| result.pointer("/message/parts").and_then(first_text))
        .or_else(|| result.pointer("/artifacts/0/parts").and_then(first_text))
        .or_else(|| result.pointer("/status/message/parts").and_then(first_text))
}
