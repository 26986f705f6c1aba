//! Append-only audit log of delegation and exchange operations
//!
//! Entries are kept in memory in the order they were recorded and are
//! broadcast to subscribers as they arrive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

/// What was audited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOperation {
    ActorTokenAcquired,
    DelegatedTokenObtained,
    TokenExchange,
    AgentInvocation,
    WorkflowDiscovery,
    WorkflowPlanning,
    WorkflowCompleted,
}

impl AuditOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOperation::ActorTokenAcquired => "actor_token_acquired",
            AuditOperation::DelegatedTokenObtained => "delegated_token_obtained",
            AuditOperation::TokenExchange => "token_exchange",
            AuditOperation::AgentInvocation => "agent_invocation",
            AuditOperation::WorkflowDiscovery => "workflow_discovery",
            AuditOperation::WorkflowPlanning => "workflow_planning",
            AuditOperation::WorkflowCompleted => "workflow_completed",
        }
    }
}

/// One audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub operation: AuditOperation,
    /// End user on whose behalf the operation ran, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub actor: String,
    pub target: String,
    pub scopes: Vec<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditEntry {
    pub fn new(
        operation: AuditOperation,
        actor: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            operation,
            subject: None,
            actor: actor.into(),
            target: target.into(),
            scopes: Vec::new(),
            success: true,
            error: None,
        }
    }

    pub fn with_subject(mut self, subject: Option<String>) -> Self {
        self.subject = subject;
        self
    }

    pub fn with_scopes(mut self, scopes: &[String]) -> Self {
        self.scopes = scopes.to_vec();
        self
    }

    /// Mark as failed with the error that caused it
    pub fn failed(mut self, error: impl ToString) -> Self {
        self.success = false;
        self.error = Some(error.to_string());
        self
    }

    /// Record the outcome of `result`
    pub fn outcome<T, E: std::fmt::Display>(self, result: &Result<T, E>) -> Self {
        match result {
            Ok(_) => self,
            Err(e) => self.failed(e.to_string()),
        }
    }
}

/// Shared audit log
pub struct AuditLog {
    entries: RwLock<Vec<AuditEntry>>,
    event_tx: broadcast::Sender<AuditEntry>,
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLog {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            entries: RwLock::new(Vec::new()),
            event_tx,
        }
    }

    /// Subscribe to entries recorded from now on
    pub fn subscribe(&self) -> broadcast::Receiver<AuditEntry> {
        self.event_tx.subscribe()
    }

    /// Append an entry
    pub async fn record(&self, entry: AuditEntry) {
        if entry.success {
            tracing::info!(
                operation = entry.operation.as_str(),
                actor = %entry.actor,
                target = %entry.target,
                "Audit"
            );
        } else {
            tracing::warn!(
                operation = entry.operation.as_str(),
                actor = %entry.actor,
                target = %entry.target,
                error = entry.error.as_deref().unwrap_or(""),
                "Audit failure"
            );
        }

        {
            let mut entries = self.entries.write().await;
            entries.push(entry.clone());
        }

        let _ = self.event_tx.send(entry);
    }

    /// Snapshot of all entries in recorded order
    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().await.clone()
    }

    pub async fn entries_for(&self, operation: AuditOperation) -> Vec<AuditEntry> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| e.operation == operation)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
