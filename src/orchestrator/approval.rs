//! Approval outcome classification
//!
//! A structured `{"status": "approved"|"denied", "reason": ...}` reply is
//! authoritative. Free text falls back to a keyword scan where denial
//! words win over approval words. Anything else is treated as a denial.

use serde::Deserialize;

use crate::models::{ApprovalDecision, ApprovalStatus, StepStatus, TaskResult};

const DENIAL_KEYWORDS: &[&str] = &["denied", "rejected", "failed", "error"];
const APPROVAL_KEYWORDS: &[&str] = &["approved", "approval granted"];

#[derive(Debug, Deserialize)]
struct StructuredDecision {
    status: ApprovalStatus,
    #[serde(default)]
    reason: String,
}

/// Classify `text` into a status and a reason
pub fn classify(text: &str) -> (ApprovalStatus, String) {
    if let Ok(decision) = serde_json::from_str::<StructuredDecision>(text.trim()) {
        let reason = if decision.reason.is_empty() {
            format!("structured decision: {}", decision.status.as_str())
        } else {
            decision.reason
        };
        return (decision.status, reason);
    }

    let lower = text.to_lowercase();
    if let Some(word) = DENIAL_KEYWORDS.iter().find(|k| lower.contains(*k)) {
        return (ApprovalStatus::Denied, format!("response indicates {}", word));
    }
    if let Some(word) = APPROVAL_KEYWORDS.iter().find(|k| lower.contains(*k)) {
        return (ApprovalStatus::Approved, format!("response indicates {}", word));
    }

    (
        ApprovalStatus::Denied,
        "no approval outcome in response".to_string(),
    )
}

/// Decision for an approval step's result, gating `next_step_index`
pub fn decide(result: &TaskResult, next_step_index: Option<u32>) -> ApprovalDecision {
    let (status, reason) = match result.status {
        StepStatus::Success => classify(&result.response_text),
        StepStatus::Error => (
            ApprovalStatus::Denied,
            format!("approval step failed: {}", result.response_text),
        ),
        StepStatus::Skipped => (ApprovalStatus::Denied, "approval step skipped".to_string()),
    };

    ApprovalDecision {
        source_step_index: result.step_index,
        status,
        reason,
        linked_step_index: next_step_index,
    }
}
