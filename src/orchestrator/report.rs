//! Final report aggregation

use serde::{Deserialize, Serialize};

use crate::models::{StepStatus, TaskResult};

/// Summary of a finished (or cancelled) run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalReport {
    /// Human-readable per-step summary
    pub summary: String,
    pub steps: Vec<TaskResult>,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// True whenever the run reached aggregation; step failures show in `steps`
    pub overall_success: bool,
}

/// Build the report for `results`. Pure: same input, same output.
pub fn aggregate(results: &[TaskResult]) -> FinalReport {
    let summary = results
        .iter()
        .map(|r| {
            format!(
                "[{}] Step {}: {} - {}\n   Result: {}",
                r.status.as_str(),
                r.step_index,
                r.agent_name,
                r.instruction,
                if r.response_text.is_empty() {
                    "No result"
                } else {
                    r.response_text.as_str()
                }
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let count = |status: StepStatus| results.iter().filter(|r| r.status == status).count();

    FinalReport {
        summary,
        steps: results.to_vec(),
        succeeded: count(StepStatus::Success),
        failed: count(StepStatus::Error),
        skipped: count(StepStatus::Skipped),
        overall_success: true,
    }
}
