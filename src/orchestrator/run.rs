//! Orchestration run value and its pure transitions
//!
//! A run moves DISCOVER -> PLAN -> EXECUTE (one step per transition) ->
//! AGGREGATE -> DONE. FAILED is reachable from DISCOVER and PLAN, and
//! CANCELLED from EXECUTE. Each transition consumes the run and returns
//! the next value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::approval;
use super::report::{self, FinalReport};
use crate::models::{AgentDescriptor, ApprovalDecision, TaskResult, TaskStep};

/// Failure message when neither planner produced steps
pub const NO_TASKS: &str = "no tasks determined";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Discover,
    Plan,
    Execute,
    Aggregate,
    Done,
    Failed,
    Cancelled,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Discover => "discover",
            RunPhase::Plan => "plan",
            RunPhase::Execute => "execute",
            RunPhase::Aggregate => "aggregate",
            RunPhase::Done => "done",
            RunPhase::Failed => "failed",
            RunPhase::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationRun {
    pub run_id: Uuid,
    pub session_id: Uuid,
    pub request: String,
    pub phase: RunPhase,
    pub agents: Vec<AgentDescriptor>,
    pub plan: Vec<TaskStep>,
    pub results: Vec<TaskResult>,
    pub approval_decisions: Vec<ApprovalDecision>,
    /// Index into `plan` of the next step to execute
    pub cursor: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<FinalReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl OrchestrationRun {
    pub fn new(session_id: Uuid, request: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            session_id,
            request: request.into(),
            phase: RunPhase::Discover,
            agents: Vec::new(),
            plan: Vec::new(),
            results: Vec::new(),
            approval_decisions: Vec::new(),
            cursor: 0,
            report: None,
            failure: None,
            started_at: Utc::now(),
        }
    }

    pub fn overall_success(&self) -> bool {
        self.report.as_ref().map(|r| r.overall_success).unwrap_or(false)
    }

    pub fn current_step(&self) -> Option<&TaskStep> {
        self.plan.get(self.cursor)
    }

    /// Denial recorded against `step_index`, if any
    pub fn denial_for(&self, step_index: u32) -> Option<&ApprovalDecision> {
        self.approval_decisions.iter().find(|d| d.denies(step_index))
    }

    /// Terminal failure
    pub fn fail(mut self, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        tracing::warn!(run_id = %self.run_id, phase = self.phase.as_str(), %reason, "Run failed");
        self.failure = Some(reason);
        self.phase = RunPhase::Failed;
        self
    }

    /// DISCOVER -> PLAN. An empty list is not a failure here.
    pub fn discovered(mut self, agents: Vec<AgentDescriptor>) -> Self {
        debug_assert_eq!(self.phase, RunPhase::Discover);
        tracing::info!(run_id = %self.run_id, agents = agents.len(), "Agents discovered");
        self.agents = agents;
        self.phase = RunPhase::Plan;
        self
    }

    /// PLAN -> EXECUTE, or FAILED when there is nothing to run
    pub fn planned(mut self, mut plan: Vec<TaskStep>) -> Self {
        debug_assert_eq!(self.phase, RunPhase::Plan);
        if plan.is_empty() {
            return self.fail(NO_TASKS);
        }

        plan.sort_by_key(|s| s.step_index);
        tracing::info!(run_id = %self.run_id, steps = plan.len(), "Plan ready");
        self.plan = plan;
        self.cursor = 0;
        self.phase = RunPhase::Execute;
        self
    }

    /// Record the current step's result and advance the cursor
    ///
    /// Approval steps also record a decision gating the following step.
    pub fn record_step(mut self, result: TaskResult) -> Self {
        debug_assert_eq!(self.phase, RunPhase::Execute);
        let Some(step) = self.plan.get(self.cursor) else {
            self.phase = RunPhase::Aggregate;
            return self;
        };

        if step.is_approval() {
            let next = self.plan.get(self.cursor + 1).map(|s| s.step_index);
            let decision = approval::decide(&result, next);
            tracing::info!(
                run_id = %self.run_id,
                step = decision.source_step_index,
                status = decision.status.as_str(),
                linked = ?decision.linked_step_index,
                reason = %decision.reason,
                "Approval decision"
            );
            self.approval_decisions.push(decision);
        }

        self.results.push(result);
        self.cursor += 1;
        if self.cursor >= self.plan.len() {
            self.phase = RunPhase::Aggregate;
        }
        self
    }

    /// AGGREGATE -> DONE
    pub fn aggregate(mut self) -> Self {
        debug_assert_eq!(self.phase, RunPhase::Aggregate);
        self.report = Some(report::aggregate(&self.results));
        self.phase = RunPhase::Done;
        self
    }

    /// EXECUTE -> CANCELLED, keeping partial results
    pub fn cancel(mut self) -> Self {
        let mut report = report::aggregate(&self.results);
        report.overall_success = false;
        tracing::warn!(
            run_id = %self.run_id,
            completed = self.results.len(),
            remaining = self.plan.len().saturating_sub(self.cursor),
            "Run cancelled"
        );
        self.report = Some(report);
        self.phase = RunPhase::Cancelled;
        self
    }
}
