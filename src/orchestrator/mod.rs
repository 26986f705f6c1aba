//! Workflow orchestration engine
//!
//! Drives an [`OrchestrationRun`] through discovery, planning, sequential
//! step execution and aggregation. Steps within one run never overlap;
//! separate runs share nothing but the credential cache and audit log.

pub mod approval;
pub mod cancel;
pub mod discovery;
pub mod invoke;
pub mod planner;
pub mod report;
pub mod run;
pub mod scopes;

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditLog, AuditOperation};
use crate::error::{AppError, Result};
use crate::exchange::TokenExchangeEngine;
use crate::models::{Session, StepStatus, TaskResult, TaskStep};
use crate::session::SessionStore;
use crate::timeout::{bounded, DEFAULT_TIMEOUT};

pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use discovery::{Discovery, HttpDiscovery, StaticDiscovery};
pub use invoke::{A2aInvoker, AgentInvoker, InvocationOutcome};
pub use planner::{ChatPlanner, KeywordPlanner, Planner};
pub use report::FinalReport;
pub use run::{OrchestrationRun, RunPhase, NO_TASKS};
pub use scopes::ScopePolicy;

pub struct Orchestrator {
    sessions: Arc<SessionStore>,
    exchange: Arc<TokenExchangeEngine>,
    discovery: Arc<dyn Discovery>,
    planner: Arc<dyn Planner>,
    fallback: KeywordPlanner,
    invoker: Arc<dyn AgentInvoker>,
    scopes: ScopePolicy,
    audit: Arc<AuditLog>,
    timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        sessions: Arc<SessionStore>,
        exchange: Arc<TokenExchangeEngine>,
        discovery: Arc<dyn Discovery>,
        planner: Arc<dyn Planner>,
        invoker: Arc<dyn AgentInvoker>,
        scopes: ScopePolicy,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            sessions,
            exchange,
            discovery,
            planner,
            fallback: KeywordPlanner::new(),
            invoker,
            scopes,
            audit,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Per-call limit for discovery, planning and agent calls
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn exchange(&self) -> &TokenExchangeEngine {
        &self.exchange
    }

    pub async fn run_workflow(&self, session_id: Uuid, request: &str) -> Result<OrchestrationRun> {
        self.run_workflow_with_cancel(session_id, request, CancelSignal::never())
            .await
    }

    /// Run a workflow for a logged-in session
    ///
    /// Auth problems are returned as errors. Discovery and planning
    /// failures come back as a run in the FAILED phase.
    pub async fn run_workflow_with_cancel(
        &self,
        session_id: Uuid,
        request: &str,
        cancel: CancelSignal,
    ) -> Result<OrchestrationRun> {
        let session = self.authorized_session(session_id).await?;

        tracing::info!(%session_id, request, "Workflow started");
        let mut run = OrchestrationRun::new(session_id, request);

        run = self.discover(run).await;
        if run.phase == RunPhase::Plan {
            run = self.plan(run).await;
        }

        while run.phase == RunPhase::Execute {
            if cancel.is_cancelled() {
                run = run.cancel();
                break;
            }
            run = self.execute_step(&session, run).await;
        }

        if run.phase == RunPhase::Aggregate {
            run = run.aggregate();
        }

        let mut entry = AuditEntry::new(
            AuditOperation::WorkflowCompleted,
            self.sessions.orchestrator_identity(),
            run.run_id.to_string(),
        )
        .with_subject(session.user_subject.clone());
        if run.phase != RunPhase::Done {
            entry = entry.failed(
                run.failure
                    .clone()
                    .unwrap_or_else(|| run.phase.as_str().to_string()),
            );
        }
        self.audit.record(entry).await;

        tracing::info!(
            run_id = %run.run_id,
            phase = run.phase.as_str(),
            steps = run.results.len(),
            "Workflow finished"
        );
        Ok(run)
    }

    async fn authorized_session(&self, session_id: Uuid) -> Result<Session> {
        let session = self
            .sessions
            .get_session(session_id)
            .await?
            .ok_or_else(|| AppError::Auth(format!("Unknown session: {}", session_id)))?;

        if session.live_token(Utc::now()).is_none() {
            return Err(AppError::Auth(format!(
                "Session {} is not logged in or has expired",
                session_id
            )));
        }
        Ok(session)
    }

    /// DISCOVER
    pub async fn discover(&self, run: OrchestrationRun) -> OrchestrationRun {
        let result = bounded(
            self.timeout,
            "discovery",
            AppError::Discovery,
            self.discovery.list_agents(),
        )
        .await;

        self.audit
            .record(
                AuditEntry::new(
                    AuditOperation::WorkflowDiscovery,
                    self.sessions.orchestrator_identity(),
                    run.run_id.to_string(),
                )
                .outcome(&result),
            )
            .await;

        match result {
            Ok(agents) => run.discovered(agents),
            Err(e) => run.fail(e.to_string()),
        }
    }

    /// PLAN, falling back to the keyword heuristic
    pub async fn plan(&self, run: OrchestrationRun) -> OrchestrationRun {
        let primary = bounded(
            self.timeout,
            "planning",
            AppError::Planning,
            self.planner.plan(&run.request, &run.agents),
        )
        .await;

        let plan = match primary {
            Ok(steps) if !steps.is_empty() => steps,
            Ok(_) => {
                tracing::warn!(run_id = %run.run_id, "Planner returned no steps, using keyword fallback");
                self.fallback_plan(&run).await
            }
            Err(e) => {
                tracing::warn!(run_id = %run.run_id, error = %e, "Planner failed, using keyword fallback");
                self.audit.record(self.planning_entry(&run).failed(&e)).await;
                self.fallback_plan(&run).await
            }
        };

        let mut entry = self.planning_entry(&run);
        if plan.is_empty() {
            entry = entry.failed(NO_TASKS);
        }
        self.audit.record(entry).await;

        run.planned(plan)
    }

    async fn fallback_plan(&self, run: &OrchestrationRun) -> Vec<TaskStep> {
        self.fallback
            .plan(&run.request, &run.agents)
            .await
            .unwrap_or_default()
    }

    fn planning_entry(&self, run: &OrchestrationRun) -> AuditEntry {
        AuditEntry::new(
            AuditOperation::WorkflowPlanning,
            self.sessions.orchestrator_identity(),
            run.run_id.to_string(),
        )
    }

    /// EXECUTE one step
    pub async fn execute_step(&self, session: &Session, run: OrchestrationRun) -> OrchestrationRun {
        let Some(step) = run.current_step().cloned() else {
            return run;
        };

        if let Some(denial) = run.denial_for(step.step_index) {
            tracing::warn!(
                run_id = %run.run_id,
                step = step.step_index,
                denied_by = denial.source_step_index,
                "Skipping step denied by approval"
            );
            let text = format!(
                "Skipped: denied by step {} ({})",
                denial.source_step_index, denial.reason
            );
            let result = TaskResult::for_step(&step, StepStatus::Skipped, text);
            return run.record_step(result);
        }

        let agent_key = step.resolved_key();
        let scopes = self.scopes.scopes_for(&agent_key);
        tracing::info!(
            run_id = %run.run_id,
            step = step.step_index,
            agent = %step.agent_name,
            %agent_key,
            "Executing step"
        );

        let token = match self
            .exchange
            .exchange_for_agent(session, &agent_key, &scopes)
            .await
        {
            Ok(token) => token,
            Err(e) => {
                tracing::error!(step = step.step_index, error = %e, "Token exchange failed");
                let result = TaskResult::for_step(&step, StepStatus::Error, e.to_string());
                return run.record_step(result);
            }
        };

        let outcome = bounded(
            self.timeout,
            "agent invocation",
            AppError::Step,
            self.invoker
                .invoke(&step.agent_url, &step.instruction, &token),
        )
        .await;

        let entry = AuditEntry::new(
            AuditOperation::AgentInvocation,
            agent_key.clone(),
            step.agent_url.clone(),
        )
        .with_subject(session.user_subject.clone())
        .with_scopes(&scopes);

        let result = match outcome {
            Ok(outcome) if outcome.success => {
                self.audit.record(entry).await;
                TaskResult::for_step(&step, StepStatus::Success, outcome.text)
            }
            Ok(outcome) => {
                self.audit.record(entry.failed(&outcome.text)).await;
                TaskResult::for_step(&step, StepStatus::Error, outcome.text)
            }
            Err(e) => {
                tracing::error!(step = step.step_index, error = %e, "Agent invocation failed");
                self.audit.record(entry.failed(&e)).await;
                TaskResult::for_step(&step, StepStatus::Error, e.to_string())
            }
        };

        run.record_step(result)
    }
}
