//! Deputy - delegation broker and task orchestration engine
//!
//! Obtains delegated tokens on a user's behalf, exchanges them for
//! narrowly scoped per-agent tokens and runs multi-step agent workflows
//! with approval gating.

pub mod actor;
pub mod api;
pub mod audit;
pub mod cache;
pub mod config;
pub mod error;
pub mod exchange;
pub mod identity;
pub mod models;
pub mod orchestrator;
pub mod session;
pub mod store;
pub mod timeout;

use std::collections::HashMap;
use std::sync::Arc;

use actor::{ActorTokenProvider, IdentityRegistration};
use audit::AuditLog;
use config::{BrokerConfig, DiscoveryMode};
use error::Result;
use exchange::TokenExchangeEngine;
use identity::{HttpIdentityBackend, IdentityBackend};
use models::Session;
use orchestrator::{
    A2aInvoker, ChatPlanner, Discovery, HttpDiscovery, KeywordPlanner, Orchestrator, Planner,
    ScopePolicy, StaticDiscovery,
};
use session::SessionStore;
use store::Store;

/// Application state shared across handlers
pub struct AppState {
    pub sessions: Arc<SessionStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub audit: Arc<AuditLog>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, audit: Arc<AuditLog>) -> Arc<Self> {
        Arc::new(Self {
            sessions: orchestrator.sessions().clone(),
            orchestrator,
            audit,
        })
    }

    /// Wire the HTTP-backed collaborators described by `config`
    pub fn from_config(
        config: &BrokerConfig,
        session_store: Arc<dyn Store<Session>>,
    ) -> Result<Arc<Self>> {
        let timeout = config.timeouts.request();
        let backend: Arc<dyn IdentityBackend> =
            Arc::new(HttpIdentityBackend::new(config.identity.endpoints()?, timeout)?);

        let discovery: Arc<dyn Discovery> = match config.discovery {
            DiscoveryMode::Cards => Arc::new(HttpDiscovery::new(config.agent_urls(), timeout)?),
            DiscoveryMode::Static => Arc::new(StaticDiscovery::new(config.static_agents())),
        };

        let planner: Arc<dyn Planner> = match &config.planner {
            Some(p) => Arc::new(ChatPlanner::new(&p.endpoint, &p.model, &p.api_key, timeout)?),
            None => Arc::new(KeywordPlanner::new()),
        };

        let invoker = Arc::new(A2aInvoker::new(timeout)?);

        Ok(Self::assemble(
            config,
            backend,
            session_store,
            discovery,
            planner,
            invoker,
        ))
    }

    /// Wire the engine around the given collaborators
    pub fn assemble(
        config: &BrokerConfig,
        backend: Arc<dyn IdentityBackend>,
        session_store: Arc<dyn Store<Session>>,
        discovery: Arc<dyn Discovery>,
        planner: Arc<dyn Planner>,
        invoker: Arc<dyn orchestrator::AgentInvoker>,
    ) -> Arc<Self> {
        let timeout = config.timeouts.request();
        let audit = Arc::new(AuditLog::new());
        let exchanger = config.exchanger_client();
        let orchestrator_client = config.orchestrator.client();

        let mut registrations = vec![IdentityRegistration::new(
            &config.orchestrator.agent_id,
            &config.orchestrator.agent_secret,
            orchestrator_client.clone(),
        )];
        registrations.extend(config.agents.values().map(|agent| {
            IdentityRegistration::new(&agent.agent_id, &agent.agent_secret, exchanger.clone())
        }));

        let actors = Arc::new(ActorTokenProvider::new(
            backend.clone(),
            registrations,
            audit.clone(),
            config.cache.safety_margin(),
            timeout,
        ));

        let agent_identities: HashMap<String, String> = config
            .agents
            .iter()
            .map(|(key, agent)| (key.clone(), agent.agent_id.clone()))
            .collect();

        let exchange = Arc::new(TokenExchangeEngine::new(
            backend.clone(),
            actors.clone(),
            exchanger,
            agent_identities,
            audit.clone(),
            timeout,
        ));

        let sessions = Arc::new(SessionStore::new(
            session_store,
            backend,
            actors,
            orchestrator_client,
            &config.orchestrator.agent_id,
            audit.clone(),
            timeout,
        ));

        let orchestrator = Orchestrator::new(
            sessions,
            exchange,
            discovery,
            planner,
            invoker,
            ScopePolicy::new(config.agent_scopes()),
            audit.clone(),
        )
        .with_timeout(timeout);

        Self::new(Arc::new(orchestrator), audit)
    }
}
