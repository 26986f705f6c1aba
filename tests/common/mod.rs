//! Shared collaborator stubs for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use deputy::config::BrokerConfig;
use deputy::error::{AppError, Result};
use deputy::identity::{
    ClientCredentials, ExchangeRequest, FlowHandle, FlowStart, IdentityBackend,
    IdentityCredentials, TokenResponse,
};
use deputy::models::{AgentDescriptor, TaskStep};
use deputy::orchestrator::{AgentInvoker, Discovery, InvocationOutcome, Planner};
use deputy::store::MemoryStore;
use deputy::AppState;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub const CONFIG: &str = r#"
identity:
  base_url: https://idp.test
orchestrator:
  client_id: orch-client
  client_secret: orch-secret
  agent_id: orchestrator-agent
  agent_secret: orchestrator-pw
token_exchanger:
  client_id: exchanger
  client_secret: exchanger-secret
agents:
  hr_agent:
    agent_id: hr-agent-id
    agent_secret: hr-pw
    url: http://hr.test
  it_agent:
    agent_id: it-agent-id
    agent_secret: it-pw
    url: http://it.test
    scopes: [it:provision]
  approval_agent:
    agent_id: approval-agent-id
    agent_secret: approval-pw
    url: http://approval.test
timeouts:
  request_secs: 5
"#;

pub fn config() -> BrokerConfig {
    BrokerConfig::from_yaml_str(CONFIG).expect("test config parses")
}

pub fn hr() -> AgentDescriptor {
    AgentDescriptor::new("HR Agent", "http://hr.test")
}

pub fn it() -> AgentDescriptor {
    AgentDescriptor::new("IT Agent", "http://it.test")
}

pub fn approval() -> AgentDescriptor {
    AgentDescriptor::new("Approval Agent", "http://approval.test")
}

/// Identity backend that counts every handshake step
#[derive(Default)]
pub struct StubIdentity {
    pub begins: AtomicUsize,
    pub authns: AtomicUsize,
    pub code_exchanges: AtomicUsize,
    pub exchanges: Mutex<Vec<ExchangeRequest>>,
    /// Delay inside `authenticate`, to widen race windows
    pub authn_delay: Option<Duration>,
    /// Delay inside `token_exchange`
    pub exchange_delay: Option<Duration>,
    /// Scopes the exchange grant refuses
    pub refused_scopes: Vec<String>,
    pub fail_authn: bool,
}

impl StubIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquisitions(&self) -> usize {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn exchange_requests(&self) -> Vec<ExchangeRequest> {
        self.exchanges.lock().unwrap().clone()
    }
}

#[async_trait]
impl IdentityBackend for StubIdentity {
    async fn begin_authorization(
        &self,
        _client: &ClientCredentials,
        _pkce_challenge: &str,
        _requested_identity: Option<&str>,
    ) -> Result<FlowStart> {
        let n = self.begins.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(FlowStart::Flow(FlowHandle(format!("flow-{}", n))))
    }

    async fn authenticate(
        &self,
        flow: &FlowHandle,
        credentials: &IdentityCredentials,
    ) -> Result<String> {
        self.authns.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.authn_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_authn {
            return Err(AppError::Auth("authenticator rejected credentials".into()));
        }
        Ok(format!("actor-code:{}:{}", credentials.identity, flow.0))
    }

    async fn exchange_code(
        &self,
        _client: &ClientCredentials,
        code: &str,
        _pkce_verifier: &str,
        actor_token: Option<&str>,
    ) -> Result<TokenResponse> {
        self.code_exchanges.fetch_add(1, Ordering::SeqCst);
        match actor_token {
            // Actor handshake
            None => Ok(TokenResponse {
                access_token: code.replace("actor-code", "actor-token"),
                expires_in: 3600,
                scope: String::new(),
                id_token: None,
            }),
            // User login bound to the orchestrator's actor token
            Some(_) if code == "bad-code" => Err(AppError::Auth("invalid_grant".into())),
            Some(_) => Ok(TokenResponse {
                access_token: format!("delegated:{}", code),
                expires_in: 3600,
                scope: "openid profile".into(),
                id_token: None,
            }),
        }
    }

    async fn token_exchange(
        &self,
        _client: &ClientCredentials,
        request: &ExchangeRequest,
    ) -> Result<TokenResponse> {
        self.exchanges.lock().unwrap().push(request.clone());
        if let Some(delay) = self.exchange_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(scope) = request
            .target_scopes
            .iter()
            .find(|s| self.refused_scopes.contains(s))
        {
            return Err(AppError::Exchange(format!("invalid_scope: {}", scope)));
        }
        Ok(TokenResponse {
            access_token: format!("scoped:{}", request.target_scopes.join(",")),
            expires_in: 600,
            scope: request.target_scopes.join(" "),
            id_token: None,
        })
    }

    fn build_authorize_url(
        &self,
        client: &ClientCredentials,
        _scopes: &[String],
        state: &str,
        pkce_challenge: &str,
        requested_actor: &str,
    ) -> Result<String> {
        Ok(format!(
            "https://idp.test/authorize?client_id={}&state={}&code_challenge={}&requested_actor={}",
            client.client_id, state, pkce_challenge, requested_actor
        ))
    }
}

pub struct StubDiscovery {
    pub agents: Vec<AgentDescriptor>,
    pub fail: bool,
}

impl StubDiscovery {
    pub fn with(agents: Vec<AgentDescriptor>) -> Self {
        Self {
            agents,
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            agents: Vec::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl Discovery for StubDiscovery {
    async fn list_agents(&self) -> Result<Vec<AgentDescriptor>> {
        if self.fail {
            return Err(AppError::Discovery("registry unreachable".into()));
        }
        Ok(self.agents.clone())
    }
}

/// Planner returning a fixed plan, or failing
pub struct StubPlanner {
    pub steps: Vec<(AgentDescriptor, String)>,
    pub fail: bool,
}

impl StubPlanner {
    pub fn with(steps: Vec<(AgentDescriptor, &str)>) -> Self {
        Self {
            steps: steps
                .into_iter()
                .map(|(agent, task)| (agent, task.to_string()))
                .collect(),
            fail: false,
        }
    }

    pub fn empty() -> Self {
        Self {
            steps: Vec::new(),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            steps: Vec::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl Planner for StubPlanner {
    async fn plan(&self, _request: &str, _agents: &[AgentDescriptor]) -> Result<Vec<TaskStep>> {
        if self.fail {
            return Err(AppError::Planning("model unavailable".into()));
        }
        Ok(self
            .steps
            .iter()
            .enumerate()
            .map(|(i, (agent, task))| TaskStep::new(i as u32 + 1, agent, task.clone()))
            .collect())
    }
}

/// Invoker answering per agent URL and recording every call
#[derive(Default)]
pub struct StubInvoker {
    pub replies: HashMap<String, InvocationOutcome>,
    pub calls: Mutex<Vec<(String, String, String)>>,
    pub delay: Option<Duration>,
    /// Per agent URL, overriding `delay`
    pub delays: HashMap<String, Duration>,
}

impl StubInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, url: &str, outcome: InvocationOutcome) -> Self {
        self.replies.insert(url.to_string(), outcome);
        self
    }

    pub fn slow(mut self, url: &str, delay: Duration) -> Self {
        self.delays.insert(url.to_string(), delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn called_urls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(url, _, _)| url.clone())
            .collect()
    }
}

#[async_trait]
impl AgentInvoker for StubInvoker {
    async fn invoke(
        &self,
        agent_url: &str,
        instruction: &str,
        bearer_token: &str,
    ) -> Result<InvocationOutcome> {
        self.calls.lock().unwrap().push((
            agent_url.to_string(),
            instruction.to_string(),
            bearer_token.to_string(),
        ));
        if let Some(delay) = self.delays.get(agent_url).copied().or(self.delay) {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .replies
            .get(agent_url)
            .cloned()
            .unwrap_or_else(|| InvocationOutcome::success(format!("done: {}", instruction))))
    }
}

pub struct Harness {
    pub state: Arc<AppState>,
    pub identity: Arc<StubIdentity>,
    pub invoker: Arc<StubInvoker>,
}

pub fn harness(
    identity: StubIdentity,
    discovery: StubDiscovery,
    planner: StubPlanner,
    invoker: StubInvoker,
) -> Harness {
    let identity = Arc::new(identity);
    let invoker = Arc::new(invoker);
    let state = AppState::assemble(
        &config(),
        identity.clone(),
        Arc::new(MemoryStore::new()),
        Arc::new(discovery),
        Arc::new(planner),
        invoker.clone(),
    );
    Harness {
        state,
        identity,
        invoker,
    }
}

impl Harness {
    /// Create a session and complete its login
    pub async fn logged_in_session(&self) -> Uuid {
        let session = self
            .state
            .sessions
            .create_session()
            .await
            .expect("session created");
        self.state
            .sessions
            .complete_login(session.session_id, "user-code")
            .await
            .expect("login completes");
        session.session_id
    }
}
