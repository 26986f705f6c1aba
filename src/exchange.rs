//! Token exchange engine
//!
//! Trades a subject token, optionally bound to an actor token, for a new
//! token narrowed to an audience and scope set. Results are opaque and are
//! never cached.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::actor::ActorTokenProvider;
use crate::audit::{AuditEntry, AuditLog, AuditOperation};
use crate::error::{AppError, Result};
use crate::identity::{fingerprint, ClientCredentials, ExchangeRequest, IdentityBackend};
use crate::models::Session;
use crate::timeout::bounded;

pub struct TokenExchangeEngine {
    backend: Arc<dyn IdentityBackend>,
    actors: Arc<ActorTokenProvider>,
    client: ClientCredentials,
    /// agent_key -> actor identity
    agents: HashMap<String, String>,
    audit: Arc<AuditLog>,
    timeout: Duration,
}

impl TokenExchangeEngine {
    pub fn new(
        backend: Arc<dyn IdentityBackend>,
        actors: Arc<ActorTokenProvider>,
        client: ClientCredentials,
        agents: HashMap<String, String>,
        audit: Arc<AuditLog>,
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            actors,
            client,
            agents,
            audit,
            timeout,
        }
    }

    /// Identity registered for `agent_key`
    pub fn identity_for(&self, agent_key: &str) -> Option<&str> {
        self.agents.get(agent_key).map(String::as_str)
    }

    /// Raw exchange grant
    pub async fn exchange(&self, request: &ExchangeRequest) -> Result<String> {
        let response = bounded(
            self.timeout,
            "token exchange",
            AppError::Exchange,
            self.backend.token_exchange(&self.client, request),
        )
        .await?;

        Ok(response.access_token)
    }

    /// Exchange the session's delegated token for one scoped to `agent_key`
    ///
    /// `target_scopes` are forwarded exactly as given.
    pub async fn exchange_for_agent(
        &self,
        session: &Session,
        agent_key: &str,
        target_scopes: &[String],
    ) -> Result<String> {
        let result = self.exchange_for_agent_inner(session, agent_key, target_scopes).await;

        let actor = self.identity_for(agent_key).unwrap_or(agent_key);
        self.audit
            .record(
                AuditEntry::new(AuditOperation::TokenExchange, actor, agent_key)
                    .with_subject(session.user_subject.clone())
                    .with_scopes(target_scopes)
                    .outcome(&result),
            )
            .await;

        result
    }

    async fn exchange_for_agent_inner(
        &self,
        session: &Session,
        agent_key: &str,
        target_scopes: &[String],
    ) -> Result<String> {
        let identity = self
            .identity_for(agent_key)
            .ok_or_else(|| AppError::Exchange(format!("Agent not registered: {}", agent_key)))?;

        let subject_token = session.live_token(Utc::now()).ok_or_else(|| {
            AppError::Exchange(format!(
                "Session {} has no live delegated token",
                session.session_id
            ))
        })?;

        // A failed actor acquisition only costs this step
        let actor = self
            .actors
            .get_actor_token(identity)
            .await
            .map_err(|e| AppError::Exchange(e.to_string()))?;

        let request = ExchangeRequest {
            subject_token: subject_token.to_string(),
            actor_token: Some(actor.token),
            target_audience: None,
            target_scopes: target_scopes.to_vec(),
        };

        let token = self.exchange(&request).await?;
        tracing::info!(
            agent_key,
            identity,
            scopes = ?target_scopes,
            token = %fingerprint(&token),
            "Token exchanged"
        );
        Ok(token)
    }
}
