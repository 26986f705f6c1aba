//! Per-user OAuth sessions
//!
//! A session holds the PKCE pair for one login and, once the user has
//! consented, the delegated token issued to the orchestrator on their
//! behalf.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::actor::ActorTokenProvider;
use crate::audit::{AuditEntry, AuditLog, AuditOperation};
use crate::error::{AppError, Result};
use crate::identity::claims::subject_from_id_token;
use crate::identity::{fingerprint, ClientCredentials, IdentityBackend, PkcePair};
use crate::models::Session;
use crate::store::Store;
use crate::timeout::bounded;

pub struct SessionStore {
    sessions: Arc<dyn Store<Session>>,
    backend: Arc<dyn IdentityBackend>,
    actors: Arc<ActorTokenProvider>,
    /// Orchestrator's OAuth client
    client: ClientCredentials,
    /// Orchestrator's own actor identity
    orchestrator_identity: String,
    audit: Arc<AuditLog>,
    timeout: Duration,
    /// Held for the whole of a login completion, one per session
    login_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl SessionStore {
    pub fn new(
        sessions: Arc<dyn Store<Session>>,
        backend: Arc<dyn IdentityBackend>,
        actors: Arc<ActorTokenProvider>,
        client: ClientCredentials,
        orchestrator_identity: impl Into<String>,
        audit: Arc<AuditLog>,
        timeout: Duration,
    ) -> Self {
        Self {
            sessions,
            backend,
            actors,
            client,
            orchestrator_identity: orchestrator_identity.into(),
            audit,
            timeout,
            login_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn orchestrator_identity(&self) -> &str {
        &self.orchestrator_identity
    }

    /// New session with fresh PKCE material and no token
    pub async fn create_session(&self) -> Result<Session> {
        let session = Session::new(PkcePair::generate());
        self.sessions
            .put(&session.session_id.to_string(), session.clone())
            .await?;

        tracing::info!(session_id = %session.session_id, "Session created");
        Ok(session)
    }

    pub async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>> {
        self.sessions.get(&session_id.to_string()).await
    }

    async fn require(&self, session_id: Uuid) -> Result<Session> {
        self.get_session(session_id)
            .await?
            .ok_or_else(|| AppError::Auth(format!("Unknown session: {}", session_id)))
    }

    /// Authorize URL bound to this session and to the orchestrator's actor
    pub async fn build_authorization_url(
        &self,
        session_id: Uuid,
        scopes: &[String],
    ) -> Result<String> {
        let session = self.require(session_id).await?;

        self.backend.build_authorize_url(
            &self.client,
            scopes,
            &session.session_id.to_string(),
            &session.pkce_challenge,
            &self.orchestrator_identity,
        )
    }

    /// Redeem the authorization code and store the delegated token
    pub async fn complete_login(&self, session_id: Uuid, code: &str) -> Result<Session> {
        let result = self.complete_login_inner(session_id, code).await;

        let entry = AuditEntry::new(
            AuditOperation::DelegatedTokenObtained,
            self.orchestrator_identity.clone(),
            session_id.to_string(),
        );
        let entry = match &result {
            Ok(session) => entry
                .with_subject(session.user_subject.clone())
                .outcome(&result),
            Err(_) => entry.outcome(&result),
        };
        self.audit.record(entry).await;

        result
    }

    async fn login_lock(&self, session_id: Uuid) -> Arc<Mutex<()>> {
        self.login_locks
            .lock()
            .await
            .entry(session_id)
            .or_default()
            .clone()
    }

    async fn complete_login_inner(&self, session_id: Uuid, code: &str) -> Result<Session> {
        let lock = self.login_lock(session_id).await;
        let _guard = lock.lock().await;

        // Read under the lock so a concurrent completion is seen
        let mut session = self.require(session_id).await?;
        if session.is_logged_in() {
            return Err(AppError::Auth(format!(
                "Session {} already completed login",
                session_id
            )));
        }

        let actor = self.actors.get_actor_token(&self.orchestrator_identity).await?;

        let response = bounded(
            self.timeout,
            "authorization code exchange",
            AppError::Auth,
            self.backend.exchange_code(
                &self.client,
                code,
                &session.pkce_verifier,
                Some(&actor.token),
            ),
        )
        .await?;

        session.token_expiry = Some(response.expires_at(Utc::now())?);
        session.user_subject = response.id_token.as_deref().and_then(subject_from_id_token);
        tracing::debug!(%session_id, token = %fingerprint(&response.access_token), "Code redeemed");
        session.delegated_token = Some(response.access_token);

        self.sessions
            .put(&session_id.to_string(), session.clone())
            .await?;
        self.login_locks.lock().await.remove(&session_id);

        tracing::info!(
            %session_id,
            subject = session.user_subject.as_deref().unwrap_or("unknown"),
            "Delegated token obtained"
        );
        Ok(session)
    }

    /// Live delegated token, or None before login or after expiry
    pub async fn get_delegated_token(&self, session_id: Uuid) -> Result<Option<String>> {
        Ok(self
            .get_session(session_id)
            .await?
            .and_then(|s| s.live_token(Utc::now()).map(str::to_string)))
    }

    /// Drop the session; returns whether it existed
    pub async fn invalidate(&self, session_id: Uuid) -> Result<bool> {
        let removed = self.sessions.delete(&session_id.to_string()).await?;
        self.login_locks.lock().await.remove(&session_id);
        if removed.is_some() {
            tracing::info!(%session_id, "Session invalidated");
        }
        Ok(removed.is_some())
    }
}
