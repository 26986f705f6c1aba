//! Actor token provider
//!
//! Acquires tokens that prove an agent's own identity. Each acquisition is
//! the three-step handshake: begin an authorization flow, authenticate the
//! identity against it, and redeem the resulting code. Tokens are cached
//! per identity and refreshed lazily near expiry.

use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::audit::{AuditEntry, AuditLog, AuditOperation};
use crate::cache::CredentialCache;
use crate::error::{AppError, Result};
use crate::identity::{
    fingerprint, ClientCredentials, FlowStart, IdentityBackend, IdentityCredentials, PkcePair,
};
use crate::models::ActorToken;
use crate::timeout::bounded;

/// An identity the provider is allowed to acquire tokens for
#[derive(Debug, Clone)]
pub struct IdentityRegistration {
    pub credentials: IdentityCredentials,
    /// OAuth client the handshake runs under
    pub client: ClientCredentials,
}

impl IdentityRegistration {
    pub fn new(
        identity: impl Into<String>,
        secret: impl Into<String>,
        client: ClientCredentials,
    ) -> Self {
        Self {
            credentials: IdentityCredentials {
                identity: identity.into(),
                secret: secret.into(),
            },
            client,
        }
    }

    pub fn identity(&self) -> &str {
        &self.credentials.identity
    }
}

pub struct ActorTokenProvider {
    backend: Arc<dyn IdentityBackend>,
    cache: CredentialCache<ActorToken>,
    registrations: HashMap<String, IdentityRegistration>,
    audit: Arc<AuditLog>,
    timeout: Duration,
}

impl ActorTokenProvider {
    pub fn new(
        backend: Arc<dyn IdentityBackend>,
        registrations: impl IntoIterator<Item = IdentityRegistration>,
        audit: Arc<AuditLog>,
        safety_margin: ChronoDuration,
        timeout: Duration,
    ) -> Self {
        let registrations = registrations
            .into_iter()
            .map(|r| (r.identity().to_string(), r))
            .collect();

        Self {
            backend,
            cache: CredentialCache::new(safety_margin),
            registrations,
            audit,
            timeout,
        }
    }

    /// Cached actor token for `identity`, acquiring one if needed
    pub async fn get_actor_token(&self, identity: &str) -> Result<ActorToken> {
        let registration = self
            .registrations
            .get(identity)
            .cloned()
            .ok_or_else(|| AppError::Auth(format!("Unknown actor identity: {}", identity)))?;

        let backend = self.backend.clone();
        let audit = self.audit.clone();
        let timeout = self.timeout;

        self.cache
            .get_or_create(identity, move || async move {
                let result = acquire(backend.as_ref(), &registration, timeout).await;
                audit
                    .record(
                        AuditEntry::new(
                            AuditOperation::ActorTokenAcquired,
                            registration.identity(),
                            registration.client.client_id.clone(),
                        )
                        .outcome(&result),
                    )
                    .await;
                result
            })
            .await
    }

    /// Forget the cached token for `identity`
    pub fn invalidate(&self, identity: &str) -> Result<()> {
        self.cache.invalidate(identity)
    }
}

/// Run the handshake once. Any failing step aborts with an auth error.
async fn acquire(
    backend: &dyn IdentityBackend,
    registration: &IdentityRegistration,
    timeout: Duration,
) -> Result<ActorToken> {
    let identity = registration.identity();
    let pkce = PkcePair::generate();

    let code = match bounded(
        timeout,
        "begin authorization",
        AppError::Auth,
        backend.begin_authorization(&registration.client, &pkce.challenge, Some(identity)),
    )
    .await?
    {
        FlowStart::DirectCode(code) => {
            tracing::debug!(identity, "Authorization returned a code directly");
            code
        }
        FlowStart::Flow(flow) => {
            bounded(
                timeout,
                "authenticate",
                AppError::Auth,
                backend.authenticate(&flow, &registration.credentials),
            )
            .await?
        }
    };

    let response = bounded(
        timeout,
        "exchange code",
        AppError::Auth,
        backend.exchange_code(&registration.client, &code, &pkce.verifier, None),
    )
    .await?;

    let expires_at = response.expires_at(Utc::now())?;
    tracing::info!(
        identity,
        token = %fingerprint(&response.access_token),
        %expires_at,
        "Actor token acquired"
    );

    Ok(ActorToken {
        token: response.access_token,
        actor_identity: identity.to_string(),
        expires_at,
    })
}
