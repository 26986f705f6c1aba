//! Identity backend strategy
//!
//! The multi-step handshake with the identity provider sits behind the
//! [`IdentityBackend`] trait so alternate providers can be plugged in
//! without touching the exchange engine or the orchestrator.

pub mod claims;
pub mod http;
pub mod pkce;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

pub use http::{HttpIdentityBackend, IdentityEndpoints};
pub use pkce::PkcePair;

/// OAuth client credentials used to authenticate a grant
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl ClientCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Identity-specific credentials presented in the authenticate step
#[derive(Clone, PartialEq, Eq)]
pub struct IdentityCredentials {
    pub identity: String,
    pub secret: String,
}

impl std::fmt::Debug for IdentityCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityCredentials")
            .field("identity", &self.identity)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Opaque handle for an in-progress authorization flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowHandle(pub String);

/// Outcome of the first handshake step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowStart {
    /// Continue by authenticating against this flow
    Flow(FlowHandle),
    /// A session was already active and the backend issued a code directly
    DirectCode(String),
}

fn default_expires_in() -> u64 {
    3600
}

/// Token endpoint response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
    #[serde(default)]
    pub scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

/// Short prefix of a token, safe to log
pub fn fingerprint(token: &str) -> String {
    let prefix: String = token.chars().take(8).collect();
    format!("{}...", prefix)
}

impl TokenResponse {
    pub fn scopes(&self) -> Vec<String> {
        self.scope.split_whitespace().map(str::to_string).collect()
    }

    /// Absolute expiry; a lifetime past chrono's range is an auth error
    pub fn expires_at(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        i64::try_from(self.expires_in)
            .ok()
            .and_then(ChronoDuration::try_seconds)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or_else(|| {
                AppError::Auth(format!("Token lifetime out of range: {}s", self.expires_in))
            })
    }
}

/// Subject(+actor) token exchange request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeRequest {
    pub subject_token: String,
    pub actor_token: Option<String>,
    pub target_audience: Option<String>,
    pub target_scopes: Vec<String>,
}

/// Pluggable identity provider
#[async_trait]
pub trait IdentityBackend: Send + Sync {
    /// Step 1 of the actor handshake
    async fn begin_authorization(
        &self,
        client: &ClientCredentials,
        pkce_challenge: &str,
        requested_identity: Option<&str>,
    ) -> Result<FlowStart>;

    /// Step 2: authenticate an identity against a flow, yielding a code
    async fn authenticate(
        &self,
        flow: &FlowHandle,
        credentials: &IdentityCredentials,
    ) -> Result<String>;

    /// Authorization-code grant, optionally bound to an actor token
    async fn exchange_code(
        &self,
        client: &ClientCredentials,
        code: &str,
        pkce_verifier: &str,
        actor_token: Option<&str>,
    ) -> Result<TokenResponse>;

    /// Token-exchange grant
    async fn token_exchange(
        &self,
        client: &ClientCredentials,
        request: &ExchangeRequest,
    ) -> Result<TokenResponse>;

    /// User-facing authorize URL
    fn build_authorize_url(
        &self,
        client: &ClientCredentials,
        scopes: &[String],
        state: &str,
        pkce_challenge: &str,
        requested_actor: &str,
    ) -> Result<String>;
}
