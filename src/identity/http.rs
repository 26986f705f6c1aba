//! HTTP identity backend - OAuth client for the identity provider

use async_trait::async_trait;
use reqwest::{header::LOCATION, redirect, Client, Response};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use super::{
    ClientCredentials, ExchangeRequest, FlowHandle, FlowStart, IdentityBackend,
    IdentityCredentials, TokenResponse,
};
use crate::error::{AppError, Result};

const TOKEN_TYPE_ACCESS: &str = "urn:ietf:params:oauth:token-type:access_token";
const GRANT_TOKEN_EXCHANGE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
/// base64("BasicAuthenticator:LOCAL")
const BASIC_AUTHENTICATOR_ID: &str = "QmFzaWNBdXRoZW50aWNhdG9yOkxPQ0FM";

/// Identity provider endpoints
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IdentityEndpoints {
    pub authorize_url: String,
    pub authn_url: String,
    pub token_url: String,
    pub callback_url: String,
}

impl IdentityEndpoints {
    /// Conventional endpoint layout under one base URL
    pub fn from_base(base_url: &str, callback_url: impl Into<String>) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            authorize_url: format!("{}/oauth2/authorize", base),
            authn_url: format!("{}/oauth2/authn", base),
            token_url: format!("{}/oauth2/token", base),
            callback_url: callback_url.into(),
        }
    }
}

/// Identity backend speaking OAuth over HTTP
pub struct HttpIdentityBackend {
    client: Client,
    endpoints: IdentityEndpoints,
}

impl HttpIdentityBackend {
    pub fn new(endpoints: IdentityEndpoints, timeout: Duration) -> Result<Self> {
        // Redirects carry the flow id and code; they must be read, not followed
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, endpoints })
    }

    async fn read_token_response(
        response: Response,
        what: &str,
        classify: fn(String) -> AppError,
    ) -> Result<TokenResponse> {
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(classify(format!("{} failed: {} - {}", what, status, text)));
        }

        response
            .json()
            .await
            .map_err(|e| classify(format!("Invalid {} response: {}", what, e)))
    }
}

#[async_trait]
impl IdentityBackend for HttpIdentityBackend {
    async fn begin_authorization(
        &self,
        client: &ClientCredentials,
        pkce_challenge: &str,
        requested_identity: Option<&str>,
    ) -> Result<FlowStart> {
        let mut form = vec![
            ("response_type", "code"),
            ("client_id", client.client_id.as_str()),
            ("scope", "openid"),
            ("redirect_uri", self.endpoints.callback_url.as_str()),
            ("code_challenge", pkce_challenge),
            ("code_challenge_method", "S256"),
            ("response_mode", "direct"),
        ];
        if let Some(identity) = requested_identity {
            form.push(("login_hint", identity));
        }

        tracing::debug!(url = %self.endpoints.authorize_url, "Initiating authorization flow");

        let response = self
            .client
            .post(&self.endpoints.authorize_url)
            .basic_auth(&client.client_id, Some(&client.client_secret))
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| AppError::Auth(format!("Authorize request failed: {}", e)))?;

        let status = response.status();
        if status.is_redirection() {
            let location = location_header(&response)?;
            return query_value(&location, &["flowId", "sessionDataKey"])
                .map(|id| FlowStart::Flow(FlowHandle(id)))
                .ok_or_else(|| AppError::Auth(format!("flowId not found in redirect: {}", location)));
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Auth(format!(
                "Failed to initiate auth flow: {} - {}",
                status, text
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AppError::Auth(format!("Invalid authorize response: {}", e)))?;
        parse_flow_start(&body)
    }

    async fn authenticate(
        &self,
        flow: &FlowHandle,
        credentials: &IdentityCredentials,
    ) -> Result<String> {
        let payload = serde_json::json!({
            "flowId": flow.0,
            "selectedAuthenticator": {
                "authenticatorId": BASIC_AUTHENTICATOR_ID,
                "params": {
                    "username": credentials.identity,
                    "password": credentials.secret,
                }
            }
        });

        tracing::debug!(identity = %credentials.identity, "Authenticating identity against flow");

        let response = self
            .client
            .post(&self.endpoints.authn_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::Auth(format!("Authn request failed: {}", e)))?;

        let status = response.status();
        if status.is_redirection() {
            let location = location_header(&response)?;
            return query_value(&location, &["code"])
                .ok_or_else(|| AppError::Auth(format!("Auth code not found in redirect: {}", location)));
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Auth(format!(
                "Authentication failed: {} - {}",
                status, text
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AppError::Auth(format!("Invalid authn response: {}", e)))?;
        parse_auth_code(&body)
    }

    async fn exchange_code(
        &self,
        client: &ClientCredentials,
        code: &str,
        pkce_verifier: &str,
        actor_token: Option<&str>,
    ) -> Result<TokenResponse> {
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.endpoints.callback_url.as_str()),
            ("code_verifier", pkce_verifier),
        ];
        if let Some(actor) = actor_token {
            form.push(("actor_token", actor));
            form.push(("actor_token_type", TOKEN_TYPE_ACCESS));
        }

        let response = self
            .client
            .post(&self.endpoints.token_url)
            .basic_auth(&client.client_id, Some(&client.client_secret))
            .form(&form)
            .send()
            .await
            .map_err(|e| AppError::Auth(format!("Token request failed: {}", e)))?;

        Self::read_token_response(response, "Authorization code exchange", AppError::Auth).await
    }

    async fn token_exchange(
        &self,
        client: &ClientCredentials,
        request: &ExchangeRequest,
    ) -> Result<TokenResponse> {
        let scope = request.target_scopes.join(" ");
        let mut form = vec![
            ("grant_type", GRANT_TOKEN_EXCHANGE),
            ("subject_token", request.subject_token.as_str()),
            ("subject_token_type", TOKEN_TYPE_ACCESS),
        ];
        if let Some(actor) = &request.actor_token {
            form.push(("actor_token", actor.as_str()));
            form.push(("actor_token_type", TOKEN_TYPE_ACCESS));
        }
        if let Some(audience) = &request.target_audience {
            form.push(("audience", audience.as_str()));
        }
        if !scope.is_empty() {
            form.push(("scope", scope.as_str()));
        }

        let response = self
            .client
            .post(&self.endpoints.token_url)
            .basic_auth(&client.client_id, Some(&client.client_secret))
            .form(&form)
            .send()
            .await
            .map_err(|e| AppError::Exchange(format!("Token exchange request failed: {}", e)))?;

        Self::read_token_response(response, "Token exchange", AppError::Exchange).await
    }

    fn build_authorize_url(
        &self,
        client: &ClientCredentials,
        scopes: &[String],
        state: &str,
        pkce_challenge: &str,
        requested_actor: &str,
    ) -> Result<String> {
        let mut all_scopes: Vec<&str> = scopes.iter().map(String::as_str).collect();
        for extra in ["openid", "profile"] {
            if !all_scopes.contains(&extra) {
                all_scopes.push(extra);
            }
        }
        let scope = all_scopes.join(" ");

        let url = Url::parse_with_params(
            &self.endpoints.authorize_url,
            &[
                ("response_type", "code"),
                ("client_id", client.client_id.as_str()),
                ("scope", scope.as_str()),
                ("redirect_uri", self.endpoints.callback_url.as_str()),
                ("state", state),
                ("code_challenge", pkce_challenge),
                ("code_challenge_method", "S256"),
                ("requested_actor", requested_actor),
            ],
        )
        .map_err(|e| AppError::Config(format!("Invalid authorize URL: {}", e)))?;

        Ok(url.to_string())
    }
}

fn location_header(response: &Response) -> Result<String> {
    response
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| AppError::Auth("Redirect without Location header".to_string()))
}

/// First matching query parameter of a (possibly relative) redirect target
pub(crate) fn query_value(location: &str, names: &[&str]) -> Option<String> {
    let base = Url::parse("http://localhost/").ok()?;
    let url = base.join(location).ok()?;
    names.iter().find_map(|name| {
        url.query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    })
}

pub(crate) fn parse_flow_start(body: &serde_json::Value) -> Result<FlowStart> {
    if body.get("flowStatus").and_then(|s| s.as_str()) == Some("SUCCESS_COMPLETED") {
        let code = body
            .get("code")
            .or_else(|| body.pointer("/authData/code"))
            .and_then(|c| c.as_str());
        if let Some(code) = code {
            return Ok(FlowStart::DirectCode(code.to_string()));
        }
    }

    body.get("flowId")
        .and_then(|f| f.as_str())
        .map(|id| FlowStart::Flow(FlowHandle(id.to_string())))
        .ok_or_else(|| AppError::Auth(format!("flowId not found in response: {}", body)))
}

pub(crate) fn parse_auth_code(body: &serde_json::Value) -> Result<String> {
    let direct = body
        .get("code")
        .or_else(|| body.pointer("/authData/code"))
        .or_else(|| body.get("authorizationCode"))
        .and_then(|c| c.as_str())
        .map(str::to_string);
    if let Some(code) = direct {
        return Ok(code);
    }

    body.get("redirectUrl")
        .and_then(|r| r.as_str())
        .and_then(|r| query_value(r, &["code"]))
        .ok_or_else(|| AppError::Auth(format!("Auth code not found in response: {}", body)))
}
