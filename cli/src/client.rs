//! REST client for the Deputy server

use anyhow::{anyhow, Context, Result};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use url::Url;
use uuid::Uuid;

use crate::messages::{AuditEntry, AuthorizeResponse, SessionStatus, WorkflowRequest, WorkflowRun};

pub struct DeputyClient {
    http: Client,
    base: Url,
}

impl DeputyClient {
    pub fn new(server: &str) -> Result<Self> {
        // A trailing slash keeps `join` from dropping the last path segment
        let mut base = Url::parse(server).with_context(|| format!("Invalid server URL: {}", server))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            http: Client::new(),
            base,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .with_context(|| format!("Invalid endpoint path: {}", path))
    }

    async fn read<T: DeserializeOwned>(response: Response) -> Result<T> {
        let status = response.status();
        tracing::debug!(url = %response.url(), %status, "Server response");
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Server returned {}: {}", status, text));
        }
        Ok(response.json().await?)
    }

    pub async fn create_session(&self) -> Result<SessionStatus> {
        let response = self.http.post(self.endpoint("sessions")?).send().await?;
        Self::read(response).await
    }

    pub async fn session_status(&self, session_id: Uuid) -> Result<SessionStatus> {
        let url = self.endpoint(&format!("sessions/{}", session_id))?;
        Self::read(self.http.get(url).send().await?).await
    }

    pub async fn authorization_url(&self, session_id: Uuid, scopes: &[String]) -> Result<String> {
        let mut url = self.endpoint(&format!("sessions/{}/authorize", session_id))?;
        if !scopes.is_empty() {
            url.query_pairs_mut().append_pair("scope", &scopes.join(" "));
        }

        let response: AuthorizeResponse = Self::read(self.http.get(url).send().await?).await?;
        Ok(response.authorization_url)
    }

    /// Deliver an authorization code as the identity provider's redirect would
    pub async fn complete_login(&self, session_id: Uuid, code: &str) -> Result<SessionStatus> {
        let mut url = self.endpoint("callback")?;
        url.query_pairs_mut()
            .append_pair("code", code)
            .append_pair("state", &session_id.to_string());

        Self::read(self.http.get(url).send().await?).await
    }

    pub async fn run_workflow(&self, session_id: Uuid, request: &str) -> Result<WorkflowRun> {
        let url = self.endpoint(&format!("sessions/{}/workflows", session_id))?;
        let response = self
            .http
            .post(url)
            .json(&WorkflowRequest {
                request: request.to_string(),
            })
            .send()
            .await?;

        Self::read(response).await
    }

    pub async fn audit(&self, operation: Option<&str>) -> Result<Vec<AuditEntry>> {
        let mut url = self.endpoint("audit")?;
        if let Some(operation) = operation {
            url.query_pairs_mut().append_pair("operation", operation);
        }

        Self::read(self.http.get(url).send().await?).await
    }
}
