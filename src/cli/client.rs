//! REST client used by the operator CLI against a running daemon.

use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

/// CLI-side API failure, classified for exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Denied by the cost governor (exit code 3)
    #[error("budget denied: {0}")]
    Budget(String),

    /// Any other API error (exit code 1)
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// The daemon is unreachable (exit code 1)
    #[error("cannot reach orchestrator at {url}: {message}")]
    Unreachable { url: String, message: String },
}

/// Thin typed wrapper over the control API.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, CliError> {
        let url = format!("{}{path}", self.base_url);
        let mut request = self.http.request(method, &url).bearer_auth(&self.api_key);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await.map_err(|e| CliError::Unreachable {
            url: url.clone(),
            message: e.to_string(),
        })?;

        let status = response.status();
        let value: Value = response.json().await.unwrap_or(Value::Null);
        if status.is_success() {
            return Ok(value);
        }

        let code = value["code"].as_str().unwrap_or_default().to_string();
        let message = value["message"]
            .as_str()
            .map_or_else(|| status.to_string(), ToString::to_string);
        if status == StatusCode::FORBIDDEN && code == "budget" {
            return Err(CliError::Budget(message));
        }
        Err(CliError::Api { status: status.as_u16(), message })
    }

    pub async fn status(&self) -> Result<Value, CliError> {
        self.request(reqwest::Method::GET, "/status", None).await
    }

    pub async fn add_agent(&self) -> Result<Value, CliError> {
        self.request(reqwest::Method::POST, "/agents", None).await
    }

    pub async fn stop_agent(&self, id: &str) -> Result<Value, CliError> {
        self.request(reqwest::Method::POST, &format!("/agents/{id}/stop"), None)
            .await
    }

    pub async fn cost(&self) -> Result<Value, CliError> {
        self.request(reqwest::Method::GET, "/cost", None).await
    }

    pub async fn replay(&self, since: u64) -> Result<Value, CliError> {
        self.request(
            reqwest::Method::GET,
            &format!("/events/replay?since={since}"),
            None,
        )
        .await
    }

    pub async fn shutdown(&self) -> Result<Value, CliError> {
        self.request(reqwest::Method::POST, "/shutdown", None).await
    }
}
