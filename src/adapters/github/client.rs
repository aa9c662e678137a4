//! GitHub issue-host client.
//!
//! Wraps the GitHub REST API v3 for the operations the orchestrator needs:
//! issue creation for new projects, labels, comments, and closing issues on
//! terminal states. Requests are rate limited client-side and retried with
//! exponential backoff on transient failures; every call carries the
//! configured issue-host timeout.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::domain::error::OrchestratorError;
use crate::domain::models::config::IssueHostConfig;
use crate::domain::ports::{CreatedIssue, IssueDraft, IssueHost};

#[derive(Debug, Deserialize)]
struct IssueResponse {
    number: u64,
    html_url: String,
}

/// HTTP client for the GitHub REST API v3.
pub struct GitHubIssueHost {
    http: Client,
    base_url: String,
    repository: String,
    token: String,
    limiter: Arc<DefaultDirectRateLimiter>,
    max_retries: u32,
}

impl GitHubIssueHost {
    pub fn new(config: &IssueHostConfig, timeout: Duration) -> Result<Self, OrchestratorError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("orchestrator")
            .build()
            .map_err(|e| OrchestratorError::External(e.to_string()))?;
        let rps = NonZeroU32::new(config.requests_per_second.max(1))
            .unwrap_or(NonZeroU32::MIN);
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            repository: config.repository.clone(),
            token: config.token.clone(),
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(rps))),
            max_retries: config.max_retries,
        })
    }

    fn issues_url(&self, suffix: &str) -> String {
        format!("{}/repos/{}/issues{suffix}", self.base_url, self.repository)
    }

    /// Run one request under the rate limiter and retry policy.
    async fn send_json(
        &self,
        method: reqwest::Method,
        url: String,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, OrchestratorError> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(500))
            .with_max_elapsed_time(Some(Duration::from_secs(
                u64::from(self.max_retries) * 10,
            )))
            .build();

        let value = backoff::future::retry(policy, || {
            let method = method.clone();
            let url = url.clone();
            let body = body.clone();
            async move {
                self.limiter.until_ready().await;
                let response = self
                    .http
                    .request(method, &url)
                    .bearer_auth(&self.token)
                    .header("Accept", "application/vnd.github+json")
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| {
                        backoff::Error::transient(OrchestratorError::External(e.to_string()))
                    })?;

                let status = response.status();
                if status.is_success() {
                    response.json::<serde_json::Value>().await.map_err(|e| {
                        backoff::Error::permanent(OrchestratorError::External(e.to_string()))
                    })
                } else if status.is_server_error() || status.as_u16() == 429 {
                    Err(backoff::Error::transient(OrchestratorError::External(
                        format!("issue host returned {status}"),
                    )))
                } else {
                    Err(backoff::Error::permanent(OrchestratorError::External(
                        format!("issue host returned {status}"),
                    )))
                }
            }
        })
        .await?;
        Ok(value)
    }
}

#[async_trait]
impl IssueHost for GitHubIssueHost {
    async fn create_issue(&self, draft: &IssueDraft) -> Result<CreatedIssue, OrchestratorError> {
        let value = self
            .send_json(
                reqwest::Method::POST,
                self.issues_url(""),
                json!({
                    "title": draft.title,
                    "body": draft.body,
                    "labels": draft.labels,
                }),
            )
            .await?;
        let issue: IssueResponse = serde_json::from_value(value)
            .map_err(|e| OrchestratorError::External(format!("bad issue response: {e}")))?;
        Ok(CreatedIssue { number: issue.number, url: issue.html_url })
    }

    async fn add_label(&self, number: u64, label: &str) -> Result<(), OrchestratorError> {
        self.send_json(
            reqwest::Method::POST,
            self.issues_url(&format!("/{number}/labels")),
            json!({ "labels": [label] }),
        )
        .await?;
        Ok(())
    }

    async fn comment(&self, number: u64, body: &str) -> Result<(), OrchestratorError> {
        self.send_json(
            reqwest::Method::POST,
            self.issues_url(&format!("/{number}/comments")),
            json!({ "body": body }),
        )
        .await?;
        Ok(())
    }

    async fn close_issue(&self, number: u64) -> Result<(), OrchestratorError> {
        self.send_json(
            reqwest::Method::PATCH,
            self.issues_url(&format!("/{number}")),
            json!({ "state": "closed" }),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_url: &str) -> IssueHostConfig {
        IssueHostConfig {
            base_url: base_url.to_string(),
            repository: "acme/widgets".to_string(),
            token: "test-token".to_string(),
            requests_per_second: 100,
            max_retries: 2,
        }
    }

    #[tokio::test]
    async fn test_create_issue_parses_number_and_url() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/repos/acme/widgets/issues")
            .match_header("authorization", "Bearer test-token")
            .with_status(201)
            .with_body(r#"{"number": 321, "html_url": "https://github.com/acme/widgets/issues/321"}"#)
            .create_async()
            .await;

        let host =
            GitHubIssueHost::new(&config(&server.url()), Duration::from_secs(5)).unwrap();
        let issue = host
            .create_issue(&IssueDraft {
                title: "Add retries".to_string(),
                body: "Transient failures are not retried.".to_string(),
                labels: vec!["category:resilience".to_string()],
            })
            .await
            .unwrap();

        assert_eq!(issue.number, 321);
        assert!(issue.url.ends_with("/321"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_label_and_comment_requests_hit_the_issue_routes() {
        let mut server = mockito::Server::new_async().await;
        let label = server
            .mock("POST", "/repos/acme/widgets/issues/7/labels")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;
        let comment = server
            .mock("POST", "/repos/acme/widgets/issues/7/comments")
            .with_status(201)
            .with_body("{}")
            .create_async()
            .await;

        let host =
            GitHubIssueHost::new(&config(&server.url()), Duration::from_secs(5)).unwrap();
        host.add_label(7, "orchestrator").await.unwrap();
        host.comment(7, "done").await.unwrap();
        label.assert_async().await;
        comment.assert_async().await;
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PATCH", "/repos/acme/widgets/issues/9")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let host =
            GitHubIssueHost::new(&config(&server.url()), Duration::from_secs(5)).unwrap();
        let err = host.close_issue(9).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::External(_)));
        mock.assert_async().await;
    }
}
