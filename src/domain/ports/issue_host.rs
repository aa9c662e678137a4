//! Issue-host port.
//!
//! The external version-control host (issues, labels, branches, pull
//! requests) is referenced only through this interface. Every call is a
//! suspension point and must carry a timeout in the implementation.

use async_trait::async_trait;

use crate::domain::error::OrchestratorError;

/// Draft of a new issue-backed project.
#[derive(Debug, Clone)]
pub struct IssueDraft {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
}

/// Handle to an issue created on the host.
#[derive(Debug, Clone)]
pub struct CreatedIssue {
    pub number: u64,
    pub url: String,
}

/// Operations the orchestrator needs from the version-control host.
#[async_trait]
pub trait IssueHost: Send + Sync {
    /// Create an issue; its number becomes the project number.
    async fn create_issue(&self, draft: &IssueDraft) -> Result<CreatedIssue, OrchestratorError>;

    /// Add a label to an issue.
    async fn add_label(&self, number: u64, label: &str) -> Result<(), OrchestratorError>;

    /// Post a comment on an issue.
    async fn comment(&self, number: u64, body: &str) -> Result<(), OrchestratorError>;

    /// Close an issue (project reached a terminal state).
    async fn close_issue(&self, number: u64) -> Result<(), OrchestratorError>;
}

/// No-op host for workspaces that run without an external issue tracker
/// (project numbers are then allocated locally).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullIssueHost;

#[async_trait]
impl IssueHost for NullIssueHost {
    async fn create_issue(&self, _draft: &IssueDraft) -> Result<CreatedIssue, OrchestratorError> {
        Err(OrchestratorError::External("no issue host configured".to_string()))
    }

    async fn add_label(&self, _number: u64, _label: &str) -> Result<(), OrchestratorError> {
        Ok(())
    }

    async fn comment(&self, _number: u64, _body: &str) -> Result<(), OrchestratorError> {
        Ok(())
    }

    async fn close_issue(&self, _number: u64) -> Result<(), OrchestratorError> {
        Ok(())
    }
}
