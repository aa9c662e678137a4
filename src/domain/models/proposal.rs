//! Ideation proposals.
//!
//! Proposals are ephemeral: once a project has been created from one, only
//! the idempotency key survives. The same key never creates a second
//! project.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::agent::AgentId;
use super::category::CategoryTag;

/// Draft returned by the model runtime before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalDraft {
    pub title: String,
    pub problem_statement: String,
    pub acceptance_criteria: Vec<String>,
}

/// A validated proposal awaiting project creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: Uuid,
    pub category: CategoryTag,
    pub generating_agent_id: AgentId,
    pub title: String,
    pub problem_statement: String,
    pub acceptance_criteria: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Proposal {
    /// Validate a draft into a proposal. Fails on an empty title or
    /// problem statement.
    pub fn from_draft(
        draft: ProposalDraft,
        category: CategoryTag,
        agent_id: AgentId,
        now: DateTime<Utc>,
    ) -> Result<Self, String> {
        if draft.title.trim().is_empty() {
            return Err("proposal title is empty".to_string());
        }
        if draft.problem_statement.trim().is_empty() {
            return Err("proposal problem statement is empty".to_string());
        }
        Ok(Self {
            id: Uuid::new_v4(),
            category,
            generating_agent_id: agent_id,
            title: draft.title,
            problem_statement: draft.problem_statement,
            acceptance_criteria: draft.acceptance_criteria,
            created_at: now,
        })
    }

    /// Idempotency key: `(agent, category, created-at bucketed to the hour)`.
    pub fn idempotency_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.generating_agent_id,
            self.category,
            self.created_at.format("%Y-%m-%dT%H")
        )
    }

    /// Issue body rendered for the issue host.
    pub fn issue_body(&self) -> String {
        let mut body = format!("{}\n\n## Acceptance criteria\n", self.problem_statement);
        for criterion in &self.acceptance_criteria {
            body.push_str(&format!("- [ ] {criterion}\n"));
        }
        body
    }
}
