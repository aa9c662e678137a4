//! Project domain model and state machine.
//!
//! A project is a unit of work with acceptance criteria, tracked end-to-end
//! from proposal to acceptance or failure. State transitions outside the
//! machine defined here are rejected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::agent::{AgentId, WorkPhase};
use super::category::CategoryTag;
use crate::domain::error::OrchestratorError;

/// Lifecycle state of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProjectState {
    /// Proposed by ideation, not yet queued
    Proposed,
    /// Waiting in the dispatcher queue
    Queued,
    /// Exclusively claimed by an agent
    Claimed,
    /// The claiming agent is executing work phases
    Executing,
    /// Work pushed to the version-control host
    Pushed,
    /// Awaiting or undergoing review
    InReview,
    /// Review failed; re-queued with priority
    Rework,
    /// Terminal: review passed
    Accepted,
    /// Terminal: escalated failure
    Failed,
}

impl ProjectState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::Queued => "queued",
            Self::Claimed => "claimed",
            Self::Executing => "executing",
            Self::Pushed => "pushed",
            Self::InReview => "in-review",
            Self::Rework => "rework",
            Self::Accepted => "accepted",
            Self::Failed => "failed",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "proposed" => Some(Self::Proposed),
            "queued" => Some(Self::Queued),
            "claimed" => Some(Self::Claimed),
            "executing" => Some(Self::Executing),
            "pushed" => Some(Self::Pushed),
            "in-review" | "in_review" => Some(Self::InReview),
            "rework" => Some(Self::Rework),
            "accepted" => Some(Self::Accepted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Accepted | Self::Failed)
    }

    /// Whether a transition from `self` to `to` is legal.
    ///
    /// Any state may fail; released claims revert to queued; everything else
    /// follows the forward path with the rework loop back through claimed.
    pub fn can_transition(&self, to: Self) -> bool {
        if to == Self::Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, to),
            (Self::Proposed, Self::Queued)
                | (Self::Queued, Self::Claimed)
                | (Self::Claimed, Self::Executing)
                | (Self::Claimed | Self::Executing, Self::Queued) // lease expiry
                | (Self::Executing, Self::Pushed)
                | (Self::Pushed, Self::InReview)
                | (Self::InReview, Self::Accepted)
                | (Self::InReview, Self::Rework)
                | (Self::Rework, Self::Claimed)
        )
    }
}

impl fmt::Display for ProjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One acceptance criterion attached to a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptanceCriterion {
    /// What must hold for the criterion to be satisfied
    pub text: String,
    /// Set by the reviewer
    pub satisfied: bool,
}

impl AcceptanceCriterion {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), satisfied: false }
    }
}

/// A unit of work tracked end-to-end through the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Issue-host number; globally unique within the workspace
    pub number: u64,
    /// Short human-readable title
    pub title: String,
    /// Lifecycle state
    pub state: ProjectState,
    /// Executing agent, while claimed
    pub owner_agent_id: Option<AgentId>,
    /// Assigned reviewer, while in review
    pub reviewer_agent_id: Option<AgentId>,
    /// Execution phase, while executing
    pub phase: Option<WorkPhase>,
    /// Ideation category, when generated by the ideation loop
    pub category_tag: Option<CategoryTag>,
    /// Criteria the reviewer validates
    pub acceptance_criteria: Vec<AcceptanceCriterion>,
    /// Completed review rounds
    pub review_iterations: u32,
    /// Times the claim lease expired and the project was released
    pub release_count: u32,
    /// Operator pinning: prioritized ahead of FIFO order
    pub pinned: bool,
    /// When last enqueued
    pub queued_at: Option<DateTime<Utc>>,
    /// When created
    pub created_at: DateTime<Utc>,
    /// When last updated
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// Create a new proposed project.
    pub fn new(number: u64, title: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            number,
            title: title.into(),
            state: ProjectState::Proposed,
            owner_agent_id: None,
            reviewer_agent_id: None,
            phase: None,
            category_tag: None,
            acceptance_criteria: Vec::new(),
            review_iterations: 0,
            release_count: 0,
            pinned: false,
            queued_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the ideation category.
    pub fn with_category(mut self, category: CategoryTag) -> Self {
        self.category_tag = Some(category);
        self
    }

    /// Add an acceptance criterion.
    pub fn with_criterion(mut self, text: impl Into<String>) -> Self {
        self.acceptance_criteria.push(AcceptanceCriterion::new(text));
        self
    }

    /// Branch name on the version-control host, derived from the number.
    pub fn branch_name(&self) -> String {
        format!("project/{}", self.number)
    }

    /// Transition to a new state, enforcing the state machine.
    pub fn transition(
        &mut self,
        to: ProjectState,
        now: DateTime<Utc>,
    ) -> Result<(), OrchestratorError> {
        if !self.state.can_transition(to) {
            return Err(OrchestratorError::InvalidTransition {
                from: self.state.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        self.state = to;
        self.updated_at = now;
        if to == ProjectState::Queued {
            self.queued_at = Some(now);
            self.owner_agent_id = None;
            self.phase = None;
        }
        if to.is_terminal() {
            self.owner_agent_id = None;
            self.reviewer_agent_id = None;
            self.phase = None;
        }
        Ok(())
    }
}
