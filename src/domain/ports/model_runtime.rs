//! Model-runtime port.
//!
//! The language-model backend that performs the actual code edits, reviews,
//! and proposal generation sits behind this interface. A single provider
//! serves a whole work unit; the orchestrator never switches providers
//! mid-session.

use async_trait::async_trait;

use crate::domain::error::OrchestratorError;
use crate::domain::models::{CategoryTag, Project, ProposalDraft, ReviewAssessment, WorkPhase};

/// Result of executing one work phase.
#[derive(Debug, Clone)]
pub struct PhaseOutcome {
    /// One-line summary of what the phase did
    pub summary: String,
    /// Actual spend in USD
    pub usd: f64,
    /// Tokens consumed
    pub tokens: u64,
}

/// Operations the orchestrator delegates to the model backend.
#[async_trait]
pub trait ModelRuntime: Send + Sync {
    /// Execute one phase of a claimed project (plan, edit, test, or push).
    async fn execute_phase(
        &self,
        project: &Project,
        phase: WorkPhase,
    ) -> Result<PhaseOutcome, OrchestratorError>;

    /// Validate a pushed project against its acceptance criteria and
    /// quality checks.
    async fn review(&self, project: &Project) -> Result<ReviewAssessment, OrchestratorError>;

    /// Generate a project proposal for a category.
    async fn propose(
        &self,
        category: CategoryTag,
        prompt: &str,
    ) -> Result<ProposalDraft, OrchestratorError>;
}
