//! Mock model runtime for tests and dry runs.
//!
//! Scripted through small queues: pushed review assessments and proposal
//! drafts are consumed in order, with sensible defaults when the queues
//! run dry. Phase execution cost and scripted failures drive the cost
//! governor and error-escalation paths deterministically.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::domain::error::OrchestratorError;
use crate::domain::models::{
    CategoryTag, Project, ProposalDraft, ReviewAssessment, WorkPhase,
};
use crate::domain::ports::{ModelRuntime, PhaseOutcome};

/// Deterministic, scriptable [`ModelRuntime`].
pub struct MockModelRuntime {
    /// USD charged per executed phase.
    phase_usd: Mutex<f64>,
    /// Tokens charged per executed phase.
    phase_tokens: AtomicU64,
    /// USD charged per review.
    review_usd: Mutex<f64>,
    /// Scripted review assessments, consumed in order.
    reviews: Mutex<VecDeque<ReviewAssessment>>,
    /// Scripted proposal drafts, consumed in order.
    proposals: Mutex<VecDeque<ProposalDraft>>,
    /// Errors returned by upcoming `execute_phase` calls, consumed first.
    phase_failures: Mutex<VecDeque<OrchestratorError>>,
    /// Call counters.
    pub phases_executed: AtomicU64,
    pub reviews_performed: AtomicU64,
    pub proposals_generated: AtomicU64,
}

impl MockModelRuntime {
    pub fn new() -> Self {
        Self {
            phase_usd: Mutex::new(0.0),
            phase_tokens: AtomicU64::new(25),
            review_usd: Mutex::new(0.0),
            reviews: Mutex::new(VecDeque::new()),
            proposals: Mutex::new(VecDeque::new()),
            phase_failures: Mutex::new(VecDeque::new()),
            phases_executed: AtomicU64::new(0),
            reviews_performed: AtomicU64::new(0),
            proposals_generated: AtomicU64::new(0),
        }
    }

    /// Set the USD charged per executed phase.
    pub fn set_phase_cost(&self, usd: f64) {
        *self.phase_usd.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = usd;
    }

    /// Set the USD charged per review.
    pub fn set_review_cost(&self, usd: f64) {
        *self.review_usd.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = usd;
    }

    /// Queue an assessment for the next review call.
    pub fn push_review(&self, assessment: ReviewAssessment) {
        self.reviews
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push_back(assessment);
    }

    /// Queue a draft for the next proposal call.
    pub fn push_proposal(&self, draft: ProposalDraft) {
        self.proposals
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push_back(draft);
    }

    /// Queue an error for the next `execute_phase` call.
    pub fn fail_next_phase(&self, error: OrchestratorError) {
        self.phase_failures
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push_back(error);
    }
}

impl Default for MockModelRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelRuntime for MockModelRuntime {
    async fn execute_phase(
        &self,
        project: &Project,
        phase: WorkPhase,
    ) -> Result<PhaseOutcome, OrchestratorError> {
        if let Some(error) = self
            .phase_failures
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front()
        {
            return Err(error);
        }
        self.phases_executed.fetch_add(1, Ordering::SeqCst);
        let usd = *self.phase_usd.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(PhaseOutcome {
            summary: format!("{} phase for project {}", phase.as_str(), project.number),
            usd,
            tokens: self.phase_tokens.load(Ordering::SeqCst),
        })
    }

    async fn review(&self, project: &Project) -> Result<ReviewAssessment, OrchestratorError> {
        self.reviews_performed.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .reviews
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front();
        let mut assessment = scripted
            .unwrap_or_else(|| ReviewAssessment::all_green(project.acceptance_criteria.len()));
        assessment.usd = *self.review_usd.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(assessment)
    }

    async fn propose(
        &self,
        category: CategoryTag,
        _prompt: &str,
    ) -> Result<ProposalDraft, OrchestratorError> {
        self.proposals_generated.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .proposals
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front();
        Ok(scripted.unwrap_or_else(|| ProposalDraft {
            title: format!("Improve {category} coverage"),
            problem_statement: format!(
                "The repository has an unaddressed gap in the {category} domain."
            ),
            acceptance_criteria: vec![format!("{category} gap is closed and verified")],
        }))
    }
}
