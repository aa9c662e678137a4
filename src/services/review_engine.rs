//! Review workflow engine.
//!
//! Owns the project → review → rework state machine. After an executor
//! pushes, the project waits in-review until a different idle agent claims
//! the review. The reviewer validates every acceptance criterion plus the
//! configured quality checks and submits a verdict; failures loop the
//! project back through rework (original executor preferred) until the
//! iteration ceiling, at which point the project fails terminally.

use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::domain::error::OrchestratorError;
use crate::domain::models::{
    AgentId, ClaimTicket, FenceToken, Project, ProjectState, ReviewAssessment, ReviewRecord,
    Verdict,
};
use crate::domain::ports::{Clock, ProjectRepository, ReviewRepository};

use super::audit_log::{AuditLog, AuditOperation};
use super::dispatcher::Dispatcher;
use super::event_bus::{EventBus, EventPayload};

/// Review policy knobs.
#[derive(Debug, Clone)]
pub struct ReviewEngineConfig {
    /// Iteration ceiling before terminal failure
    pub max_iterations: u32,
    /// Operator override for single-agent workspaces
    pub allow_self_review: bool,
    /// Quality gates included in the verdict
    pub check_lint: bool,
    pub check_tests: bool,
    pub check_type_check: bool,
    /// Admission estimate for one review, USD
    pub estimate_usd: f64,
}

impl Default for ReviewEngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            allow_self_review: false,
            check_lint: true,
            check_tests: true,
            check_type_check: true,
            estimate_usd: 0.05,
        }
    }
}

/// Drives review assignment, verdicts, and the rework loop.
pub struct ReviewEngine {
    config: ReviewEngineConfig,
    projects: Arc<dyn ProjectRepository>,
    reviews: Arc<dyn ReviewRepository>,
    dispatcher: Arc<Dispatcher>,
    bus: Arc<EventBus>,
    audit: Arc<AuditLog>,
    clock: Arc<dyn Clock>,
    /// Projects in-review with no assigned reviewer, FIFO.
    pending: Mutex<VecDeque<u64>>,
}

impl ReviewEngine {
    pub fn new(
        config: ReviewEngineConfig,
        projects: Arc<dyn ProjectRepository>,
        reviews: Arc<dyn ReviewRepository>,
        dispatcher: Arc<Dispatcher>,
        bus: Arc<EventBus>,
        audit: Arc<AuditLog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            projects,
            reviews,
            dispatcher,
            bus,
            audit,
            clock,
            pending: Mutex::new(VecDeque::new()),
        }
    }

    /// Admission estimate for one review call.
    pub fn estimate_usd(&self) -> f64 {
        self.config.estimate_usd
    }

    /// Startup reconciliation: projects already in-review wait for a
    /// reviewer again.
    pub async fn restore(&self) -> Result<usize, OrchestratorError> {
        let stranded = self.projects.list(Some(ProjectState::InReview), u32::MAX).await?;
        let mut pending = self.pending.lock().await;
        for mut project in stranded {
            project.reviewer_agent_id = None;
            self.projects.upsert(&project).await?;
            pending.push_back(project.number);
        }
        Ok(pending.len())
    }

    /// An executor finished pushing: move the project into review and wait
    /// for an eligible reviewer.
    pub async fn on_pushed(&self, number: u64) -> Result<(), OrchestratorError> {
        let now = self.clock.now();
        let mut project = self
            .projects
            .get(number)
            .await?
            .ok_or(OrchestratorError::ProjectNotFound(number))?;
        project.transition(ProjectState::InReview, now)?;
        project.reviewer_agent_id = None;
        self.projects.upsert(&project).await?;

        self.pending.lock().await.push_back(number);
        self.bus
            .publish(EventPayload::ProjectInReview { number, reviewer: None })
            .await;
        Ok(())
    }

    /// Number of in-review projects waiting for a reviewer.
    pub async fn pending_reviews(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Put an in-review project back on the unassigned list (reviewer
    /// crash / lease expiry; the discarded review never produced a verdict).
    pub async fn requeue_unassigned(&self, number: u64) {
        let mut pending = self.pending.lock().await;
        if !pending.contains(&number) {
            pending.push_back(number);
        }
    }

    /// Attempt to claim the oldest eligible pending review for `reviewer`.
    ///
    /// Reviewer == executor is disallowed unless the operator forced
    /// self-review; ineligible projects simply stay pending until another
    /// agent asks.
    pub async fn try_claim_review(
        &self,
        reviewer: &AgentId,
    ) -> Result<Option<(Project, ClaimTicket)>, OrchestratorError> {
        let claimed = {
            let mut pending = self.pending.lock().await;
            let mut chosen = None;
            for (idx, &number) in pending.iter().enumerate() {
                let Some(project) = self.projects.get(number).await? else { continue };
                let is_executor = project.owner_agent_id.as_ref() == Some(reviewer);
                if is_executor && !self.config.allow_self_review {
                    continue;
                }
                chosen = Some((idx, project));
                break;
            }
            let Some((idx, mut project)) = chosen else { return Ok(None) };

            let ticket = self.dispatcher.claim_for_review(project.number, reviewer).await?;
            pending.remove(idx);
            project.reviewer_agent_id = Some(reviewer.clone());
            self.projects.upsert(&project).await?;
            (project, ticket)
        };

        let (project, ticket) = claimed;
        self.bus
            .publish(EventPayload::ProjectInReview {
                number: project.number,
                reviewer: Some(reviewer.clone()),
            })
            .await;
        self.audit.record_operation(
            AuditOperation::ReviewAssigned,
            Some(reviewer.clone()),
            Some(project.number),
            format!("iteration {}", project.review_iterations + 1),
            "ok",
            0,
        );
        Ok(Some((project, ticket)))
    }

    /// Apply the verdict policy to a completed assessment and advance the
    /// state machine accordingly.
    pub async fn submit_verdict(
        &self,
        reviewer: &AgentId,
        number: u64,
        fence: FenceToken,
        assessment: &ReviewAssessment,
    ) -> Result<Verdict, OrchestratorError> {
        let now = self.clock.now();
        self.dispatcher.check_fence(number, fence).await?;

        let mut project = self
            .projects
            .get(number)
            .await?
            .ok_or(OrchestratorError::ProjectNotFound(number))?;
        if project.state != ProjectState::InReview {
            return Err(OrchestratorError::InvalidTransition {
                from: project.state.as_str().to_string(),
                to: "review-verdict".to_string(),
            });
        }

        let verdict = self.decide(&project, assessment);
        let iteration = project.review_iterations + 1;

        // Persist the reviewer's per-criterion outcome on the project.
        for (criterion, satisfied) in project
            .acceptance_criteria
            .iter_mut()
            .zip(assessment.criteria_satisfied.iter())
        {
            criterion.satisfied = *satisfied;
        }
        project.review_iterations = iteration;

        let record = ReviewRecord {
            project_number: number,
            reviewer_agent_id: reviewer.clone(),
            iteration,
            findings: assessment.findings.clone(),
            verdict,
            created_at: now,
        };
        self.reviews.append(&record).await?;

        self.bus
            .publish(EventPayload::ReviewVerdict {
                number,
                reviewer: reviewer.clone(),
                verdict,
                iteration,
            })
            .await;
        self.audit.record_operation(
            AuditOperation::ReviewVerdict,
            Some(reviewer.clone()),
            Some(number),
            format!("{verdict} at iteration {iteration}"),
            "ok",
            0,
        );

        match verdict {
            Verdict::Pass => {
                project.transition(ProjectState::Accepted, now)?;
                self.projects.upsert(&project).await?;
                self.dispatcher.release_claim(number, fence).await?;
                self.bus.publish(EventPayload::ProjectAccepted { number }).await;
                self.audit.record_operation(
                    AuditOperation::ProjectAccepted,
                    None,
                    Some(number),
                    format!("after {iteration} review iteration(s)"),
                    "ok",
                    0,
                );
            }
            Verdict::Fail if iteration >= self.config.max_iterations => {
                self.projects.upsert(&project).await?;
                self.dispatcher
                    .fail_project(
                        number,
                        Some(fence),
                        &format!("review iterations exhausted ({iteration})"),
                    )
                    .await?;
            }
            Verdict::Fail => {
                let executor = project.owner_agent_id.clone();
                project.transition(ProjectState::Rework, now)?;
                project.reviewer_agent_id = None;
                self.projects.upsert(&project).await?;
                self.dispatcher.release_claim(number, fence).await?;
                self.dispatcher.enqueue_rework(number, executor).await?;
                self.bus
                    .publish(EventPayload::ProjectRework { number, iteration })
                    .await;
            }
        }
        Ok(verdict)
    }

    /// Pass iff every criterion is satisfied and every enabled quality
    /// check passed.
    fn decide(&self, project: &Project, assessment: &ReviewAssessment) -> Verdict {
        let criteria_ok = project.acceptance_criteria.len() <= assessment.criteria_satisfied.len()
            && assessment.criteria_satisfied[..project.acceptance_criteria.len()]
                .iter()
                .all(|s| *s);
        let checks_ok = (!self.config.check_lint || assessment.lint_passed)
            && (!self.config.check_tests || assessment.tests_passed)
            && (!self.config.check_type_check || assessment.type_check_passed);
        if criteria_ok && checks_ok {
            Verdict::Pass
        } else {
            Verdict::Fail
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::DatabaseError;
    use crate::domain::models::Finding;
    use crate::domain::ports::ManualClock;
    use crate::services::audit_log::{AuditLogConfig, AuditQuery, AuditRecord, AuditStore};
    use crate::services::dispatcher::DispatcherConfig;
    use crate::services::event_bus::EventBusConfig;
    use chrono::{DateTime, Duration, Utc};
    use std::collections::BTreeMap;
    use tokio::sync::Mutex as TokioMutex;

    struct MemProjects {
        rows: TokioMutex<BTreeMap<u64, Project>>,
    }

    #[async_trait::async_trait]
    impl ProjectRepository for MemProjects {
        async fn upsert(&self, project: &Project) -> Result<(), DatabaseError> {
            self.rows.lock().await.insert(project.number, project.clone());
            Ok(())
        }
        async fn get(&self, number: u64) -> Result<Option<Project>, DatabaseError> {
            Ok(self.rows.lock().await.get(&number).cloned())
        }
        async fn list(
            &self,
            state: Option<ProjectState>,
            limit: u32,
        ) -> Result<Vec<Project>, DatabaseError> {
            Ok(self
                .rows
                .lock()
                .await
                .values()
                .filter(|p| state.is_none_or(|s| p.state == s))
                .take(limit as usize)
                .cloned()
                .collect())
        }
        async fn next_number(&self) -> Result<u64, DatabaseError> {
            Ok(self.rows.lock().await.keys().max().copied().unwrap_or(0) + 1)
        }
    }

    struct MemReviews {
        rows: TokioMutex<Vec<ReviewRecord>>,
    }

    #[async_trait::async_trait]
    impl ReviewRepository for MemReviews {
        async fn append(&self, record: &ReviewRecord) -> Result<(), DatabaseError> {
            self.rows.lock().await.push(record.clone());
            Ok(())
        }
        async fn list_for_project(&self, number: u64) -> Result<Vec<ReviewRecord>, DatabaseError> {
            Ok(self
                .rows
                .lock()
                .await
                .iter()
                .filter(|r| r.project_number == number)
                .cloned()
                .collect())
        }
    }

    struct NullAuditStore;

    #[async_trait::async_trait]
    impl AuditStore for NullAuditStore {
        async fn append(&self, _record: &AuditRecord) -> Result<(), DatabaseError> {
            Ok(())
        }
        async fn query(&self, _query: &AuditQuery) -> Result<Vec<AuditRecord>, DatabaseError> {
            Ok(Vec::new())
        }
        async fn prune_before(&self, _cutoff: DateTime<Utc>) -> Result<u64, DatabaseError> {
            Ok(0)
        }
    }

    struct Harness {
        engine: ReviewEngine,
        dispatcher: Arc<Dispatcher>,
        projects: Arc<MemProjects>,
        reviews: Arc<MemReviews>,
        clock: Arc<ManualClock>,
    }

    async fn harness(config: ReviewEngineConfig) -> Harness {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let bus = Arc::new(EventBus::new(EventBusConfig::default(), clock.clone()));
        let (audit, _) =
            AuditLog::spawn(Arc::new(NullAuditStore), AuditLogConfig::default(), clock.clone());
        let projects = Arc::new(MemProjects { rows: TokioMutex::new(BTreeMap::new()) });
        let reviews = Arc::new(MemReviews { rows: TokioMutex::new(Vec::new()) });
        let dispatcher = Arc::new(Dispatcher::new(
            DispatcherConfig::default(),
            projects.clone(),
            bus.clone(),
            audit.clone(),
            clock.clone(),
        ));
        let engine = ReviewEngine::new(
            config,
            projects.clone(),
            reviews.clone(),
            dispatcher.clone(),
            bus,
            audit,
            clock.clone(),
        );
        Harness { engine, dispatcher, projects, reviews, clock }
    }

    fn agent(n: u32) -> AgentId {
        AgentId::new(format!("agent-{n}"))
    }

    /// Drive a project through queue → claim → execute → push by agent 1.
    async fn push_project(h: &Harness, number: u64) {
        let project = Project::new(number, format!("Project {number}"), h.clock.now())
            .with_criterion("readme exists");
        h.projects.upsert(&project).await.unwrap();
        h.dispatcher.enqueue(number).await.unwrap();
        let (_, ticket) = h.dispatcher.try_claim(&agent(1)).await.unwrap().unwrap();
        h.dispatcher
            .report_progress(number, ticket.fence, &agent(1), crate::domain::models::WorkPhase::Plan)
            .await
            .unwrap();
        h.dispatcher.mark_pushed(number, ticket.fence, &agent(1)).await.unwrap();
        h.engine.on_pushed(number).await.unwrap();
    }

    #[tokio::test]
    async fn test_executor_cannot_review_own_project() {
        let h = harness(ReviewEngineConfig::default()).await;
        push_project(&h, 101).await;

        assert!(h.engine.try_claim_review(&agent(1)).await.unwrap().is_none());
        assert_eq!(h.engine.pending_reviews().await, 1);

        let (project, _) = h.engine.try_claim_review(&agent(2)).await.unwrap().unwrap();
        assert_eq!(project.reviewer_agent_id, Some(agent(2)));
        assert_eq!(h.engine.pending_reviews().await, 0);
    }

    #[tokio::test]
    async fn test_self_review_allowed_when_forced() {
        let config = ReviewEngineConfig { allow_self_review: true, ..Default::default() };
        let h = harness(config).await;
        push_project(&h, 101).await;

        assert!(h.engine.try_claim_review(&agent(1)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_pass_verdict_accepts_project() {
        let h = harness(ReviewEngineConfig::default()).await;
        push_project(&h, 101).await;

        let (project, ticket) = h.engine.try_claim_review(&agent(2)).await.unwrap().unwrap();
        let assessment = ReviewAssessment::all_green(project.acceptance_criteria.len());
        let verdict = h
            .engine
            .submit_verdict(&agent(2), 101, ticket.fence, &assessment)
            .await
            .unwrap();
        assert_eq!(verdict, Verdict::Pass);

        let project = h.projects.get(101).await.unwrap().unwrap();
        assert_eq!(project.state, ProjectState::Accepted);
        assert_eq!(project.review_iterations, 1);
        assert!(project.acceptance_criteria[0].satisfied);
        assert_eq!(h.dispatcher.active_claims().await, 0);
    }

    #[tokio::test]
    async fn test_fail_verdict_requeues_rework_with_executor_preference() {
        let h = harness(ReviewEngineConfig::default()).await;
        push_project(&h, 101).await;

        let (_, ticket) = h.engine.try_claim_review(&agent(2)).await.unwrap().unwrap();
        let mut assessment = ReviewAssessment::all_green(1);
        assessment.criteria_satisfied[0] = false;
        assessment.findings.push(Finding::new("readme exists", "no readme found"));

        let verdict = h
            .engine
            .submit_verdict(&agent(2), 101, ticket.fence, &assessment)
            .await
            .unwrap();
        assert_eq!(verdict, Verdict::Fail);

        let project = h.projects.get(101).await.unwrap().unwrap();
        assert_eq!(project.state, ProjectState::Rework);
        assert_eq!(project.review_iterations, 1);

        // Someone else is locked out during the preference window.
        assert!(h.dispatcher.try_claim(&agent(3)).await.unwrap().is_none());
        let (p, _) = h.dispatcher.try_claim(&agent(1)).await.unwrap().unwrap();
        assert_eq!(p.number, 101);

        let records = h.reviews.list_for_project(101).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].verdict, Verdict::Fail);
        assert_eq!(records[0].findings.len(), 1);
    }

    #[tokio::test]
    async fn test_quality_check_failure_fails_verdict() {
        let h = harness(ReviewEngineConfig::default()).await;
        push_project(&h, 101).await;

        let (_, ticket) = h.engine.try_claim_review(&agent(2)).await.unwrap().unwrap();
        let mut assessment = ReviewAssessment::all_green(1);
        assessment.tests_passed = false;

        let verdict = h
            .engine
            .submit_verdict(&agent(2), 101, ticket.fence, &assessment)
            .await
            .unwrap();
        assert_eq!(verdict, Verdict::Fail);
    }

    #[tokio::test]
    async fn test_disabled_check_is_ignored() {
        let config = ReviewEngineConfig { check_tests: false, ..Default::default() };
        let h = harness(config).await;
        push_project(&h, 101).await;

        let (_, ticket) = h.engine.try_claim_review(&agent(2)).await.unwrap().unwrap();
        let mut assessment = ReviewAssessment::all_green(1);
        assessment.tests_passed = false;

        let verdict = h
            .engine
            .submit_verdict(&agent(2), 101, ticket.fence, &assessment)
            .await
            .unwrap();
        assert_eq!(verdict, Verdict::Pass);
    }

    #[tokio::test]
    async fn test_iteration_ceiling_fails_project() {
        let config = ReviewEngineConfig { max_iterations: 2, ..Default::default() };
        let h = harness(config).await;
        push_project(&h, 101).await;

        // Iteration 1: fail → rework → executor re-does the work.
        let (_, ticket) = h.engine.try_claim_review(&agent(2)).await.unwrap().unwrap();
        let mut bad = ReviewAssessment::all_green(1);
        bad.criteria_satisfied[0] = false;
        h.engine.submit_verdict(&agent(2), 101, ticket.fence, &bad).await.unwrap();

        let (_, work) = h.dispatcher.try_claim(&agent(1)).await.unwrap().unwrap();
        h.dispatcher
            .report_progress(101, work.fence, &agent(1), crate::domain::models::WorkPhase::Edit)
            .await
            .unwrap();
        h.dispatcher.mark_pushed(101, work.fence, &agent(1)).await.unwrap();
        h.engine.on_pushed(101).await.unwrap();

        // Iteration 2: fail again → ceiling reached → terminal failure.
        let (_, ticket) = h.engine.try_claim_review(&agent(2)).await.unwrap().unwrap();
        h.engine.submit_verdict(&agent(2), 101, ticket.fence, &bad).await.unwrap();

        let project = h.projects.get(101).await.unwrap().unwrap();
        assert_eq!(project.state, ProjectState::Failed);
        assert_eq!(project.review_iterations, 2);
        assert_eq!(h.dispatcher.active_claims().await, 0);
    }

    #[tokio::test]
    async fn test_stale_fence_verdict_rejected() {
        let h = harness(ReviewEngineConfig::default()).await;
        push_project(&h, 101).await;

        let (_, ticket) = h.engine.try_claim_review(&agent(2)).await.unwrap().unwrap();
        h.clock.advance(Duration::seconds(700));
        h.dispatcher.release_expired().await.unwrap();

        let assessment = ReviewAssessment::all_green(1);
        let err = h
            .engine
            .submit_verdict(&agent(2), 101, ticket.fence, &assessment)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::FenceConflict { .. }));
    }

    #[tokio::test]
    async fn test_restore_requeues_in_review_projects() {
        let h = harness(ReviewEngineConfig::default()).await;
        let mut project = Project::new(7, "stranded review", h.clock.now());
        project.state = ProjectState::InReview;
        project.reviewer_agent_id = Some(agent(4));
        h.projects.upsert(&project).await.unwrap();

        let restored = h.engine.restore().await.unwrap();
        assert_eq!(restored, 1);
        let project = h.projects.get(7).await.unwrap().unwrap();
        assert!(project.reviewer_agent_id.is_none());
        assert_eq!(h.engine.pending_reviews().await, 1);
    }
}
