//! Project queue and dispatcher.
//!
//! Authoritative ordered queue of projects. Grants exclusive, fenced,
//! leased claims; resolves concurrent claim races; reverts expired leases
//! back to the queue and rejects stale-fenced writes afterwards.
//!
//! Ordering: rework items first, then operator-pinned items, then FIFO by
//! `queued_at`, ties broken by project number ascending. A rework item is
//! reserved for its original executor for a short preference window before
//! any idle agent may claim it.
//!
//! The queue is guarded by a single critical section covering claim and
//! release; its only work is constant-time updates plus one persistence
//! write. Event publication happens after the lock is dropped.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

use crate::domain::error::OrchestratorError;
use crate::domain::models::{
    AgentId, ClaimKind, ClaimTicket, FenceToken, Project, ProjectState, WorkPhase,
};
use crate::domain::ports::{Clock, ProjectRepository};

use super::audit_log::{AuditLog, AuditOperation};
use super::event_bus::{EventBus, EventPayload};

/// Queue and lease tuning.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Claim lease duration
    pub lease: Duration,
    /// Rework reservation window for the original executor
    pub rework_preference: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self { lease: Duration::seconds(600), rework_preference: Duration::seconds(60) }
    }
}

/// One queued item.
#[derive(Debug, Clone)]
struct QueueEntry {
    number: u64,
    queued_at: DateTime<Utc>,
    pinned: bool,
    rework: bool,
    preferred_agent: Option<AgentId>,
    preferred_until: Option<DateTime<Utc>>,
}

/// A claim released by the lease sweeper.
#[derive(Debug, Clone)]
pub struct ReleasedClaim {
    pub number: u64,
    pub kind: ClaimKind,
    pub agent_id: AgentId,
}

struct Inner {
    queue: Vec<QueueEntry>,
    claims: HashMap<u64, ClaimTicket>,
    latest_fence: HashMap<u64, u64>,
    claimed_branches: HashSet<String>,
}

impl Inner {
    /// Rework first, then pinned, then FIFO, ties by number ascending.
    fn sort_queue(&mut self) {
        self.queue.sort_by(|a, b| {
            b.rework
                .cmp(&a.rework)
                .then(b.pinned.cmp(&a.pinned))
                .then(a.queued_at.cmp(&b.queued_at))
                .then(a.number.cmp(&b.number))
        });
    }

    /// Validate that `fence` is the live fence for `number`.
    fn check_fence(&self, number: u64, fence: FenceToken) -> Result<(), OrchestratorError> {
        let current = self.latest_fence.get(&number).copied().unwrap_or(0);
        match self.claims.get(&number) {
            Some(ticket) if ticket.fence == fence => Ok(()),
            _ => Err(OrchestratorError::FenceConflict { project: number, current_fence: current }),
        }
    }
}

/// Grants exclusive fenced claims over the shared project queue.
pub struct Dispatcher {
    inner: Mutex<Inner>,
    fence_counter: AtomicU64,
    projects: Arc<dyn ProjectRepository>,
    bus: Arc<EventBus>,
    audit: Arc<AuditLog>,
    clock: Arc<dyn Clock>,
    empty_signal: Notify,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        projects: Arc<dyn ProjectRepository>,
        bus: Arc<EventBus>,
        audit: Arc<AuditLog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: Vec::new(),
                claims: HashMap::new(),
                latest_fence: HashMap::new(),
                claimed_branches: HashSet::new(),
            }),
            fence_counter: AtomicU64::new(0),
            projects,
            bus,
            audit,
            clock,
            empty_signal: Notify::new(),
            config,
        }
    }

    /// Signalled whenever a claim attempt finds the queue empty; the
    /// ideation loop waits on this.
    pub fn empty_signal(&self) -> &Notify {
        &self.empty_signal
    }

    /// Startup reconciliation: re-queue everything claimable and revert
    /// projects stranded in `claimed`/`executing` by a previous process.
    pub async fn restore(&self) -> Result<usize, OrchestratorError> {
        let now = self.clock.now();
        let mut restored = 0usize;
        for state in [
            ProjectState::Queued,
            ProjectState::Rework,
            ProjectState::Claimed,
            ProjectState::Executing,
        ] {
            for mut project in self.projects.list(Some(state), u32::MAX).await? {
                if matches!(state, ProjectState::Claimed | ProjectState::Executing) {
                    project.release_count += 1;
                    project.transition(ProjectState::Queued, now)?;
                    self.projects.upsert(&project).await?;
                    tracing::warn!(number = project.number, "reverted stranded claim on startup");
                }
                let rework = state == ProjectState::Rework;
                let mut inner = self.inner.lock().await;
                inner.queue.push(QueueEntry {
                    number: project.number,
                    queued_at: project.queued_at.unwrap_or(now),
                    pinned: project.pinned,
                    rework,
                    preferred_agent: None,
                    preferred_until: None,
                });
                inner.sort_queue();
                restored += 1;
            }
        }
        Ok(restored)
    }

    /// Enqueue a proposed project. Persists the transition and emits
    /// `project.queued`.
    pub async fn enqueue(&self, number: u64) -> Result<Project, OrchestratorError> {
        let now = self.clock.now();
        let mut project = self
            .projects
            .get(number)
            .await?
            .ok_or(OrchestratorError::ProjectNotFound(number))?;
        project.transition(ProjectState::Queued, now)?;
        {
            let mut inner = self.inner.lock().await;
            if inner.queue.iter().any(|e| e.number == number) {
                return Err(OrchestratorError::Conflict(format!(
                    "project {number} is already queued"
                )));
            }
            self.projects.upsert(&project).await?;
            inner.queue.push(QueueEntry {
                number,
                queued_at: now,
                pinned: project.pinned,
                rework: false,
                preferred_agent: None,
                preferred_until: None,
            });
            inner.sort_queue();
        }
        self.bus.publish(EventPayload::ProjectQueued { number }).await;
        self.audit.record_operation(
            AuditOperation::ProjectQueued,
            None,
            Some(number),
            project.title.clone(),
            "ok",
            0,
        );
        Ok(project)
    }

    /// Re-enqueue a rework item with priority, reserved for the original
    /// executor during the preference window.
    pub async fn enqueue_rework(
        &self,
        number: u64,
        preferred: Option<AgentId>,
    ) -> Result<(), OrchestratorError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        inner.queue.push(QueueEntry {
            number,
            queued_at: now,
            pinned: false,
            rework: true,
            preferred_until: preferred.as_ref().map(|_| now + self.config.rework_preference),
            preferred_agent: preferred,
        });
        inner.sort_queue();
        Ok(())
    }

    /// Attempt to claim the head of the queue for `agent_id`.
    ///
    /// Returns `None` (and signals the ideation loop) when nothing is
    /// eligible. Atomically pops the first entry whose state is queued or
    /// rework, transitions it to claimed, and issues a fenced lease.
    pub async fn try_claim(
        &self,
        agent_id: &AgentId,
    ) -> Result<Option<(Project, ClaimTicket)>, OrchestratorError> {
        self.claim_internal(agent_id, None).await
    }

    /// Claim one specific project for `agent_id` (operator assignment).
    pub async fn try_claim_specific(
        &self,
        agent_id: &AgentId,
        number: u64,
    ) -> Result<Option<(Project, ClaimTicket)>, OrchestratorError> {
        self.claim_internal(agent_id, Some(number)).await
    }

    async fn claim_internal(
        &self,
        agent_id: &AgentId,
        wanted: Option<u64>,
    ) -> Result<Option<(Project, ClaimTicket)>, OrchestratorError> {
        let now = self.clock.now();
        let claimed = {
            let mut inner = self.inner.lock().await;

            let position = inner.queue.iter().position(|entry| {
                if wanted.is_some_and(|n| entry.number != n) {
                    return false;
                }
                // Reserved for someone else within the preference window.
                if let (Some(pref), Some(until)) = (&entry.preferred_agent, entry.preferred_until)
                {
                    if pref != agent_id && now < until {
                        return false;
                    }
                }
                // One claim per branch at a time.
                !inner.claimed_branches.contains(&format!("project/{}", entry.number))
            });

            let Some(position) = position else {
                if inner.queue.is_empty() {
                    // notify_one stores a permit, so the ideation loop sees
                    // the signal even if it is not parked yet.
                    self.empty_signal.notify_one();
                }
                return Ok(None);
            };

            let entry = inner.queue.remove(position);
            let mut project = self
                .projects
                .get(entry.number)
                .await?
                .ok_or(OrchestratorError::ProjectNotFound(entry.number))?;
            project.transition(ProjectState::Claimed, now)?;
            project.owner_agent_id = Some(agent_id.clone());

            let fence = FenceToken(self.fence_counter.fetch_add(1, Ordering::SeqCst) + 1);
            let ticket = ClaimTicket::new(
                project.number,
                agent_id.clone(),
                ClaimKind::Work,
                fence,
                now,
                self.config.lease,
            );

            self.projects.upsert(&project).await?;
            inner.claimed_branches.insert(project.branch_name());
            inner.latest_fence.insert(project.number, fence.0);
            inner.claims.insert(project.number, ticket.clone());
            (project, ticket)
        };

        let (project, ticket) = claimed;
        self.bus
            .publish(EventPayload::ProjectClaimed {
                number: project.number,
                agent_id: agent_id.clone(),
                fence: ticket.fence.0,
            })
            .await;
        self.audit.record_operation(
            AuditOperation::ProjectClaimed,
            Some(agent_id.clone()),
            Some(project.number),
            format!("fence {}", ticket.fence),
            "ok",
            0,
        );
        Ok(Some((project, ticket)))
    }

    /// Issue a review claim on an in-review project.
    pub async fn claim_for_review(
        &self,
        number: u64,
        reviewer: &AgentId,
    ) -> Result<ClaimTicket, OrchestratorError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        if inner.claims.contains_key(&number) {
            let current = inner.latest_fence.get(&number).copied().unwrap_or(0);
            return Err(OrchestratorError::FenceConflict { project: number, current_fence: current });
        }
        let fence = FenceToken(self.fence_counter.fetch_add(1, Ordering::SeqCst) + 1);
        let ticket = ClaimTicket::new(
            number,
            reviewer.clone(),
            ClaimKind::Review,
            fence,
            now,
            self.config.lease,
        );
        inner.latest_fence.insert(number, fence.0);
        inner.claims.insert(number, ticket.clone());
        Ok(ticket)
    }

    /// Validate a fence without mutating anything.
    pub async fn check_fence(&self, number: u64, fence: FenceToken) -> Result<(), OrchestratorError> {
        self.inner.lock().await.check_fence(number, fence)
    }

    /// Refresh a claim lease. Called on heartbeat while the holder reports
    /// progress.
    pub async fn refresh_lease(
        &self,
        number: u64,
        fence: FenceToken,
    ) -> Result<(), OrchestratorError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        inner.check_fence(number, fence)?;
        if let Some(ticket) = inner.claims.get_mut(&number) {
            ticket.refresh(now, self.config.lease);
        }
        Ok(())
    }

    /// Record phase progress on an executing claim. Transitions
    /// claimed → executing on the first phase and refreshes the lease.
    pub async fn report_progress(
        &self,
        number: u64,
        fence: FenceToken,
        agent_id: &AgentId,
        phase: WorkPhase,
    ) -> Result<(), OrchestratorError> {
        let now = self.clock.now();
        {
            let mut inner = self.inner.lock().await;
            inner.check_fence(number, fence)?;
            let mut project = self
                .projects
                .get(number)
                .await?
                .ok_or(OrchestratorError::ProjectNotFound(number))?;
            if project.state == ProjectState::Claimed {
                project.transition(ProjectState::Executing, now)?;
            }
            project.phase = Some(phase);
            project.updated_at = now;
            self.projects.upsert(&project).await?;
            if let Some(ticket) = inner.claims.get_mut(&number) {
                ticket.refresh(now, self.config.lease);
            }
        }
        self.bus
            .publish(EventPayload::ProjectProgress {
                number,
                agent_id: agent_id.clone(),
                phase,
            })
            .await;
        Ok(())
    }

    /// Record a successful push: executing → pushed, claim released.
    pub async fn mark_pushed(
        &self,
        number: u64,
        fence: FenceToken,
        agent_id: &AgentId,
    ) -> Result<Project, OrchestratorError> {
        let now = self.clock.now();
        let project = {
            let mut inner = self.inner.lock().await;
            inner.check_fence(number, fence)?;
            let mut project = self
                .projects
                .get(number)
                .await?
                .ok_or(OrchestratorError::ProjectNotFound(number))?;
            project.transition(ProjectState::Pushed, now)?;
            self.projects.upsert(&project).await?;
            inner.claims.remove(&number);
            inner.claimed_branches.remove(&project.branch_name());
            project
        };
        self.bus
            .publish(EventPayload::ProjectPushed {
                number,
                agent_id: agent_id.clone(),
                branch: project.branch_name(),
            })
            .await;
        self.audit.record_operation(
            AuditOperation::ProjectPushed,
            Some(agent_id.clone()),
            Some(number),
            project.branch_name(),
            "ok",
            0,
        );
        Ok(project)
    }

    /// Release a claim without a state change (review completion, stop).
    pub async fn release_claim(
        &self,
        number: u64,
        fence: FenceToken,
    ) -> Result<(), OrchestratorError> {
        let mut inner = self.inner.lock().await;
        inner.check_fence(number, fence)?;
        inner.claims.remove(&number);
        inner.claimed_branches.remove(&format!("project/{number}"));
        Ok(())
    }

    /// Escalate a project to terminal failure, releasing any claim.
    pub async fn fail_project(
        &self,
        number: u64,
        fence: Option<FenceToken>,
        reason: &str,
    ) -> Result<(), OrchestratorError> {
        let now = self.clock.now();
        {
            let mut inner = self.inner.lock().await;
            if let Some(fence) = fence {
                inner.check_fence(number, fence)?;
            }
            let mut project = self
                .projects
                .get(number)
                .await?
                .ok_or(OrchestratorError::ProjectNotFound(number))?;
            project.transition(ProjectState::Failed, now)?;
            self.projects.upsert(&project).await?;
            inner.claims.remove(&number);
            inner.claimed_branches.remove(&format!("project/{number}"));
            inner.queue.retain(|e| e.number != number);
        }
        self.bus
            .publish(EventPayload::ProjectFailed { number, reason: reason.to_string() })
            .await;
        self.audit.record_operation(
            AuditOperation::ProjectFailed,
            None,
            Some(number),
            reason.to_string(),
            "ok",
            0,
        );
        Ok(())
    }

    /// Lease sweeper: revert expired work claims to the queue and surface
    /// expired review claims for reassignment. Stale fences are rejected on
    /// all subsequent writes.
    pub async fn release_expired(&self) -> Result<Vec<ReleasedClaim>, OrchestratorError> {
        let now = self.clock.now();
        let mut released = Vec::new();
        let mut events = Vec::new();

        {
            let mut inner = self.inner.lock().await;
            let expired: Vec<u64> = inner
                .claims
                .iter()
                .filter(|(_, t)| t.is_expired(now))
                .map(|(n, _)| *n)
                .collect();

            for number in expired {
                let Some(ticket) = inner.claims.remove(&number) else { continue };
                inner.claimed_branches.remove(&format!("project/{number}"));

                let Some(mut project) = self.projects.get(number).await? else { continue };
                match ticket.kind {
                    ClaimKind::Work => {
                        if matches!(
                            project.state,
                            ProjectState::Claimed | ProjectState::Executing
                        ) {
                            project.release_count += 1;
                            project.transition(ProjectState::Queued, now)?;
                            self.projects.upsert(&project).await?;
                            inner.queue.push(QueueEntry {
                                number,
                                queued_at: now,
                                pinned: project.pinned,
                                rework: false,
                                preferred_agent: None,
                                preferred_until: None,
                            });
                            inner.sort_queue();
                            events.push(EventPayload::ProjectReleased {
                                number,
                                release_count: project.release_count,
                            });
                        }
                    }
                    ClaimKind::Review => {
                        // No verdict was emitted; the in-flight review is
                        // discarded and a new reviewer gets assigned.
                        project.reviewer_agent_id = None;
                        self.projects.upsert(&project).await?;
                    }
                }
                released.push(ReleasedClaim {
                    number,
                    kind: ticket.kind,
                    agent_id: ticket.agent_id,
                });
            }
        }

        for event in events {
            self.audit.record_operation(
                AuditOperation::ProjectReleased,
                None,
                event.project_number(),
                "lease expired",
                "ok",
                0,
            );
            self.bus.publish(event).await;
        }
        Ok(released)
    }

    /// Force-release the claim held by a specific agent (unresponsive or
    /// stop escalation). Same semantics as lease expiry.
    pub async fn release_agent_claim(
        &self,
        agent_id: &AgentId,
    ) -> Result<Option<ReleasedClaim>, OrchestratorError> {
        let now = self.clock.now();
        let result = {
            let mut inner = self.inner.lock().await;
            let number = inner
                .claims
                .iter()
                .find(|(_, t)| &t.agent_id == agent_id)
                .map(|(n, _)| *n);
            let Some(number) = number else { return Ok(None) };
            let Some(ticket) = inner.claims.remove(&number) else { return Ok(None) };
            inner.claimed_branches.remove(&format!("project/{number}"));

            let Some(mut project) = self.projects.get(number).await? else {
                return Ok(None);
            };
            let mut event = None;
            if ticket.kind == ClaimKind::Work
                && matches!(project.state, ProjectState::Claimed | ProjectState::Executing)
            {
                project.release_count += 1;
                project.transition(ProjectState::Queued, now)?;
                self.projects.upsert(&project).await?;
                inner.queue.push(QueueEntry {
                    number,
                    queued_at: now,
                    pinned: project.pinned,
                    rework: false,
                    preferred_agent: None,
                    preferred_until: None,
                });
                inner.sort_queue();
                event = Some(EventPayload::ProjectReleased {
                    number,
                    release_count: project.release_count,
                });
            } else if project.state == ProjectState::InReview {
                project.reviewer_agent_id = None;
                self.projects.upsert(&project).await?;
            }
            (ReleasedClaim { number, kind: ticket.kind, agent_id: ticket.agent_id }, event)
        };

        let (released, event) = result;
        if let Some(event) = event {
            self.bus.publish(event).await;
        }
        Ok(Some(released))
    }

    /// Number of queued items.
    pub async fn queue_depth(&self) -> usize {
        self.inner.lock().await.queue.len()
    }

    /// Number of active claims (work and review combined).
    pub async fn active_claims(&self) -> usize {
        self.inner.lock().await.claims.len()
    }
}
