//! Orchestrator composition root.
//!
//! Owns the agent registry and the singleton maintenance tasks: lease
//! sweeper, heartbeat scanner, retention sweeper, the ideation wake-up
//! task, and the hard-stop listener that pauses every agent when a budget
//! reaches 100 %. Also carries startup reconciliation so a restarted
//! process recovers stranded claims and re-spawns supervisors.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::domain::error::OrchestratorError;
use crate::domain::models::{
    Agent, AgentId, AgentStatus, CategoryTag, Project, ProjectState,
};
use crate::domain::ports::{
    AgentRepository, Clock, CostLedgerRepository, ModelRuntime, ProjectRepository,
};

use super::audit_log::{AuditLog, AuditOperation, AuditStore};
use super::cost_governor::CostGovernor;
use super::dispatcher::Dispatcher;
use super::event_bus::{EventBus, EventPayload, EventStore};
use super::ideation_loop::IdeationLoop;
use super::review_engine::ReviewEngine;
use super::supervisor::{AgentHandle, AgentSupervisor, SupervisorConfig, SupervisorDeps};

/// Orchestrator-level tuning.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub workspace_id: String,
    pub max_agents: u32,
    /// Cadence of the lease sweeper and heartbeat scanner
    pub sweep_interval: std::time::Duration,
    /// Cadence of the retention sweeper
    pub retention_interval: std::time::Duration,
    /// Event retention floor in seconds
    pub event_retention_secs: u64,
    /// Event ring size (retention keeps the larger of the two)
    pub event_retention_count: u64,
    /// Ledger and audit retention in days
    pub ledger_retention_days: u32,
    pub audit_retention_days: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workspace_id: "default".to_string(),
            max_agents: 8,
            sweep_interval: std::time::Duration::from_secs(1),
            retention_interval: std::time::Duration::from_secs(3_600),
            event_retention_secs: 3_600,
            event_retention_count: 1_000,
            ledger_retention_days: 400,
            audit_retention_days: 400,
        }
    }
}

/// Live status served by the control API.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub workspace_id: String,
    pub agents: Vec<Agent>,
    pub queue_depth: usize,
    pub active_claims: usize,
    pub pending_reviews: usize,
    pub event_sequence: u64,
}

/// Central coordinator wiring every service together.
pub struct Orchestrator {
    config: OrchestratorConfig,
    supervisor_config: SupervisorConfig,
    agents: RwLock<HashMap<AgentId, AgentHandle>>,
    agent_seq: AtomicU64,
    dispatcher: Arc<Dispatcher>,
    review_engine: Arc<ReviewEngine>,
    ideation: Arc<IdeationLoop>,
    cost_governor: Arc<CostGovernor>,
    runtime: Arc<dyn ModelRuntime>,
    agent_repo: Arc<dyn AgentRepository>,
    project_repo: Arc<dyn ProjectRepository>,
    audit_store: Arc<dyn AuditStore>,
    event_store: Arc<dyn EventStore>,
    ledger: Arc<dyn CostLedgerRepository>,
    bus: Arc<EventBus>,
    audit: Arc<AuditLog>,
    clock: Arc<dyn Clock>,
    shutdown: watch::Sender<bool>,
    singletons: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: OrchestratorConfig,
        supervisor_config: SupervisorConfig,
        dispatcher: Arc<Dispatcher>,
        review_engine: Arc<ReviewEngine>,
        ideation: Arc<IdeationLoop>,
        cost_governor: Arc<CostGovernor>,
        runtime: Arc<dyn ModelRuntime>,
        agent_repo: Arc<dyn AgentRepository>,
        project_repo: Arc<dyn ProjectRepository>,
        audit_store: Arc<dyn AuditStore>,
        event_store: Arc<dyn EventStore>,
        ledger: Arc<dyn CostLedgerRepository>,
        bus: Arc<EventBus>,
        audit: Arc<AuditLog>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            config,
            supervisor_config,
            agents: RwLock::new(HashMap::new()),
            agent_seq: AtomicU64::new(0),
            dispatcher,
            review_engine,
            ideation,
            cost_governor,
            runtime,
            agent_repo,
            project_repo,
            audit_store,
            event_store,
            ledger,
            bus,
            audit,
            clock,
            shutdown,
            singletons: Mutex::new(Vec::new()),
        })
    }

    fn supervisor_deps(&self) -> SupervisorDeps {
        SupervisorDeps {
            dispatcher: self.dispatcher.clone(),
            review_engine: self.review_engine.clone(),
            ideation: self.ideation.clone(),
            runtime: self.runtime.clone(),
            cost_governor: self.cost_governor.clone(),
            agents: self.agent_repo.clone(),
            bus: self.bus.clone(),
            audit: self.audit.clone(),
            clock: self.clock.clone(),
        }
    }

    /// Startup: reconcile persisted state, re-spawn supervisors, start the
    /// singleton maintenance tasks.
    pub async fn start(self: &Arc<Self>) -> Result<(), OrchestratorError> {
        self.bus.initialize_sequence_from_store().await;
        self.cost_governor.load_from_ledger().await?;
        let requeued = self.dispatcher.restore().await?;
        let reviews = self.review_engine.restore().await?;
        tracing::info!(requeued, reviews, "startup reconciliation complete");

        // Re-spawn supervisors for every non-stopped agent from a previous
        // process; their claims were reverted above, so they resume idle.
        let now = self.clock.now();
        for mut agent in self.agent_repo.list().await? {
            self.bump_agent_seq(&agent.id);
            if agent.status.is_terminal() {
                continue;
            }
            agent.status = AgentStatus::Idle;
            agent.current_project = None;
            agent.current_phase = None;
            agent.last_heartbeat_at = now;
            agent.updated_at = now;
            self.agent_repo.upsert(&agent).await?;
            self.spawn_supervisor(agent).await;
        }

        self.spawn_singletons().await;
        self.audit.record_operation(
            AuditOperation::SystemStarted,
            None,
            None,
            format!("workspace {}", self.config.workspace_id),
            "ok",
            0,
        );
        Ok(())
    }

    async fn spawn_supervisor(&self, agent: Agent) {
        let id = agent.id.clone();
        let handle = AgentSupervisor::spawn(
            agent,
            self.supervisor_deps(),
            self.supervisor_config.clone(),
            self.shutdown.subscribe(),
        );
        self.agents.write().await.insert(id, handle);
    }

    fn bump_agent_seq(&self, id: &AgentId) {
        if let Some(n) = id.as_str().strip_prefix("agent-").and_then(|s| s.parse::<u64>().ok()) {
            self.agent_seq.fetch_max(n, Ordering::SeqCst);
        }
    }

    async fn spawn_singletons(self: &Arc<Self>) {
        let mut singletons = self.singletons.lock().await;

        // Lease sweeper.
        let this = self.clone();
        let mut shutdown = self.shutdown.subscribe();
        singletons.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.config.sweep_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => this.lease_sweep_once().await,
                    _ = shutdown.changed() => if *shutdown.borrow() { break },
                }
            }
        }));

        // Heartbeat scanner.
        let this = self.clone();
        let mut shutdown = self.shutdown.subscribe();
        singletons.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.config.sweep_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => this.heartbeat_scan_once().await,
                    _ = shutdown.changed() => if *shutdown.borrow() { break },
                }
            }
        }));

        // Retention sweeper.
        let this = self.clone();
        let mut shutdown = self.shutdown.subscribe();
        singletons.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.config.retention_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => this.retention_sweep_once().await,
                    _ = shutdown.changed() => if *shutdown.borrow() { break },
                }
            }
        }));

        // Hard-stop listener: 100 % budget pauses every agent.
        let this = self.clone();
        let mut shutdown = self.shutdown.subscribe();
        let mut events = self.bus.subscribe_live();
        singletons.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = events.recv() => match received {
                        Ok(event) => {
                            if matches!(event.payload, EventPayload::CostHardStop { .. }) {
                                tracing::warn!("budget hard stop; pausing all agents");
                                this.pause_all().await;
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                    _ = shutdown.changed() => if *shutdown.borrow() { break },
                }
            }
        }));

        // Ideation wake-up task.
        singletons.push(tokio::spawn(
            self.ideation.clone().run(self.shutdown.subscribe()),
        ));
    }

    /// One pass of the lease sweeper: expired work claims go back to the
    /// queue; expired review claims re-enter the unassigned review list.
    pub async fn lease_sweep_once(&self) {
        match self.dispatcher.release_expired().await {
            Ok(released) => {
                for claim in released {
                    if claim.kind == crate::domain::models::ClaimKind::Review {
                        self.review_engine.requeue_unassigned(claim.number).await;
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "lease sweep failed"),
        }
        self.cost_governor.sweep().await;
    }

    /// One pass of the heartbeat scanner: agents whose records went stale
    /// (dead supervisor task, crashed worker) are marked unresponsive and
    /// their claims released.
    pub async fn heartbeat_scan_once(&self) {
        let now = self.clock.now();
        let stale_ms = u64::try_from(self.supervisor_config.stale_threshold.num_milliseconds())
            .unwrap_or(u64::MAX);
        let agents = self.agents.read().await;
        for (id, handle) in agents.iter() {
            let stale = {
                let record = handle.record.read().await;
                !record.status.is_terminal()
                    && record.status != AgentStatus::Unresponsive
                    && record.is_stale(now, stale_ms)
            };
            if !stale {
                continue;
            }
            tracing::warn!(agent = %id, "agent went stale; releasing claim");
            match self.dispatcher.release_agent_claim(id).await {
                Ok(Some(released))
                    if released.kind == crate::domain::models::ClaimKind::Review =>
                {
                    self.review_engine.requeue_unassigned(released.number).await;
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(agent = %id, error = %e, "claim release failed"),
            }
            {
                let mut record = handle.record.write().await;
                record.current_project = None;
                record.current_phase = None;
                record.set_status(AgentStatus::Unresponsive, now);
                if let Err(e) = self.agent_repo.upsert(&record).await {
                    tracing::warn!(agent = %id, error = %e, "failed to persist agent record");
                }
            }
            self.bus
                .publish(EventPayload::AgentUnresponsive { agent_id: id.clone() })
                .await;
            self.audit.record_operation(
                AuditOperation::AgentUnresponsive,
                Some(id.clone()),
                None,
                "heartbeat scanner",
                "ok",
                0,
            );
        }
    }

    /// One pass of the retention sweeper: events keep max(1 h, last R)
    /// rows; ledger and audit keep their day windows.
    pub async fn retention_sweep_once(&self) {
        let now = self.clock.now();
        let event_cutoff = now
            - chrono::Duration::seconds(
                i64::try_from(self.config.event_retention_secs).unwrap_or(3_600),
            );
        if let Err(e) = self
            .event_store
            .prune(event_cutoff, self.config.event_retention_count)
            .await
        {
            tracing::warn!(error = %e, "event prune failed");
        }
        if let Err(e) = self
            .ledger
            .prune_before(now - chrono::Duration::days(i64::from(self.config.ledger_retention_days)))
            .await
        {
            tracing::warn!(error = %e, "ledger prune failed");
        }
        if let Err(e) = self
            .audit_store
            .prune_before(now - chrono::Duration::days(i64::from(self.config.audit_retention_days)))
            .await
        {
            tracing::warn!(error = %e, "audit prune failed");
        }
    }

    // -- operator surface ---------------------------------------------------

    /// Register and start a new agent. 409 when at the workspace cap.
    pub async fn add_agent(&self) -> Result<Agent, OrchestratorError> {
        {
            let agents = self.agents.read().await;
            let live = futures::future::join_all(
                agents.values().map(|h| async move { h.record.read().await.status }),
            )
            .await
            .into_iter()
            .filter(|s| !s.is_terminal())
            .count();
            if live >= self.config.max_agents as usize {
                return Err(OrchestratorError::Conflict(format!(
                    "workspace at max concurrent agents ({})",
                    self.config.max_agents
                )));
            }
        }

        let n = self.agent_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let id = AgentId::new(format!("agent-{n}"));
        let agent = Agent::new(id.clone(), self.config.workspace_id.clone(), self.clock.now());
        self.agent_repo.upsert(&agent).await?;
        self.spawn_supervisor(agent.clone()).await;

        self.bus.publish(EventPayload::AgentAdded { agent_id: id.clone() }).await;
        self.audit.record_operation(
            AuditOperation::AgentAdded,
            Some(id),
            None,
            "operator add",
            "ok",
            0,
        );
        Ok(agent)
    }

    pub async fn pause_agent(&self, id: &AgentId) -> Result<(), OrchestratorError> {
        let agents = self.agents.read().await;
        let handle = agents
            .get(id)
            .ok_or_else(|| OrchestratorError::AgentNotFound(id.to_string()))?;
        handle.pause();
        Ok(())
    }

    pub async fn resume_agent(&self, id: &AgentId) -> Result<(), OrchestratorError> {
        let agents = self.agents.read().await;
        let handle = agents
            .get(id)
            .ok_or_else(|| OrchestratorError::AgentNotFound(id.to_string()))?;
        handle.resume();
        Ok(())
    }

    pub async fn stop_agent(&self, id: &AgentId) -> Result<(), OrchestratorError> {
        let agents = self.agents.read().await;
        let handle = agents
            .get(id)
            .ok_or_else(|| OrchestratorError::AgentNotFound(id.to_string()))?;
        handle.stop();
        Ok(())
    }

    /// Pause every agent (cost hard stop, operator shutdown).
    pub async fn pause_all(&self) {
        let agents = self.agents.read().await;
        for handle in agents.values() {
            handle.pause();
        }
    }

    /// External liveness heartbeat (`POST /agents/{id}/heartbeat`).
    /// Rejected once the agent is terminal.
    pub async fn agent_heartbeat(&self, id: &AgentId) -> Result<(), OrchestratorError> {
        let agents = self.agents.read().await;
        let handle = agents
            .get(id)
            .ok_or_else(|| OrchestratorError::AgentNotFound(id.to_string()))?;
        let now = self.clock.now();
        let mut record = handle.record.write().await;
        if record.status.is_terminal() {
            return Err(OrchestratorError::InvalidTransition {
                from: record.status.as_str().to_string(),
                to: "heartbeat".to_string(),
            });
        }
        record.heartbeat(now);
        Ok(())
    }

    /// Operator-created project: allocated a local number, persisted, and
    /// queued immediately.
    pub async fn create_project(
        &self,
        title: &str,
        acceptance_criteria: Vec<String>,
        category: Option<CategoryTag>,
        pinned: bool,
    ) -> Result<Project, OrchestratorError> {
        let now = self.clock.now();
        let number = self.project_repo.next_number().await?;
        let mut project = Project::new(number, title, now);
        project.pinned = pinned;
        project.category_tag = category;
        for criterion in acceptance_criteria {
            project = project.with_criterion(criterion);
        }
        self.project_repo.upsert(&project).await?;

        self.bus
            .publish(EventPayload::ProjectCreated {
                number,
                title: project.title.clone(),
                category,
            })
            .await;
        self.audit.record_operation(
            AuditOperation::ProjectCreated,
            None,
            Some(number),
            project.title.clone(),
            "ok",
            0,
        );
        self.dispatcher.enqueue(number).await
    }

    /// Ingress for external project events from the issue host. Only
    /// `issue.closed` carries an effect today: a non-terminal project whose
    /// backing issue was closed externally is failed.
    pub async fn external_project_event(
        &self,
        event_type: &str,
        number: u64,
    ) -> Result<(), OrchestratorError> {
        self.audit.record_operation(
            AuditOperation::ApiRequest,
            None,
            Some(number),
            format!("external event {event_type}"),
            "accepted",
            0,
        );
        match event_type {
            "issue.closed" => {
                if let Some(project) = self.project_repo.get(number).await? {
                    if !project.state.is_terminal() {
                        self.dispatcher
                            .fail_project(number, None, "issue closed on host")
                            .await?;
                    }
                }
                Ok(())
            }
            "issue.reopened" | "push" | "comment" => Ok(()),
            other => Err(OrchestratorError::InvalidTransition {
                from: format!("external:{other}"),
                to: "project-event".to_string(),
            }),
        }
    }

    pub async fn list_agents(&self) -> Vec<Agent> {
        let agents = self.agents.read().await;
        let mut out = Vec::with_capacity(agents.len());
        for handle in agents.values() {
            out.push(handle.record.read().await.clone());
        }
        out.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        out
    }

    pub async fn list_projects(
        &self,
        state: Option<ProjectState>,
        limit: u32,
    ) -> Result<Vec<Project>, OrchestratorError> {
        Ok(self.project_repo.list(state, limit).await?)
    }

    pub async fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            workspace_id: self.config.workspace_id.clone(),
            agents: self.list_agents().await,
            queue_depth: self.dispatcher.queue_depth().await,
            active_claims: self.dispatcher.active_claims().await,
            pending_reviews: self.review_engine.pending_reviews().await,
            event_sequence: self.bus.current_sequence().0,
        }
    }

    /// Graceful shutdown: stop intake, wind agents down at safe points,
    /// stop singleton loops.
    pub async fn shutdown(&self) {
        self.audit.record_operation(
            AuditOperation::SystemStopped,
            None,
            None,
            format!("workspace {}", self.config.workspace_id),
            "ok",
            0,
        );
        let _ = self.shutdown.send(true);
        let mut singletons = self.singletons.lock().await;
        for handle in singletons.drain(..) {
            handle.abort();
        }
    }
}
