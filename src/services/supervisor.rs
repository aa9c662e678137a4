//! Per-agent supervisor.
//!
//! One supervisor owns one agent: an explicit state machine advanced by a
//! cooperative `tick()`, never blocking longer than one step. Commands
//! (pause/resume/stop/assign) arrive through a mailbox and take effect at
//! the next safe point; heartbeats are emitted on their own cadence; crash
//! and staleness handling releases the claim back to the queue so another
//! agent can pick the work up.
//!
//! When idle, a tick pulls work in priority order: a pending review first
//! (a different agent's pushed project), then a queue claim, then an
//! ideation slot if the queue has drained. Every acquisition is gated by
//! the cost governor.

use chrono::Duration;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;

use crate::domain::error::OrchestratorError;
use crate::domain::models::{
    Agent, AgentId, AgentStatus, CategoryTag, ClaimKind, ClaimTicket, Project, WorkPhase,
};
use crate::domain::ports::{AgentRepository, Clock, ModelRuntime};

use super::audit_log::{AuditLog, AuditOperation};
use super::cost_governor::CostGovernor;
use super::dispatcher::Dispatcher;
use super::event_bus::{EventBus, EventPayload};
use super::ideation_loop::IdeationLoop;
use super::review_engine::ReviewEngine;

/// Supervisor tuning.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Heartbeat cadence
    pub heartbeat_interval: Duration,
    /// Staleness threshold; defaults to 5 × heartbeat interval
    pub stale_threshold: Duration,
    /// Scheduler tick cadence
    pub tick_interval: std::time::Duration,
    /// Grace window before a stop abandons the in-flight step
    pub stop_grace: std::time::Duration,
    /// Consecutive same-project failures before terminal escalation
    pub max_consecutive_errors: u32,
    /// Admission estimate for one work unit, USD
    pub work_estimate_usd: f64,
    /// Deadline for one model-runtime call
    pub model_timeout: std::time::Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::seconds(30),
            stale_threshold: Duration::seconds(150),
            tick_interval: std::time::Duration::from_millis(250),
            stop_grace: std::time::Duration::from_secs(60),
            max_consecutive_errors: 3,
            work_estimate_usd: 0.25,
            model_timeout: std::time::Duration::from_secs(120),
        }
    }
}

/// Command verbs accepted by a running supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentCommand {
    Pause,
    Resume,
    Stop,
    AssignProject(u64),
    AssignReview(u64),
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Advanced an activity or acquired work
    Progressed,
    /// Nothing to do
    Idle,
    /// Terminal; the run loop must exit
    Stopped,
}

/// Current activity of the agent, advanced one step per tick.
enum Activity {
    Idle,
    Working { project: Project, ticket: ClaimTicket, phase: WorkPhase },
    Reviewing { project: Project, ticket: ClaimTicket },
    Ideating { category: CategoryTag, prompt: String },
}

/// Shared collaborators injected into every supervisor.
#[derive(Clone)]
pub struct SupervisorDeps {
    pub dispatcher: Arc<Dispatcher>,
    pub review_engine: Arc<ReviewEngine>,
    pub ideation: Arc<IdeationLoop>,
    pub runtime: Arc<dyn ModelRuntime>,
    pub cost_governor: Arc<CostGovernor>,
    pub agents: Arc<dyn AgentRepository>,
    pub bus: Arc<EventBus>,
    pub audit: Arc<AuditLog>,
    pub clock: Arc<dyn Clock>,
}

/// Handle held by the orchestrator for one spawned supervisor.
pub struct AgentHandle {
    pub record: Arc<RwLock<Agent>>,
    commands: mpsc::UnboundedSender<AgentCommand>,
    stop_flag: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

impl AgentHandle {
    pub fn pause(&self) {
        let _ = self.commands.send(AgentCommand::Pause);
    }

    pub fn resume(&self) {
        let _ = self.commands.send(AgentCommand::Resume);
    }

    /// Request a stop; preemptive only after the grace window.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        let _ = self.commands.send(AgentCommand::Stop);
    }

    pub fn assign_project(&self, number: u64) {
        let _ = self.commands.send(AgentCommand::AssignProject(number));
    }

    pub fn assign_review(&self, number: u64) {
        let _ = self.commands.send(AgentCommand::AssignReview(number));
    }

    /// Whether the supervisor task has exited.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub async fn join(self) {
        let _ = self.join.await;
    }
}

/// Owns one agent's lifecycle.
pub struct AgentSupervisor {
    record: Arc<RwLock<Agent>>,
    commands: mpsc::UnboundedReceiver<AgentCommand>,
    stop_flag: Arc<AtomicBool>,
    deps: SupervisorDeps,
    config: SupervisorConfig,
    activity: Activity,
    consecutive_errors: u32,
    pending_assignment: Option<AgentCommand>,
    stopping: bool,
}

impl AgentSupervisor {
    /// Build a supervisor without spawning it (tests drive `tick` directly).
    pub fn new(
        agent: Agent,
        deps: SupervisorDeps,
        config: SupervisorConfig,
    ) -> (Self, mpsc::UnboundedSender<AgentCommand>, Arc<RwLock<Agent>>, Arc<AtomicBool>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let record = Arc::new(RwLock::new(agent));
        let stop_flag = Arc::new(AtomicBool::new(false));
        let supervisor = Self {
            record: record.clone(),
            commands: rx,
            stop_flag: stop_flag.clone(),
            deps,
            config,
            activity: Activity::Idle,
            consecutive_errors: 0,
            pending_assignment: None,
            stopping: false,
        };
        (supervisor, tx, record, stop_flag)
    }

    /// Spawn the supervisor's run loop and return its handle.
    pub fn spawn(
        agent: Agent,
        deps: SupervisorDeps,
        config: SupervisorConfig,
        shutdown: watch::Receiver<bool>,
    ) -> AgentHandle {
        let (supervisor, commands, record, stop_flag) = Self::new(agent, deps, config);
        let join = tokio::spawn(supervisor.run(shutdown));
        AgentHandle { record, commands, stop_flag, join }
    }

    async fn agent_id(&self) -> AgentId {
        self.record.read().await.id.clone()
    }

    /// Cooperative scheduler loop. Exits when stopped or on orchestrator
    /// shutdown; a stop that does not reach a safe point within the grace
    /// window forcibly abandons the in-flight step and frees the claim.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        enum LoopAction {
            Ticked(TickOutcome),
            GraceExpired,
            Shutdown,
        }

        let mut grace_deadline: Option<tokio::time::Instant> = None;
        loop {
            interval.tick().await;
            if self.stop_flag.load(Ordering::SeqCst) && grace_deadline.is_none() {
                grace_deadline = Some(tokio::time::Instant::now() + self.config.stop_grace);
            }

            let grace = async {
                match grace_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            let action = tokio::select! {
                outcome = self.tick() => LoopAction::Ticked(outcome),
                () = grace => LoopAction::GraceExpired,
                _ = shutdown.changed() => LoopAction::Shutdown,
            };

            match action {
                LoopAction::Ticked(TickOutcome::Stopped) => break,
                LoopAction::Ticked(_) => {}
                LoopAction::GraceExpired => {
                    tracing::warn!("stop grace window expired; abandoning in-flight step");
                    self.wind_down(true).await;
                    break;
                }
                LoopAction::Shutdown => {
                    self.wind_down(false).await;
                    break;
                }
            }
        }
    }

    /// Advance one step: process pending commands, emit a heartbeat if due,
    /// then advance the current activity. Never blocks longer than one
    /// model call.
    pub async fn tick(&mut self) -> TickOutcome {
        self.drain_commands().await;
        if self.stopping {
            let already_stopped = self.record.read().await.status == AgentStatus::Stopped;
            if !already_stopped {
                self.wind_down(false).await;
            }
            return TickOutcome::Stopped;
        }

        let (status, stale) = {
            let now = self.deps.clock.now();
            let record = self.record.read().await;
            let stale_ms = u64::try_from(self.config.stale_threshold.num_milliseconds())
                .unwrap_or(u64::MAX);
            (record.status, record.is_stale(now, stale_ms))
        };

        match status {
            AgentStatus::Stopped => return TickOutcome::Stopped,
            AgentStatus::Paused => {
                // Paused agents stay alive but advance nothing.
                self.maybe_heartbeat(false).await;
                return TickOutcome::Idle;
            }
            AgentStatus::Unresponsive => {
                // Only a stop command gets an unresponsive agent out.
                return TickOutcome::Idle;
            }
            _ => {}
        }

        // Crash-safety: a stalled loop that missed heartbeats beyond the
        // threshold marks itself unresponsive and releases the claim.
        if stale {
            self.go_unresponsive().await;
            return TickOutcome::Idle;
        }

        self.maybe_heartbeat(true).await;

        match std::mem::replace(&mut self.activity, Activity::Idle) {
            Activity::Idle => self.acquire().await,
            Activity::Working { project, ticket, phase } => {
                self.step_work(project, ticket, phase).await
            }
            Activity::Reviewing { project, ticket } => self.step_review(project, ticket).await,
            Activity::Ideating { category, prompt } => self.step_ideation(category, prompt).await,
        }
    }

    // -- commands -----------------------------------------------------------

    async fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                AgentCommand::Pause => self.apply_pause().await,
                AgentCommand::Resume => self.apply_resume().await,
                AgentCommand::Stop => self.stopping = true,
                AgentCommand::AssignProject(_) | AgentCommand::AssignReview(_) => {
                    let idle = self.record.read().await.is_idle();
                    if idle && matches!(self.activity, Activity::Idle) {
                        self.pending_assignment = Some(command);
                    } else {
                        tracing::warn!(?command, "assignment rejected: agent not idle");
                    }
                }
            }
        }
    }

    async fn apply_pause(&mut self) {
        let now = self.deps.clock.now();
        let id = {
            let mut record = self.record.write().await;
            if record.status.is_terminal() || record.status == AgentStatus::Paused {
                return;
            }
            record.set_status(AgentStatus::Paused, now);
            record.id.clone()
        };
        self.persist_record().await;
        self.deps.bus.publish(EventPayload::AgentPaused { agent_id: id.clone() }).await;
        self.deps.audit.record_operation(
            AuditOperation::AgentPaused,
            Some(id),
            None,
            "pause command",
            "ok",
            0,
        );
    }

    async fn apply_resume(&mut self) {
        let now = self.deps.clock.now();
        let id = {
            let mut record = self.record.write().await;
            if record.status != AgentStatus::Paused {
                return;
            }
            record.resume(now);
            record.id.clone()
        };
        self.persist_record().await;
        self.deps.bus.publish(EventPayload::AgentResumed { agent_id: id.clone() }).await;
        self.deps.audit.record_operation(
            AuditOperation::AgentResumed,
            Some(id),
            None,
            "resume command",
            "ok",
            0,
        );
    }

    /// Release everything and mark the agent stopped. `preempted` marks a
    /// grace-window abandon.
    async fn wind_down(&mut self, preempted: bool) {
        let id = self.agent_id().await;

        match std::mem::replace(&mut self.activity, Activity::Idle) {
            Activity::Idle => {}
            Activity::Working { .. } | Activity::Reviewing { .. } => {
                match self.deps.dispatcher.release_agent_claim(&id).await {
                    Ok(Some(released)) if released.kind == ClaimKind::Review => {
                        self.deps.review_engine.requeue_unassigned(released.number).await;
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "failed to release claim on stop"),
                }
            }
            Activity::Ideating { .. } => {
                self.deps.ideation.abandon(&id).await;
            }
        }

        let now = self.deps.clock.now();
        {
            let mut record = self.record.write().await;
            record.current_project = None;
            record.current_phase = None;
            record.set_status(AgentStatus::Stopped, now);
        }
        self.persist_record().await;
        self.deps.bus.publish(EventPayload::AgentStopped { agent_id: id.clone() }).await;
        self.deps.audit.record_operation(
            AuditOperation::AgentStopped,
            Some(id),
            None,
            if preempted { "stopped after grace window" } else { "stopped at safe point" },
            "ok",
            0,
        );
    }

    async fn go_unresponsive(&mut self) {
        let id = self.agent_id().await;
        match self.deps.dispatcher.release_agent_claim(&id).await {
            Ok(Some(released)) if released.kind == ClaimKind::Review => {
                self.deps.review_engine.requeue_unassigned(released.number).await;
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "failed to release claim going unresponsive"),
        }
        self.activity = Activity::Idle;

        let now = self.deps.clock.now();
        {
            let mut record = self.record.write().await;
            record.current_project = None;
            record.current_phase = None;
            record.set_status(AgentStatus::Unresponsive, now);
        }
        self.persist_record().await;
        self.deps.bus.publish(EventPayload::AgentUnresponsive { agent_id: id.clone() }).await;
        self.deps.audit.record_operation(
            AuditOperation::AgentUnresponsive,
            Some(id),
            None,
            "missed heartbeats beyond stale threshold",
            "ok",
            0,
        );
    }

    // -- heartbeat ----------------------------------------------------------

    async fn maybe_heartbeat(&mut self, refresh_lease: bool) {
        let now = self.deps.clock.now();
        let due = {
            let record = self.record.read().await;
            now.signed_duration_since(record.last_heartbeat_at) >= self.config.heartbeat_interval
        };
        if !due {
            return;
        }
        let id = {
            let mut record = self.record.write().await;
            record.heartbeat(now);
            record.id.clone()
        };
        self.persist_record().await;
        self.deps.bus.publish(EventPayload::AgentHeartbeat { agent_id: id }).await;

        if refresh_lease {
            let ticket = match &self.activity {
                Activity::Working { ticket, .. } | Activity::Reviewing { ticket, .. } => {
                    Some((ticket.project_number, ticket.fence))
                }
                _ => None,
            };
            if let Some((number, fence)) = ticket {
                if let Err(e) = self.deps.dispatcher.refresh_lease(number, fence).await {
                    tracing::warn!(number, error = %e, "lease refresh rejected");
                }
            }
        }
    }

    // -- acquisition --------------------------------------------------------

    async fn acquire(&mut self) -> TickOutcome {
        let id = self.agent_id().await;

        // Operator assignment wins over the default pull order.
        if let Some(assignment) = self.pending_assignment.take() {
            return self.acquire_assigned(&id, assignment).await;
        }

        // 1. A pending review from another executor.
        if self
            .deps
            .cost_governor
            .may_start(&id, self.deps.review_engine.estimate_usd())
            .await
            .is_ok()
        {
            match self.deps.review_engine.try_claim_review(&id).await {
                Ok(Some((project, ticket))) => {
                    self.enter_review(&id, project, ticket).await;
                    return TickOutcome::Progressed;
                }
                Ok(None) => {}
                Err(e) => {
                    self.observe_error(&id, None, &e).await;
                    return TickOutcome::Idle;
                }
            }
        }

        // 2. The project queue.
        if self
            .deps
            .cost_governor
            .may_start(&id, self.config.work_estimate_usd)
            .await
            .is_ok()
        {
            match self.deps.dispatcher.try_claim(&id).await {
                Ok(Some((project, ticket))) => {
                    self.enter_work(&id, project, ticket).await;
                    return TickOutcome::Progressed;
                }
                Ok(None) => {}
                Err(e) => {
                    self.observe_error(&id, None, &e).await;
                    return TickOutcome::Idle;
                }
            }
        }

        // 3. Ideation when the queue has drained.
        if self
            .deps
            .cost_governor
            .may_start(&id, self.deps.ideation.estimate_usd())
            .await
            .is_ok()
        {
            if let Some((category, prompt)) = self.deps.ideation.try_begin(&id).await {
                self.enter_ideation(&id, category, prompt).await;
                return TickOutcome::Progressed;
            }
        }

        TickOutcome::Idle
    }

    async fn acquire_assigned(&mut self, id: &AgentId, assignment: AgentCommand) -> TickOutcome {
        match assignment {
            AgentCommand::AssignProject(number) => {
                match self.deps.dispatcher.try_claim_specific(id, number).await {
                    Ok(Some((project, ticket))) => {
                        self.enter_work(id, project, ticket).await;
                        TickOutcome::Progressed
                    }
                    Ok(None) => TickOutcome::Idle,
                    Err(e) => {
                        self.observe_error(id, Some(number), &e).await;
                        TickOutcome::Idle
                    }
                }
            }
            AgentCommand::AssignReview(_) => {
                // Review assignment goes through the engine's eligibility
                // rules regardless of the requested number.
                match self.deps.review_engine.try_claim_review(id).await {
                    Ok(Some((project, ticket))) => {
                        self.enter_review(id, project, ticket).await;
                        TickOutcome::Progressed
                    }
                    Ok(None) => TickOutcome::Idle,
                    Err(e) => {
                        self.observe_error(id, None, &e).await;
                        TickOutcome::Idle
                    }
                }
            }
            _ => TickOutcome::Idle,
        }
    }

    async fn enter_work(&mut self, id: &AgentId, project: Project, ticket: ClaimTicket) {
        let now = self.deps.clock.now();
        {
            let mut record = self.record.write().await;
            record.set_status(AgentStatus::Working, now);
            record.current_project = Some(project.number);
            record.current_phase = Some(WorkPhase::first());
        }
        self.persist_record().await;
        tracing::info!(agent = %id, number = project.number, "claimed project");
        self.activity = Activity::Working { project, ticket, phase: WorkPhase::first() };
    }

    async fn enter_review(&mut self, id: &AgentId, project: Project, ticket: ClaimTicket) {
        let now = self.deps.clock.now();
        {
            let mut record = self.record.write().await;
            record.set_status(AgentStatus::Reviewing, now);
            record.current_project = Some(project.number);
            record.current_phase = None;
        }
        self.persist_record().await;
        tracing::info!(agent = %id, number = project.number, "claimed review");
        self.activity = Activity::Reviewing { project, ticket };
    }

    async fn enter_ideation(&mut self, id: &AgentId, category: CategoryTag, prompt: String) {
        let now = self.deps.clock.now();
        {
            let mut record = self.record.write().await;
            record.set_status(AgentStatus::Ideating, now);
        }
        self.persist_record().await;
        tracing::info!(agent = %id, category = %category, "ideating");
        self.activity = Activity::Ideating { category, prompt };
    }

    // -- activity steps ------------------------------------------------------

    async fn step_work(
        &mut self,
        project: Project,
        ticket: ClaimTicket,
        phase: WorkPhase,
    ) -> TickOutcome {
        let id = self.agent_id().await;

        // Entering the phase validates the fence and refreshes the lease; a
        // stale fence means the lease expired and the work moved on.
        if let Err(e) = self
            .deps
            .dispatcher
            .report_progress(project.number, ticket.fence, &id, phase)
            .await
        {
            self.lose_claim(&id, project.number, &e).await;
            return TickOutcome::Idle;
        }
        {
            let mut record = self.record.write().await;
            record.current_phase = Some(phase);
        }

        let result = tokio::time::timeout(
            self.config.model_timeout,
            self.deps.runtime.execute_phase(&project, phase),
        )
        .await;

        let outcome = match result {
            Err(_) => Err(OrchestratorError::Timeout(self.config.model_timeout)),
            Ok(Err(e)) => Err(e),
            Ok(Ok(outcome)) => Ok(outcome),
        };

        match outcome {
            Ok(outcome) => {
                self.deps
                    .cost_governor
                    .record(&id, Some(project.number), outcome.usd, outcome.tokens)
                    .await;
                self.consecutive_errors = 0;

                if phase == WorkPhase::Push {
                    if let Err(e) = self.finish_push(&id, &project, &ticket).await {
                        self.lose_claim(&id, project.number, &e).await;
                        return TickOutcome::Idle;
                    }
                } else if let Some(next) = phase.next() {
                    self.activity = Activity::Working { project, ticket, phase: next };
                }
                TickOutcome::Progressed
            }
            Err(e) => {
                self.work_error(&id, project, ticket, phase, &e).await;
                TickOutcome::Progressed
            }
        }
    }

    /// Push succeeded: hand the project to the review engine and yield.
    async fn finish_push(
        &mut self,
        id: &AgentId,
        project: &Project,
        ticket: &ClaimTicket,
    ) -> Result<(), OrchestratorError> {
        self.deps.dispatcher.mark_pushed(project.number, ticket.fence, id).await?;
        self.deps.review_engine.on_pushed(project.number).await?;

        let now = self.deps.clock.now();
        {
            let mut record = self.record.write().await;
            record.tasks_completed += 1;
            record.current_project = None;
            record.current_phase = None;
            record.set_status(AgentStatus::Idle, now);
        }
        self.persist_record().await;
        Ok(())
    }

    /// A work step failed. Retry in place until the consecutive-failure
    /// ceiling, then escalate the project to terminal failure.
    async fn work_error(
        &mut self,
        id: &AgentId,
        project: Project,
        ticket: ClaimTicket,
        phase: WorkPhase,
        error: &OrchestratorError,
    ) {
        self.consecutive_errors += 1;
        self.observe_error(id, Some(project.number), error).await;

        if self.consecutive_errors >= self.config.max_consecutive_errors {
            if let Err(e) = self
                .deps
                .dispatcher
                .fail_project(
                    project.number,
                    Some(ticket.fence),
                    &format!("{} consecutive failures: {error}", self.consecutive_errors),
                )
                .await
            {
                tracing::warn!(error = %e, "failed to escalate project failure");
            }
            self.consecutive_errors = 0;
            self.back_to_idle().await;
        } else {
            // Same phase again next tick.
            self.activity = Activity::Working { project, ticket, phase };
        }
    }

    async fn step_review(&mut self, project: Project, ticket: ClaimTicket) -> TickOutcome {
        let id = self.agent_id().await;
        let result = tokio::time::timeout(
            self.config.model_timeout,
            self.deps.runtime.review(&project),
        )
        .await;

        let assessment = match result {
            Err(_) => Err(OrchestratorError::Timeout(self.config.model_timeout)),
            Ok(inner) => inner,
        };

        match assessment {
            Ok(assessment) => {
                self.deps
                    .cost_governor
                    .record(&id, Some(project.number), assessment.usd, assessment.tokens)
                    .await;
                match self
                    .deps
                    .review_engine
                    .submit_verdict(&id, project.number, ticket.fence, &assessment)
                    .await
                {
                    Ok(_verdict) => {
                        self.consecutive_errors = 0;
                        let mut record = self.record.write().await;
                        record.tasks_completed += 1;
                        drop(record);
                    }
                    Err(e) => {
                        self.observe_error(&id, Some(project.number), &e).await;
                    }
                }
                self.back_to_idle().await;
                TickOutcome::Progressed
            }
            Err(e) => {
                self.consecutive_errors += 1;
                self.observe_error(&id, Some(project.number), &e).await;
                if self.consecutive_errors >= self.config.max_consecutive_errors {
                    // A broken reviewer must not sink the project: give the
                    // review back and recover to idle.
                    let _ = self
                        .deps
                        .dispatcher
                        .release_claim(project.number, ticket.fence)
                        .await;
                    self.deps.review_engine.requeue_unassigned(project.number).await;
                    self.consecutive_errors = 0;
                    self.back_to_idle().await;
                } else {
                    self.activity = Activity::Reviewing { project, ticket };
                }
                TickOutcome::Progressed
            }
        }
    }

    async fn step_ideation(&mut self, category: CategoryTag, prompt: String) -> TickOutcome {
        let id = self.agent_id().await;
        let result = tokio::time::timeout(
            self.config.model_timeout,
            self.deps.runtime.propose(category, &prompt),
        )
        .await;

        match result {
            Ok(Ok(draft)) => {
                if let Err(e) = self.deps.ideation.complete(&id, category, draft).await {
                    self.observe_error(&id, None, &e).await;
                }
            }
            Ok(Err(e)) => {
                self.deps.ideation.fail(&id, category, &e.to_string()).await;
                self.observe_error(&id, None, &e).await;
            }
            Err(_) => {
                let e = OrchestratorError::Timeout(self.config.model_timeout);
                self.deps.ideation.fail(&id, category, &e.to_string()).await;
                self.observe_error(&id, None, &e).await;
            }
        }
        self.back_to_idle().await;
        TickOutcome::Progressed
    }

    // -- shared helpers -----------------------------------------------------

    /// The claim was fenced out from under us (lease expiry or release).
    /// Abandon quietly; the work is already back in the queue.
    async fn lose_claim(&mut self, id: &AgentId, number: u64, error: &OrchestratorError) {
        tracing::warn!(agent = %id, number, error = %error, "claim lost; abandoning work");
        self.deps.audit.record_operation(
            AuditOperation::ProjectReleased,
            Some(id.clone()),
            Some(number),
            format!("stale claim abandoned: {error}"),
            "ok",
            0,
        );
        self.consecutive_errors = 0;
        self.back_to_idle().await;
    }

    /// Absorb, count, audit, and surface an error as an `error` event.
    async fn observe_error(
        &mut self,
        id: &AgentId,
        project_number: Option<u64>,
        error: &OrchestratorError,
    ) {
        let now = self.deps.clock.now();
        {
            let mut record = self.record.write().await;
            record.record_error(error.to_string(), now);
        }
        self.persist_record().await;
        self.deps
            .bus
            .publish(EventPayload::Error {
                message: error.to_string(),
                agent_id: Some(id.clone()),
                project_number,
            })
            .await;
    }

    async fn back_to_idle(&mut self) {
        let now = self.deps.clock.now();
        {
            let mut record = self.record.write().await;
            record.current_project = None;
            record.current_phase = None;
            if !record.status.is_terminal() && record.status != AgentStatus::Paused {
                record.set_status(AgentStatus::Idle, now);
            }
        }
        self.persist_record().await;
        self.activity = Activity::Idle;
    }

    /// Supervisor-local persistence failures are absorbed and logged.
    async fn persist_record(&self) {
        let record = self.record.read().await.clone();
        if let Err(e) = self.deps.agents.upsert(&record).await {
            tracing::warn!(agent = %record.id, error = %e, "failed to persist agent record");
        }
    }
}
