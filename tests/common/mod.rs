//! Shared test harness: in-memory ports and a deterministic stack whose
//! supervisors are ticked manually against a manually advanced clock.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};

use foreman::domain::error::{DatabaseError, OrchestratorError};
use foreman::domain::models::{
    Agent, AgentId, AgentStatus, CostLedgerEntry, Project, ProjectState, ReviewRecord,
};
use foreman::domain::ports::{
    AgentRepository, Clock, CostLedgerRepository, CreatedIssue, IssueDraft, IssueHost,
    ManualClock, ProjectRepository, ProposalRepository, ReviewRepository,
};
use foreman::adapters::substrates::MockModelRuntime;
use foreman::services::{
    AgentCommand, AgentSupervisor, AuditLog, AuditLogConfig, AuditQuery, AuditRecord, AuditStore,
    CostGovernor, CostGovernorConfig, Dispatcher, DispatcherConfig, Event, EventBus,
    EventBusConfig, IdeationLoop, IdeationLoopConfig, ReviewEngine, ReviewEngineConfig,
    SupervisorConfig, SupervisorDeps, TickOutcome,
};

// ---------------------------------------------------------------------------
// In-memory ports
// ---------------------------------------------------------------------------

pub struct MemProjects {
    pub rows: Mutex<BTreeMap<u64, Project>>,
}

impl MemProjects {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { rows: Mutex::new(BTreeMap::new()) })
    }
}

#[async_trait]
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

pub struct MemAgents {
    pub rows: Mutex<HashMap<String, Agent>>,
}

impl MemAgents {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { rows: Mutex::new(HashMap::new()) })
    }
}

#[async_trait]
impl AgentRepository for MemAgents {
    async fn upsert(&self, agent: &Agent) -> Result<(), DatabaseError> {
        self.rows.lock().await.insert(agent.id.to_string(), agent.clone());
        Ok(())
    }
    async fn get(&self, id: &AgentId) -> Result<Option<Agent>, DatabaseError> {
        Ok(self.rows.lock().await.get(id.as_str()).cloned())
    }
    async fn list(&self) -> Result<Vec<Agent>, DatabaseError> {
        Ok(self.rows.lock().await.values().cloned().collect())
    }
    async fn delete(&self, id: &AgentId) -> Result<(), DatabaseError> {
        self.rows.lock().await.remove(id.as_str());
        Ok(())
    }
}

pub struct MemReviews {
    pub rows: Mutex<Vec<ReviewRecord>>,
}

impl MemReviews {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { rows: Mutex::new(Vec::new()) })
    }
}

#[async_trait]
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

pub struct MemLedger {
    pub entries: Mutex<Vec<CostLedgerEntry>>,
}

impl MemLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { entries: Mutex::new(Vec::new()) })
    }
}

#[async_trait]
impl CostLedgerRepository for MemLedger {
    async fn append(&self, entry: &CostLedgerEntry) -> Result<(), DatabaseError> {
        self.entries.lock().await.push(entry.clone());
        Ok(())
    }
    async fn entries_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<CostLedgerEntry>, DatabaseError> {
        Ok(self
            .entries
            .lock()
            .await
            .iter()
            .filter(|e| e.at >= since)
            .cloned()
            .collect())
    }
    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|e| e.at >= cutoff);
        Ok((before - entries.len()) as u64)
    }
}

pub struct MemProposals {
    pub keys: Mutex<HashSet<String>>,
}

impl MemProposals {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { keys: Mutex::new(HashSet::new()) })
    }
}

#[async_trait]
impl ProposalRepository for MemProposals {
    async fn try_record(&self, key: &str) -> Result<bool, DatabaseError> {
        Ok(self.keys.lock().await.insert(key.to_string()))
    }
}

pub struct NullAuditStore;

#[async_trait]
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

/// Issue host that allocates numbers from 100 upward.
pub struct CountingHost {
    pub created: AtomicU64,
}

impl CountingHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { created: AtomicU64::new(0) })
    }
}

#[async_trait]
impl IssueHost for CountingHost {
    async fn create_issue(&self, _draft: &IssueDraft) -> Result<CreatedIssue, OrchestratorError> {
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 100;
        Ok(CreatedIssue { number: n, url: format!("https://issues.example/{n}") })
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

// ---------------------------------------------------------------------------
// Deterministic stack
// ---------------------------------------------------------------------------

/// Knobs that vary per scenario.
#[derive(Debug, Clone)]
pub struct StackConfig {
    pub daily_budget_usd: f64,
    pub monthly_budget_usd: f64,
    pub work_estimate_usd: f64,
    pub review_estimate_usd: f64,
    pub review_max_iterations: u32,
    pub allow_self_review: bool,
    pub lease: Duration,
    pub heartbeat_interval: Duration,
    pub stale_threshold: Duration,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            daily_budget_usd: 50.0,
            monthly_budget_usd: 1_000.0,
            work_estimate_usd: 0.25,
            review_estimate_usd: 0.05,
            review_max_iterations: 5,
            allow_self_review: false,
            lease: Duration::seconds(600),
            heartbeat_interval: Duration::seconds(30),
            stale_threshold: Duration::seconds(150),
        }
    }
}

/// A full service stack with manually ticked supervisors.
pub struct ManualStack {
    pub clock: Arc<ManualClock>,
    pub bus: Arc<EventBus>,
    pub audit: Arc<AuditLog>,
    pub dispatcher: Arc<Dispatcher>,
    pub review_engine: Arc<ReviewEngine>,
    pub ideation: Arc<IdeationLoop>,
    pub cost: Arc<CostGovernor>,
    pub runtime: Arc<MockModelRuntime>,
    pub projects: Arc<MemProjects>,
    pub agents_repo: Arc<MemAgents>,
    pub reviews: Arc<MemReviews>,
    pub ledger: Arc<MemLedger>,
    pub host: Arc<CountingHost>,
    config: StackConfig,
    events: broadcast::Receiver<Event>,
    supervisors: Vec<(String, AgentSupervisor)>,
    mailboxes: HashMap<String, mpsc::UnboundedSender<AgentCommand>>,
    records: HashMap<String, Arc<RwLock<Agent>>>,
}

impl ManualStack {
    pub async fn new(config: StackConfig) -> Self {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let bus = Arc::new(EventBus::new(EventBusConfig::default(), clock.clone()));
        let events = bus.subscribe_live();
        let (audit, _) =
            AuditLog::spawn(Arc::new(NullAuditStore), AuditLogConfig::default(), clock.clone());

        let projects = MemProjects::new();
        let agents_repo = MemAgents::new();
        let reviews = MemReviews::new();
        let ledger = MemLedger::new();
        let host = CountingHost::new();

        let cost = Arc::new(CostGovernor::new(
            CostGovernorConfig {
                daily_budget_usd: config.daily_budget_usd,
                monthly_budget_usd: config.monthly_budget_usd,
                per_agent_daily_cap_usd: None,
            },
            ledger.clone(),
            bus.clone(),
            audit.clone(),
            clock.clone(),
        ));

        let dispatcher = Arc::new(Dispatcher::new(
            DispatcherConfig { lease: config.lease, rework_preference: Duration::seconds(60) },
            projects.clone(),
            bus.clone(),
            audit.clone(),
            clock.clone(),
        ));

        let review_engine = Arc::new(ReviewEngine::new(
            ReviewEngineConfig {
                max_iterations: config.review_max_iterations,
                allow_self_review: config.allow_self_review,
                check_lint: true,
                check_tests: true,
                check_type_check: true,
                estimate_usd: config.review_estimate_usd,
            },
            projects.clone(),
            reviews.clone(),
            dispatcher.clone(),
            bus.clone(),
            audit.clone(),
            clock.clone(),
        ));

        let ideation = Arc::new(IdeationLoop::new(
            IdeationLoopConfig::default(),
            host.clone(),
            MemProposals::new(),
            projects.clone(),
            dispatcher.clone(),
            review_engine.clone(),
            bus.clone(),
            audit.clone(),
            clock.clone(),
        ));

        let runtime = Arc::new(MockModelRuntime::new());

        Self {
            clock,
            bus,
            audit,
            dispatcher,
            review_engine,
            ideation,
            cost,
            runtime,
            projects,
            agents_repo,
            reviews,
            ledger,
            host,
            config,
            events,
            supervisors: Vec::new(),
            mailboxes: HashMap::new(),
            records: HashMap::new(),
        }
    }

    fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            heartbeat_interval: self.config.heartbeat_interval,
            stale_threshold: self.config.stale_threshold,
            tick_interval: std::time::Duration::from_millis(1),
            stop_grace: std::time::Duration::from_secs(60),
            max_consecutive_errors: 3,
            work_estimate_usd: self.config.work_estimate_usd,
            model_timeout: std::time::Duration::from_secs(5),
        }
    }

    fn deps(&self) -> SupervisorDeps {
        SupervisorDeps {
            dispatcher: self.dispatcher.clone(),
            review_engine: self.review_engine.clone(),
            ideation: self.ideation.clone(),
            runtime: self.runtime.clone(),
            cost_governor: self.cost.clone(),
            agents: self.agents_repo.clone(),
            bus: self.bus.clone(),
            audit: self.audit.clone(),
            clock: self.clock.clone(),
        }
    }

    /// Register an agent whose supervisor is ticked manually.
    pub async fn add_agent(&mut self, name: &str) -> AgentId {
        let id = AgentId::new(name);
        let agent = Agent::new(id.clone(), "default", self.clock.now());
        self.agents_repo.upsert(&agent).await.unwrap();
        let (supervisor, tx, record, _flag) =
            AgentSupervisor::new(agent, self.deps(), self.supervisor_config());
        self.supervisors.push((name.to_string(), supervisor));
        self.mailboxes.insert(name.to_string(), tx);
        self.records.insert(name.to_string(), record);
        id
    }

    /// Tick one agent by name.
    pub async fn tick(&mut self, name: &str) -> TickOutcome {
        let supervisor = self
            .supervisors
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, s)| s)
            .expect("unknown agent");
        supervisor.tick().await
    }

    /// Tick every agent once, in registration order.
    pub async fn tick_all(&mut self) {
        for (_, supervisor) in &mut self.supervisors {
            supervisor.tick().await;
        }
    }

    pub fn send(&self, name: &str, command: AgentCommand) {
        self.mailboxes.get(name).expect("unknown agent").send(command).unwrap();
    }

    pub async fn agent_status(&self, name: &str) -> AgentStatus {
        self.records.get(name).expect("unknown agent").read().await.status
    }

    pub async fn project_state(&self, number: u64) -> ProjectState {
        self.projects.get(number).await.unwrap().expect("unknown project").state
    }

    /// Create and enqueue a project with the given criteria.
    pub async fn enqueue_project(&self, number: u64, title: &str, criteria: &[&str]) {
        let mut project = Project::new(number, title, self.clock.now());
        for criterion in criteria {
            project = project.with_criterion(*criterion);
        }
        self.projects.upsert(&project).await.unwrap();
        self.bus
            .publish(foreman::services::EventPayload::ProjectCreated {
                number,
                title: title.to_string(),
                category: None,
            })
            .await;
        self.dispatcher.enqueue(number).await.unwrap();
    }

    /// Drain everything currently buffered on the live event stream.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

// ---------------------------------------------------------------------------
// Live stack: real orchestrator with spawned supervisors
// ---------------------------------------------------------------------------

pub struct MemEventStore {
    pub events: Mutex<Vec<Event>>,
}

impl MemEventStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { events: Mutex::new(Vec::new()) })
    }
}

#[async_trait]
impl foreman::services::EventStore for MemEventStore {
    async fn append(&self, event: &Event) -> Result<(), DatabaseError> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
    async fn latest_sequence(&self) -> Result<Option<u64>, DatabaseError> {
        Ok(self.events.lock().await.last().map(|e| e.seq.0))
    }
    async fn since(&self, since: u64, limit: u32) -> Result<Vec<Event>, DatabaseError> {
        Ok(self
            .events
            .lock()
            .await
            .iter()
            .filter(|e| e.seq.0 > since)
            .take(limit as usize)
            .cloned()
            .collect())
    }
    async fn prune(&self, cutoff: DateTime<Utc>, keep_last: u64) -> Result<u64, DatabaseError> {
        let mut events = self.events.lock().await;
        let latest = events.last().map_or(0, |e| e.seq.0);
        let before = events.len();
        events.retain(|e| e.at >= cutoff || e.seq.0 + keep_last > latest);
        Ok((before - events.len()) as u64)
    }
}

/// A fully wired orchestrator running real supervisor tasks on fast
/// intervals, for timing-based end-to-end scenarios.
pub struct LiveStack {
    pub orchestrator: Arc<foreman::services::Orchestrator>,
    pub bus: Arc<EventBus>,
    pub cost: Arc<CostGovernor>,
    pub runtime: Arc<MockModelRuntime>,
    pub projects: Arc<MemProjects>,
    pub collected: Arc<Mutex<Vec<Event>>>,
}

impl LiveStack {
    pub async fn start(config: StackConfig) -> Self {
        use foreman::domain::ports::SystemClock;
        use foreman::services::{Orchestrator, OrchestratorConfig};

        let clock = Arc::new(SystemClock);
        let bus = Arc::new(EventBus::new(EventBusConfig::default(), clock.clone()));
        let (audit, _) =
            AuditLog::spawn(Arc::new(NullAuditStore), AuditLogConfig::default(), clock.clone());

        let projects = MemProjects::new();
        let agents_repo = MemAgents::new();
        let reviews = MemReviews::new();
        let ledger = MemLedger::new();
        let event_store = MemEventStore::new();
        bus.set_store(event_store.clone()).await;

        let cost = Arc::new(CostGovernor::new(
            CostGovernorConfig {
                daily_budget_usd: config.daily_budget_usd,
                monthly_budget_usd: config.monthly_budget_usd,
                per_agent_daily_cap_usd: None,
            },
            ledger.clone(),
            bus.clone(),
            audit.clone(),
            clock.clone(),
        ));

        let dispatcher = Arc::new(Dispatcher::new(
            DispatcherConfig { lease: config.lease, rework_preference: Duration::seconds(1) },
            projects.clone(),
            bus.clone(),
            audit.clone(),
            clock.clone(),
        ));

        let review_engine = Arc::new(ReviewEngine::new(
            ReviewEngineConfig {
                max_iterations: config.review_max_iterations,
                allow_self_review: config.allow_self_review,
                check_lint: true,
                check_tests: true,
                check_type_check: true,
                estimate_usd: config.review_estimate_usd,
            },
            projects.clone(),
            reviews,
            dispatcher.clone(),
            bus.clone(),
            audit.clone(),
            clock.clone(),
        ));

        let ideation = Arc::new(IdeationLoop::new(
            IdeationLoopConfig::default(),
            CountingHost::new(),
            MemProposals::new(),
            projects.clone(),
            dispatcher.clone(),
            review_engine.clone(),
            bus.clone(),
            audit.clone(),
            clock.clone(),
        ));

        let runtime = Arc::new(MockModelRuntime::new());

        let supervisor_config = SupervisorConfig {
            heartbeat_interval: Duration::seconds(1),
            stale_threshold: Duration::seconds(30),
            tick_interval: std::time::Duration::from_millis(10),
            stop_grace: std::time::Duration::from_secs(5),
            max_consecutive_errors: 3,
            work_estimate_usd: config.work_estimate_usd,
            model_timeout: std::time::Duration::from_secs(5),
        };

        let orchestrator = Orchestrator::new(
            OrchestratorConfig {
                workspace_id: "test".to_string(),
                max_agents: 8,
                sweep_interval: std::time::Duration::from_millis(50),
                retention_interval: std::time::Duration::from_secs(3_600),
                event_retention_secs: 3_600,
                event_retention_count: 1_000,
                ledger_retention_days: 400,
                audit_retention_days: 400,
            },
            supervisor_config,
            dispatcher,
            review_engine,
            ideation,
            cost.clone(),
            runtime.clone(),
            agents_repo,
            projects.clone(),
            Arc::new(NullAuditStore),
            event_store,
            ledger,
            bus.clone(),
            audit,
            clock,
        );
        orchestrator.start().await.unwrap();

        // Collect every event for later assertions.
        let collected = Arc::new(Mutex::new(Vec::new()));
        let mut rx = bus.subscribe_live();
        let sink = collected.clone();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                sink.lock().await.push(event);
            }
        });

        Self { orchestrator, bus, cost, runtime, projects, collected }
    }

    /// Poll until `predicate` holds or the timeout elapses.
    pub async fn wait_until<F, Fut>(&self, timeout: std::time::Duration, mut predicate: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if predicate().await {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "condition not reached within {timeout:?}"
            );
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    }
}

/// Assert that `expected` event types appear in order (as a subsequence)
/// within `events`.
pub fn assert_event_subsequence(events: &[Event], expected: &[&str]) {
    let types: Vec<&str> = events.iter().map(|e| e.payload.event_type()).collect();
    let mut cursor = 0;
    for expected_type in expected {
        match types[cursor..].iter().position(|t| t == expected_type) {
            Some(offset) => cursor += offset + 1,
            None => panic!(
                "event {expected_type:?} not found in order; observed sequence: {types:?}"
            ),
        }
    }
}

/// Count occurrences of an event type.
pub fn count_events(events: &[Event], event_type: &str) -> usize {
    events.iter().filter(|e| e.payload.event_type() == event_type).count()
}
