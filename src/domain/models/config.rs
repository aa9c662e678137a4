//! Orchestrator configuration model.
//!
//! Loaded through figment with layered precedence (defaults, project yaml,
//! local yaml, `ORCH_`-prefixed environment). Top-level fields map 1:1 to
//! the documented environment variables, e.g. `ORCH_DAILY_BUDGET_USD` →
//! `daily_budget_usd`; nested sections use `__` (e.g. `ORCH_SERVER__PORT`).

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Workspace (tenant) identifier
    pub workspace_id: String,
    /// SQLite database URL (`ORCH_DB_URL`)
    pub db_url: String,
    /// Event retention ring size R (`ORCH_EVENT_RETENTION`)
    pub event_retention: usize,
    /// Heartbeat staleness threshold in milliseconds (`ORCH_STALE_THRESHOLD_MS`)
    pub stale_threshold_ms: u64,
    /// Daily budget in USD (`ORCH_DAILY_BUDGET_USD`)
    pub daily_budget_usd: f64,
    /// Monthly budget in USD (`ORCH_MONTHLY_BUDGET_USD`)
    pub monthly_budget_usd: f64,
    /// Maximum concurrently registered agents (`ORCH_MAX_AGENTS`)
    pub max_agents: u32,
    /// Maximum review iterations before terminal failure (`ORCH_REVIEW_MAX_ITER`)
    pub review_max_iter: u32,
    /// Bearer key protecting the control API (`ORCH_API_KEY`)
    pub api_key: String,

    pub server: ServerConfig,
    pub agent: AgentConfig,
    pub dispatcher: DispatcherConfig,
    pub review: ReviewConfig,
    pub ideation: IdeationConfig,
    pub events: EventsConfig,
    pub audit: AuditConfig,
    pub logging: LoggingConfig,
    pub issue_host: IssueHostConfig,
    pub timeouts: TimeoutConfig,
    pub retention: RetentionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace_id: "default".to_string(),
            db_url: "sqlite:.orchestrator/orchestrator.db".to_string(),
            event_retention: 1_000,
            stale_threshold_ms: 150_000,
            daily_budget_usd: 50.0,
            monthly_budget_usd: 1_000.0,
            max_agents: 8,
            review_max_iter: 5,
            api_key: String::new(),
            server: ServerConfig::default(),
            agent: AgentConfig::default(),
            dispatcher: DispatcherConfig::default(),
            review: ReviewConfig::default(),
            ideation: IdeationConfig::default(),
            events: EventsConfig::default(),
            audit: AuditConfig::default(),
            logging: LoggingConfig::default(),
            issue_host: IssueHostConfig::default(),
            timeouts: TimeoutConfig::default(),
            retention: RetentionConfig::default(),
        }
    }
}

/// Control API bind address.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".to_string(), port: 7430 }
    }
}

/// Per-agent supervisor tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Heartbeat cadence in seconds
    pub heartbeat_interval_secs: u64,
    /// Scheduler tick cadence in milliseconds
    pub tick_interval_ms: u64,
    /// Grace window before a stop becomes preemptive, in seconds
    pub stop_grace_secs: u64,
    /// Consecutive same-project failures before the project is failed
    pub max_consecutive_errors: u32,
    /// Up-front estimate per work unit used for admission control, USD
    pub work_estimate_usd: f64,
    /// Optional per-agent daily spend cap, USD
    pub per_agent_daily_cap_usd: Option<f64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30,
            tick_interval_ms: 250,
            stop_grace_secs: 60,
            max_consecutive_errors: 3,
            work_estimate_usd: 0.25,
            per_agent_daily_cap_usd: None,
        }
    }
}

/// Queue and claim tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Claim lease duration in seconds
    pub lease_secs: u64,
    /// Window during which a rework item is reserved for its original
    /// executor before any idle agent may claim it, in seconds
    pub rework_preference_secs: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self { lease_secs: 600, rework_preference_secs: 60 }
    }
}

/// Review workflow tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    /// Operator override allowing reviewer == executor in single-agent
    /// workspaces
    pub allow_self_review: bool,
    /// Quality gates included in the verdict policy
    pub check_lint: bool,
    pub check_tests: bool,
    pub check_type_check: bool,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self { allow_self_review: false, check_lint: true, check_tests: true, check_type_check: true }
    }
}

/// Ideation loop tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdeationConfig {
    /// Per-category cooldown after a successful proposal, in seconds
    pub cooldown_secs: u64,
    /// Initial failure backoff per category, in seconds
    pub base_backoff_secs: u64,
    /// Failure backoff ceiling, in seconds
    pub max_backoff_secs: u64,
    /// Up-front estimate per proposal generation, USD
    pub estimate_usd: f64,
}

impl Default for IdeationConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 300,
            base_backoff_secs: 60,
            max_backoff_secs: 3_600,
            estimate_usd: 0.05,
        }
    }
}

/// Event bus tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Per-subscriber delivery queue cap
    pub subscriber_queue_cap: usize,
    /// Coalescing window for subscriber batching, in milliseconds
    pub batch_window_ms: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { subscriber_queue_cap: 10_000, batch_window_ms: 500 }
    }
}

/// Audit writer tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Bounded in-memory retry buffer size
    pub retry_buffer: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { retry_buffer: 100 }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// One of: trace, debug, info, warn, error
    pub level: String,
    /// One of: json, pretty
    pub format: String,
    /// Optional directory for rotated file output
    pub dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "pretty".to_string(), dir: None }
    }
}

/// Issue-host client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IssueHostConfig {
    /// Base API URL, e.g. `https://api.github.com`
    pub base_url: String,
    /// `owner/repo` the orchestrator works against
    pub repository: String,
    /// API token
    pub token: String,
    /// Client-side rate limit
    pub requests_per_second: u32,
    /// Retry attempts for transient failures
    pub max_retries: u32,
}

impl Default for IssueHostConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.github.com".to_string(),
            repository: String::new(),
            token: String::new(),
            requests_per_second: 5,
            max_retries: 3,
        }
    }
}

/// Per-call deadlines for external work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Model runtime calls, in seconds
    pub model_secs: u64,
    /// Issue host calls, in seconds
    pub issue_host_secs: u64,
    /// Health probes, in seconds
    pub health_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { model_secs: 120, issue_host_secs: 30, health_secs: 2 }
    }
}

/// Durable-state retention windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Event log retention in seconds (floor; the ring size also applies)
    pub event_secs: u64,
    /// Cost ledger retention in days
    pub ledger_days: u32,
    /// Audit record retention in days
    pub audit_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { event_secs: 3_600, ledger_days: 400, audit_days: 400 }
    }
}
