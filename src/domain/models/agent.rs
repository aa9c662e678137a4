//! Agent domain model.
//!
//! An agent is a long-running worker driven by a model runtime, executing
//! one project at a time. Its supervisor owns the state machine; this model
//! is the persisted record shared with the control API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a worker agent (e.g. `agent-3`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Status of a worker agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Waiting for work
    Idle,
    /// Executing a claimed project
    Working,
    /// Validating another agent's pushed project
    Reviewing,
    /// Generating a project proposal
    Ideating,
    /// Suspended by operator or cost hard-stop
    Paused,
    /// Missed heartbeats beyond the stale threshold
    Unresponsive,
    /// Terminal; the supervisor task has exited
    Stopped,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Working => "working",
            Self::Reviewing => "reviewing",
            Self::Ideating => "ideating",
            Self::Paused => "paused",
            Self::Unresponsive => "unresponsive",
            Self::Stopped => "stopped",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "idle" => Some(Self::Idle),
            "working" => Some(Self::Working),
            "reviewing" => Some(Self::Reviewing),
            "ideating" => Some(Self::Ideating),
            "paused" => Some(Self::Paused),
            "unresponsive" => Some(Self::Unresponsive),
            "stopped" => Some(Self::Stopped),
            _ => None,
        }
    }

    /// Terminal statuses accept no further commands or heartbeats.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Phase of project execution an agent is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkPhase {
    Plan,
    Edit,
    Test,
    Push,
}

impl WorkPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Edit => "edit",
            Self::Test => "test",
            Self::Push => "push",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "plan" => Some(Self::Plan),
            "edit" => Some(Self::Edit),
            "test" => Some(Self::Test),
            "push" => Some(Self::Push),
            _ => None,
        }
    }

    /// The first phase of every work unit.
    pub const fn first() -> Self {
        Self::Plan
    }

    /// The phase after this one, or `None` after `Push`.
    pub const fn next(&self) -> Option<Self> {
        match self {
            Self::Plan => Some(Self::Edit),
            Self::Edit => Some(Self::Test),
            Self::Test => Some(Self::Push),
            Self::Push => None,
        }
    }
}

/// Persisted record of a worker agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Unique identifier
    pub id: AgentId,
    /// Owning workspace
    pub workspace_id: String,
    /// Current status
    pub status: AgentStatus,
    /// Project currently claimed (working or reviewing)
    pub current_project: Option<u64>,
    /// Execution phase when working
    pub current_phase: Option<WorkPhase>,
    /// Last observed heartbeat
    pub last_heartbeat_at: DateTime<Utc>,
    /// Projects completed (accepted or pushed) by this agent
    pub tasks_completed: u64,
    /// Total errors observed across this agent's lifetime
    pub error_count: u32,
    /// Most recent error message, if any
    pub last_error: Option<String>,
    /// Status to restore on resume
    pub paused_from: Option<AgentStatus>,
    /// When created
    pub created_at: DateTime<Utc>,
    /// When last updated
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    /// Create a new idle agent.
    pub fn new(id: AgentId, workspace_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            workspace_id: workspace_id.into(),
            status: AgentStatus::Idle,
            current_project: None,
            current_phase: None,
            last_heartbeat_at: now,
            tasks_completed: 0,
            error_count: 0,
            last_error: None,
            paused_from: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a heartbeat.
    pub fn heartbeat(&mut self, now: DateTime<Utc>) {
        self.last_heartbeat_at = now;
        self.updated_at = now;
    }

    /// Whether the agent has missed heartbeats beyond `stale_threshold_ms`.
    pub fn is_stale(&self, now: DateTime<Utc>, stale_threshold_ms: u64) -> bool {
        let elapsed = now.signed_duration_since(self.last_heartbeat_at);
        elapsed.num_milliseconds() > i64::try_from(stale_threshold_ms).unwrap_or(i64::MAX)
    }

    /// Record an error observation.
    pub fn record_error(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.error_count += 1;
        self.last_error = Some(message.into());
        self.updated_at = now;
    }

    /// Move to a new status, remembering the previous one across a pause.
    pub fn set_status(&mut self, status: AgentStatus, now: DateTime<Utc>) {
        if status == AgentStatus::Paused && self.status != AgentStatus::Paused {
            self.paused_from = Some(self.status);
        }
        self.status = status;
        self.updated_at = now;
    }

    /// Restore the pre-pause status. Falls back to idle.
    pub fn resume(&mut self, now: DateTime<Utc>) {
        let previous = self.paused_from.take().unwrap_or(AgentStatus::Idle);
        self.status = previous;
        self.updated_at = now;
    }

    /// Whether the agent can accept a new claim.
    pub const fn is_idle(&self) -> bool {
        matches!(self.status, AgentStatus::Idle) && self.current_project.is_none()
    }
}
