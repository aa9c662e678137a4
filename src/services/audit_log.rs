//! Audit logging service.
//!
//! Fire-and-forget durable record of every orchestration event. Records are
//! handed to a background writer over an unbounded channel so the calling
//! path never blocks. On persistence failure, records accumulate in a
//! bounded retry buffer (oldest dropped with a warning when full) and are
//! flushed opportunistically after the next successful write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::domain::error::DatabaseError;
use crate::domain::models::AgentId;
use crate::domain::ports::Clock;

/// Kind of orchestration operation being audited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOperation {
    AgentAdded,
    AgentPaused,
    AgentResumed,
    AgentStopped,
    AgentUnresponsive,
    AgentHeartbeat,
    ProjectCreated,
    ProjectQueued,
    ProjectClaimed,
    ProjectProgress,
    ProjectPushed,
    ProjectReleased,
    ProjectAccepted,
    ProjectFailed,
    ReviewAssigned,
    ReviewVerdict,
    IdeationAttempt,
    CostRecorded,
    CostDenied,
    EventPublished,
    ApiRequest,
    SystemStarted,
    SystemStopped,
}

impl AuditOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AgentAdded => "agent_added",
            Self::AgentPaused => "agent_paused",
            Self::AgentResumed => "agent_resumed",
            Self::AgentStopped => "agent_stopped",
            Self::AgentUnresponsive => "agent_unresponsive",
            Self::AgentHeartbeat => "agent_heartbeat",
            Self::ProjectCreated => "project_created",
            Self::ProjectQueued => "project_queued",
            Self::ProjectClaimed => "project_claimed",
            Self::ProjectProgress => "project_progress",
            Self::ProjectPushed => "project_pushed",
            Self::ProjectReleased => "project_released",
            Self::ProjectAccepted => "project_accepted",
            Self::ProjectFailed => "project_failed",
            Self::ReviewAssigned => "review_assigned",
            Self::ReviewVerdict => "review_verdict",
            Self::IdeationAttempt => "ideation_attempt",
            Self::CostRecorded => "cost_recorded",
            Self::CostDenied => "cost_denied",
            Self::EventPublished => "event_published",
            Self::ApiRequest => "api_request",
            Self::SystemStarted => "system_started",
            Self::SystemStopped => "system_stopped",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "agent_added" => Some(Self::AgentAdded),
            "agent_paused" => Some(Self::AgentPaused),
            "agent_resumed" => Some(Self::AgentResumed),
            "agent_stopped" => Some(Self::AgentStopped),
            "agent_unresponsive" => Some(Self::AgentUnresponsive),
            "agent_heartbeat" => Some(Self::AgentHeartbeat),
            "project_created" => Some(Self::ProjectCreated),
            "project_queued" => Some(Self::ProjectQueued),
            "project_claimed" => Some(Self::ProjectClaimed),
            "project_progress" => Some(Self::ProjectProgress),
            "project_pushed" => Some(Self::ProjectPushed),
            "project_released" => Some(Self::ProjectReleased),
            "project_accepted" => Some(Self::ProjectAccepted),
            "project_failed" => Some(Self::ProjectFailed),
            "review_assigned" => Some(Self::ReviewAssigned),
            "review_verdict" => Some(Self::ReviewVerdict),
            "ideation_attempt" => Some(Self::IdeationAttempt),
            "cost_recorded" => Some(Self::CostRecorded),
            "cost_denied" => Some(Self::CostDenied),
            "event_published" => Some(Self::EventPublished),
            "api_request" => Some(Self::ApiRequest),
            "system_started" => Some(Self::SystemStarted),
            "system_stopped" => Some(Self::SystemStopped),
            _ => None,
        }
    }
}

/// One durable audit row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub audit_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub operation: AuditOperation,
    pub agent_id: Option<AgentId>,
    pub project_number: Option<u64>,
    pub request_summary: String,
    pub response_status: String,
    pub duration_ms: u64,
}

/// Query filter for the audit history endpoint.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub operation: Option<AuditOperation>,
    pub agent_id: Option<AgentId>,
    pub project_number: Option<u64>,
    pub limit: u32,
}

/// Durable sink the background writer appends to.
#[async_trait::async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, record: &AuditRecord) -> Result<(), DatabaseError>;
    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, DatabaseError>;
    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, DatabaseError>;
}

/// Configuration for the audit writer.
#[derive(Debug, Clone)]
pub struct AuditLogConfig {
    /// Bounded retry buffer size
    pub retry_buffer: usize,
}

impl Default for AuditLogConfig {
    fn default() -> Self {
        Self { retry_buffer: 100 }
    }
}

/// Fire-and-forget audit log front end.
pub struct AuditLog {
    tx: mpsc::UnboundedSender<AuditRecord>,
    clock: Arc<dyn Clock>,
}

impl AuditLog {
    /// Create the log and spawn its background writer. Dropping every clone
    /// of the returned `AuditLog` lets the writer drain and exit.
    pub fn spawn(
        store: Arc<dyn AuditStore>,
        config: AuditLogConfig,
        clock: Arc<dyn Clock>,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = AuditWriter { store, buffer: VecDeque::new(), capacity: config.retry_buffer };
        let handle = tokio::spawn(writer.run(rx));
        (Arc::new(Self { tx, clock }), handle)
    }

    /// Record a pre-built audit row. Never blocks, never fails the caller.
    pub fn record(&self, record: AuditRecord) {
        if self.tx.send(record).is_err() {
            tracing::warn!("audit writer has shut down; record dropped");
        }
    }

    /// Convenience wrapper building the row from parts.
    pub fn record_operation(
        &self,
        operation: AuditOperation,
        agent_id: Option<AgentId>,
        project_number: Option<u64>,
        request_summary: impl Into<String>,
        response_status: impl Into<String>,
        duration_ms: u64,
    ) {
        self.record(AuditRecord {
            audit_id: Uuid::new_v4(),
            timestamp: self.clock.now(),
            operation,
            agent_id,
            project_number,
            request_summary: request_summary.into(),
            response_status: response_status.into(),
            duration_ms,
        });
    }
}

/// Background writer with bounded retry buffering.
struct AuditWriter {
    store: Arc<dyn AuditStore>,
    buffer: VecDeque<AuditRecord>,
    capacity: usize,
}

impl AuditWriter {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<AuditRecord>) {
        while let Some(record) = rx.recv().await {
            self.write(record).await;
        }
        // Channel closed: final drain attempt for anything still buffered.
        self.flush_buffer().await;
    }

    async fn write(&mut self, record: AuditRecord) {
        match self.store.append(&record).await {
            Ok(()) => {
                self.flush_buffer().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "audit write failed; buffering");
                self.buffer_record(record);
            }
        }
    }

    async fn flush_buffer(&mut self) {
        while let Some(buffered) = self.buffer.pop_front() {
            if let Err(e) = self.store.append(&buffered).await {
                tracing::warn!(error = %e, "audit flush failed; re-buffering");
                self.buffer.push_front(buffered);
                break;
            }
        }
    }

    fn buffer_record(&mut self, record: AuditRecord) {
        if self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
            tracing::warn!(capacity = self.capacity, "audit retry buffer full; oldest dropped");
        }
        self.buffer.push_back(record);
    }
}
