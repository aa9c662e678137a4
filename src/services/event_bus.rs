//! Event bus: sequenced broadcast with replay and acknowledgement.
//!
//! Every published event is assigned a globally monotonic, gapless sequence
//! number on a single writer lane, recorded into a bounded retention ring,
//! fanned out to live subscribers over a broadcast channel, appended to the
//! persistent event store, and written to the audit log. Reconnecting
//! subscribers replay the retained tail; a subscriber that fell further
//! behind than the ring is told `gap-too-large` and must resync from the
//! store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::domain::error::DatabaseError;
use crate::domain::models::{AgentId, BudgetScope, CategoryTag, Verdict, WorkPhase};
use crate::domain::ports::Clock;

use super::audit_log::{AuditLog, AuditOperation};

/// Monotonically increasing sequence number assigned by the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceNumber(pub u64);

impl std::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tagged event payload. Wire shape: `{"type": "...", "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventPayload {
    #[serde(rename = "project.created")]
    ProjectCreated { number: u64, title: String, category: Option<CategoryTag> },
    #[serde(rename = "project.queued")]
    ProjectQueued { number: u64 },
    #[serde(rename = "project.claimed")]
    ProjectClaimed { number: u64, agent_id: AgentId, fence: u64 },
    #[serde(rename = "project.progress")]
    ProjectProgress { number: u64, agent_id: AgentId, phase: WorkPhase },
    #[serde(rename = "project.pushed")]
    ProjectPushed { number: u64, agent_id: AgentId, branch: String },
    #[serde(rename = "project.in-review")]
    ProjectInReview { number: u64, reviewer: Option<AgentId> },
    #[serde(rename = "review.verdict")]
    ReviewVerdict { number: u64, reviewer: AgentId, verdict: Verdict, iteration: u32 },
    #[serde(rename = "project.rework")]
    ProjectRework { number: u64, iteration: u32 },
    #[serde(rename = "project.accepted")]
    ProjectAccepted { number: u64 },
    #[serde(rename = "project.failed")]
    ProjectFailed { number: u64, reason: String },
    #[serde(rename = "project.released")]
    ProjectReleased { number: u64, release_count: u32 },

    #[serde(rename = "agent.added")]
    AgentAdded { agent_id: AgentId },
    #[serde(rename = "agent.paused")]
    AgentPaused { agent_id: AgentId },
    #[serde(rename = "agent.resumed")]
    AgentResumed { agent_id: AgentId },
    #[serde(rename = "agent.stopped")]
    AgentStopped { agent_id: AgentId },
    #[serde(rename = "agent.unresponsive")]
    AgentUnresponsive { agent_id: AgentId },
    #[serde(rename = "agent.heartbeat")]
    AgentHeartbeat { agent_id: AgentId },

    #[serde(rename = "cost.warning")]
    CostWarning { scope: BudgetScope, consumed_pct: f64, spent_usd: f64, budget_usd: f64 },
    #[serde(rename = "cost.hardStop")]
    CostHardStop { scope: BudgetScope, spent_usd: f64, budget_usd: f64 },

    #[serde(rename = "error")]
    Error { message: String, agent_id: Option<AgentId>, project_number: Option<u64> },
}

impl EventPayload {
    /// Dotted event type name as it appears on the wire.
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::ProjectCreated { .. } => "project.created",
            Self::ProjectQueued { .. } => "project.queued",
            Self::ProjectClaimed { .. } => "project.claimed",
            Self::ProjectProgress { .. } => "project.progress",
            Self::ProjectPushed { .. } => "project.pushed",
            Self::ProjectInReview { .. } => "project.in-review",
            Self::ReviewVerdict { .. } => "review.verdict",
            Self::ProjectRework { .. } => "project.rework",
            Self::ProjectAccepted { .. } => "project.accepted",
            Self::ProjectFailed { .. } => "project.failed",
            Self::ProjectReleased { .. } => "project.released",
            Self::AgentAdded { .. } => "agent.added",
            Self::AgentPaused { .. } => "agent.paused",
            Self::AgentResumed { .. } => "agent.resumed",
            Self::AgentStopped { .. } => "agent.stopped",
            Self::AgentUnresponsive { .. } => "agent.unresponsive",
            Self::AgentHeartbeat { .. } => "agent.heartbeat",
            Self::CostWarning { .. } => "cost.warning",
            Self::CostHardStop { .. } => "cost.hardStop",
            Self::Error { .. } => "error",
        }
    }

    /// Project the event refers to, if any.
    pub const fn project_number(&self) -> Option<u64> {
        match self {
            Self::ProjectCreated { number, .. }
            | Self::ProjectQueued { number }
            | Self::ProjectClaimed { number, .. }
            | Self::ProjectProgress { number, .. }
            | Self::ProjectPushed { number, .. }
            | Self::ProjectInReview { number, .. }
            | Self::ReviewVerdict { number, .. }
            | Self::ProjectRework { number, .. }
            | Self::ProjectAccepted { number }
            | Self::ProjectFailed { number, .. }
            | Self::ProjectReleased { number, .. } => Some(*number),
            Self::Error { project_number, .. } => *project_number,
            _ => None,
        }
    }

    /// Agent the event refers to, if any.
    pub fn agent_id(&self) -> Option<&AgentId> {
        match self {
            Self::ProjectClaimed { agent_id, .. }
            | Self::ProjectProgress { agent_id, .. }
            | Self::ProjectPushed { agent_id, .. }
            | Self::AgentAdded { agent_id }
            | Self::AgentPaused { agent_id }
            | Self::AgentResumed { agent_id }
            | Self::AgentStopped { agent_id }
            | Self::AgentUnresponsive { agent_id }
            | Self::AgentHeartbeat { agent_id } => Some(agent_id),
            Self::ReviewVerdict { reviewer, .. } => Some(reviewer),
            Self::Error { agent_id, .. } => agent_id.as_ref(),
            _ => None,
        }
    }

    /// Heartbeats are lowest-priority and may be coalesced by subscribers.
    pub const fn is_heartbeat(&self) -> bool {
        matches!(self, Self::AgentHeartbeat { .. })
    }
}

/// Sequenced event envelope. Wire shape: `{type, data, at, seq}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub seq: SequenceNumber,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

/// Persistent event store: the replay source for subscribers that fell
/// behind the retention ring.
#[async_trait::async_trait]
pub trait EventStore: Send + Sync {
    /// Append one event.
    async fn append(&self, event: &Event) -> Result<(), DatabaseError>;

    /// Highest sequence in the store, if any.
    async fn latest_sequence(&self) -> Result<Option<u64>, DatabaseError>;

    /// Events with `seq > since`, ascending, capped at `limit`.
    async fn since(&self, since: u64, limit: u32) -> Result<Vec<Event>, DatabaseError>;

    /// Enforce retention: drop events older than `cutoff` while always
    /// keeping the most recent `keep_last`.
    async fn prune(&self, cutoff: DateTime<Utc>, keep_last: u64) -> Result<u64, DatabaseError>;
}

/// Replay failure: the requested tail has rotated out of the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("gap too large: oldest retained seq {oldest}, latest {latest}")]
pub struct GapTooLarge {
    pub oldest: u64,
    pub latest: u64,
}

/// Per-subscriber bookkeeping.
#[derive(Debug, Clone)]
struct SubscriberInfo {
    last_acked_seq: u64,
    registered_at: DateTime<Utc>,
}

/// Configuration for the event bus.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Retention ring size R
    pub retention: usize,
    /// Per-subscriber broadcast queue capacity
    pub channel_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self { retention: 1_000, channel_capacity: 10_000 }
    }
}

/// Central event bus.
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    seq: AtomicU64,
    ring: RwLock<VecDeque<Event>>,
    subscribers: RwLock<HashMap<Uuid, SubscriberInfo>>,
    store: RwLock<Option<Arc<dyn EventStore>>>,
    audit: RwLock<Option<Arc<AuditLog>>>,
    clock: Arc<dyn Clock>,
    config: EventBusConfig,
}

impl EventBus {
    pub fn new(config: EventBusConfig, clock: Arc<dyn Clock>) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity);
        Self {
            sender,
            seq: AtomicU64::new(0),
            ring: RwLock::new(VecDeque::with_capacity(config.retention)),
            subscribers: RwLock::new(HashMap::new()),
            store: RwLock::new(None),
            audit: RwLock::new(None),
            clock,
            config,
        }
    }

    /// Attach the persistent event store.
    pub async fn set_store(&self, store: Arc<dyn EventStore>) {
        *self.store.write().await = Some(store);
    }

    /// Attach the audit log; every publish is audited.
    pub async fn set_audit(&self, audit: Arc<AuditLog>) {
        *self.audit.write().await = Some(audit);
    }

    /// Publish an event: assign the next sequence, record into the ring,
    /// fan out, persist, audit. Returns the assigned sequence.
    pub async fn publish(&self, payload: EventPayload) -> SequenceNumber {
        let event = {
            // Single writer lane: assignment and ring insertion happen under
            // the ring write lock so subscribers always observe seq order.
            let mut ring = self.ring.write().await;
            let seq = SequenceNumber(self.seq.fetch_add(1, Ordering::SeqCst) + 1);
            let event = Event { seq, at: self.clock.now(), payload };
            ring.push_back(event.clone());
            while ring.len() > self.config.retention {
                ring.pop_front();
            }
            // Send errors only mean there are no live subscribers.
            let _ = self.sender.send(event.clone());
            event
        };

        if let Some(store) = self.store.read().await.clone() {
            if let Err(e) = store.append(&event).await {
                tracing::warn!(seq = event.seq.0, error = %e, "failed to persist event");
            }
        }

        if let Some(audit) = self.audit.read().await.clone() {
            audit.record_operation(
                AuditOperation::EventPublished,
                event.payload.agent_id().cloned(),
                event.payload.project_number(),
                format!("{} seq={}", event.payload.event_type(), event.seq.0),
                "ok",
                0,
            );
        }

        event.seq
    }

    /// Current (latest assigned) sequence number.
    pub fn current_sequence(&self) -> SequenceNumber {
        SequenceNumber(self.seq.load(Ordering::SeqCst))
    }

    /// Subscribe to the live stream without replay bookkeeping.
    pub fn subscribe_live(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Register an identified subscriber. Returns its id, the replayed tail
    /// (`last_received_seq + 1` onward), and a live receiver.
    pub async fn register_subscriber(
        &self,
        last_received_seq: u64,
    ) -> Result<(Uuid, Vec<Event>, broadcast::Receiver<Event>), GapTooLarge> {
        // Take the receiver before draining the ring so no event published
        // after the snapshot can be missed (it may be duplicated instead;
        // subscribers dedup by seq).
        let receiver = self.sender.subscribe();
        let tail = self.replay_since(last_received_seq).await?;

        let id = Uuid::new_v4();
        self.subscribers.write().await.insert(
            id,
            SubscriberInfo { last_acked_seq: last_received_seq, registered_at: self.clock.now() },
        );
        Ok((id, tail, receiver))
    }

    /// Replay retained events with `seq > since`, in order.
    pub async fn replay_since(&self, since: u64) -> Result<Vec<Event>, GapTooLarge> {
        let ring = self.ring.read().await;
        let latest = self.seq.load(Ordering::SeqCst);
        let oldest = ring.front().map_or(latest + 1, |e| e.seq.0);

        // Nothing requested beyond what exists.
        if since >= latest {
            return Ok(Vec::new());
        }
        // The tail starting at since+1 must still be retained.
        if since + 1 < oldest {
            return Err(GapTooLarge { oldest, latest });
        }
        Ok(ring.iter().filter(|e| e.seq.0 > since).cloned().collect())
    }

    /// Acknowledge receipt up to `seq` for a subscriber.
    pub async fn ack(&self, subscriber: Uuid, seq: u64) {
        if let Some(info) = self.subscribers.write().await.get_mut(&subscriber) {
            if seq > info.last_acked_seq {
                info.last_acked_seq = seq;
            }
        }
    }

    /// Last acknowledged sequence for a subscriber.
    pub async fn last_acked(&self, subscriber: Uuid) -> Option<u64> {
        self.subscribers.read().await.get(&subscriber).map(|i| i.last_acked_seq)
    }

    /// Remove a subscriber's bookkeeping (disconnect or overflow drop).
    pub async fn drop_subscriber(&self, subscriber: Uuid) {
        if let Some(info) = self.subscribers.write().await.remove(&subscriber) {
            tracing::debug!(
                subscriber = %subscriber,
                last_acked = info.last_acked_seq,
                registered_at = %info.registered_at,
                "subscriber dropped"
            );
        }
    }

    /// Re-initialize the sequence counter from the store after restart so
    /// sequences never overlap across process lifetimes.
    pub async fn initialize_sequence_from_store(&self) {
        let store = self.store.read().await.clone();
        if let Some(store) = store {
            match store.latest_sequence().await {
                Ok(Some(latest)) => {
                    self.seq.store(latest, Ordering::SeqCst);
                    tracing::info!(latest, "event sequence initialized from store");
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read latest sequence from store");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::SystemClock;

    fn make_bus(retention: usize) -> EventBus {
        EventBus::new(
            EventBusConfig { retention, channel_capacity: 64 },
            Arc::new(SystemClock),
        )
    }

    fn queued(number: u64) -> EventPayload {
        EventPayload::ProjectQueued { number }
    }

    #[tokio::test]
    async fn test_sequence_assignment_is_gapless() {
        let bus = make_bus(100);
        assert_eq!(bus.current_sequence().0, 0);

        let mut rx = bus.subscribe_live();
        for i in 1..=5u64 {
            let seq = bus.publish(queued(i)).await;
            assert_eq!(seq.0, i);
        }
        for i in 1..=5u64 {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.seq.0, i);
        }
        assert_eq!(bus.current_sequence().0, 5);
    }

    #[tokio::test]
    async fn test_replay_returns_tail_in_order() {
        let bus = make_bus(100);
        for i in 1..=10u64 {
            bus.publish(queued(i)).await;
        }
        let tail = bus.replay_since(7).await.unwrap();
        let seqs: Vec<u64> = tail.iter().map(|e| e.seq.0).collect();
        assert_eq!(seqs, vec![8, 9, 10]);
    }

    #[tokio::test]
    async fn test_replay_beyond_latest_is_empty() {
        let bus = make_bus(100);
        bus.publish(queued(1)).await;
        assert!(bus.replay_since(1).await.unwrap().is_empty());
        assert!(bus.replay_since(99).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_gap_too_large_after_rotation() {
        let bus = make_bus(5);
        for i in 1..=20u64 {
            bus.publish(queued(i)).await;
        }
        // Ring holds 16..=20; asking from 10 means seq 11 is gone.
        let err = bus.replay_since(10).await.unwrap_err();
        assert_eq!(err.oldest, 16);
        assert_eq!(err.latest, 20);

        // Asking from 15 wants 16.. which is exactly retained.
        let tail = bus.replay_since(15).await.unwrap();
        assert_eq!(tail.len(), 5);
    }

    #[tokio::test]
    async fn test_subscriber_ack_tracking() {
        let bus = make_bus(100);
        bus.publish(queued(1)).await;
        let (id, tail, _rx) = bus.register_subscriber(0).await.unwrap();
        assert_eq!(tail.len(), 1);

        bus.ack(id, 1).await;
        assert_eq!(bus.last_acked(id).await, Some(1));

        // Stale acks never move the cursor backwards.
        bus.ack(id, 0).await;
        assert_eq!(bus.last_acked(id).await, Some(1));

        bus.drop_subscriber(id).await;
        assert_eq!(bus.last_acked(id).await, None);
    }

    #[tokio::test]
    async fn test_event_wire_shape() {
        let bus = make_bus(10);
        bus.publish(EventPayload::ProjectClaimed {
            number: 101,
            agent_id: AgentId::new("agent-1"),
            fence: 3,
        })
        .await;
        let tail = bus.replay_since(0).await.unwrap();
        let json = serde_json::to_value(&tail[0]).unwrap();
        assert_eq!(json["type"], "project.claimed");
        assert_eq!(json["data"]["number"], 101);
        assert!(json["seq"].is_u64());
        assert!(json["at"].is_string());
    }

    #[test]
    fn test_event_type_names_match_taxonomy() {
        assert_eq!(queued(1).event_type(), "project.queued");
        assert_eq!(
            EventPayload::CostHardStop {
                scope: BudgetScope::Daily,
                spent_usd: 1.0,
                budget_usd: 1.0
            }
            .event_type(),
            "cost.hardStop"
        );
        assert_eq!(
            EventPayload::ProjectInReview { number: 1, reviewer: None }.event_type(),
            "project.in-review"
        );
    }

    #[test]
    fn test_heartbeat_is_coalescable() {
        assert!(EventPayload::AgentHeartbeat { agent_id: AgentId::new("a") }.is_heartbeat());
        assert!(!queued(1).is_heartbeat());
    }
}
