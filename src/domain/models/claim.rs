//! Claim tickets and fence tokens.
//!
//! A claim is an exclusive, leased grant to work on (or review) a project.
//! The fence token is a process-wide monotonic integer; writes carrying a
//! token older than the latest issued for a project are rejected, which
//! protects against stale writers after lease expiry.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::agent::AgentId;

/// Monotonic token fencing off stale writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FenceToken(pub u64);

impl fmt::Display for FenceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the claim grants: execution or review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimKind {
    Work,
    Review,
}

/// Exclusive, leased grant on a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimTicket {
    /// Project this claim covers
    pub project_number: u64,
    /// Holder of the claim
    pub agent_id: AgentId,
    /// Execution or review
    pub kind: ClaimKind,
    /// When the claim was granted
    pub acquired_at: DateTime<Utc>,
    /// When the lease expires unless refreshed
    pub lease_expires_at: DateTime<Utc>,
    /// Fence token issued with this claim
    pub fence: FenceToken,
}

impl ClaimTicket {
    pub fn new(
        project_number: u64,
        agent_id: AgentId,
        kind: ClaimKind,
        fence: FenceToken,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Self {
        Self {
            project_number,
            agent_id,
            kind,
            acquired_at: now,
            lease_expires_at: now + lease,
            fence,
        }
    }

    /// Whether the lease has lapsed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.lease_expires_at
    }

    /// Extend the lease from `now`. Called on heartbeat progress.
    pub fn refresh(&mut self, now: DateTime<Utc>, lease: Duration) {
        self.lease_expires_at = now + lease;
    }
}
