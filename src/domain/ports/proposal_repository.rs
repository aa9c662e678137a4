//! Proposal idempotency persistence port.
//!
//! Proposals themselves are ephemeral; only the idempotency key is
//! persisted so the same key never creates a second project.

use async_trait::async_trait;

use crate::domain::error::DatabaseError;

/// Idempotency-key store for ideation proposals.
#[async_trait]
pub trait ProposalRepository: Send + Sync {
    /// Record an idempotency key. Returns `false` without side effects when
    /// the key was already present.
    async fn try_record(&self, key: &str) -> Result<bool, DatabaseError>;
}
