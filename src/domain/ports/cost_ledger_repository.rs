//! Cost ledger persistence port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::error::DatabaseError;
use crate::domain::models::CostLedgerEntry;

/// Append-only cost ledger.
#[async_trait]
pub trait CostLedgerRepository: Send + Sync {
    /// Append one ledger entry.
    async fn append(&self, entry: &CostLedgerEntry) -> Result<(), DatabaseError>;

    /// All entries at or after `since`, oldest first.
    async fn entries_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<CostLedgerEntry>, DatabaseError>;

    /// Drop entries older than `cutoff` (retention enforcement).
    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, DatabaseError>;
}
