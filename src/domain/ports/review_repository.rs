//! Review record persistence port.

use async_trait::async_trait;

use crate::domain::error::DatabaseError;
use crate::domain::models::ReviewRecord;

/// Repository for review records. One row per iteration, retained for audit.
#[async_trait]
pub trait ReviewRepository: Send + Sync {
    /// Append one review record.
    async fn append(&self, record: &ReviewRecord) -> Result<(), DatabaseError>;

    /// All review records for a project, oldest first.
    async fn list_for_project(&self, number: u64) -> Result<Vec<ReviewRecord>, DatabaseError>;
}
