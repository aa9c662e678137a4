//! Project persistence port.

use async_trait::async_trait;

use crate::domain::error::DatabaseError;
use crate::domain::models::{Project, ProjectState};

/// Repository for project records.
#[async_trait]
pub trait ProjectRepository: Send + Sync {
    /// Insert or replace a project by number.
    async fn upsert(&self, project: &Project) -> Result<(), DatabaseError>;

    /// Fetch one project.
    async fn get(&self, number: u64) -> Result<Option<Project>, DatabaseError>;

    /// List projects, optionally filtered by state, newest first.
    async fn list(
        &self,
        state: Option<ProjectState>,
        limit: u32,
    ) -> Result<Vec<Project>, DatabaseError>;

    /// Next free project number for operator-created projects when the
    /// issue host is not involved.
    async fn next_number(&self) -> Result<u64, DatabaseError>;
}
