//! Agent persistence port.

use async_trait::async_trait;

use crate::domain::error::DatabaseError;
use crate::domain::models::{Agent, AgentId};

/// Repository for agent records.
#[async_trait]
pub trait AgentRepository: Send + Sync {
    /// Insert or replace an agent by id.
    async fn upsert(&self, agent: &Agent) -> Result<(), DatabaseError>;

    /// Fetch one agent.
    async fn get(&self, id: &AgentId) -> Result<Option<Agent>, DatabaseError>;

    /// List all agents in the workspace.
    async fn list(&self) -> Result<Vec<Agent>, DatabaseError>;

    /// Remove an agent record.
    async fn delete(&self, id: &AgentId) -> Result<(), DatabaseError>;
}
