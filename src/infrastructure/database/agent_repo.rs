//! SQLite implementation of the agent repository.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::domain::error::DatabaseError;
use crate::domain::models::{Agent, AgentId, AgentStatus, WorkPhase};
use crate::domain::ports::AgentRepository;

use super::utils::{format_datetime, parse_datetime};

/// SQLite implementation of `AgentRepository` using sqlx.
pub struct AgentRepositoryImpl {
    pool: SqlitePool,
}

impl AgentRepositoryImpl {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_agent(row: &sqlx::sqlite::SqliteRow) -> Result<Agent, DatabaseError> {
        let status: String = row.get("status");
        let status = AgentStatus::parse_str(&status)
            .ok_or_else(|| DatabaseError::SerializationError(format!("bad status {status:?}")))?;
        Ok(Agent {
            id: AgentId::new(row.get::<String, _>("id")),
            workspace_id: row.get("workspace_id"),
            status,
            current_project: row
                .get::<Option<i64>, _>("current_project")
                .map(|n| n as u64),
            current_phase: row
                .get::<Option<String>, _>("current_phase")
                .as_deref()
                .and_then(WorkPhase::parse_str),
            last_heartbeat_at: parse_datetime(row.get::<String, _>("last_heartbeat_at").as_str())?,
            tasks_completed: row.get::<i64, _>("tasks_completed") as u64,
            error_count: row.get::<i64, _>("error_count") as u32,
            last_error: row.get("last_error"),
            paused_from: row
                .get::<Option<String>, _>("paused_from")
                .as_deref()
                .and_then(AgentStatus::parse_str),
            created_at: parse_datetime(row.get::<String, _>("created_at").as_str())?,
            updated_at: parse_datetime(row.get::<String, _>("updated_at").as_str())?,
        })
    }
}

#[async_trait]
impl AgentRepository for AgentRepositoryImpl {
    async fn upsert(&self, agent: &Agent) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO agents (
                id, workspace_id, status, current_project, current_phase,
                last_heartbeat_at, tasks_completed, error_count, last_error,
                paused_from, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                current_project = excluded.current_project,
                current_phase = excluded.current_phase,
                last_heartbeat_at = excluded.last_heartbeat_at,
                tasks_completed = excluded.tasks_completed,
                error_count = excluded.error_count,
                last_error = excluded.last_error,
                paused_from = excluded.paused_from,
                updated_at = excluded.updated_at",
        )
        .bind(agent.id.as_str())
        .bind(&agent.workspace_id)
        .bind(agent.status.as_str())
        .bind(agent.current_project.map(|n| n as i64))
        .bind(agent.current_phase.map(|p| p.as_str()))
        .bind(format_datetime(agent.last_heartbeat_at))
        .bind(agent.tasks_completed as i64)
        .bind(i64::from(agent.error_count))
        .bind(&agent.last_error)
        .bind(agent.paused_from.map(|s| s.as_str()))
        .bind(format_datetime(agent.created_at))
        .bind(format_datetime(agent.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &AgentId) -> Result<Option<Agent>, DatabaseError> {
        let row = sqlx::query("SELECT * FROM agents WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::row_to_agent(&r)).transpose()
    }

    async fn list(&self) -> Result<Vec<Agent>, DatabaseError> {
        let rows = sqlx::query("SELECT * FROM agents ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_agent).collect()
    }

    async fn delete(&self, id: &AgentId) -> Result<(), DatabaseError> {
        sqlx::query("DELETE FROM agents WHERE id = ?1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
