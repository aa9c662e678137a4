//! SQLite implementation of the project repository.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::domain::error::DatabaseError;
use crate::domain::models::{
    AcceptanceCriterion, AgentId, CategoryTag, Project, ProjectState, WorkPhase,
};
use crate::domain::ports::ProjectRepository;

use super::utils::{format_datetime, parse_datetime};

/// SQLite implementation of `ProjectRepository` using sqlx.
pub struct ProjectRepositoryImpl {
    pool: SqlitePool,
}

impl ProjectRepositoryImpl {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_project(row: &sqlx::sqlite::SqliteRow) -> Result<Project, DatabaseError> {
        let state: String = row.get("state");
        let state = ProjectState::parse_str(&state)
            .ok_or_else(|| DatabaseError::SerializationError(format!("bad state {state:?}")))?;
        let criteria: Vec<AcceptanceCriterion> =
            serde_json::from_str(row.get::<String, _>("acceptance_criteria").as_str())?;
        Ok(Project {
            number: row.get::<i64, _>("number") as u64,
            title: row.get("title"),
            state,
            owner_agent_id: row
                .get::<Option<String>, _>("owner_agent_id")
                .map(AgentId::new),
            reviewer_agent_id: row
                .get::<Option<String>, _>("reviewer_agent_id")
                .map(AgentId::new),
            phase: row
                .get::<Option<String>, _>("phase")
                .as_deref()
                .and_then(WorkPhase::parse_str),
            category_tag: row
                .get::<Option<String>, _>("category_tag")
                .as_deref()
                .and_then(CategoryTag::parse_str),
            acceptance_criteria: criteria,
            review_iterations: row.get::<i64, _>("review_iterations") as u32,
            release_count: row.get::<i64, _>("release_count") as u32,
            pinned: row.get::<i64, _>("pinned") != 0,
            queued_at: row
                .get::<Option<String>, _>("queued_at")
                .as_deref()
                .map(parse_datetime)
                .transpose()?,
            created_at: parse_datetime(row.get::<String, _>("created_at").as_str())?,
            updated_at: parse_datetime(row.get::<String, _>("updated_at").as_str())?,
        })
    }
}

#[async_trait]
impl ProjectRepository for ProjectRepositoryImpl {
    async fn upsert(&self, project: &Project) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO projects (
                number, title, state, owner_agent_id, reviewer_agent_id, phase,
                category_tag, acceptance_criteria, review_iterations,
                release_count, pinned, queued_at, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT(number) DO UPDATE SET
                title = excluded.title,
                state = excluded.state,
                owner_agent_id = excluded.owner_agent_id,
                reviewer_agent_id = excluded.reviewer_agent_id,
                phase = excluded.phase,
                category_tag = excluded.category_tag,
                acceptance_criteria = excluded.acceptance_criteria,
                review_iterations = excluded.review_iterations,
                release_count = excluded.release_count,
                pinned = excluded.pinned,
                queued_at = excluded.queued_at,
                updated_at = excluded.updated_at",
        )
        .bind(project.number as i64)
        .bind(&project.title)
        .bind(project.state.as_str())
        .bind(project.owner_agent_id.as_ref().map(AgentId::as_str))
        .bind(project.reviewer_agent_id.as_ref().map(AgentId::as_str))
        .bind(project.phase.map(|p| p.as_str()))
        .bind(project.category_tag.map(|c| c.as_str()))
        .bind(serde_json::to_string(&project.acceptance_criteria)?)
        .bind(i64::from(project.review_iterations))
        .bind(i64::from(project.release_count))
        .bind(i64::from(project.pinned))
        .bind(project.queued_at.map(format_datetime))
        .bind(format_datetime(project.created_at))
        .bind(format_datetime(project.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, number: u64) -> Result<Option<Project>, DatabaseError> {
        let row = sqlx::query("SELECT * FROM projects WHERE number = ?1")
            .bind(number as i64)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::row_to_project(&r)).transpose()
    }

    async fn list(
        &self,
        state: Option<ProjectState>,
        limit: u32,
    ) -> Result<Vec<Project>, DatabaseError> {
        let rows = match state {
            Some(state) => {
                sqlx::query(
                    "SELECT * FROM projects WHERE state = ?1
                     ORDER BY number DESC LIMIT ?2",
                )
                .bind(state.as_str())
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM projects ORDER BY number DESC LIMIT ?1")
                    .bind(i64::from(limit))
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(Self::row_to_project).collect()
    }

    async fn next_number(&self) -> Result<u64, DatabaseError> {
        let row: (Option<i64>,) = sqlx::query_as("SELECT MAX(number) FROM projects")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0.unwrap_or(0) as u64 + 1)
    }
}
