//! SQLite implementation of the review repository.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::domain::error::DatabaseError;
use crate::domain::models::{AgentId, Finding, ReviewRecord, Verdict};
use crate::domain::ports::ReviewRepository;

use super::utils::{format_datetime, parse_datetime};

/// SQLite implementation of `ReviewRepository` using sqlx.
pub struct ReviewRepositoryImpl {
    pool: SqlitePool,
}

impl ReviewRepositoryImpl {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<ReviewRecord, DatabaseError> {
        let verdict: String = row.get("verdict");
        let verdict = Verdict::parse_str(&verdict)
            .ok_or_else(|| DatabaseError::SerializationError(format!("bad verdict {verdict:?}")))?;
        let findings: Vec<Finding> =
            serde_json::from_str(row.get::<String, _>("findings").as_str())?;
        Ok(ReviewRecord {
            project_number: row.get::<i64, _>("project_number") as u64,
            reviewer_agent_id: AgentId::new(row.get::<String, _>("reviewer_agent_id")),
            iteration: row.get::<i64, _>("iteration") as u32,
            findings,
            verdict,
            created_at: parse_datetime(row.get::<String, _>("created_at").as_str())?,
        })
    }
}

#[async_trait]
impl ReviewRepository for ReviewRepositoryImpl {
    async fn append(&self, record: &ReviewRecord) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO reviews (
                project_number, reviewer_agent_id, iteration, findings, verdict, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(record.project_number as i64)
        .bind(record.reviewer_agent_id.as_str())
        .bind(i64::from(record.iteration))
        .bind(serde_json::to_string(&record.findings)?)
        .bind(record.verdict.as_str())
        .bind(format_datetime(record.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_for_project(&self, number: u64) -> Result<Vec<ReviewRecord>, DatabaseError> {
        let rows = sqlx::query(
            "SELECT * FROM reviews WHERE project_number = ?1 ORDER BY iteration",
        )
        .bind(number as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_record).collect()
    }
}
