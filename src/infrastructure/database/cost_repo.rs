//! SQLite implementation of the cost ledger.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::domain::error::DatabaseError;
use crate::domain::models::{AgentId, CostLedgerEntry};
use crate::domain::ports::CostLedgerRepository;

use super::utils::{format_datetime, parse_datetime};

/// SQLite implementation of `CostLedgerRepository` using sqlx.
pub struct CostLedgerRepositoryImpl {
    pool: SqlitePool,
}

impl CostLedgerRepositoryImpl {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<CostLedgerEntry, DatabaseError> {
        Ok(CostLedgerEntry {
            agent_id: AgentId::new(row.get::<String, _>("agent_id")),
            project_number: row
                .get::<Option<i64>, _>("project_number")
                .map(|n| n as u64),
            usd: row.get("usd"),
            tokens: row.get::<i64, _>("tokens") as u64,
            at: parse_datetime(row.get::<String, _>("at").as_str())?,
        })
    }
}

#[async_trait]
impl CostLedgerRepository for CostLedgerRepositoryImpl {
    async fn append(&self, entry: &CostLedgerEntry) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO cost_ledger (agent_id, project_number, usd, tokens, at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(entry.agent_id.as_str())
        .bind(entry.project_number.map(|n| n as i64))
        .bind(entry.usd)
        .bind(entry.tokens as i64)
        .bind(format_datetime(entry.at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn entries_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<CostLedgerEntry>, DatabaseError> {
        let rows = sqlx::query("SELECT * FROM cost_ledger WHERE at >= ?1 ORDER BY at")
            .bind(format_datetime(since))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM cost_ledger WHERE at < ?1")
            .bind(format_datetime(cutoff))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
