//! SQLite implementation of the audit store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::error::DatabaseError;
use crate::domain::models::AgentId;
use crate::services::audit_log::{AuditOperation, AuditQuery, AuditRecord, AuditStore};

use super::utils::{format_datetime, parse_datetime};

/// SQLite implementation of `AuditStore` using sqlx.
pub struct AuditRepositoryImpl {
    pool: SqlitePool,
}

impl AuditRepositoryImpl {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<AuditRecord, DatabaseError> {
        let operation: String = row.get("operation");
        let operation = AuditOperation::parse_str(&operation).ok_or_else(|| {
            DatabaseError::SerializationError(format!("bad operation {operation:?}"))
        })?;
        Ok(AuditRecord {
            audit_id: Uuid::parse_str(row.get::<String, _>("audit_id").as_str())?,
            timestamp: parse_datetime(row.get::<String, _>("timestamp").as_str())?,
            operation,
            agent_id: row.get::<Option<String>, _>("agent_id").map(AgentId::new),
            project_number: row
                .get::<Option<i64>, _>("project_number")
                .map(|n| n as u64),
            request_summary: row.get("request_summary"),
            response_status: row.get("response_status"),
            duration_ms: row.get::<i64, _>("duration_ms") as u64,
        })
    }
}

#[async_trait]
impl AuditStore for AuditRepositoryImpl {
    async fn append(&self, record: &AuditRecord) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO audit_log (
                audit_id, timestamp, operation, agent_id, project_number,
                request_summary, response_status, duration_ms
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(record.audit_id.to_string())
        .bind(format_datetime(record.timestamp))
        .bind(record.operation.as_str())
        .bind(record.agent_id.as_ref().map(AgentId::as_str))
        .bind(record.project_number.map(|n| n as i64))
        .bind(&record.request_summary)
        .bind(&record.response_status)
        .bind(record.duration_ms as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, DatabaseError> {
        let limit = if query.limit == 0 { 100 } else { query.limit };
        let rows = sqlx::query(
            "SELECT * FROM audit_log
             WHERE (?1 IS NULL OR operation = ?1)
               AND (?2 IS NULL OR agent_id = ?2)
               AND (?3 IS NULL OR project_number = ?3)
             ORDER BY timestamp DESC
             LIMIT ?4",
        )
        .bind(query.operation.map(|o| o.as_str()))
        .bind(query.agent_id.as_ref().map(AgentId::as_str))
        .bind(query.project_number.map(|n| n as i64))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_record).collect()
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM audit_log WHERE timestamp < ?1")
            .bind(format_datetime(cutoff))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
