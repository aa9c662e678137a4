//! SQLite implementation of the persistent event store.
//!
//! The replay source for subscribers whose requested tail rotated out of
//! the in-memory retention ring.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::domain::error::DatabaseError;
use crate::services::event_bus::{Event, EventStore};

use super::utils::format_datetime;

/// SQLite implementation of `EventStore` using sqlx.
pub struct EventRepositoryImpl {
    pool: SqlitePool,
}

impl EventRepositoryImpl {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventStore for EventRepositoryImpl {
    async fn append(&self, event: &Event) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO events (sequence, event_type, payload, at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(sequence) DO NOTHING",
        )
        .bind(event.seq.0 as i64)
        .bind(event.payload.event_type())
        .bind(serde_json::to_string(event)?)
        .bind(format_datetime(event.at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_sequence(&self) -> Result<Option<u64>, DatabaseError> {
        let row: (Option<i64>,) = sqlx::query_as("SELECT MAX(sequence) FROM events")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0.map(|n| n as u64))
    }

    async fn since(&self, since: u64, limit: u32) -> Result<Vec<Event>, DatabaseError> {
        let rows = sqlx::query(
            "SELECT payload FROM events WHERE sequence > ?1 ORDER BY sequence LIMIT ?2",
        )
        .bind(since as i64)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                serde_json::from_str(row.get::<String, _>("payload").as_str())
                    .map_err(DatabaseError::from)
            })
            .collect()
    }

    async fn prune(&self, cutoff: DateTime<Utc>, keep_last: u64) -> Result<u64, DatabaseError> {
        // Retention is max(age window, last keep_last events): a row is
        // deleted only when it is both older than the cutoff and not among
        // the keep_last most recent sequences.
        let result = sqlx::query(
            "DELETE FROM events
             WHERE at < ?1
               AND sequence <= (SELECT COALESCE(MAX(sequence), 0) FROM events) - ?2",
        )
        .bind(format_datetime(cutoff))
        .bind(keep_last as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
