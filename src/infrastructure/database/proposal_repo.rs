//! SQLite implementation of the proposal idempotency store.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::domain::error::DatabaseError;
use crate::domain::ports::ProposalRepository;

/// SQLite implementation of `ProposalRepository` using sqlx.
pub struct ProposalRepositoryImpl {
    pool: SqlitePool,
}

impl ProposalRepositoryImpl {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProposalRepository for ProposalRepositoryImpl {
    async fn try_record(&self, key: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "INSERT INTO proposals (idempotency_key) VALUES (?1)
             ON CONFLICT(idempotency_key) DO NOTHING",
        )
        .bind(key)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
