//! SQLite database migration management.

use sqlx::SqlitePool;

use crate::domain::error::DatabaseError;

/// One versioned migration.
#[derive(Debug, Clone)]
struct Migration {
    version: i64,
    description: &'static str,
    sql: &'static str,
}

fn embedded_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "initial schema",
        sql: r"
            CREATE TABLE IF NOT EXISTS agents (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL,
                status TEXT NOT NULL,
                current_project INTEGER,
                current_phase TEXT,
                last_heartbeat_at TEXT NOT NULL,
                tasks_completed INTEGER NOT NULL DEFAULT 0,
                error_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                paused_from TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS projects (
                number INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                state TEXT NOT NULL,
                owner_agent_id TEXT,
                reviewer_agent_id TEXT,
                phase TEXT,
                category_tag TEXT,
                acceptance_criteria TEXT NOT NULL DEFAULT '[]',
                review_iterations INTEGER NOT NULL DEFAULT 0,
                release_count INTEGER NOT NULL DEFAULT 0,
                pinned INTEGER NOT NULL DEFAULT 0,
                queued_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_projects_state ON projects(state);

            CREATE TABLE IF NOT EXISTS reviews (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_number INTEGER NOT NULL,
                reviewer_agent_id TEXT NOT NULL,
                iteration INTEGER NOT NULL,
                findings TEXT NOT NULL DEFAULT '[]',
                verdict TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_reviews_project ON reviews(project_number);

            CREATE TABLE IF NOT EXISTS proposals (
                idempotency_key TEXT PRIMARY KEY,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS cost_ledger (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                agent_id TEXT NOT NULL,
                project_number INTEGER,
                usd REAL NOT NULL,
                tokens INTEGER NOT NULL,
                at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_cost_ledger_at ON cost_ledger(at);

            CREATE TABLE IF NOT EXISTS events (
                sequence INTEGER PRIMARY KEY,
                event_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_at ON events(at);

            CREATE TABLE IF NOT EXISTS audit_log (
                audit_id TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL,
                operation TEXT NOT NULL,
                agent_id TEXT,
                project_number INTEGER,
                request_summary TEXT NOT NULL,
                response_status TEXT NOT NULL,
                duration_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
        ",
    }]
}

/// Applies embedded migrations in version order, tracking the applied set
/// in `schema_migrations`.
pub struct Migrator {
    pool: SqlitePool,
}

impl Migrator {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Run all pending migrations. Returns how many were applied.
    pub async fn run(&self) -> Result<usize, DatabaseError> {
        self.ensure_migrations_table().await?;
        let current = self.current_version().await?;
        let pending: Vec<Migration> = embedded_migrations()
            .into_iter()
            .filter(|m| m.version > current)
            .collect();

        for migration in &pending {
            self.apply(migration).await?;
            tracing::info!(
                version = migration.version,
                description = migration.description,
                "applied migration"
            );
        }
        Ok(pending.len())
    }

    async fn ensure_migrations_table(&self) -> Result<(), DatabaseError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                description TEXT NOT NULL,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(())
    }

    async fn current_version(&self) -> Result<i64, DatabaseError> {
        let row: (Option<i64>,) =
            sqlx::query_as("SELECT MAX(version) FROM schema_migrations")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(row.0.unwrap_or(0))
    }

    async fn apply(&self, migration: &Migration) -> Result<(), DatabaseError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;

        // SQLite executes one statement at a time through sqlx; split on
        // statement boundaries.
        for statement in migration.sql.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| DatabaseError::MigrationFailed(format!(
                    "migration {}: {e}",
                    migration.version
                )))?;
        }

        sqlx::query("INSERT INTO schema_migrations (version, description) VALUES (?1, ?2)")
            .bind(migration.version)
            .bind(migration.description)
            .execute(&mut *tx)
            .await
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(())
    }
}
