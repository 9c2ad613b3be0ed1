//! Test utilities for database integration tests
//!
//! Every [`TestDatabase`] opens its own in-memory SQLite database, so tests
//! are fully isolated from one another and need no external services.

use crate::DbConnection;
use sea_orm::*;
use sea_orm_migration::MigratorTrait;
use std::sync::Arc;
use std::time::Duration;

use crier_migrations::Migrator;

/// Test database backed by in-memory SQLite
pub struct TestDatabase {
    pub db: Arc<DbConnection>,
}

impl TestDatabase {
    /// Create a fresh, empty in-memory database.
    ///
    /// A single pooled connection keeps the in-memory database alive for the
    /// lifetime of the pool; more than one connection would give each pool
    /// member its own empty database.
    pub async fn new() -> anyhow::Result<Self> {
        let mut opt = ConnectOptions::new("sqlite::memory:");
        opt.max_connections(1)
            .min_connections(1)
            .connect_timeout(Duration::from_secs(10))
            .acquire_timeout(Duration::from_secs(10))
            .sqlx_logging(false);

        let db = Database::connect(opt)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to open in-memory database: {}", e))?;

        let test_db = TestDatabase { db: Arc::new(db) };
        test_db.test_connection().await?;

        Ok(test_db)
    }

    /// Create a fresh database and apply all migrations
    pub async fn with_migrations() -> anyhow::Result<Self> {
        let test_db = Self::new().await?;

        Migrator::up(&*test_db.db, None)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;

        Ok(test_db)
    }

    /// Create a fresh database and apply a custom Migrator
    pub async fn with_custom_migrations<M>() -> anyhow::Result<Self>
    where
        M: MigratorTrait,
    {
        let test_db = Self::new().await?;

        M::up(&*test_db.db, None)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to run custom migrations: {}", e))?;

        Ok(test_db)
    }

    /// Execute raw SQL for test setup
    pub async fn execute_sql(&self, sql: &str) -> anyhow::Result<ExecResult> {
        let statement = Statement::from_string(DatabaseBackend::Sqlite, sql.to_owned());
        let result = self
            .db
            .execute(statement)
            .await
            .map_err(anyhow::Error::from)?;
        Ok(result)
    }

    /// Query raw SQL and return results
    pub async fn query_sql(&self, sql: &str) -> anyhow::Result<Vec<QueryResult>> {
        let statement = Statement::from_string(DatabaseBackend::Sqlite, sql.to_owned());
        let result = self
            .db
            .query_all(statement)
            .await
            .map_err(anyhow::Error::from)?;
        Ok(result)
    }

    /// Delete all rows from every application table, preserving the schema
    pub async fn cleanup_all_tables(&self) -> anyhow::Result<()> {
        let tables = self
            .query_sql(
                "SELECT name FROM sqlite_master WHERE type = 'table' \
                 AND name NOT LIKE 'sqlite_%' AND name != 'seaql_migrations'",
            )
            .await?;

        self.execute_sql("PRAGMA foreign_keys = OFF").await?;
        for table in tables {
            if let Ok(table_name) = table.try_get::<String>("", "name") {
                let sql = format!("DELETE FROM {}", table_name);
                self.execute_sql(&sql).await?;
            }
        }
        self.execute_sql("PRAGMA foreign_keys = ON").await?;

        Ok(())
    }

    /// Test database connectivity
    pub async fn test_connection(&self) -> anyhow::Result<()> {
        let statement = Statement::from_string(DatabaseBackend::Sqlite, "SELECT 1".to_owned());
        let result = self.db.query_one(statement).await?;

        if result.is_none() {
            return Err(anyhow::anyhow!("Connection test failed"));
        }

        Ok(())
    }

    /// Get the database connection
    pub fn connection(&self) -> &DbConnection {
        &self.db
    }

    /// Get the database connection as Arc
    pub fn connection_arc(&self) -> Arc<DbConnection> {
        Arc::clone(&self.db)
    }
}

/// Helper to wait for a condition with timeout
pub async fn wait_for<F, Fut>(
    condition: F,
    timeout_secs: u64,
    check_interval_ms: u64,
) -> anyhow::Result<()>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = std::time::Instant::now();
    let timeout = std::time::Duration::from_secs(timeout_secs);
    let interval = std::time::Duration::from_millis(check_interval_ms);

    while start.elapsed() < timeout {
        if condition().await {
            return Ok(());
        }
        tokio::time::sleep(interval).await;
    }

    Err(anyhow::anyhow!("Timeout waiting for condition"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_database_setup() -> anyhow::Result<()> {
        let test_db = TestDatabase::new().await?;

        test_db.test_connection().await?;

        let result = test_db.query_sql("SELECT 1 as test_value").await?;
        assert_eq!(result.len(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_with_migrations() -> anyhow::Result<()> {
        let test_db = TestDatabase::with_migrations().await?;

        let result = test_db
            .query_sql("SELECT name FROM pragma_table_info('users')")
            .await?;

        assert!(!result.is_empty(), "Users table should have columns");
        Ok(())
    }

    #[tokio::test]
    async fn test_cleanup_preserves_schema() -> anyhow::Result<()> {
        let test_db = TestDatabase::with_migrations().await?;

        test_db
            .execute_sql(
                "INSERT INTO users (first_name, last_name, email, is_active, created_at, updated_at) \
                 VALUES ('Test', 'User', 'user@school.test', 1, '2025-08-01T00:00:00Z', '2025-08-01T00:00:00Z')",
            )
            .await?;

        test_db.cleanup_all_tables().await?;

        let rows = test_db.query_sql("SELECT * FROM users").await?;
        assert!(rows.is_empty(), "Cleanup should remove all rows");

        let result = test_db
            .query_sql("SELECT name FROM pragma_table_info('users')")
            .await?;
        assert!(!result.is_empty(), "Cleanup should keep the schema");

        Ok(())
    }

    #[tokio::test]
    async fn test_databases_are_isolated() -> anyhow::Result<()> {
        let first = TestDatabase::with_migrations().await?;
        let second = TestDatabase::with_migrations().await?;

        first
            .execute_sql(
                "INSERT INTO users (first_name, last_name, email, is_active, created_at, updated_at) \
                 VALUES ('Only', 'Here', 'only@school.test', 1, '2025-08-01T00:00:00Z', '2025-08-01T00:00:00Z')",
            )
            .await?;

        let rows = second.query_sql("SELECT * FROM users").await?;
        assert!(rows.is_empty(), "Databases should not share state");

        Ok(())
    }
}
