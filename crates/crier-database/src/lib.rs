//! Database connection and query utilities

pub use sea_orm;
mod connection;

pub use connection::{establish_connection, DbConnection};

// Export test utilities for use by other crates in their tests
pub mod test_utils;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_establish_connection() -> anyhow::Result<()> {
        let db = establish_connection("sqlite::memory:").await?;

        let statement = sea_orm::Statement::from_string(
            sea_orm::DatabaseBackend::Sqlite,
            "SELECT 1".to_owned(),
        );
        let query_result = sea_orm::ConnectionTrait::query_one(&*db, statement).await?;
        assert!(query_result.is_some());

        Ok(())
    }
}
