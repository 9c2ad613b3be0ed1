use sea_orm::{ConnectionTrait, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;

use crier_migrations::Migrator;

async fn connect() -> DatabaseConnection {
    Database::connect("sqlite::memory:")
        .await
        .expect("Failed to open in-memory database")
}

async fn table_exists(db: &DatabaseConnection, table: &str) -> anyhow::Result<bool> {
    let result = db
        .query_one(sea_orm::Statement::from_string(
            sea_orm::DatabaseBackend::Sqlite,
            format!(
                "SELECT COUNT(*) AS cnt FROM sqlite_master WHERE type = 'table' AND name = '{}'",
                table
            ),
        ))
        .await?;

    let count: i32 = result
        .map(|row| row.try_get("", "cnt"))
        .transpose()?
        .unwrap_or(0);
    Ok(count > 0)
}

const EXPECTED_TABLES: &[&str] = &[
    "users",
    "user_roles",
    "student_profiles",
    "staff_profiles",
    "guardian_links",
    "device_tokens",
    "preferences",
    "templates",
    "announcements",
    "bulk_messages",
    "notifications",
    "notification_counters",
    "message_recipients",
    "communication_logs",
    "message_threads",
    "thread_participants",
    "direct_messages",
    "message_reads",
    "daily_analytics",
];

/// Test that migrations can be applied successfully
#[tokio::test]
async fn test_migration_up() -> anyhow::Result<()> {
    let db = connect().await;

    Migrator::up(&db, None).await?;

    for table in EXPECTED_TABLES {
        assert!(
            table_exists(&db, table).await?,
            "Table {} should exist after migration up",
            table
        );
    }

    Ok(())
}

/// Test that migrations can be rolled back successfully
#[tokio::test]
async fn test_migration_down() -> anyhow::Result<()> {
    let db = connect().await;

    Migrator::up(&db, None).await?;
    Migrator::down(&db, None).await?;

    for table in EXPECTED_TABLES {
        assert!(
            !table_exists(&db, table).await?,
            "Table {} should not exist after migration down",
            table
        );
    }

    Ok(())
}

/// Test migration status tracking
#[tokio::test]
async fn test_migration_status() -> anyhow::Result<()> {
    let db = connect().await;

    let status_before = Migrator::get_pending_migrations(&db).await?;
    assert!(!status_before.is_empty(), "Should have pending migrations");

    Migrator::up(&db, None).await?;

    let status_after = Migrator::get_pending_migrations(&db).await?;
    assert!(
        status_after.is_empty(),
        "Should have no pending migrations after up"
    );

    Ok(())
}

/// Test that reapplying migrations is a no-op
#[tokio::test]
async fn test_migration_up_is_idempotent() -> anyhow::Result<()> {
    let db = connect().await;

    Migrator::up(&db, None).await?;
    Migrator::up(&db, None).await?;

    assert!(table_exists(&db, "users").await?);
    Ok(())
}

/// Test unique constraints on the delivery tables
#[tokio::test]
async fn test_unique_constraints() -> anyhow::Result<()> {
    let db = connect().await;
    Migrator::up(&db, None).await?;

    db.execute_unprepared(
        "INSERT INTO users (first_name, last_name, email, is_active, created_at, updated_at) \
         VALUES ('Asha', 'Rao', 'asha@school.test', 1, '2025-08-01T00:00:00Z', '2025-08-01T00:00:00Z')",
    )
    .await?;

    // Duplicate email must be rejected
    let duplicate = db
        .execute_unprepared(
            "INSERT INTO users (first_name, last_name, email, is_active, created_at, updated_at) \
             VALUES ('Other', 'Person', 'asha@school.test', 1, '2025-08-01T00:00:00Z', '2025-08-01T00:00:00Z')",
        )
        .await;
    assert!(duplicate.is_err(), "Duplicate user email should be rejected");

    // One preferences row per user
    db.execute_unprepared(
        "INSERT INTO preferences (user_id, email_enabled, sms_enabled, push_enabled, in_app_enabled, \
         whatsapp_enabled, academic_alerts, financial_alerts, attendance_alerts, general_announcements, \
         marketing_messages, quiet_hours_start, quiet_hours_end, weekend_notifications, digest_frequency, \
         created_at, updated_at) \
         VALUES (1, 1, 1, 1, 1, 0, 1, 1, 1, 1, 0, '22:00:00', '06:00:00', 1, 'none', \
         '2025-08-01T00:00:00Z', '2025-08-01T00:00:00Z')",
    )
    .await?;

    let duplicate_prefs = db
        .execute_unprepared(
            "INSERT INTO preferences (user_id, email_enabled, sms_enabled, push_enabled, in_app_enabled, \
             whatsapp_enabled, academic_alerts, financial_alerts, attendance_alerts, general_announcements, \
             marketing_messages, quiet_hours_start, quiet_hours_end, weekend_notifications, digest_frequency, \
             created_at, updated_at) \
             VALUES (1, 1, 1, 1, 1, 0, 1, 1, 1, 1, 0, '22:00:00', '06:00:00', 1, 'none', \
             '2025-08-01T00:00:00Z', '2025-08-01T00:00:00Z')",
        )
        .await;
    assert!(
        duplicate_prefs.is_err(),
        "Second preferences row for same user should be rejected"
    );

    Ok(())
}
