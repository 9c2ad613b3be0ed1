pub use sea_orm_migration::prelude::*;

mod m20250801_000001_initial_schema;
mod m20250812_000001_create_messaging_tables;
mod m20250818_000001_create_daily_analytics;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250801_000001_initial_schema::Migration),
            Box::new(m20250812_000001_create_messaging_tables::Migration),
            Box::new(m20250818_000001_create_daily_analytics::Migration),
        ]
    }
}
