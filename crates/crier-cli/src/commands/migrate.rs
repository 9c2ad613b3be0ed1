use std::sync::Arc;

use clap::Args;
use crier_config::ServerConfig;
use tracing::info;

#[derive(Args)]
pub struct MigrateCommand {
    /// Database connection URL; defaults to a SQLite file in the data dir
    #[arg(long, env = "CRIER_DATABASE_URL")]
    pub database_url: Option<String>,
}

impl MigrateCommand {
    pub fn execute(self, log_level: String) -> anyhow::Result<()> {
        // The address is unused here; the config only resolves the data dir
        // and default database url.
        let config = Arc::new(ServerConfig::new(
            "127.0.0.1:8080".to_string(),
            self.database_url,
            log_level,
        )?);

        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(async {
            // establish_connection applies pending migrations on connect.
            crier_database::establish_connection(&config.database_url).await?;
            info!("Database schema is up to date");
            Ok(())
        })
    }
}
