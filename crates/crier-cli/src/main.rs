//! Crier CLI - single entrypoint for the communications service
//!
//! Wires the library crates together and provides the execution modes:
//! the HTTP server with its background jobs, schema migration, and manual
//! maintenance passes.

mod commands;

use clap::{Parser, Subcommand};
use commands::{MaintenanceCommand, MigrateCommand, ServeCommand};
use tracing_subscriber::{layer::SubscriberExt, Layer};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "CRIER_LOG_LEVEL", global = true)]
    log_level: String,

    /// Log format: compact, full
    #[arg(
        long,
        default_value = "compact",
        env = "CRIER_LOG_FORMAT",
        global = true
    )]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server and background jobs
    Serve(ServeCommand),
    /// Apply pending database migrations and exit
    Migrate(MigrateCommand),
    /// Run a maintenance pass by hand
    #[command(subcommand)]
    Maintenance(MaintenanceCommand),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = cli.log_level.clone();

    // If RUST_LOG is set, use it directly; otherwise use our default filter
    // with all crier crates at the specified level and noisy dependencies at
    // warn level.
    let filter = if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .expect("Invalid RUST_LOG environment variable")
    } else {
        tracing_subscriber::EnvFilter::new(format!(
            "crier_cli={level},\
             crier_core={level},\
             crier_entities={level},\
             crier_migrations={level},\
             crier_database={level},\
             crier_queue={level},\
             crier_config={level},\
             crier_directory={level},\
             crier_templates={level},\
             crier_channels={level},\
             crier_notifications={level},\
             crier_messaging={level},\
             crier_dispatch={level},\
             crier_analytics={level},\
             sqlx=warn,\
             sea_orm=warn,\
             h2=warn,\
             tower=warn,\
             hyper=warn,\
             reqwest=warn,\
             rustls=warn",
            level = log_level
        ))
    };

    let fmt_layer = match cli.log_format.as_str() {
        "full" => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
        _ => tracing_subscriber::fmt::layer() // "compact" or any other value
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set global default subscriber");

    match cli.command {
        Commands::Serve(serve_cmd) => serve_cmd.execute(log_level),
        Commands::Migrate(migrate_cmd) => migrate_cmd.execute(log_level),
        Commands::Maintenance(maintenance_cmd) => maintenance_cmd.execute(log_level),
    }
}
