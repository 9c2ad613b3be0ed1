mod maintenance;
mod migrate;
mod serve;

pub use maintenance::MaintenanceCommand;
pub use migrate::MigrateCommand;
pub use serve::ServeCommand;
