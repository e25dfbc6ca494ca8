pub mod config;
pub mod db;
pub mod migration;
pub mod retry;
pub mod scripts;
pub mod utils;

// Re-export commonly used types
pub use config::{read_config, ConfigError, DatabaseConfig, MigratorConfig};
pub use db::{Dialect, Schema};
pub use migration::{
    create_registry, Ledger, LedgerEntry, MigrationDirection, MigrationError, MigrationRegistry,
    MigrationRunner, MigrationStatus, MigrationStep, RunPlan, RunReport, StepError,
};
pub use retry::{RetryPolicy, RetrySupervisor, Sleeper, TokioSleeper, TransientClassifier, TransientFault};
pub use scripts::ScriptCatalog;
