use crate::db::Dialect;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::fs;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Connection string is required.")]
    MissingConnectionString,

    #[error("Unsupported database in connection string (expected sqlite: or postgres:): {0}")]
    UnsupportedDatabase(String),

    #[error("Invalid ledger table name: {0:?}")]
    InvalidLedgerTable(String),
}

/// Default ledger table name
fn default_ledger_table() -> String {
    "version_info".to_string()
}

/// Default backoff schedule: 2, 5 and 10 minutes
fn default_backoff_schedule_secs() -> Vec<u64> {
    vec![2 * 60, 5 * 60, 10 * 60]
}

/// Default substrings identifying a paused or provisioning server
fn default_paused_markers() -> Vec<String> {
    vec!["Data Provider error 6".to_string()]
}

/// Migrator configuration, optionally read from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigratorConfig {
    /// Name of the table recording applied migration versions.
    #[serde(default = "default_ledger_table")]
    pub ledger_table: String,
    /// Waits between attempts, in seconds. One retry per entry.
    #[serde(default = "default_backoff_schedule_secs")]
    pub backoff_schedule_secs: Vec<u64>,
    /// Case-insensitive substrings that mark an error as "server paused".
    #[serde(default = "default_paused_markers")]
    pub paused_markers: Vec<String>,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            ledger_table: default_ledger_table(),
            backoff_schedule_secs: default_backoff_schedule_secs(),
            paused_markers: default_paused_markers(),
        }
    }
}

impl MigratorConfig {
    pub fn backoff_schedule(&self) -> Vec<Duration> {
        self.backoff_schedule_secs
            .iter()
            .map(|secs| Duration::from_secs(*secs))
            .collect()
    }
}

/// Read the configuration file
pub async fn read_config(config_path: &Path) -> Result<MigratorConfig, ConfigError> {
    let content = fs::read_to_string(config_path).await?;
    let config: MigratorConfig = serde_json::from_str(&content)?;
    validate_table_name(&config.ledger_table)?;
    Ok(config)
}

/// Connection settings for the target database.
///
/// Passed explicitly to the runner; nothing reads a connection string from
/// global state.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub connection_string: String,
    pub dialect: Dialect,
    pub ledger_table: String,
}

impl DatabaseConfig {
    pub fn new(
        connection_string: impl Into<String>,
        ledger_table: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let connection_string = connection_string.into();
        if connection_string.trim().is_empty() {
            return Err(ConfigError::MissingConnectionString);
        }

        let dialect = Dialect::from_connection_string(&connection_string)
            .ok_or_else(|| ConfigError::UnsupportedDatabase(redact(&connection_string)))?;

        let ledger_table = ledger_table.into();
        validate_table_name(&ledger_table)?;

        Ok(Self {
            connection_string,
            dialect,
            ledger_table,
        })
    }
}

fn validate_table_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ConfigError::InvalidLedgerTable(name.to_string()));
    }
    Ok(())
}

/// Keep only the scheme so credentials never reach the logs
fn redact(connection_string: &str) -> String {
    match connection_string.split_once(':') {
        Some((scheme, _)) => format!("{scheme}:..."),
        None => "<unparseable>".to_string(),
    }
}
