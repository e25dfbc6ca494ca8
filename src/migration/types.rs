//! Types for the migration system.

use crate::config::ConfigError;
use crate::db::Schema;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

/// Failure raised from inside a single step's up or down action.
#[derive(Error, Debug)]
pub enum StepError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Script not found: {0}")]
    MissingScript(String),

    #[error("{0}")]
    Failed(String),
}

/// Error types for migration operations.
#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Duplicate migration version {0}")]
    DuplicateVersion(i64),

    #[error("Migration ledger unavailable: {0}")]
    LedgerUnavailable(#[source] sqlx::Error),

    #[error("Migration {version} failed while migrating {direction}: {source}")]
    StepExecution {
        version: i64,
        direction: MigrationDirection,
        #[source]
        source: StepError,
    },

    #[error("Failed to connect to database: {0}")]
    Connection(#[source] sqlx::Error),

    #[error("Version {0} is recorded as applied but no migration is registered for it")]
    UnknownVersion(i64),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl MigrationError {
    pub(crate) fn step(version: i64, direction: MigrationDirection, source: impl Into<StepError>) -> Self {
        MigrationError::StepExecution {
            version,
            direction,
            source: source.into(),
        }
    }
}

/// Trait for a single versioned migration.
///
/// A step is registered once at startup and never changes. `up` and `down`
/// run inside a transaction owned by the runner; the ledger row is written in
/// that same transaction, so a step either fully commits with its ledger entry
/// or leaves nothing behind.
#[async_trait]
pub trait MigrationStep: Send + Sync {
    /// Unique, monotonically increasing version number.
    fn version(&self) -> i64;

    /// Human-readable description of what this migration does.
    fn description(&self) -> &str;

    /// Apply the migration.
    async fn up(&self, schema: &mut Schema<'_>) -> Result<(), StepError>;

    /// Revert the migration.
    async fn down(&self, schema: &mut Schema<'_>) -> Result<(), StepError>;
}

/// Direction of migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationDirection {
    /// Applying pending versions.
    Up,
    /// Reverting applied versions.
    Down,
}

impl fmt::Display for MigrationDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationDirection::Up => write!(f, "up"),
            MigrationDirection::Down => write!(f, "down"),
        }
    }
}

/// One row of the applied-version ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub version: i64,
    pub applied_at_utc: DateTime<Utc>,
    pub description: Option<String>,
}

/// Outcome of one runner pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub direction: MigrationDirection,
    /// Versions executed, in execution order.
    pub versions: Vec<i64>,
}

impl RunReport {
    pub fn is_noop(&self) -> bool {
        self.versions.is_empty()
    }
}

/// Registered migration joined with its ledger entry, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    pub version: i64,
    pub description: String,
    pub applied_at_utc: Option<DateTime<Utc>>,
}

impl MigrationStatus {
    pub fn is_applied(&self) -> bool {
        self.applied_at_utc.is_some()
    }
}
