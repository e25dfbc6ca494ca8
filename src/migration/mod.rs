//! Migration system for the review database.
//!
//! This module applies versioned schema changes in strict order and records
//! each applied version in a ledger table inside the target database.
//!
//! # Overview
//!
//! - Steps implement [`MigrationStep`] with `up()` and `down()` methods
//! - Steps are registered in a [`MigrationRegistry`] by [`create_registry`]
//! - The [`Ledger`] records applied versions in the database itself
//! - The [`MigrationRunner`] computes a [`RunPlan`] from registry and ledger
//!   and executes it one transaction per step, stopping at the first failure
//!
//! # Usage
//!
//! ```ignore
//! let runner = MigrationRunner::new(database, create_registry(), Arc::new(ScriptCatalog::embedded()));
//! let report = runner.migrate_up().await?;
//! ```

mod ledger;
pub mod migrations;
mod plan;
mod registry;
mod runner;
mod types;

pub use ledger::Ledger;
pub use plan::RunPlan;
pub use registry::MigrationRegistry;
pub use runner::MigrationRunner;
pub use types::{
    LedgerEntry, MigrationDirection, MigrationError, MigrationStatus, MigrationStep, RunReport,
    StepError,
};

use migrations::v0001::InitialSchemaMigration;
use std::sync::Arc;

/// Create the default migration registry with all available migrations.
pub fn create_registry() -> Arc<MigrationRegistry> {
    let mut registry = MigrationRegistry::new();

    registry.register(Arc::new(InitialSchemaMigration::new()));

    Arc::new(registry)
}
