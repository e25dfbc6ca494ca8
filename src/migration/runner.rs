//! Migration runner: builds a plan from the registry and the ledger and
//! executes it one transaction per step.

use super::ledger::Ledger;
use super::plan::RunPlan;
use super::registry::MigrationRegistry;
use super::types::{
    MigrationDirection, MigrationError, MigrationStatus, MigrationStep, RunReport,
};
use crate::config::DatabaseConfig;
use crate::db::{self, Schema};
use crate::scripts::ScriptCatalog;
use sqlx::AnyConnection;
use sqlx::Connection;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Runner for versioned migrations against one database.
///
/// Every call opens a fresh connection and recomputes its plan from the
/// ledger, so a call made after a failed one only executes what is still
/// pending.
pub struct MigrationRunner {
    database: DatabaseConfig,
    registry: Arc<MigrationRegistry>,
    scripts: Arc<ScriptCatalog>,
    ledger: Ledger,
}

impl MigrationRunner {
    pub fn new(
        database: DatabaseConfig,
        registry: Arc<MigrationRegistry>,
        scripts: Arc<ScriptCatalog>,
    ) -> Self {
        let ledger = Ledger::new(database.ledger_table.clone(), database.dialect);
        Self {
            database,
            registry,
            scripts,
            ledger,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    async fn connect(&self) -> Result<AnyConnection, MigrationError> {
        db::connect(&self.database)
            .await
            .map_err(MigrationError::Connection)
    }

    /// Apply every pending migration in ascending version order.
    ///
    /// Stops at the first failing step; that step's transaction is rolled
    /// back and earlier steps stay committed.
    pub async fn migrate_up(&self) -> Result<RunReport, MigrationError> {
        let steps = self.registry.discover()?;
        let mut conn = self.connect().await?;

        self.ledger.ensure_storage(&mut conn).await?;
        let applied = self.ledger.applied_versions(&mut conn).await?;
        let plan = RunPlan::up(&steps, &applied);

        self.execute(&mut conn, plan).await
    }

    /// Revert every applied migration with a version greater than `target`,
    /// in descending order.
    pub async fn migrate_down(&self, target: i64) -> Result<RunReport, MigrationError> {
        let steps = self.registry.discover()?;
        let mut conn = self.connect().await?;

        self.ledger.ensure_storage(&mut conn).await?;
        let applied = self.ledger.applied_versions(&mut conn).await?;
        let plan = RunPlan::down(&steps, &applied, target)?;

        self.execute(&mut conn, plan).await
    }

    /// Registered migrations with their ledger state, ascending.
    pub async fn status(&self) -> Result<Vec<MigrationStatus>, MigrationError> {
        let steps = self.registry.discover()?;
        let mut conn = self.connect().await?;

        self.ledger.ensure_storage(&mut conn).await?;
        let applied: HashMap<i64, _> = self
            .ledger
            .entries(&mut conn)
            .await?
            .into_iter()
            .map(|entry| (entry.version, entry.applied_at_utc))
            .collect();

        Ok(steps
            .iter()
            .map(|step| MigrationStatus {
                version: step.version(),
                description: step.description().to_string(),
                applied_at_utc: applied.get(&step.version()).copied(),
            })
            .collect())
    }

    async fn execute(
        &self,
        conn: &mut AnyConnection,
        plan: RunPlan,
    ) -> Result<RunReport, MigrationError> {
        let direction = plan.direction();

        if plan.is_empty() {
            info!(%direction, "No migrations to run");
            return Ok(RunReport {
                direction,
                versions: vec![],
            });
        }

        info!(%direction, count = plan.len(), versions = ?plan.versions(), "Starting migration");

        let mut executed = Vec::with_capacity(plan.len());
        for step in plan.steps() {
            let version = step.version();
            info!(
                version,
                %direction,
                description = %step.description(),
                "Applying migration"
            );

            match self.execute_step(conn, step.as_ref(), direction).await {
                Ok(true) => {
                    executed.push(version);
                    info!(version, %direction, "Migration committed");
                }
                Ok(false) => {
                    warn!(
                        version,
                        %direction,
                        "Ledger changed concurrently; skipping migration"
                    );
                }
                Err(e) => {
                    error!(version, %direction, error = %e, "Migration failed");
                    return Err(e);
                }
            }
        }

        info!(%direction, count = executed.len(), "Migration completed");

        Ok(RunReport {
            direction,
            versions: executed,
        })
    }

    /// Run one step and its ledger update in a single transaction.
    ///
    /// Returns `Ok(false)` when another process already moved the ledger for
    /// this version, in which case nothing is executed.
    async fn execute_step(
        &self,
        conn: &mut AnyConnection,
        step: &dyn MigrationStep,
        direction: MigrationDirection,
    ) -> Result<bool, MigrationError> {
        let version = step.version();
        let fail = |e: sqlx::Error| MigrationError::step(version, direction, e);

        // Dropping `tx` on any early return rolls the transaction back.
        let mut tx = conn.begin().await.map_err(fail)?;

        let applied = self
            .ledger
            .has_applied(&mut tx, version)
            .await
            .map_err(fail)?;
        let expected = direction == MigrationDirection::Down;
        if applied != expected {
            tx.rollback().await.map_err(fail)?;
            return Ok(false);
        }

        {
            let mut schema = Schema::new(&mut tx, self.database.dialect, &self.scripts);
            let result = match direction {
                MigrationDirection::Up => step.up(&mut schema).await,
                MigrationDirection::Down => step.down(&mut schema).await,
            };
            result.map_err(|e| MigrationError::step(version, direction, e))?;
        }

        let recorded = match direction {
            MigrationDirection::Up => {
                self.ledger
                    .record_applied(&mut tx, version, step.description())
                    .await
            }
            MigrationDirection::Down => self.ledger.record_reverted(&mut tx, version).await,
        };
        recorded.map_err(fail)?;

        tx.commit().await.map_err(fail)?;
        Ok(true)
    }
}
