#![allow(dead_code)]

use async_trait::async_trait;
use reviewdb_migrator::{
    DatabaseConfig, MigrationDirection, MigrationRegistry, MigrationRunner, MigrationStep,
    Schema, ScriptCatalog, StepError,
};
use sqlx::any::install_default_drivers;
use sqlx::AnyConnection;
use sqlx::Connection;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const LEDGER_TABLE: &str = "version_info";

/// SQLite database file inside a temporary directory.
pub struct TestDb {
    _dir: TempDir,
    pub path: PathBuf,
    pub url: String,
}

pub fn create_test_db() -> TestDb {
    let dir = tempfile::tempdir().expect("Should create temp dir");
    let path = dir.path().join("review.db");
    let url = format!("sqlite://{}?mode=rwc", path.display());
    TestDb {
        _dir: dir,
        path,
        url,
    }
}

pub fn database_config(url: &str) -> DatabaseConfig {
    DatabaseConfig::new(url, LEDGER_TABLE).expect("Should build database config")
}

pub fn runner(url: &str, registry: MigrationRegistry) -> MigrationRunner {
    MigrationRunner::new(
        database_config(url),
        Arc::new(registry),
        Arc::new(ScriptCatalog::embedded()),
    )
}

pub async fn connect(url: &str) -> AnyConnection {
    install_default_drivers();
    AnyConnection::connect(url)
        .await
        .expect("Should connect to test database")
}

pub async fn execute(url: &str, sql: &str) {
    let mut conn = connect(url).await;
    sqlx::raw_sql(sql)
        .execute(&mut conn)
        .await
        .expect("Should execute setup SQL");
}

async fn object_exists(url: &str, kind: &str, name: &str) -> bool {
    let mut conn = connect(url).await;
    sqlx::query("SELECT name FROM sqlite_master WHERE type = ? AND name = ?")
        .bind(kind)
        .bind(name)
        .fetch_optional(&mut conn)
        .await
        .expect("Should query sqlite_master")
        .is_some()
}

pub async fn table_exists(url: &str, name: &str) -> bool {
    object_exists(url, "table", name).await
}

pub async fn view_exists(url: &str, name: &str) -> bool {
    object_exists(url, "view", name).await
}

pub async fn index_exists(url: &str, name: &str) -> bool {
    object_exists(url, "index", name).await
}

/// Ledger rows as (version, applied_at_utc), ascending.
pub async fn ledger_rows(url: &str) -> Vec<(i64, String)> {
    let mut conn = connect(url).await;
    sqlx::query_as(&format!(
        "SELECT version, applied_at_utc FROM {LEDGER_TABLE} ORDER BY version"
    ))
    .fetch_all(&mut conn)
    .await
    .expect("Should read ledger")
}

pub async fn ledger_versions(url: &str) -> Vec<i64> {
    ledger_rows(url)
        .await
        .into_iter()
        .map(|(version, _)| version)
        .collect()
}

/// Shared record of step invocations, in call order.
pub type CallLog = Arc<Mutex<Vec<(i64, MigrationDirection)>>>;

pub fn new_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn calls(log: &CallLog) -> Vec<(i64, MigrationDirection)> {
    log.lock().unwrap().clone()
}

/// Step that creates table `t_<version>` and drops it again on the way down.
pub struct TableStep {
    pub version: i64,
    pub log: CallLog,
}

#[async_trait]
impl MigrationStep for TableStep {
    fn version(&self) -> i64 {
        self.version
    }

    fn description(&self) -> &str {
        "Create a test table"
    }

    async fn up(&self, schema: &mut Schema<'_>) -> Result<(), StepError> {
        self.log
            .lock()
            .unwrap()
            .push((self.version, MigrationDirection::Up));
        schema
            .execute(&format!("CREATE TABLE t_{} (id INTEGER)", self.version))
            .await
    }

    async fn down(&self, schema: &mut Schema<'_>) -> Result<(), StepError> {
        self.log
            .lock()
            .unwrap()
            .push((self.version, MigrationDirection::Down));
        schema
            .execute(&format!("DROP TABLE t_{}", self.version))
            .await
    }
}

/// Step whose first sub-operation succeeds and whose second fails.
pub struct FailingStep {
    pub version: i64,
    pub log: CallLog,
}

#[async_trait]
impl MigrationStep for FailingStep {
    fn version(&self) -> i64 {
        self.version
    }

    fn description(&self) -> &str {
        "Fail halfway through"
    }

    async fn up(&self, schema: &mut Schema<'_>) -> Result<(), StepError> {
        self.log
            .lock()
            .unwrap()
            .push((self.version, MigrationDirection::Up));
        schema
            .execute(&format!("CREATE TABLE partial_{} (id INTEGER)", self.version))
            .await?;
        schema
            .execute("INSERT INTO table_that_does_not_exist VALUES (1)")
            .await
    }

    async fn down(&self, _schema: &mut Schema<'_>) -> Result<(), StepError> {
        self.log
            .lock()
            .unwrap()
            .push((self.version, MigrationDirection::Down));
        Ok(())
    }
}

/// Step that fails with a paused-server message until `resumed` is set.
pub struct PausedUntilResumedStep {
    pub version: i64,
    pub log: CallLog,
    pub resumed: Arc<AtomicBool>,
}

#[async_trait]
impl MigrationStep for PausedUntilResumedStep {
    fn version(&self) -> i64 {
        self.version
    }

    fn description(&self) -> &str {
        "Needs the server to be resumed"
    }

    async fn up(&self, schema: &mut Schema<'_>) -> Result<(), StepError> {
        self.log
            .lock()
            .unwrap()
            .push((self.version, MigrationDirection::Up));
        if !self.resumed.load(Ordering::SeqCst) {
            return Err(StepError::Failed(
                "Database is paused (Data Provider error 6)".to_string(),
            ));
        }
        schema
            .execute(&format!("CREATE TABLE t_{} (id INTEGER)", self.version))
            .await
    }

    async fn down(&self, schema: &mut Schema<'_>) -> Result<(), StepError> {
        schema
            .execute(&format!("DROP TABLE t_{}", self.version))
            .await
    }
}

pub fn table_steps(versions: &[i64], log: &CallLog) -> MigrationRegistry {
    let mut registry = MigrationRegistry::new();
    for version in versions {
        registry.register(Arc::new(TableStep {
            version: *version,
            log: Arc::clone(log),
        }));
    }
    registry
}
