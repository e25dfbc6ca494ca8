//! Schema-manipulation handle given to migration steps.

use super::Dialect;
use crate::migration::StepError;
use crate::scripts::ScriptCatalog;
use sea_query::{IntoTableRef, SchemaStatementBuilder, Table, TableCreateStatement};
use sqlx::{AnyConnection, Executor};
use tracing::debug;

/// Handle bound to the transaction of the step being executed.
///
/// Every operation runs immediately, in call order, on that transaction.
pub struct Schema<'c> {
    conn: &'c mut AnyConnection,
    dialect: Dialect,
    scripts: &'c ScriptCatalog,
}

impl<'c> Schema<'c> {
    pub fn new(conn: &'c mut AnyConnection, dialect: Dialect, scripts: &'c ScriptCatalog) -> Self {
        Self {
            conn,
            dialect,
            scripts,
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Check whether a table exists in the current schema.
    pub async fn table_exists(&mut self, table: &str) -> Result<bool, StepError> {
        let (sql, values) = self
            .dialect
            .query_sql(&self.dialect.table_exists_query(table));

        let row = sqlx::query_with(&sql, values)
            .fetch_optional(&mut *self.conn)
            .await?;

        Ok(row.is_some())
    }

    /// Render and execute any sea-query schema statement.
    pub async fn apply<S>(&mut self, statement: &S) -> Result<(), StepError>
    where
        S: SchemaStatementBuilder + Sync,
    {
        let sql = self.dialect.schema_sql(statement);
        self.execute(&sql).await
    }

    pub async fn create_table(&mut self, statement: &TableCreateStatement) -> Result<(), StepError> {
        self.apply(statement).await
    }

    pub async fn drop_table<T>(&mut self, table: T) -> Result<(), StepError>
    where
        T: IntoTableRef + Send,
    {
        let statement = Table::drop().table(table).to_owned();
        self.apply(&statement).await
    }

    /// Execute raw SQL. May contain several statements.
    pub async fn execute(&mut self, sql: &str) -> Result<(), StepError> {
        debug!(sql = %sql, "Executing migration statement");
        Executor::execute(&mut *self.conn, sql).await?;
        Ok(())
    }

    /// Execute a named script from the catalog.
    pub async fn execute_script(&mut self, name: &str) -> Result<(), StepError> {
        let script = self
            .scripts
            .get(name)
            .ok_or_else(|| StepError::MissingScript(name.to_string()))?;

        debug!(script = %name, "Executing migration script");
        Executor::execute(&mut *self.conn, script).await?;
        Ok(())
    }
}
