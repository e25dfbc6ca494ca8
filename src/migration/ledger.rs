//! Applied-version ledger stored in the target database.

use super::types::{LedgerEntry, MigrationError};
use crate::db::Dialect;
use crate::utils::now_iso;
use chrono::{DateTime, Utc};
use sea_query::{Alias, ColumnDef, Expr, Iden, Order, Query, Table};
use sqlx::AnyConnection;
use std::collections::BTreeSet;
use tracing::debug;

#[derive(Iden)]
enum LedgerColumn {
    Version,
    AppliedAtUtc,
    Description,
}

/// Longest description stored per row; longer ones are truncated.
const DESCRIPTION_MAX_LEN: usize = 1024;

/// Persistent record of which versions have been applied.
///
/// The `has_applied`, `record_applied` and `record_reverted` operations take
/// the connection of the step's open transaction so the ledger row commits or
/// rolls back together with the step.
#[derive(Debug, Clone)]
pub struct Ledger {
    table: String,
    dialect: Dialect,
}

impl Ledger {
    pub fn new(table: impl Into<String>, dialect: Dialect) -> Self {
        Self {
            table: table.into(),
            dialect,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn table_ref(&self) -> Alias {
        Alias::new(self.table.as_str())
    }

    /// Create the ledger table if it does not exist yet.
    pub async fn ensure_storage(&self, conn: &mut AnyConnection) -> Result<(), MigrationError> {
        let statement = Table::create()
            .table(self.table_ref())
            .if_not_exists()
            .col(
                ColumnDef::new(LedgerColumn::Version)
                    .big_integer()
                    .not_null()
                    .primary_key(),
            )
            .col(
                ColumnDef::new(LedgerColumn::AppliedAtUtc)
                    .string_len(40)
                    .not_null(),
            )
            .col(
                ColumnDef::new(LedgerColumn::Description)
                    .string_len(DESCRIPTION_MAX_LEN as u32)
                    .null(),
            )
            .to_owned();
        let sql = self.dialect.schema_sql(&statement);

        sqlx::raw_sql(&sql)
            .execute(&mut *conn)
            .await
            .map_err(MigrationError::LedgerUnavailable)?;

        self.verify_columns(conn).await?;

        debug!(table = %self.table, "Migration ledger ready");
        Ok(())
    }

    /// Fail if an existing ledger table lacks one of the expected columns.
    async fn verify_columns(&self, conn: &mut AnyConnection) -> Result<(), MigrationError> {
        let rows: Vec<(String,)> = sqlx::query_as(self.dialect.column_names_sql())
            .bind(self.table.as_str())
            .fetch_all(&mut *conn)
            .await
            .map_err(MigrationError::LedgerUnavailable)?;
        let present: Vec<String> = rows.into_iter().map(|(name,)| name.to_lowercase()).collect();

        let expected = [
            LedgerColumn::Version,
            LedgerColumn::AppliedAtUtc,
            LedgerColumn::Description,
        ];
        if let Some(missing) = expected
            .iter()
            .map(|column| column.to_string())
            .find(|name| !present.contains(name))
        {
            return Err(MigrationError::LedgerUnavailable(sqlx::Error::ColumnNotFound(
                format!("{}.{}", self.table, missing),
            )));
        }

        Ok(())
    }

    /// All applied versions.
    pub async fn applied_versions(
        &self,
        conn: &mut AnyConnection,
    ) -> Result<BTreeSet<i64>, MigrationError> {
        let query = Query::select()
            .column(LedgerColumn::Version)
            .from(self.table_ref())
            .to_owned();
        let (sql, values) = self.dialect.query_sql(&query);

        let rows: Vec<(i64,)> = sqlx::query_as_with(&sql, values)
            .fetch_all(&mut *conn)
            .await
            .map_err(MigrationError::LedgerUnavailable)?;

        Ok(rows.into_iter().map(|(version,)| version).collect())
    }

    /// Every ledger row, ascending by version.
    pub async fn entries(&self, conn: &mut AnyConnection) -> Result<Vec<LedgerEntry>, MigrationError> {
        let query = Query::select()
            .columns([
                LedgerColumn::Version,
                LedgerColumn::AppliedAtUtc,
                LedgerColumn::Description,
            ])
            .from(self.table_ref())
            .order_by(LedgerColumn::Version, Order::Asc)
            .to_owned();
        let (sql, values) = self.dialect.query_sql(&query);

        let rows: Vec<(i64, String, Option<String>)> = sqlx::query_as_with(&sql, values)
            .fetch_all(&mut *conn)
            .await
            .map_err(MigrationError::LedgerUnavailable)?;

        rows.into_iter()
            .map(|(version, applied_at, description)| -> Result<LedgerEntry, MigrationError> {
                let applied_at_utc = DateTime::parse_from_rfc3339(&applied_at)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| MigrationError::LedgerUnavailable(sqlx::Error::Decode(Box::new(e))))?;

                Ok(LedgerEntry {
                    version,
                    applied_at_utc,
                    description,
                })
            })
            .collect()
    }

    pub async fn has_applied(&self, conn: &mut AnyConnection, version: i64) -> Result<bool, sqlx::Error> {
        let query = Query::select()
            .column(LedgerColumn::Version)
            .from(self.table_ref())
            .and_where(Expr::col(LedgerColumn::Version).eq(version))
            .to_owned();
        let (sql, values) = self.dialect.query_sql(&query);

        let row = sqlx::query_with(&sql, values)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(row.is_some())
    }

    /// Insert the ledger row for `version`.
    ///
    /// The primary key makes a second insert of the same version fail, which
    /// aborts the step of a process racing to apply it.
    pub async fn record_applied(
        &self,
        conn: &mut AnyConnection,
        version: i64,
        description: &str,
    ) -> Result<(), sqlx::Error> {
        let description: String = description.chars().take(DESCRIPTION_MAX_LEN).collect();
        let query = Query::insert()
            .into_table(self.table_ref())
            .columns([
                LedgerColumn::Version,
                LedgerColumn::AppliedAtUtc,
                LedgerColumn::Description,
            ])
            .values_panic([version.into(), now_iso().into(), description.into()])
            .to_owned();
        let (sql, values) = self.dialect.query_sql(&query);

        sqlx::query_with(&sql, values).execute(&mut *conn).await?;
        Ok(())
    }

    /// Delete the ledger row for `version`.
    pub async fn record_reverted(&self, conn: &mut AnyConnection, version: i64) -> Result<(), sqlx::Error> {
        let query = Query::delete()
            .from_table(self.table_ref())
            .and_where(Expr::col(LedgerColumn::Version).eq(version))
            .to_owned();
        let (sql, values) = self.dialect.query_sql(&query);

        sqlx::query_with(&sql, values).execute(&mut *conn).await?;
        Ok(())
    }
}
