//! Database access for migrations.
//!
//! Connections go through the `sqlx` Any driver so one binary can target
//! SQLite or PostgreSQL. Statements are built with `sea-query` and rendered
//! for the connected [`Dialect`].

mod schema;

pub use schema::Schema;

use crate::config::DatabaseConfig;
use sea_query::{
    Alias, Expr, PostgresQueryBuilder, Query, SchemaStatementBuilder, SelectStatement,
    SqliteQueryBuilder,
};
use sea_query_binder::{SqlxBinder, SqlxValues};
use sqlx::any::install_default_drivers;
use sqlx::AnyConnection;
use sqlx::Connection;
use std::fmt;

/// SQL dialect of the target database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    /// Infer the dialect from a connection URL scheme.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let scheme = connection_string.split(':').next()?.trim().to_ascii_lowercase();
        match scheme.as_str() {
            "sqlite" => Some(Dialect::Sqlite),
            "postgres" | "postgresql" => Some(Dialect::Postgres),
            _ => None,
        }
    }

    /// Render a DDL statement for this dialect.
    pub fn schema_sql<S: SchemaStatementBuilder>(&self, statement: &S) -> String {
        match self {
            Dialect::Sqlite => statement.to_string(SqliteQueryBuilder),
            Dialect::Postgres => statement.to_string(PostgresQueryBuilder),
        }
    }

    /// Render a query and its bind values for this dialect.
    pub fn query_sql<S: SqlxBinder>(&self, statement: &S) -> (String, SqlxValues) {
        match self {
            Dialect::Sqlite => statement.build_sqlx(SqliteQueryBuilder),
            Dialect::Postgres => statement.build_sqlx(PostgresQueryBuilder),
        }
    }

    /// Query returning one row when `table` exists in the current schema.
    pub fn table_exists_query(&self, table: &str) -> SelectStatement {
        match self {
            Dialect::Sqlite => Query::select()
                .expr(Expr::cust("1"))
                .from(Alias::new("sqlite_master"))
                .and_where(Expr::col(Alias::new("type")).eq("table"))
                .and_where(Expr::col(Alias::new("name")).eq(table))
                .to_owned(),
            Dialect::Postgres => Query::select()
                .expr(Expr::cust("1"))
                .from((Alias::new("information_schema"), Alias::new("tables")))
                .and_where(Expr::col(Alias::new("table_schema")).eq(Expr::cust("current_schema()")))
                .and_where(Expr::col(Alias::new("table_name")).eq(table))
                .to_owned(),
        }
    }

    /// Query listing the column names of one table, bound to the table name.
    pub fn column_names_sql(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "SELECT name FROM pragma_table_info(?)",
            Dialect::Postgres => {
                "SELECT column_name::text FROM information_schema.columns \
                 WHERE table_schema = current_schema() AND table_name = $1"
            }
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Sqlite => write!(f, "sqlite"),
            Dialect::Postgres => write!(f, "postgres"),
        }
    }
}

/// Open a single connection to the target database.
pub async fn connect(config: &DatabaseConfig) -> Result<AnyConnection, sqlx::Error> {
    install_default_drivers();
    AnyConnection::connect(&config.connection_string).await
}
