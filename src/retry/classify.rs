//! Transient-fault detection for migration errors.

use crate::db::Dialect;
use crate::migration::{MigrationError, StepError};
use crate::utils::error_chain;
use std::fmt;

/// Why an error was judged worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientFault {
    /// Connection dropped, refused or never established.
    Connection,
    /// Pool or statement timeout.
    Timeout,
    /// Deadlock, serialization failure or lock wait.
    LockContention,
    /// Server refused work for lack of resources.
    Throttled,
    /// Error message matched a configured "server paused" marker.
    ServerPaused,
}

impl fmt::Display for TransientFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransientFault::Connection => "connection",
            TransientFault::Timeout => "timeout",
            TransientFault::LockContention => "lock contention",
            TransientFault::Throttled => "throttled",
            TransientFault::ServerPaused => "server paused",
        };
        f.write_str(name)
    }
}

/// PostgreSQL SQLSTATE codes outside class 08 that are worth retrying.
const POSTGRES_TRANSIENT_CODES: &[(&str, TransientFault)] = &[
    ("40001", TransientFault::LockContention), // serialization_failure
    ("40P01", TransientFault::LockContention), // deadlock_detected
    ("55P03", TransientFault::LockContention), // lock_not_available
    ("53300", TransientFault::Throttled),      // too_many_connections
    ("53400", TransientFault::Throttled),      // configuration_limit_exceeded
    ("57P01", TransientFault::Connection),     // admin_shutdown
    ("57P02", TransientFault::Connection),     // crash_shutdown
    ("57P03", TransientFault::Connection),     // cannot_connect_now
    ("57014", TransientFault::Timeout),        // query_canceled
];

const SQLITE_BUSY: i64 = 5;
const SQLITE_LOCKED: i64 = 6;

/// Decides whether a failed migration pass may be retried.
///
/// Registry, plan and configuration failures are always permanent.
/// Connection, ledger and step failures are transient when the underlying driver
/// error matches a provider heuristic, or when the rendered error chain
/// contains one of the paused-server markers (case-insensitive).
#[derive(Debug, Clone)]
pub struct TransientClassifier {
    dialect: Dialect,
    paused_markers: Vec<String>,
}

impl TransientClassifier {
    pub fn new(dialect: Dialect, paused_markers: &[String]) -> Self {
        Self {
            dialect,
            paused_markers: paused_markers
                .iter()
                .filter(|m| !m.is_empty())
                .map(|m| m.to_lowercase())
                .collect(),
        }
    }

    pub fn classify(&self, err: &MigrationError) -> Option<TransientFault> {
        match err {
            MigrationError::DuplicateVersion(_)
            | MigrationError::UnknownVersion(_)
            | MigrationError::Config(_) => None,
            MigrationError::Connection(source) | MigrationError::LedgerUnavailable(source) => self
                .paused_marker(err)
                .or_else(|| self.classify_driver_error(source)),
            MigrationError::StepExecution { source, .. } => {
                self.paused_marker(err).or_else(|| match source {
                    StepError::Database(source) => self.classify_driver_error(source),
                    StepError::MissingScript(_) | StepError::Failed(_) => None,
                })
            }
        }
    }

    pub fn is_transient(&self, err: &MigrationError) -> bool {
        self.classify(err).is_some()
    }

    fn paused_marker(&self, err: &MigrationError) -> Option<TransientFault> {
        if self.paused_markers.is_empty() {
            return None;
        }

        let rendered = error_chain(err).to_lowercase();
        self.paused_markers
            .iter()
            .any(|marker| rendered.contains(marker.as_str()))
            .then_some(TransientFault::ServerPaused)
    }

    fn classify_driver_error(&self, err: &sqlx::Error) -> Option<TransientFault> {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => Some(TransientFault::Connection),
            sqlx::Error::PoolTimedOut => Some(TransientFault::Timeout),
            sqlx::Error::Database(db_err) => db_err
                .code()
                .and_then(|code| self.classify_code(code.as_ref())),
            _ => None,
        }
    }

    fn classify_code(&self, code: &str) -> Option<TransientFault> {
        match self.dialect {
            Dialect::Postgres => {
                if code.starts_with("08") {
                    return Some(TransientFault::Connection);
                }
                POSTGRES_TRANSIENT_CODES
                    .iter()
                    .find(|(known, _)| *known == code)
                    .map(|(_, fault)| *fault)
            }
            Dialect::Sqlite => {
                // Extended result codes carry the primary code in the low byte.
                let primary = code.parse::<i64>().ok()? & 0xff;
                matches!(primary, SQLITE_BUSY | SQLITE_LOCKED)
                    .then_some(TransientFault::LockContention)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;
    use crate::migration::MigrationDirection;
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::borrow::Cow;
    use std::error::Error as StdError;

    #[derive(Debug)]
    struct FakeDbError {
        code: &'static str,
        message: &'static str,
    }

    impl fmt::Display for FakeDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.message)
        }
    }

    impl StdError for FakeDbError {}

    impl DatabaseError for FakeDbError {
        fn message(&self) -> &str {
            self.message
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            Some(Cow::Borrowed(self.code))
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::Other
        }
    }

    fn db_error(code: &'static str, message: &'static str) -> sqlx::Error {
        sqlx::Error::Database(Box::new(FakeDbError { code, message }))
    }

    fn step_error(source: sqlx::Error) -> MigrationError {
        MigrationError::step(7, MigrationDirection::Up, source)
    }

    fn markers() -> Vec<String> {
        vec!["Data Provider error 6".to_string()]
    }

    #[test]
    fn test_io_errors_are_transient() {
        let classifier = TransientClassifier::new(Dialect::Postgres, &markers());
        let err = MigrationError::Connection(sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        )));

        assert_eq!(classifier.classify(&err), Some(TransientFault::Connection));
    }

    #[test]
    fn test_pool_timeout_is_transient() {
        let classifier = TransientClassifier::new(Dialect::Sqlite, &markers());
        let err = MigrationError::Connection(sqlx::Error::PoolTimedOut);
        assert_eq!(classifier.classify(&err), Some(TransientFault::Timeout));
    }

    #[test]
    fn test_postgres_codes() {
        let classifier = TransientClassifier::new(Dialect::Postgres, &markers());

        let deadlock = step_error(db_error("40P01", "deadlock detected"));
        assert_eq!(
            classifier.classify(&deadlock),
            Some(TransientFault::LockContention)
        );

        let connection = step_error(db_error("08006", "connection failure"));
        assert_eq!(
            classifier.classify(&connection),
            Some(TransientFault::Connection)
        );

        let starting = MigrationError::Connection(db_error("57P03", "the database system is starting up"));
        assert_eq!(
            classifier.classify(&starting),
            Some(TransientFault::Connection)
        );

        let syntax = step_error(db_error("42601", "syntax error"));
        assert_eq!(classifier.classify(&syntax), None);
    }

    #[test]
    fn test_sqlite_busy_and_extended_codes() {
        let classifier = TransientClassifier::new(Dialect::Sqlite, &markers());

        let busy = step_error(db_error("5", "database is locked"));
        assert!(classifier.is_transient(&busy));

        // SQLITE_BUSY_SNAPSHOT
        let busy_snapshot = step_error(db_error("517", "database is locked"));
        assert!(classifier.is_transient(&busy_snapshot));

        // SQLITE_CONSTRAINT_PRIMARYKEY
        let constraint = step_error(db_error("1555", "UNIQUE constraint failed"));
        assert!(!classifier.is_transient(&constraint));
    }

    #[test]
    fn test_paused_marker_matches_case_insensitively() {
        let classifier = TransientClassifier::new(Dialect::Postgres, &markers());
        let err = MigrationError::Connection(sqlx::Error::Protocol(
            "A network-related error occurred (DATA PROVIDER ERROR 6)".to_string(),
        ));

        assert_eq!(classifier.classify(&err), Some(TransientFault::ServerPaused));
    }

    #[test]
    fn test_paused_marker_in_step_failure() {
        let classifier = TransientClassifier::new(Dialect::Postgres, &markers());
        let err = MigrationError::step(
            3,
            MigrationDirection::Up,
            StepError::Failed("Data Provider error 6: server is resuming".to_string()),
        );

        assert_eq!(classifier.classify(&err), Some(TransientFault::ServerPaused));
    }

    #[test]
    fn test_permanent_variants_never_retry() {
        let classifier = TransientClassifier::new(Dialect::Postgres, &markers());

        assert!(!classifier.is_transient(&MigrationError::DuplicateVersion(1)));
        assert!(!classifier.is_transient(&MigrationError::UnknownVersion(4)));
        assert!(!classifier.is_transient(&MigrationError::Config(
            ConfigError::MissingConnectionString
        )));
    }

    #[test]
    fn test_ledger_failures_follow_driver_error() {
        let classifier = TransientClassifier::new(Dialect::Postgres, &markers());

        let reset = MigrationError::LedgerUnavailable(sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        )));
        assert_eq!(classifier.classify(&reset), Some(TransientFault::Connection));

        let paused = MigrationError::LedgerUnavailable(sqlx::Error::Protocol(
            "Data Provider error 6".to_string(),
        ));
        assert_eq!(classifier.classify(&paused), Some(TransientFault::ServerPaused));

        let denied = MigrationError::LedgerUnavailable(db_error(
            "42501",
            "permission denied for table version_info",
        ));
        assert_eq!(classifier.classify(&denied), None);

        let malformed =
            MigrationError::LedgerUnavailable(sqlx::Error::ColumnNotFound("version".to_string()));
        assert_eq!(classifier.classify(&malformed), None);
    }

    #[test]
    fn test_sqlite_ledger_schema_error_is_permanent() {
        let classifier = TransientClassifier::new(Dialect::Sqlite, &markers());
        let err = MigrationError::LedgerUnavailable(db_error("1", "no such column: version"));
        assert!(!classifier.is_transient(&err));
    }

    #[test]
    fn test_non_matching_protocol_error_is_permanent() {
        let classifier = TransientClassifier::new(Dialect::Postgres, &markers());
        let err = MigrationError::Connection(sqlx::Error::Protocol(
            "password authentication failed".to_string(),
        ));

        assert_eq!(classifier.classify(&err), None);
    }
}
