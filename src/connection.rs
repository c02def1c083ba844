/// Connection Module
///
/// `Connection` is a thin facade over one live driver handle. Every
/// operation guards against an uninitialized handle and fails fast; the
/// actual work is forwarded to the driver. Driver errors are classified
/// into the crate's taxonomy on the way out, so constraint violations
/// surface with table/column context instead of as opaque strings.
///
/// A `Connection` has no internal synchronization. The pool's
/// acquire/release protocol is the only mechanism enforcing single
/// ownership; a handed-out connection must not be shared across threads
/// until it is released.
use crate::config::PoolConfig;
use crate::core::{ConstraintKind, ConstraintViolation, QuarryError, Result};
use crate::result_set::ResultSet;
use crate::value::SqlValue;
use rusqlite::params_from_iter;
use std::cell::Cell;
use tracing::debug;

/// One live database handle plus its session flags.
pub struct Connection {
    handle: Option<rusqlite::Connection>,
    auto_commit: Cell<bool>,
    auto_reconnect: bool,
    test_query: String,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("initialized", &self.handle.is_some())
            .field("auto_commit", &self.auto_commit.get())
            .field("auto_reconnect", &self.auto_reconnect)
            .finish()
    }
}

impl Connection {
    /// Opens a connection using the config's URL (synthesized from the
    /// discrete fields when none was set) and applies session defaults.
    pub fn connect(config: &PoolConfig) -> Result<Self> {
        let url = config.build_connection_url();
        debug!("opening connection to {}", url);
        let handle = rusqlite::Connection::open(&url)
            .map_err(|e| QuarryError::Connection(format!("failed to connect to {url}: {e}")))?;

        handle
            .execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(classify_driver_error)?;

        Ok(Connection {
            handle: Some(handle),
            auto_commit: Cell::new(config.auto_commit),
            auto_reconnect: config.auto_reconnect,
            test_query: config.test_query.clone(),
        })
    }

    /// Wraps an already-open driver handle. Used by tests and by callers
    /// that manage their own connections.
    pub fn from_handle(handle: rusqlite::Connection) -> Self {
        Connection {
            handle: Some(handle),
            auto_commit: Cell::new(true),
            auto_reconnect: false,
            test_query: "SELECT 1".to_string(),
        }
    }

    fn handle(&self) -> Result<&rusqlite::Connection> {
        self.handle
            .as_ref()
            .ok_or_else(|| QuarryError::Connection("connection is not initialized".to_string()))
    }

    pub fn is_initialized(&self) -> bool {
        self.handle.is_some()
    }

    /// Executes a row-returning statement with positional bindings and
    /// materializes the rows into a `ResultSet`.
    pub fn query(&self, sql: &str, params: &[SqlValue]) -> Result<ResultSet> {
        let handle = self.handle()?;
        let mut stmt = handle
            .prepare(sql)
            .map_err(|e| QuarryError::Query(format!("failed to prepare statement: {e}")))?;

        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let decl_types: Vec<Option<String>> = stmt
            .columns()
            .iter()
            .map(|c| c.decl_type().map(String::from))
            .collect();
        let column_count = columns.len();

        let mut rows_out: Vec<Vec<SqlValue>> = Vec::new();
        let mut rows = stmt
            .query(params_from_iter(params.iter()))
            .map_err(classify_driver_error)?;
        while let Some(row) = rows.next().map_err(classify_driver_error)? {
            let mut cells = Vec::with_capacity(column_count);
            for i in 0..column_count {
                let value_ref = row.get_ref(i).map_err(classify_driver_error)?;
                cells.push(SqlValue::from_driver(value_ref, decl_types[i].as_deref()));
            }
            rows_out.push(cells);
        }

        Ok(ResultSet::new(columns, rows_out))
    }

    /// Executes a non-row-returning statement; returns affected row count.
    pub fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<usize> {
        let handle = self.handle()?;
        let mut stmt = handle
            .prepare(sql)
            .map_err(|e| QuarryError::Query(format!("failed to prepare statement: {e}")))?;
        stmt.execute(params_from_iter(params.iter()))
            .map_err(classify_driver_error)
    }

    /// Prepares a statement without executing it.
    pub fn prepare(&self, sql: &str) -> Result<rusqlite::Statement<'_>> {
        self.handle()?
            .prepare(sql)
            .map_err(|e| QuarryError::Query(format!("failed to prepare statement: {e}")))
    }

    pub fn commit(&self) -> Result<()> {
        self.handle()?
            .execute_batch("COMMIT")
            .map_err(|e| QuarryError::Transaction(format!("commit failed: {e}")))
    }

    pub fn rollback(&self) -> Result<()> {
        self.handle()?
            .execute_batch("ROLLBACK")
            .map_err(|e| QuarryError::Transaction(format!("rollback failed: {e}")))
    }

    /// Sets the session autocommit default. The embedded driver is in
    /// autocommit mode whenever no transaction is open, so this only
    /// records the session flag consulted by `Transaction`.
    pub fn set_auto_commit(&self, enabled: bool) -> Result<()> {
        self.handle()?;
        self.auto_commit.set(enabled);
        Ok(())
    }

    pub fn auto_commit(&self) -> bool {
        self.auto_commit.get()
    }

    /// Rowid of the most recent successful INSERT on this connection.
    pub fn last_insert_id(&self) -> Result<i64> {
        Ok(self.handle()?.last_insert_rowid())
    }

    /// Runs the configured test query; true when the connection answers.
    pub fn ping(&self) -> bool {
        match self.handle() {
            Ok(handle) => handle
                .prepare(&self.test_query)
                .and_then(|mut stmt| stmt.query([]).map(|_| ()))
                .is_ok(),
            Err(_) => false,
        }
    }

    /// Executes a multi-statement script by splitting on semicolons.
    ///
    /// The split is naive: semicolons inside quoted strings are not
    /// understood. This is a documented limitation, not a parser.
    pub fn execute_script(&self, script: &str) -> Result<()> {
        let handle = self.handle()?;
        for statement in script.split(';') {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                continue;
            }
            handle
                .execute_batch(trimmed)
                .map_err(classify_driver_error)?;
        }
        Ok(())
    }

    /// Drops the driver handle; subsequent operations fail the
    /// initialization guard.
    pub fn disconnect(&mut self) {
        self.handle = None;
    }
}

/// Maps a raw driver error into the crate taxonomy. Constraint failures
/// get their kind from the extended result code and their table/column
/// from the driver message when it names them.
pub(crate) fn classify_driver_error(err: rusqlite::Error) -> QuarryError {
    if let rusqlite::Error::SqliteFailure(ffi_err, ref message) = err {
        if ffi_err.code == rusqlite::ErrorCode::ConstraintViolation {
            let kind = match ffi_err.extended_code {
                rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY => ConstraintKind::DuplicateKey,
                rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => ConstraintKind::ForeignKey,
                rusqlite::ffi::SQLITE_CONSTRAINT_NOTNULL => ConstraintKind::NotNull,
                _ => ConstraintKind::Other,
            };
            let text = message.clone().unwrap_or_else(|| err.to_string());
            let (table, column) = parse_constraint_target(&text);
            return QuarryError::Constraint(ConstraintViolation {
                kind,
                table,
                column,
                message: text,
            });
        }
    }
    QuarryError::Database(err)
}

/// Pulls "table.column" out of messages shaped like
/// "UNIQUE constraint failed: users.email".
fn parse_constraint_target(message: &str) -> (Option<String>, Option<String>) {
    let target = match message.rsplit_once(": ") {
        Some((_, rest)) => rest.split(',').next().unwrap_or("").trim(),
        None => return (None, None),
    };
    match target.split_once('.') {
        Some((table, column)) if !table.contains(' ') => {
            (Some(table.to_string()), Some(column.to_string()))
        }
        _ => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_connection() -> Connection {
        Connection::from_handle(rusqlite::Connection::open_in_memory().unwrap())
    }

    #[test]
    fn test_uninitialized_guard() {
        let mut conn = memory_connection();
        conn.disconnect();
        let err = conn.execute("SELECT 1", &[]).unwrap_err();
        match err {
            QuarryError::Connection(msg) => assert!(msg.contains("not initialized")),
            other => panic!("Expected Connection error, got {other:?}"),
        }
        assert!(!conn.ping());
    }

    #[test]
    fn test_query_and_execute() {
        let conn = memory_connection();
        conn.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)", &[])
            .unwrap();
        let affected = conn
            .execute(
                "INSERT INTO t (name) VALUES (?)",
                &[SqlValue::Text("alice".into())],
            )
            .unwrap();
        assert_eq!(affected, 1);
        assert_eq!(conn.last_insert_id().unwrap(), 1);

        let mut rs = conn.query("SELECT id, name FROM t", &[]).unwrap();
        assert!(rs.next());
        assert_eq!(rs.get_i64("id").unwrap(), 1);
        assert_eq!(rs.get_string("name").unwrap(), "alice");
        assert!(!rs.next());
    }

    #[test]
    fn test_execute_script_splits_on_semicolons() {
        let conn = memory_connection();
        conn.execute_script(
            "CREATE TABLE a (id INTEGER);
             CREATE TABLE b (id INTEGER);
             INSERT INTO a VALUES (1);",
        )
        .unwrap();
        let mut rs = conn.query("SELECT COUNT(*) AS n FROM a", &[]).unwrap();
        assert!(rs.next());
        assert_eq!(rs.get_i64("n").unwrap(), 1);
    }

    #[test]
    fn test_ping() {
        let conn = memory_connection();
        assert!(conn.ping());
    }

    #[test]
    fn test_constraint_classification() {
        let conn = memory_connection();
        conn.execute_script(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT UNIQUE NOT NULL);
             INSERT INTO users (email) VALUES ('a@example.com');",
        )
        .unwrap();

        let err = conn
            .execute(
                "INSERT INTO users (email) VALUES (?)",
                &[SqlValue::Text("a@example.com".into())],
            )
            .unwrap_err();
        match err {
            QuarryError::Constraint(v) => {
                assert_eq!(v.kind, ConstraintKind::DuplicateKey);
                assert_eq!(v.table.as_deref(), Some("users"));
                assert_eq!(v.column.as_deref(), Some("email"));
            }
            other => panic!("Expected Constraint error, got {other:?}"),
        }

        let err = conn
            .execute("INSERT INTO users (email) VALUES (NULL)", &[])
            .unwrap_err();
        match err {
            QuarryError::Constraint(v) => assert_eq!(v.kind, ConstraintKind::NotNull),
            other => panic!("Expected Constraint error, got {other:?}"),
        }
    }

    #[test]
    fn test_commit_rollback_forwarding() {
        let conn = memory_connection();
        conn.execute("CREATE TABLE t (id INTEGER)", &[]).unwrap();
        conn.execute("BEGIN", &[]).unwrap();
        conn.execute("INSERT INTO t VALUES (1)", &[]).unwrap();
        conn.rollback().unwrap();

        let mut rs = conn.query("SELECT COUNT(*) AS n FROM t", &[]).unwrap();
        assert!(rs.next());
        assert_eq!(rs.get_i64("n").unwrap(), 0);

        // COMMIT with no open transaction is a driver error, surfaced.
        assert!(conn.commit().is_err());
    }
}
