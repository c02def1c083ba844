/// Transaction Module
///
/// `Transaction` is a scoped guard over one connection. Construction
/// applies the requested isolation level, turns autocommit off and opens
/// the transaction; `commit` and `rollback` are each usable exactly once
/// from the active state. A transaction dropped (or moved away from)
/// while still active rolls back automatically: the default fate of a
/// transaction is abort, so a forgotten commit is safe.
use crate::connection::Connection;
use crate::core::{QuarryError, Result};
use tracing::warn;

/// Requested transaction visibility guarantee.
///
/// The embedded driver is serializable by nature; the levels map onto its
/// begin modes: `ReadUncommitted` enables the dirty-read pragma and begins
/// deferred, `ReadCommitted`/`RepeatableRead` begin deferred, and
/// `Serializable` begins immediate to take the write lock up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

/// A scoped transaction over a borrowed connection.
#[derive(Debug)]
pub struct Transaction<'c> {
    conn: &'c Connection,
    isolation: IsolationLevel,
    state: TransactionState,
    restore_auto_commit: bool,
}

impl<'c> Transaction<'c> {
    /// Begins a transaction immediately: isolation level first, then
    /// autocommit off, then the BEGIN itself.
    pub fn begin(conn: &'c Connection, isolation: IsolationLevel) -> Result<Self> {
        let restore_auto_commit = conn.auto_commit();

        let (pragma, begin) = match isolation {
            IsolationLevel::ReadUncommitted => ("PRAGMA read_uncommitted = 1", "BEGIN DEFERRED"),
            IsolationLevel::ReadCommitted | IsolationLevel::RepeatableRead => {
                ("PRAGMA read_uncommitted = 0", "BEGIN DEFERRED")
            }
            IsolationLevel::Serializable => ("PRAGMA read_uncommitted = 0", "BEGIN IMMEDIATE"),
        };

        conn.execute_script(pragma)?;
        conn.set_auto_commit(false)?;
        conn.execute_script(begin)
            .map_err(|e| QuarryError::Transaction(format!("failed to begin: {e}")))?;

        Ok(Transaction {
            conn,
            isolation,
            state: TransactionState::Active,
            restore_auto_commit,
        })
    }

    /// Begins with the driver's natural isolation.
    pub fn begin_default(conn: &'c Connection) -> Result<Self> {
        Self::begin(conn, IsolationLevel::Serializable)
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    fn guard_active(&self, operation: &str) -> Result<()> {
        match self.state {
            TransactionState::Active => Ok(()),
            TransactionState::Committed => Err(QuarryError::Transaction(format!(
                "cannot {operation}: transaction already committed"
            ))),
            TransactionState::RolledBack => Err(QuarryError::Transaction(format!(
                "cannot {operation}: transaction already rolled back"
            ))),
        }
    }

    /// Commits the transaction. A logic error outside the active state.
    pub fn commit(&mut self) -> Result<()> {
        self.guard_active("commit")?;
        self.conn.commit()?;
        self.state = TransactionState::Committed;
        self.conn.set_auto_commit(self.restore_auto_commit)?;
        Ok(())
    }

    /// Rolls the transaction back. A logic error outside the active state.
    pub fn rollback(&mut self) -> Result<()> {
        self.guard_active("rollback")?;
        self.conn.rollback()?;
        self.state = TransactionState::RolledBack;
        self.conn.set_auto_commit(self.restore_auto_commit)?;
        Ok(())
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.state == TransactionState::Active {
            warn!("transaction dropped while active; rolling back");
            if let Err(e) = self.conn.rollback() {
                warn!("auto-rollback failed: {e}");
            }
            self.state = TransactionState::RolledBack;
            let _ = self.conn.set_auto_commit(self.restore_auto_commit);
        }
    }
}
