//! The privilege store: transactional persistence for app/package/privilege
//! state.
//!
//! One [`PrivilegeDb`] instance owns the daemon's single SQLite connection.
//! It is constructed once at startup and shared behind `Arc<Mutex<...>>`;
//! whichever service worker holds the lock owns the connection, so at most
//! one write sequence is in flight across the whole daemon at a time.
//!
//! # Transaction discipline
//!
//! Multi-step mutations run inside an explicit, caller-managed transaction:
//! [`PrivilegeDb::begin_transaction`] / [`PrivilegeDb::commit_transaction`] /
//! [`PrivilegeDb::rollback_transaction`]. Transactions are non-reentrant and
//! modeled as a strict state machine (`Idle ↔ InTransaction`); a nested begin
//! or a commit/rollback without a begin is rejected. A caller that began a
//! transaction and hits an error must roll back before releasing the store,
//! or the connection is left unusable for subsequent callers.
//!
//! # Schema
//!
//! ```text
//! pkg(pkg_id)                                 packages
//! app(app_id, uid, pkg_id -> pkg)             installed apps, per user
//! app_privilege(app_id, uid, privilege_name)  granted privileges
//! privilege_group(privilege_name, group_name) privilege -> OS group mapping
//! ```
//!
//! An app row cannot exist without its package row (foreign key), and
//! removing an app cascades its privilege rows.

mod queries;
#[cfg(test)]
mod tests;

use std::path::Path;
use std::time::Duration;

use rusqlite::{params, CachedStatement, Connection, OptionalExtension};
use thiserror::Error;
use tracing::{debug, warn};

pub use queries::QueryKind;

/// Busy timeout applied to the store's connection at open.
const BUSY_TIMEOUT: Duration = Duration::from_millis(5_000);

const SCHEMA: &str = "\
    CREATE TABLE IF NOT EXISTS pkg (
        pkg_id TEXT PRIMARY KEY
    ) WITHOUT ROWID;
    CREATE TABLE IF NOT EXISTS app (
        app_id TEXT NOT NULL,
        uid INTEGER NOT NULL,
        pkg_id TEXT NOT NULL REFERENCES pkg(pkg_id),
        PRIMARY KEY (app_id, uid)
    ) WITHOUT ROWID;
    CREATE TABLE IF NOT EXISTS app_privilege (
        app_id TEXT NOT NULL,
        uid INTEGER NOT NULL,
        privilege_name TEXT NOT NULL,
        PRIMARY KEY (app_id, uid, privilege_name),
        FOREIGN KEY (app_id, uid) REFERENCES app(app_id, uid) ON DELETE CASCADE
    ) WITHOUT ROWID;
    CREATE TABLE IF NOT EXISTS privilege_group (
        privilege_name TEXT NOT NULL,
        group_name TEXT NOT NULL,
        PRIMARY KEY (privilege_name, group_name)
    ) WITHOUT ROWID;
    CREATE INDEX IF NOT EXISTS idx_app_pkg_id ON app(pkg_id);
    CREATE INDEX IF NOT EXISTS idx_app_uid ON app(uid);";

/// Errors surfaced by the privilege store.
///
/// Absence of data is never an error: lookups return `Option`/empty
/// collections so callers must handle "not found" separately from a daemon
/// fault.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The persistence layer could not be opened or its query set could not
    /// be prepared. Fatal at construction.
    #[error("cannot open privilege database: {source}")]
    Io {
        /// Underlying SQLite error.
        #[source]
        source: rusqlite::Error,
    },

    /// A query or transaction failed for a reason other than absence of data
    /// (constraint violation, storage fault).
    #[error("privilege database internal error: {source}")]
    Internal {
        /// Underlying SQLite error.
        #[source]
        source: rusqlite::Error,
    },

    /// `begin_transaction` was called while a transaction is already open.
    #[error("nested transaction: a transaction is already in progress")]
    NestedTransaction,

    /// `commit_transaction`/`rollback_transaction` without an open
    /// transaction.
    #[error("no transaction in progress")]
    NoTransaction,

    /// An operation that only makes sense inside a caller-managed transaction
    /// was invoked outside one.
    #[error("operation requires an open transaction")]
    TransactionRequired,
}

impl From<rusqlite::Error> for StoreError {
    fn from(source: rusqlite::Error) -> Self {
        Self::Internal { source }
    }
}

/// Transaction state of the store's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Idle,
    InTransaction,
}

/// The privilege store.
///
/// See the module docs for the ownership and transaction discipline.
#[derive(Debug)]
pub struct PrivilegeDb {
    conn: Connection,
    tx: TxState,
}

impl PrivilegeDb {
    /// Open (creating if necessary) the privilege database at `path`.
    ///
    /// Applies the connection pragmas (foreign keys, WAL journal, busy
    /// timeout), creates the schema, and compiles the complete query set.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the file cannot be opened or any query
    /// fails to compile; the store is unusable without its full query set.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|source| StoreError::Io { source })?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|source| StoreError::Io { source })?;
        conn.pragma_update(None, "journal_mode", "wal")
            .map_err(|source| StoreError::Io { source })?;
        conn.pragma_update(None, "foreign_keys", "on")
            .map_err(|source| StoreError::Io { source })?;
        conn.execute_batch(SCHEMA)
            .map_err(|source| StoreError::Io { source })?;

        // Compile every statement exactly once, up front. The cache is sized
        // to the query set so no handle is ever evicted and recompiled.
        conn.set_prepared_statement_cache_capacity(QueryKind::ALL.len());
        for kind in QueryKind::ALL {
            conn.prepare_cached(kind.sql())
                .map_err(|source| StoreError::Io { source })?;
        }

        debug!(path = %path.display(), "privilege database opened");
        Ok(Self {
            conn,
            tx: TxState::Idle,
        })
    }

    /// Fetch the compiled, reset statement handle for `kind`.
    fn query(&self, kind: QueryKind) -> Result<CachedStatement<'_>, StoreError> {
        Ok(self.conn.prepare_cached(kind.sql())?)
    }

    fn collect_strings(
        stmt: &mut CachedStatement<'_>,
        params: impl rusqlite::Params,
    ) -> Result<Vec<String>, StoreError> {
        let rows = stmt
            .query_map(params, |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // -- transactions -------------------------------------------------------

    /// Begin a transaction.
    ///
    /// # Errors
    ///
    /// [`StoreError::NestedTransaction`] if one is already open;
    /// [`StoreError::Internal`] if the underlying `BEGIN` fails.
    pub fn begin_transaction(&mut self) -> Result<(), StoreError> {
        if self.tx == TxState::InTransaction {
            return Err(StoreError::NestedTransaction);
        }
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        self.tx = TxState::InTransaction;
        Ok(())
    }

    /// Commit the open transaction.
    ///
    /// # Errors
    ///
    /// [`StoreError::NoTransaction`] without an open transaction;
    /// [`StoreError::Internal`] if `COMMIT` fails, in which case the
    /// transaction remains open and must be rolled back.
    pub fn commit_transaction(&mut self) -> Result<(), StoreError> {
        if self.tx != TxState::InTransaction {
            return Err(StoreError::NoTransaction);
        }
        self.conn.execute_batch("COMMIT")?;
        self.tx = TxState::Idle;
        Ok(())
    }

    /// Roll back the open transaction.
    ///
    /// # Errors
    ///
    /// [`StoreError::NoTransaction`] without an open transaction;
    /// [`StoreError::Internal`] if `ROLLBACK` fails.
    pub fn rollback_transaction(&mut self) -> Result<(), StoreError> {
        if self.tx != TxState::InTransaction {
            return Err(StoreError::NoTransaction);
        }
        self.conn.execute_batch("ROLLBACK")?;
        self.tx = TxState::Idle;
        Ok(())
    }

    /// Returns `true` while a transaction is open.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.tx == TxState::InTransaction
    }

    // -- reads --------------------------------------------------------------

    /// Resolve the package id owning `app_id`, or `None` if no such app is
    /// installed for any user.
    ///
    /// # Errors
    ///
    /// [`StoreError::Internal`] on query failure.
    pub fn get_app_pkg_id(&self, app_id: &str) -> Result<Option<String>, StoreError> {
        let mut stmt = self.query(QueryKind::GetPkgId)?;
        Ok(stmt
            .query_row(params![app_id], |row| row.get::<_, String>(0))
            .optional()?)
    }

    /// Returns `true` if `app_id` is installed for `uid`.
    ///
    /// # Errors
    ///
    /// [`StoreError::Internal`] on query failure.
    pub fn app_id_exists(&self, app_id: &str, uid: u32) -> Result<bool, StoreError> {
        Ok(self.app_pkg_for_user(app_id, uid)?.is_some())
    }

    fn app_pkg_for_user(&self, app_id: &str, uid: u32) -> Result<Option<String>, StoreError> {
        let mut stmt = self.query(QueryKind::GetAppPkgForUser)?;
        Ok(stmt
            .query_row(params![app_id, uid], |row| row.get::<_, String>(0))
            .optional()?)
    }

    /// Privileges granted to any app of `pkg_id` for `uid`, deduplicated and
    /// lexicographically sorted.
    ///
    /// # Errors
    ///
    /// [`StoreError::Internal`] on query failure.
    pub fn get_pkg_privileges(&self, pkg_id: &str, uid: u32) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.query(QueryKind::GetPkgPrivileges)?;
        Self::collect_strings(&mut stmt, params![pkg_id, uid])
    }

    /// Privileges granted to `app_id` for `uid`, deduplicated and
    /// lexicographically sorted.
    ///
    /// # Errors
    ///
    /// [`StoreError::Internal`] on query failure.
    pub fn get_app_privileges(&self, app_id: &str, uid: u32) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.query(QueryKind::GetAppPrivileges)?;
        Self::collect_strings(&mut stmt, params![app_id, uid])
    }

    /// Group names implied by holding `privilege`.
    ///
    /// # Errors
    ///
    /// [`StoreError::Internal`] on query failure.
    pub fn get_privilege_groups(&self, privilege: &str) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.query(QueryKind::GetPrivilegeGroups)?;
        Self::collect_strings(&mut stmt, params![privilege])
    }

    /// All app ids installed for `uid`.
    ///
    /// # Errors
    ///
    /// [`StoreError::Internal`] on query failure.
    pub fn get_user_apps(&self, uid: u32) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.query(QueryKind::GetUserApps)?;
        Self::collect_strings(&mut stmt, params![uid])
    }

    /// All app ids belonging to `pkg_id`.
    ///
    /// # Errors
    ///
    /// [`StoreError::Internal`] on query failure.
    pub fn get_app_ids_for_pkg_id(&self, pkg_id: &str) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.query(QueryKind::GetAppsInPkg)?;
        Self::collect_strings(&mut stmt, params![pkg_id])
    }

    /// Returns `true` if `pkg_id` is registered.
    ///
    /// # Errors
    ///
    /// [`StoreError::Internal`] on query failure.
    pub fn pkg_id_exists(&self, pkg_id: &str) -> Result<bool, StoreError> {
        let mut stmt = self.query(QueryKind::PkgIdExists)?;
        Ok(stmt
            .query_row(params![pkg_id], |row| row.get::<_, i64>(0))
            .optional()?
            .is_some())
    }

    // -- writes -------------------------------------------------------------

    /// Insert an app row for `uid`, creating the package row if needed.
    ///
    /// # Errors
    ///
    /// [`StoreError::Internal`] on query failure; inserting an app that
    /// already exists for this uid violates the primary key and is an
    /// internal error.
    pub fn add_application(
        &mut self,
        app_id: &str,
        pkg_id: &str,
        uid: u32,
    ) -> Result<(), StoreError> {
        self.query(QueryKind::EnsurePkgId)?.execute(params![pkg_id])?;
        self.query(QueryKind::AddApplication)?
            .execute(params![app_id, uid, pkg_id])?;
        Ok(())
    }

    /// Delete the app row for (`app_id`, `uid`).
    ///
    /// Returns `pkg_id_is_no_more`: `true` when the removed app was the last
    /// one in its package, in which case the package row is removed in the
    /// same step. Returns `false` (touching nothing) when the app does not
    /// exist.
    ///
    /// # Errors
    ///
    /// [`StoreError::Internal`] on query failure.
    pub fn remove_application(&mut self, app_id: &str, uid: u32) -> Result<bool, StoreError> {
        let Some(pkg_id) = self.app_pkg_for_user(app_id, uid)? else {
            debug!(app_id, uid, "remove_application: no such app");
            return Ok(false);
        };

        self.query(QueryKind::RemoveApplication)?
            .execute(params![app_id, uid])?;

        let remaining: i64 = self
            .query(QueryKind::CountAppsInPkg)?
            .query_row(params![&pkg_id], |row| row.get(0))?;
        if remaining > 0 {
            return Ok(false);
        }

        self.query(QueryKind::RemovePkg)?.execute(params![&pkg_id])?;
        debug!(pkg_id, "last app removed, package dropped");
        Ok(true)
    }

    /// Replace the complete privilege set of (`app_id`, `uid`).
    ///
    /// Deletes all existing privilege rows and inserts the new set. To keep
    /// the replacement atomic for concurrent readers this MUST run inside a
    /// caller-managed transaction; the caller is responsible for
    /// `begin_transaction`/`commit_transaction` and for rolling back on any
    /// error.
    ///
    /// # Errors
    ///
    /// [`StoreError::TransactionRequired`] outside a transaction;
    /// [`StoreError::Internal`] on query failure.
    pub fn update_app_privileges(
        &mut self,
        app_id: &str,
        uid: u32,
        privileges: &[String],
    ) -> Result<(), StoreError> {
        if self.tx != TxState::InTransaction {
            return Err(StoreError::TransactionRequired);
        }
        self.query(QueryKind::RemoveAppPrivileges)?
            .execute(params![app_id, uid])?;
        for privilege in privileges {
            self.query(QueryKind::AddAppPrivilege)?
                .execute(params![app_id, uid, privilege])?;
        }
        Ok(())
    }

    /// Register the OS groups implied by `privilege`.
    ///
    /// Used at provisioning time to load the platform's privilege-to-group
    /// mapping; existing mappings are kept.
    ///
    /// # Errors
    ///
    /// [`StoreError::Internal`] on query failure.
    pub fn set_privilege_groups(
        &mut self,
        privilege: &str,
        groups: &[String],
    ) -> Result<(), StoreError> {
        for group in groups {
            self.query(QueryKind::AddPrivilegeGroup)?
                .execute(params![privilege, group])?;
        }
        Ok(())
    }
}

impl Drop for PrivilegeDb {
    fn drop(&mut self) {
        // A transaction still open here means a caller failed to roll back.
        if self.tx == TxState::InTransaction {
            warn!("privilege store dropped with an open transaction; rolling back");
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                warn!("rollback on drop failed: {e}");
            }
        }
    }
}
