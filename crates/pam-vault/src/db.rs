//! Scoped SQLite connection handling.
//!
//! File-backed stores open a fresh connection for each operation and drop it
//! when the closure returns, on success and on error alike. In-memory stores
//! (tests, embedding) keep one connection behind a mutex because SQLite
//! discards an in-memory database when its last connection closes.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::Connection;

use crate::error::{Result, VaultError};

/// How long a writer waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) enum ConnectionSource {
    File(PathBuf),
    Memory(Mutex<Connection>),
}

impl ConnectionSource {
    pub(crate) fn file(path: &Path) -> Self {
        Self::File(path.to_path_buf())
    }

    pub(crate) fn memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        configure_connection(&conn)?;
        Ok(Self::Memory(Mutex::new(conn)))
    }

    /// Run `f` with a connection that is released as soon as `f` returns.
    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        match self {
            Self::File(path) => {
                let conn = Connection::open(path)?;
                configure_connection(&conn)?;
                f(&conn)
            }
            Self::Memory(conn) => {
                let conn = conn
                    .lock()
                    .map_err(|e| VaultError::Internal(format!("connection mutex poisoned: {e}")))?;
                f(&conn)
            }
        }
    }

    pub(crate) fn describe(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Memory(_) => ":memory:".into(),
        }
    }
}

/// Configure SQLite pragmas for concurrent access and safety.
fn configure_connection(conn: &Connection) -> Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA temp_store = MEMORY;",
    )?;
    Ok(())
}
