//! Shared SQLite handle for the block store, ledger and job queue.
//!
//! Every statement runs on tokio's blocking pool so store access never
//! stalls the runner loop.

use crate::{CoreResult, SyncError};

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use rusqlite::Connection;
use tracing::{error, info, instrument};

const SCHEMA_VERSION: i64 = 1;

/// Cloneable handle to one per-user database file.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl Database {
    /// Open (or create) the database at `path` and bring the schema up to date.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened or migrated.
    #[track_caller]
    #[instrument]
    pub fn open(path: &Path) -> CoreResult<Self> {
        let conn = Connection::open(path)?;

        // synchronous=FULL: a write is on disk before the call returns.
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=FULL;
             PRAGMA busy_timeout=5000;",
        )?;

        migrate(&conn)?;

        info!(path = ?path, "Database opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.to_path_buf(),
        })
    }

    /// Location of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against the connection on the blocking pool.
    pub async fn call<T, F>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Connection) -> CoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            // A poisoned lock only means another statement panicked; the
            // connection itself is still usable.
            let mut guard = conn.lock().unwrap_or_else(|e| {
                error!("Database lock poisoned, recovering: {}", e);
                e.into_inner()
            });
            f(&mut guard)
        })
        .await
        .map_err(SyncError::from)?
    }
}

fn migrate(conn: &Connection) -> CoreResult<()> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if version < 1 {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS blocks (
                band_id TEXT NOT NULL,
                track_id TEXT NOT NULL,
                idx INTEGER NOT NULL,
                bytes BLOB NOT NULL,
                PRIMARY KEY (band_id, track_id, idx)
            );
            CREATE TABLE IF NOT EXISTS recordings (
                band_id TEXT NOT NULL,
                track_id TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                state TEXT NOT NULL,
                saved_at INTEGER NOT NULL,
                PRIMARY KEY (band_id, track_id)
            );
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                queued_at INTEGER NOT NULL,
                due_at INTEGER NOT NULL,
                payload TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS jobs_pending ON jobs (due_at, queued_at);",
        )?;
    }

    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;

    Ok(())
}
