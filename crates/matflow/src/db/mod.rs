//! SQLite storage for task history and material metadata.
//!
//! One connection per process, shared by every worker behind a mutex.
//! Tables are created by the numbered scripts in `sql/` on open.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::{Connection, Transaction};

pub mod error;
pub mod material_repo;
pub mod metadata;
pub mod migrations;
pub mod task_repo;

pub use error::DatabaseError;

/// How long a statement waits on a lock held by another process.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared handle to the matflow database.
///
/// Clones share the same connection. Workers persist their task records
/// and finished materials through it concurrently; the mutex orders them.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens the database file, creating parent directories and applying
    /// any missing migrations.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        migrations::run_all(&conn)?;

        log::info!(
            "Opened metadata database {} (schema v{})",
            path.display(),
            migrations::current_version(&conn)?
        );

        Ok(Self::wrap(conn))
    }

    /// Private in-memory database, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        migrations::run_all(&conn)?;
        Ok(Self::wrap(conn))
    }

    fn wrap(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Runs `f` with the connection locked.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }

    /// Runs `f` inside one transaction. Commits when `f` returns `Ok`,
    /// rolls back otherwise.
    pub fn in_transaction<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, DatabaseError>,
    {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        })
    }
}

/// Fallback location when the config names no database:
/// `~/.matflow/data/matflow.db`.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".matflow").join("data").join("matflow.db"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_count(db: &Database) -> u32 {
        db.with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM task", [], |r| r.get(0))?))
            .unwrap()
    }

    #[test]
    fn test_open_file_db_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("matflow.db");
        let db = Database::open(&path).unwrap();

        assert!(path.exists());
        let version = db.with_conn(|conn| migrations::current_version(conn)).unwrap();
        assert!(version >= 2);
    }

    #[test]
    fn test_reopen_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("matflow.db");
        {
            let db = Database::open(&path).unwrap();
            task_repo::insert(&db, "job-1", "mat-1", "", "pending", "2026-01-01T00:00:00.000000Z")
                .unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(task_count(&db), 1);
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();
        let result: Result<(), DatabaseError> = db.in_transaction(|tx| {
            tx.execute(
                "INSERT INTO task (job_id, material_id, content, status, created_at)
                 VALUES ('job-1', 'mat-1', '', 'pending', 't')",
                [],
            )?;
            Err(DatabaseError::Decode {
                column: "content",
                reason: "forced".to_string(),
            })
        });

        assert!(result.is_err());
        assert_eq!(task_count(&db), 0);
    }

    #[test]
    fn test_clones_share_connection() {
        let db = Database::open_in_memory().unwrap();
        let other = db.clone();
        task_repo::insert(&db, "job-1", "mat-1", "", "pending", "2026-01-01T00:00:00.000000Z")
            .unwrap();
        assert_eq!(task_count(&other), 1);
    }

    #[test]
    fn test_default_database_path() {
        let path = default_database_path().unwrap();
        assert!(path.ends_with(".matflow/data/matflow.db"));
    }
}
