//! Task repository: the per-job status history in the `task` table.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw task row from the database.
#[derive(Debug, Clone)]
pub struct TaskRow {
    pub id: i64,
    pub job_id: String,
    pub material_id: String,
    pub content: String,
    pub status: String,
    pub created_at: String,
}

impl TaskRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            material_id: row.get("material_id")?,
            content: row.get("content")?,
            status: row.get("status")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Inserts a new task row and returns its rowid.
pub fn insert(
    db: &Database,
    job_id: &str,
    material_id: &str,
    content: &str,
    status: &str,
    created_at: &str,
) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO task (job_id, material_id, content, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![job_id, material_id, content, status, created_at],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Replaces the content of the job's pending row. Returns the number of rows touched.
pub fn update_pending_content(
    db: &Database,
    job_id: &str,
    content: &str,
) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE task SET content = ?2 WHERE job_id = ?1 AND status = 'pending'",
            params![job_id, content],
        )?;
        Ok(changed)
    })
}

/// All rows for a job in insertion order.
pub fn find_by_job(db: &Database, job_id: &str) -> Result<Vec<TaskRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM task WHERE job_id = ?1 ORDER BY id ASC")?;
        let rows = stmt
            .query_map(params![job_id], TaskRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Newest rows first.
pub fn recent(db: &Database, limit: u64) -> Result<Vec<TaskRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM task ORDER BY created_at DESC, id DESC LIMIT ?1")?;
        let rows = stmt
            .query_map(params![limit as i64], TaskRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
