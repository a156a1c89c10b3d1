//! Material repository: material, pages, summary and ratings.
//!
//! Writers take a `&Connection` so the caller can group them in one transaction.

use rusqlite::{params, Connection, Row};

use super::{Database, DatabaseError};
use crate::store::{MaterialRecord, PageLink, RatingRecord, SummaryRecord};

pub fn insert_material(
    conn: &Connection,
    material: &MaterialRecord,
    created_at: &str,
) -> Result<(), DatabaseError> {
    let metadata = serde_json::to_string(&material.metadata).map_err(|e| DatabaseError::Decode {
        column: "metadata",
        reason: e.to_string(),
    })?;
    conn.execute(
        "INSERT INTO material (material_id, user_id, filename, content_type, num_page, metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            material.material_id,
            material.user_id,
            material.filename,
            material.content_type,
            material.num_page,
            metadata,
            created_at,
        ],
    )?;
    Ok(())
}

pub fn insert_pages(
    conn: &Connection,
    material_id: &str,
    pages: &[PageLink],
) -> Result<(), DatabaseError> {
    let mut stmt =
        conn.prepare("INSERT INTO material_page (material_id, page, url) VALUES (?1, ?2, ?3)")?;
    for page in pages {
        stmt.execute(params![material_id, page.page, page.url])?;
    }
    Ok(())
}

pub fn insert_summary(conn: &Connection, summary: &SummaryRecord) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO material_summary (summary_id, material_id, content, prompt_token_count,
         thoughts_token_count, total_token_count)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            summary.summary_id,
            summary.material_id,
            summary.content,
            summary.prompt_token_count,
            summary.thoughts_token_count,
            summary.total_token_count,
        ],
    )?;
    Ok(())
}

pub fn insert_ratings(conn: &Connection, ratings: &[RatingRecord]) -> Result<(), DatabaseError> {
    let mut stmt =
        conn.prepare("INSERT INTO rating (material_id, star_level, count) VALUES (?1, ?2, ?3)")?;
    for rating in ratings {
        stmt.execute(params![rating.material_id, rating.star_level, rating.count])?;
    }
    Ok(())
}

fn material_from_row(row: &Row<'_>) -> Result<(MaterialRecord, String), rusqlite::Error> {
    let metadata: String = row.get("metadata")?;
    let metadata = serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null);
    Ok((
        MaterialRecord {
            material_id: row.get("material_id")?,
            user_id: row.get("user_id")?,
            filename: row.get("filename")?,
            content_type: row.get("content_type")?,
            num_page: row.get("num_page")?,
            metadata,
        },
        row.get("created_at")?,
    ))
}

pub fn find_material(db: &Database, material_id: &str) -> Result<Option<MaterialRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM material WHERE material_id = ?1")?;
        let mut rows = stmt.query_map(params![material_id], material_from_row)?;
        match rows.next() {
            Some(Ok((material, _))) => Ok(Some(material)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Pages of a material in ascending page order.
pub fn find_pages(db: &Database, material_id: &str) -> Result<Vec<PageLink>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn
            .prepare("SELECT page, url FROM material_page WHERE material_id = ?1 ORDER BY page ASC")?;
        let pages = stmt
            .query_map(params![material_id], |row| {
                Ok(PageLink {
                    page: row.get(0)?,
                    url: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pages)
    })
}

pub fn find_summaries(db: &Database, material_id: &str) -> Result<Vec<SummaryRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT summary_id, material_id, content, prompt_token_count, thoughts_token_count,
             total_token_count FROM material_summary WHERE material_id = ?1",
        )?;
        let summaries = stmt
            .query_map(params![material_id], |row| {
                Ok(SummaryRecord {
                    summary_id: row.get(0)?,
                    material_id: row.get(1)?,
                    content: row.get(2)?,
                    prompt_token_count: row.get(3)?,
                    thoughts_token_count: row.get(4)?,
                    total_token_count: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(summaries)
    })
}

pub fn find_ratings(db: &Database, material_id: &str) -> Result<Vec<RatingRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT material_id, star_level, count FROM rating WHERE material_id = ?1
             ORDER BY star_level ASC",
        )?;
        let ratings = stmt
            .query_map(params![material_id], |row| {
                Ok(RatingRecord {
                    material_id: row.get(0)?,
                    star_level: row.get(1)?,
                    count: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ratings)
    })
}

/// Number of materials stored, across all users.
pub fn count_materials(db: &Database) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM material", [], |r| r.get(0))?;
        Ok(count as u64)
    })
}
