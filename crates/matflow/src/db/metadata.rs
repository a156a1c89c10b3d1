//! `MetadataStore` implementation on top of the SQLite database.

use chrono::{DateTime, SecondsFormat, Utc};

use super::{material_repo, task_repo, Database, DatabaseError};
use crate::store::{MaterialBundle, MetadataStore, PersistenceError, TaskRecord, TaskStatus};

impl From<DatabaseError> for PersistenceError {
    fn from(err: DatabaseError) -> Self {
        if err.is_constraint_violation() {
            return PersistenceError::Duplicate(err.to_string());
        }
        match err {
            DatabaseError::LockPoisoned | DatabaseError::Io { .. } => {
                PersistenceError::Unavailable(err.to_string())
            }
            DatabaseError::Decode { .. } => PersistenceError::Read(err.to_string()),
            other => PersistenceError::Write(other.to_string()),
        }
    }
}

/// Fixed-width timestamps so `ORDER BY created_at` is chronological.
fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn task_from_row(row: task_repo::TaskRow) -> Result<TaskRecord, DatabaseError> {
    let status = row
        .status
        .parse::<TaskStatus>()
        .map_err(|reason| DatabaseError::Decode {
            column: "status",
            reason,
        })?;
    let created_at = DateTime::parse_from_rfc3339(&row.created_at)
        .map_err(|e| DatabaseError::Decode {
            column: "created_at",
            reason: e.to_string(),
        })?
        .with_timezone(&Utc);

    Ok(TaskRecord {
        job_id: row.job_id,
        material_id: row.material_id,
        content: row.content,
        status,
        created_at,
    })
}

impl MetadataStore for Database {
    fn insert_task(&self, task: &TaskRecord) -> Result<(), PersistenceError> {
        task_repo::insert(
            self,
            &task.job_id,
            &task.material_id,
            &task.content,
            task.status.as_str(),
            &format_timestamp(task.created_at),
        )?;
        Ok(())
    }

    fn update_pending_task(&self, job_id: &str, content: &str) -> Result<bool, PersistenceError> {
        let changed = task_repo::update_pending_content(self, job_id, content)?;
        Ok(changed > 0)
    }

    fn task_history(&self, job_id: &str) -> Result<Vec<TaskRecord>, PersistenceError> {
        let rows = task_repo::find_by_job(self, job_id)?;
        let records = rows
            .into_iter()
            .map(task_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn recent_tasks(&self, limit: usize) -> Result<Vec<TaskRecord>, PersistenceError> {
        let rows = task_repo::recent(self, limit as u64)?;
        let records = rows
            .into_iter()
            .map(task_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn persist_material(&self, bundle: &MaterialBundle) -> Result<(), PersistenceError> {
        let material_id = bundle.material.material_id.as_str();
        let created_at = format_timestamp(Utc::now());

        self.in_transaction(|tx| {
            material_repo::insert_material(tx, &bundle.material, &created_at)?;
            material_repo::insert_pages(tx, material_id, &bundle.pages)?;
            material_repo::insert_summary(tx, &bundle.summary)?;
            material_repo::insert_ratings(tx, &bundle.ratings)
        })?;

        log::info!(
            "Persisted material {} with {} pages",
            material_id,
            bundle.pages.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MaterialRecord, PageLink, RatingRecord, SummaryRecord};
    use serde_json::json;

    fn bundle(material_id: &str, pages: u32) -> MaterialBundle {
        MaterialBundle {
            material: MaterialRecord {
                material_id: material_id.to_string(),
                user_id: "user-1".to_string(),
                filename: "notes.pdf".to_string(),
                content_type: "application/pdf".to_string(),
                num_page: pages,
                metadata: json!({}),
            },
            pages: (1..=pages)
                .map(|page| PageLink {
                    page,
                    url: format!("https://cdn.test/{}/{}.jpg", material_id, page),
                })
                .collect(),
            summary: SummaryRecord {
                summary_id: format!("user-1-{}", material_id),
                material_id: material_id.to_string(),
                content: "## Page 1\nIntro".to_string(),
                prompt_token_count: 10,
                thoughts_token_count: 0,
                total_token_count: 25,
            },
            ratings: RatingRecord::initial_for(material_id),
        }
    }

    #[test]
    fn test_task_lifecycle_through_store() {
        let db = Database::open_in_memory().unwrap();
        db.insert_task(&TaskRecord::new("job-1", "mat-1", String::new(), TaskStatus::Pending))
            .unwrap();
        assert!(db.update_pending_task("job-1", "- [Step 1/5] Starting").unwrap());

        db.insert_task(&TaskRecord::new("job-1", "mat-1", "done".into(), TaskStatus::Success))
            .unwrap();
        assert!(db.update_pending_task("job-1", "- changed").unwrap());

        let history = db.task_history("job-1").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, TaskStatus::Pending);
        assert_eq!(history[1].status, TaskStatus::Success);
        assert_eq!(history[1].content, "done");
    }

    #[test]
    fn test_update_missing_pending_returns_false() {
        let db = Database::open_in_memory().unwrap();
        assert!(!db.update_pending_task("nope", "x").unwrap());
    }

    #[test]
    fn test_persist_material_writes_everything() {
        let db = Database::open_in_memory().unwrap();
        db.persist_material(&bundle("mat-1", 3)).unwrap();

        let material = material_repo::find_material(&db, "mat-1").unwrap().unwrap();
        assert_eq!(material.num_page, 3);
        let pages = material_repo::find_pages(&db, "mat-1").unwrap();
        assert_eq!(pages.iter().map(|p| p.page).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(material_repo::find_summaries(&db, "mat-1").unwrap().len(), 1);
        assert_eq!(material_repo::find_ratings(&db, "mat-1").unwrap().len(), 5);
    }

    #[test]
    fn test_persist_material_is_atomic() {
        let db = Database::open_in_memory().unwrap();
        let mut broken = bundle("mat-1", 2);
        broken.pages[1].page = 1;

        let err = db.persist_material(&broken).unwrap_err();
        assert!(matches!(err, PersistenceError::Duplicate(_)));
        assert!(material_repo::find_material(&db, "mat-1").unwrap().is_none());
        assert!(material_repo::find_pages(&db, "mat-1").unwrap().is_empty());
        assert!(material_repo::find_ratings(&db, "mat-1").unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_material_rejected() {
        let db = Database::open_in_memory().unwrap();
        db.persist_material(&bundle("mat-1", 1)).unwrap();

        let mut again = bundle("mat-1", 1);
        again.summary.summary_id = "user-1-other".to_string();
        let err = db.persist_material(&again).unwrap_err();
        assert!(matches!(err, PersistenceError::Duplicate(_)));
        assert_eq!(material_repo::count_materials(&db).unwrap(), 1);
    }
}
