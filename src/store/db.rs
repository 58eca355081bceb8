use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::WorkItemStore;
use crate::errors::StoreError;
use crate::models::{NewWorkItem, WorkItem, WorkStatus};

const SELECT_COLUMNS: &str = "id, jira_issue_id, jira_issue_key, jira_project_key, repository_url, branch_name, pr_mr_url, status, development_details, error_message, created_at, completed_at";

/// Async-safe handle to the work item database.
///
/// Wraps `WorkItemDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O never
/// stalls the consumer's async loop.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<WorkItemDb>>,
}

impl DbHandle {
    pub fn new(db: WorkItemDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&WorkItemDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database synchronously. Only for CLI commands and tests.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, WorkItemDb>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::LockPoisoned.into())
    }
}

#[async_trait]
impl WorkItemStore for DbHandle {
    async fn create(&self, item: NewWorkItem) -> Result<WorkItem> {
        self.call(move |db| db.create_work_item(&item)).await
    }

    async fn update_repository_info(
        &self,
        id: i64,
        repository_url: &str,
        branch_name: Option<&str>,
    ) -> Result<()> {
        let url = repository_url.to_string();
        let branch = branch_name.map(str::to_string);
        self.call(move |db| db.update_repository_info(id, &url, branch.as_deref()))
            .await
    }

    async fn mark_completed(
        &self,
        id: i64,
        pr_mr_url: Option<&str>,
        details: &str,
    ) -> Result<WorkItem> {
        let url = pr_mr_url.map(str::to_string);
        let details = details.to_string();
        self.call(move |db| db.mark_completed(id, url.as_deref(), &details))
            .await
    }

    async fn mark_failed(&self, id: i64, error_message: &str) -> Result<WorkItem> {
        let error = error_message.to_string();
        self.call(move |db| db.mark_failed(id, &error)).await
    }

    async fn get(&self, id: i64) -> Result<Option<WorkItem>> {
        self.call(move |db| db.get_work_item(id)).await
    }
}

pub struct WorkItemDb {
    conn: Connection,
}

impl WorkItemDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory {}", parent.display())
            })?;
        }
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.run_migrations()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS work_items (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    jira_issue_id TEXT NOT NULL,
                    jira_issue_key TEXT NOT NULL,
                    jira_project_key TEXT NOT NULL,
                    repository_url TEXT,
                    branch_name TEXT,
                    pr_mr_url TEXT,
                    status TEXT NOT NULL DEFAULT 'ready',
                    development_details TEXT,
                    error_message TEXT,
                    created_at TEXT NOT NULL,
                    completed_at TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_work_items_issue ON work_items(jira_issue_key);
                CREATE INDEX IF NOT EXISTS idx_work_items_status ON work_items(status);
                ",
            )
            .context("Failed to create work_items table")?;
        Ok(())
    }

    pub fn create_work_item(&self, item: &NewWorkItem) -> Result<WorkItem> {
        self.conn
            .execute(
                "INSERT INTO work_items (jira_issue_id, jira_issue_key, jira_project_key, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    item.jira_issue_id,
                    item.jira_issue_key,
                    item.jira_project_key,
                    WorkStatus::Ready.as_str(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .context("Failed to insert work item")?;
        let id = self.conn.last_insert_rowid();
        self.get_work_item(id)?
            .context("Work item not found after insert")
    }

    pub fn update_repository_info(
        &self,
        id: i64,
        repository_url: &str,
        branch_name: Option<&str>,
    ) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE work_items SET repository_url = ?1, branch_name = COALESCE(?2, branch_name)
                 WHERE id = ?3 AND status = 'ready'",
                params![repository_url, branch_name, id],
            )
            .context("Failed to update repository info")?;
        if changed == 0 {
            return Err(self.rejection(id)?.into());
        }
        Ok(())
    }

    pub fn mark_completed(
        &self,
        id: i64,
        pr_mr_url: Option<&str>,
        details: &str,
    ) -> Result<WorkItem> {
        let changed = self
            .conn
            .execute(
                "UPDATE work_items SET status = ?1, pr_mr_url = ?2, development_details = ?3, completed_at = ?4
                 WHERE id = ?5 AND status = 'ready'",
                params![
                    WorkStatus::Completed.as_str(),
                    pr_mr_url,
                    details,
                    Utc::now().to_rfc3339(),
                    id
                ],
            )
            .context("Failed to mark work item completed")?;
        if changed == 0 {
            return Err(self.rejection(id)?.into());
        }
        self.get_work_item(id)?
            .context("Work item not found after completion")
    }

    pub fn mark_failed(&self, id: i64, error_message: &str) -> Result<WorkItem> {
        let changed = self
            .conn
            .execute(
                "UPDATE work_items SET status = ?1, error_message = ?2, completed_at = ?3
                 WHERE id = ?4 AND status = 'ready'",
                params![
                    WorkStatus::Failed.as_str(),
                    error_message,
                    Utc::now().to_rfc3339(),
                    id
                ],
            )
            .context("Failed to mark work item failed")?;
        if changed == 0 {
            return Err(self.rejection(id)?.into());
        }
        self.get_work_item(id)?
            .context("Work item not found after failure")
    }

    /// Explain why a guarded update touched no rows.
    fn rejection(&self, id: i64) -> Result<StoreError> {
        Ok(match self.get_work_item(id)? {
            Some(item) => StoreError::AlreadyTerminal {
                id,
                status: item.status.to_string(),
            },
            None => StoreError::NotFound { id },
        })
    }

    pub fn get_work_item(&self, id: i64) -> Result<Option<WorkItem>> {
        let sql = format!("SELECT {} FROM work_items WHERE id = ?1", SELECT_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, params![id], WorkItemRow::from_row)
            .optional()
            .context("Failed to query work item")?;
        row.map(WorkItemRow::into_work_item).transpose()
    }

    /// Most recent work item for an issue key.
    pub fn find_by_issue_key(&self, issue_key: &str) -> Result<Option<WorkItem>> {
        let sql = format!(
            "SELECT {} FROM work_items WHERE jira_issue_key = ?1 ORDER BY id DESC LIMIT 1",
            SELECT_COLUMNS
        );
        let row = self
            .conn
            .query_row(&sql, params![issue_key], WorkItemRow::from_row)
            .optional()
            .context("Failed to query work item by issue key")?;
        row.map(WorkItemRow::into_work_item).transpose()
    }

    pub fn list_work_items(&self, status: Option<WorkStatus>) -> Result<Vec<WorkItem>> {
        let sql = format!(
            "SELECT {} FROM work_items WHERE (?1 IS NULL OR status = ?1) ORDER BY id",
            SELECT_COLUMNS
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_work_items")?;
        let rows = stmt
            .query_map(params![status.map(|s| s.as_str())], WorkItemRow::from_row)
            .context("Failed to query work items")?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row.context("Failed to read work item row")?.into_work_item()?);
        }
        Ok(items)
    }
}

struct WorkItemRow {
    id: i64,
    jira_issue_id: String,
    jira_issue_key: String,
    jira_project_key: String,
    repository_url: Option<String>,
    branch_name: Option<String>,
    pr_mr_url: Option<String>,
    status: String,
    development_details: Option<String>,
    error_message: Option<String>,
    created_at: String,
    completed_at: Option<String>,
}

impl WorkItemRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            jira_issue_id: row.get(1)?,
            jira_issue_key: row.get(2)?,
            jira_project_key: row.get(3)?,
            repository_url: row.get(4)?,
            branch_name: row.get(5)?,
            pr_mr_url: row.get(6)?,
            status: row.get(7)?,
            development_details: row.get(8)?,
            error_message: row.get(9)?,
            created_at: row.get(10)?,
            completed_at: row.get(11)?,
        })
    }

    fn into_work_item(self) -> Result<WorkItem> {
        let status = self
            .status
            .parse::<WorkStatus>()
            .map_err(|e| anyhow::anyhow!(e))?;
        let completed_at = self.completed_at.as_deref().map(parse_timestamp).transpose()?;
        Ok(WorkItem {
            id: self.id,
            jira_issue_id: self.jira_issue_id,
            jira_issue_key: self.jira_issue_key,
            jira_project_key: self.jira_project_key,
            repository_url: self.repository_url,
            branch_name: self.branch_name,
            pr_mr_url: self.pr_mr_url,
            status,
            development_details: self.development_details,
            error_message: self.error_message,
            created_at: parse_timestamp(&self.created_at)?,
            completed_at,
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp in work_items: {}", value))
}
