use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::WorkItem;
use crate::store::WorkItemStore;

/// Ordered pipeline steps. A run advances through these one at a time and
/// leaves the sequence at the first failing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Resolve,
    Clone,
    Analyze,
    Generate,
    Commit,
    Push,
    OpenRequest,
    Record,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::Resolve,
        Stage::Clone,
        Stage::Analyze,
        Stage::Generate,
        Stage::Commit,
        Stage::Push,
        Stage::OpenRequest,
        Stage::Record,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resolve => "resolve",
            Self::Clone => "clone",
            Self::Analyze => "analyze",
            Self::Generate => "generate",
            Self::Commit => "commit",
            Self::Push => "push",
            Self::OpenRequest => "open_request",
            Self::Record => "record",
        }
    }

    /// The step after this one, or `None` once the record step is reached.
    pub fn next(&self) -> Option<Stage> {
        match self {
            Self::Resolve => Some(Self::Clone),
            Self::Clone => Some(Self::Analyze),
            Self::Analyze => Some(Self::Generate),
            Self::Generate => Some(Self::Commit),
            Self::Commit => Some(Self::Push),
            Self::Push => Some(Self::OpenRequest),
            Self::OpenRequest => Some(Self::Record),
            Self::Record => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A work item that is still `ready`.
///
/// The only ways out are [`OpenItem::complete`] and [`OpenItem::fail`], and
/// both take `self`, so a pipeline run can issue at most one successful
/// terminal write. A completion that cannot be stored falls back to `failed`.
#[derive(Debug)]
pub struct OpenItem {
    id: i64,
    issue_key: String,
}

impl OpenItem {
    pub fn new(item: &WorkItem) -> Self {
        Self {
            id: item.id,
            issue_key: item.jira_issue_key.clone(),
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn issue_key(&self) -> &str {
        &self.issue_key
    }

    pub async fn complete(
        self,
        store: &dyn WorkItemStore,
        pr_mr_url: Option<&str>,
        details: &str,
    ) -> Result<WorkItem> {
        let err = match store.mark_completed(self.id, pr_mr_url, details).await {
            Ok(item) => return Ok(item),
            Err(err) => err,
        };
        let message = match pr_mr_url {
            Some(url) => format!(
                "failed to record completion (request opened at {}): {:#}",
                url, err
            ),
            None => format!("failed to record completion: {:#}", err),
        };
        if let Err(fallback) = store.mark_failed(self.id, &message).await {
            warn!(work_item_id = self.id, error = %fallback, "fallback failure record also failed");
        }
        Err(err)
    }

    pub async fn fail(self, store: &dyn WorkItemStore, error_message: &str) -> Result<WorkItem> {
        store.mark_failed(self.id, error_message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewWorkItem, WorkStatus};
    use crate::store::{DbHandle, WorkItemDb};

    #[test]
    fn test_stage_sequence_visits_every_stage_once() {
        let mut visited = vec![Stage::Resolve];
        let mut current = Stage::Resolve;
        while let Some(next) = current.next() {
            visited.push(next);
            current = next;
        }
        assert_eq!(visited, Stage::ALL.to_vec());
    }

    #[test]
    fn test_stage_display_is_lowercase() {
        assert_eq!(Stage::Push.to_string(), "push");
        assert_eq!(Stage::OpenRequest.to_string(), "open_request");
        assert_eq!(
            serde_json::to_string(&Stage::OpenRequest).unwrap(),
            "\"open_request\""
        );
    }

    /// Delegates to the database but refuses every completion.
    struct RefusingCompletion(DbHandle);

    #[async_trait::async_trait]
    impl WorkItemStore for RefusingCompletion {
        async fn create(&self, item: NewWorkItem) -> Result<WorkItem> {
            self.0.create(item).await
        }

        async fn update_repository_info(
            &self,
            id: i64,
            repository_url: &str,
            branch_name: Option<&str>,
        ) -> Result<()> {
            self.0.update_repository_info(id, repository_url, branch_name).await
        }

        async fn mark_completed(
            &self,
            _id: i64,
            _pr_mr_url: Option<&str>,
            _details: &str,
        ) -> Result<WorkItem> {
            anyhow::bail!("disk full")
        }

        async fn mark_failed(&self, id: i64, error_message: &str) -> Result<WorkItem> {
            self.0.mark_failed(id, error_message).await
        }

        async fn get(&self, id: i64) -> Result<Option<WorkItem>> {
            self.0.get(id).await
        }
    }

    #[tokio::test]
    async fn test_unrecordable_completion_falls_back_to_failed() {
        let store = RefusingCompletion(DbHandle::new(WorkItemDb::new_in_memory().unwrap()));
        let item = store
            .create(NewWorkItem {
                jira_issue_id: "1".into(),
                jira_issue_key: "PROJ-1".into(),
                jira_project_key: "PROJ".into(),
            })
            .await
            .unwrap();

        let err = OpenItem::new(&item)
            .complete(&store, Some("https://github.com/acme/api/pull/7"), "done")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("disk full"));

        let stored = store.get(item.id).await.unwrap().unwrap();
        assert_eq!(stored.status, WorkStatus::Failed);
        let message = stored.error_message.unwrap();
        assert!(message.contains("https://github.com/acme/api/pull/7"));
        assert!(message.contains("disk full"));
    }

    #[tokio::test]
    async fn test_open_item_fail_writes_terminal_state() {
        let store = DbHandle::new(WorkItemDb::new_in_memory().unwrap());
        let item = store
            .create(NewWorkItem {
                jira_issue_id: "1".into(),
                jira_issue_key: "PROJ-1".into(),
                jira_project_key: "PROJ".into(),
            })
            .await
            .unwrap();

        let open = OpenItem::new(&item);
        assert_eq!(open.issue_key(), "PROJ-1");
        let failed = open.fail(&store, "clone failed").await.unwrap();
        assert_eq!(failed.status, WorkStatus::Failed);
        assert!(failed.completed_at.is_some());
    }
}
