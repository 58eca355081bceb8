//! Work item persistence.
//!
//! `WorkItemStore` is the seam the orchestrator writes through; `DbHandle`
//! is the SQLite-backed implementation. Records only move forward:
//! `ready` to exactly one of `completed` or `failed`, after which every
//! write is refused.

pub mod db;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{NewWorkItem, WorkItem};

pub use db::{DbHandle, WorkItemDb};

#[async_trait]
pub trait WorkItemStore: Send + Sync {
    /// Insert a new item in the `ready` state.
    async fn create(&self, item: NewWorkItem) -> Result<WorkItem>;

    /// Record the resolved repository and, once known, the feature branch.
    async fn update_repository_info(
        &self,
        id: i64,
        repository_url: &str,
        branch_name: Option<&str>,
    ) -> Result<()>;

    async fn mark_completed(
        &self,
        id: i64,
        pr_mr_url: Option<&str>,
        details: &str,
    ) -> Result<WorkItem>;

    async fn mark_failed(&self, id: i64, error_message: &str) -> Result<WorkItem>;

    async fn get(&self, id: i64) -> Result<Option<WorkItem>>;
}
