use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tracing::{debug, info};

use crate::errors::{LookupError, PipelineError};
use crate::models::{Project, Repository};

/// Project configuration lookup.
#[async_trait]
pub trait ConfigLookup: Send + Sync {
    async fn project_by_key(&self, project_key: &str) -> Result<Project, LookupError>;
}

/// Client for the configuration API's `GET /api/projects?jira_project_key=` endpoint.
#[derive(Debug, Clone)]
pub struct HttpConfigClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpConfigClient {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build configuration API client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl ConfigLookup for HttpConfigClient {
    async fn project_by_key(&self, project_key: &str) -> Result<Project, LookupError> {
        let url = format!("{}/api/projects", self.base_url);
        debug!(url = %url, project_key, "fetching project configuration");

        let resp = self
            .client
            .get(&url)
            .query(&[("jira_project_key", project_key)])
            .send()
            .await
            .context("Failed to reach configuration API")?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(LookupError::ProjectNotFound {
                project_key: project_key.to_string(),
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LookupError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }

        let project: Project = resp
            .json()
            .await
            .context("Failed to decode project from configuration API")?;
        info!(
            project = %project.name,
            repositories = project.repositories.len(),
            project_key,
            "project configuration fetched"
        );
        Ok(project)
    }
}

/// Canonical form used to compare repository URLs: no trailing slash, no
/// `.git` suffix.
pub fn normalize_repo_url(url: &str) -> &str {
    let url = url.strip_suffix('/').unwrap_or(url);
    url.strip_suffix(".git").unwrap_or(url)
}

/// Pick the repository to work on: the requested one (matched by normalized
/// URL) or, when none was requested, the project's first repository.
pub fn select_repository<'a>(
    project: &'a Project,
    requested: Option<&str>,
) -> Result<&'a Repository, PipelineError> {
    match requested {
        Some(url) => {
            let wanted = normalize_repo_url(url);
            project
                .repositories
                .iter()
                .find(|r| normalize_repo_url(&r.url) == wanted)
                .ok_or_else(|| PipelineError::RepositoryNotFound {
                    url: url.to_string(),
                    project: project.name.clone(),
                })
        }
        None => project
            .repositories
            .first()
            .ok_or(PipelineError::NoRepositories),
    }
}
