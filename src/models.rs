use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Inbound queue message describing one requested code change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkRequest {
    pub jira_issue_id: String,
    pub jira_issue_key: String,
    pub jira_project_key: String,
    pub summary: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
}

impl WorkRequest {
    /// The explicitly requested repository, ignoring blank values.
    pub fn requested_repository(&self) -> Option<&str> {
        self.repository
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
    }

    /// Routing key used when publishing this request to the topic exchange.
    pub fn routing_key(&self, prefix: &str) -> String {
        format!("{}.{}", prefix, self.jira_project_key)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    Ready,
    Completed,
    Failed,
}

impl WorkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ready" => Ok(Self::Ready),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid work status: {}", s)),
        }
    }
}

/// The durable record tracking one WorkRequest's progress and outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: i64,
    pub jira_issue_id: String,
    pub jira_issue_key: String,
    pub jira_project_key: String,
    pub repository_url: Option<String>,
    pub branch_name: Option<String>,
    pub pr_mr_url: Option<String>,
    pub status: WorkStatus,
    pub development_details: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Fields needed to open a new work item.
#[derive(Debug, Clone)]
pub struct NewWorkItem {
    pub jira_issue_id: String,
    pub jira_issue_key: String,
    pub jira_project_key: String,
}

impl From<&WorkRequest> for NewWorkItem {
    fn from(request: &WorkRequest) -> Self {
        Self {
            jira_issue_id: request.jira_issue_id.clone(),
            jira_issue_key: request.jira_issue_key.clone(),
            jira_project_key: request.jira_project_key.clone(),
        }
    }
}

/// Project configuration returned by the configuration API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub jira_project_key: String,
    #[serde(default)]
    pub repositories: Vec<Repository>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    #[serde(default, alias = "repository_id")]
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "git_access_token")]
    pub credential: String,
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
}

pub fn default_base_branch() -> String {
    "main".to_string()
}

/// Structural hints about a cloned repository.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryAnalysis {
    pub entry_points: Vec<String>,
    pub key_directories: Vec<String>,
    pub config_files: Vec<String>,
    pub languages: Vec<String>,
    pub patterns: BTreeMap<String, String>,
    pub project_type: String,
    pub dependency_managers: Vec<String>,
}

/// Envelope published to the error queue for messages the pipeline could not process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub original_message: String,
    pub error: String,
    pub timestamp: String,
}

impl ErrorEnvelope {
    pub fn new(body: &[u8], error: impl Into<String>) -> Self {
        Self {
            original_message: String::from_utf8_lossy(body).into_owned(),
            error: error.into(),
            timestamp: Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        }
    }
}
