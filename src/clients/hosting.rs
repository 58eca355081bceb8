use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use tracing::info;

use super::config_api::normalize_repo_url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    GitHub,
    GitLab,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GitHub => "github",
            Self::GitLab => "gitlab",
        }
    }
}

/// Where a repository lives and which API serves it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoInfo {
    pub platform: Platform,
    pub owner: String,
    pub repo: String,
    pub api_base: String,
}

/// Work out the hosting platform from a clone URL.
pub fn parse_repo_url(repo_url: &str) -> Result<RepoInfo> {
    let trimmed = normalize_repo_url(repo_url);
    let url = Url::parse(trimmed).with_context(|| format!("invalid repository URL: {}", repo_url))?;
    let host = url.host_str().unwrap_or_default();

    let (platform, api_base) = if host.contains("github.com") {
        (Platform::GitHub, "https://api.github.com".to_string())
    } else if host.contains("gitlab.com") {
        (Platform::GitLab, "https://gitlab.com/api/v4".to_string())
    } else if host.contains("gitlab") {
        let authority = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        (
            Platform::GitLab,
            format!("{}://{}/api/v4", url.scheme(), authority),
        )
    } else {
        bail!("could not determine platform from URL: {}", repo_url);
    };

    let mut segments = url
        .path()
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty());
    let (Some(owner), Some(repo)) = (segments.next(), segments.next()) else {
        bail!("invalid repository path: {}", url.path());
    };

    Ok(RepoInfo {
        platform,
        owner: owner.to_string(),
        repo: repo.to_string(),
        api_base,
    })
}

pub fn request_title(issue_key: &str, summary: &str) -> String {
    format!("[{}] {}", issue_key, summary)
}

pub fn request_body(issue_key: &str, description: &str) -> String {
    let mut body = format!("## JIRA Issue: {}\n\n", issue_key);
    if !description.is_empty() {
        body.push_str("## Description\n\n");
        body.push_str(description);
        body.push_str("\n\n");
    }
    body.push_str("---\n\n");
    body.push_str("*This pull request was automatically generated by SDLC AI Agent*\n");
    body
}

/// A pull/merge request to open.
#[derive(Debug, Clone)]
pub struct ChangeRequest {
    pub repo_url: String,
    pub branch: String,
    pub base_branch: String,
    pub title: String,
    pub body: String,
    pub credential: String,
}

#[async_trait]
pub trait HostingPlatform: Send + Sync {
    /// Open the request and return its web URL.
    async fn open_request(&self, request: &ChangeRequest) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct GitHubPull {
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct GitLabProject {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct GitLabMergeRequest {
    web_url: String,
}

/// GitHub / GitLab REST client.
#[derive(Debug, Clone)]
pub struct HttpHostingClient {
    client: reqwest::Client,
    api_base_override: Option<String>,
}

impl HttpHostingClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("devagent/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build hosting API client")?;
        Ok(Self {
            client,
            api_base_override: None,
        })
    }

    /// Send API calls to `base` instead of the platform's public endpoint.
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base_override = Some(base.into());
        self
    }

    async fn open_github(&self, api: &str, info: &RepoInfo, req: &ChangeRequest) -> Result<String> {
        let url = format!("{}/repos/{}/{}/pulls", api, info.owner, info.repo);
        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("token {}", req.credential))
            .header("Accept", "application/vnd.github.v3+json")
            .json(&serde_json::json!({
                "title": req.title,
                "body": req.body,
                "head": req.branch,
                "base": req.base_branch,
            }))
            .send()
            .await
            .context("Failed to create pull request")?;

        let status = resp.status();
        if status != reqwest::StatusCode::CREATED {
            let body = resp.text().await.unwrap_or_default();
            bail!("GitHub API returned status {}: {}", status.as_u16(), body);
        }
        let pull: GitHubPull = resp
            .json()
            .await
            .context("Failed to parse pull request response")?;
        Ok(pull.html_url)
    }

    async fn open_gitlab(&self, api: &str, info: &RepoInfo, req: &ChangeRequest) -> Result<String> {
        let project_url = format!("{}/projects/{}%2F{}", api, info.owner, info.repo);
        let resp = self
            .client
            .get(&project_url)
            .bearer_auth(&req.credential)
            .send()
            .await
            .context("Failed to get GitLab project")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("GitLab API returned status {}: {}", status.as_u16(), body);
        }
        let project: GitLabProject = resp
            .json()
            .await
            .context("Failed to parse GitLab project")?;

        let url = format!("{}/projects/{}/merge_requests", api, project.id);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&req.credential)
            .json(&serde_json::json!({
                "source_branch": req.branch,
                "target_branch": req.base_branch,
                "title": req.title,
                "description": req.body,
            }))
            .send()
            .await
            .context("Failed to create merge request")?;
        let status = resp.status();
        if status != reqwest::StatusCode::CREATED {
            let body = resp.text().await.unwrap_or_default();
            bail!("GitLab API returned status {}: {}", status.as_u16(), body);
        }
        let mr: GitLabMergeRequest = resp
            .json()
            .await
            .context("Failed to parse merge request response")?;
        Ok(mr.web_url)
    }
}

#[async_trait]
impl HostingPlatform for HttpHostingClient {
    async fn open_request(&self, request: &ChangeRequest) -> Result<String> {
        let info = parse_repo_url(&request.repo_url)?;
        let api = self
            .api_base_override
            .as_deref()
            .unwrap_or(&info.api_base)
            .trim_end_matches('/');
        info!(
            platform = info.platform.as_str(),
            owner = %info.owner,
            repo = %info.repo,
            branch = %request.branch,
            "opening change request"
        );
        let url = match info.platform {
            Platform::GitHub => self.open_github(api, &info, request).await?,
            Platform::GitLab => self.open_gitlab(api, &info, request).await?,
        };
        info!(url = %url, "change request opened");
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json, Router,
        extract::Path,
        http::{HeaderMap, StatusCode},
        response::{IntoResponse, Response},
        routing::{get, post},
    };

    #[test]
    fn test_parse_github_url() {
        let info = parse_repo_url("https://github.com/acme/api.git").unwrap();
        assert_eq!(info.platform, Platform::GitHub);
        assert_eq!(info.owner, "acme");
        assert_eq!(info.repo, "api");
        assert_eq!(info.api_base, "https://api.github.com");
    }

    #[test]
    fn test_parse_url_with_trailing_slash_after_git_suffix() {
        let info = parse_repo_url("https://github.com/acme/api.git/").unwrap();
        assert_eq!(info.owner, "acme");
        assert_eq!(info.repo, "api");
        let info = parse_repo_url("https://github.com/acme/api/").unwrap();
        assert_eq!(info.repo, "api");
    }

    #[test]
    fn test_parse_gitlab_urls() {
        let info = parse_repo_url("https://gitlab.com/acme/api").unwrap();
        assert_eq!(info.platform, Platform::GitLab);
        assert_eq!(info.api_base, "https://gitlab.com/api/v4");

        let hosted = parse_repo_url("http://gitlab.internal:8443/team/svc.git").unwrap();
        assert_eq!(hosted.platform, Platform::GitLab);
        assert_eq!(hosted.api_base, "http://gitlab.internal:8443/api/v4");
        assert_eq!(hosted.repo, "svc");
    }

    #[test]
    fn test_parse_rejects_unknown_host_and_short_path() {
        assert!(
            parse_repo_url("https://bitbucket.org/acme/api")
                .unwrap_err()
                .to_string()
                .contains("could not determine platform")
        );
        assert!(parse_repo_url("https://github.com/acme").is_err());
    }

    #[test]
    fn test_request_text() {
        assert_eq!(
            request_title("PROJ-1", "Add health endpoint"),
            "[PROJ-1] Add health endpoint"
        );
        let body = request_body("PROJ-1", "Expose /health");
        assert!(body.starts_with("## JIRA Issue: PROJ-1\n\n## Description\n\nExpose /health\n\n"));
        assert!(body.ends_with("*This pull request was automatically generated by SDLC AI Agent*\n"));
        assert!(!request_body("PROJ-1", "").contains("## Description"));
    }

    fn change_request(repo_url: &str) -> ChangeRequest {
        ChangeRequest {
            repo_url: repo_url.into(),
            branch: "feature/PROJ-1".into(),
            base_branch: "develop".into(),
            title: "[PROJ-1] Add health endpoint".into(),
            body: request_body("PROJ-1", ""),
            credential: "secret".into(),
        }
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn github_pulls(
        Path((owner, repo)): Path<(String, String)>,
        headers: HeaderMap,
        Json(payload): Json<serde_json::Value>,
    ) -> Response {
        let auth = headers.get("authorization").and_then(|v| v.to_str().ok());
        if auth != Some("token secret") || payload["base"] != "develop" {
            return StatusCode::UNPROCESSABLE_ENTITY.into_response();
        }
        (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "html_url": format!("https://github.com/{}/{}/pull/7", owner, repo)
            })),
        )
            .into_response()
    }

    #[tokio::test]
    async fn test_open_github_pull_request() {
        let app = Router::new().route("/repos/{owner}/{repo}/pulls", post(github_pulls));
        let base = serve(app).await;
        let client = HttpHostingClient::new(Duration::from_secs(5))
            .unwrap()
            .with_api_base(base);

        let url = client
            .open_request(&change_request("https://github.com/acme/api"))
            .await
            .unwrap();
        assert_eq!(url, "https://github.com/acme/api/pull/7");
    }

    async fn gitlab_project(Path(path): Path<String>, headers: HeaderMap) -> Response {
        let auth = headers.get("authorization").and_then(|v| v.to_str().ok());
        if path != "acme/api" || auth != Some("Bearer secret") {
            return StatusCode::NOT_FOUND.into_response();
        }
        Json(serde_json::json!({ "id": 42 })).into_response()
    }

    async fn gitlab_merge_request(
        Path(id): Path<u64>,
        Json(payload): Json<serde_json::Value>,
    ) -> Response {
        if id != 42 || payload["source_branch"] != "feature/PROJ-1" {
            return StatusCode::BAD_REQUEST.into_response();
        }
        (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "web_url": "https://gitlab.com/acme/api/-/merge_requests/3"
            })),
        )
            .into_response()
    }

    #[tokio::test]
    async fn test_open_gitlab_merge_request() {
        let app = Router::new()
            .route("/projects/{path}", get(gitlab_project))
            .route("/projects/{id}/merge_requests", post(gitlab_merge_request));
        let base = serve(app).await;
        let client = HttpHostingClient::new(Duration::from_secs(5))
            .unwrap()
            .with_api_base(base);

        let url = client
            .open_request(&change_request("https://gitlab.com/acme/api.git"))
            .await
            .unwrap();
        assert_eq!(url, "https://gitlab.com/acme/api/-/merge_requests/3");
    }

    #[tokio::test]
    async fn test_non_created_status_is_an_error() {
        let app = Router::new().route(
            "/repos/{owner}/{repo}/pulls",
            post(|| async { (StatusCode::UNPROCESSABLE_ENTITY, "A pull request already exists") }),
        );
        let base = serve(app).await;
        let client = HttpHostingClient::new(Duration::from_secs(5))
            .unwrap()
            .with_api_base(base);

        let err = client
            .open_request(&change_request("https://github.com/acme/api"))
            .await
            .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("422"));
        assert!(text.contains("already exists"));
    }
}
