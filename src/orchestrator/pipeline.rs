use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::prompt::{build_instruction, project_context};
use super::state::{OpenItem, Stage};
use crate::analyzer::Analyzer;
use crate::clients::hosting::{request_body, request_title};
use crate::clients::{ChangeRequest, ConfigLookup, HostingPlatform, select_repository};
use crate::config::EmptyDiffPolicy;
use crate::errors::PipelineError;
use crate::models::{NewWorkItem, Project, Repository, RepositoryAnalysis, WorkItem, WorkRequest};
use crate::store::WorkItemStore;
use crate::supervisor::{GenerationJob, GenerationReport, Supervisor};
use crate::vcs::{GitIdentity, VersionControl};
use crate::workspace::{Workspace, WorkspaceManager};

/// Collaborators the orchestrator drives. Everything is passed in; nothing
/// is looked up globally.
pub struct PipelineDeps {
    pub store: Arc<dyn WorkItemStore>,
    pub config_lookup: Arc<dyn ConfigLookup>,
    pub analyzer: Analyzer,
    pub vcs: Arc<dyn VersionControl>,
    pub hosting: Arc<dyn HostingPlatform>,
    pub supervisor: Supervisor,
    pub workspaces: WorkspaceManager,
    pub identity: GitIdentity,
    pub empty_diff: EmptyDiffPolicy,
}

pub fn branch_name(issue_key: &str) -> String {
    format!("feature/{}", issue_key)
}

pub fn commit_message(issue_key: &str, summary: &str) -> String {
    format!(
        "[{}] {}\n\nAutomated commit by SDLC AI Agent",
        issue_key, summary
    )
}

/// State a run accumulates as it moves through the stages.
struct Run<'a> {
    request: &'a WorkRequest,
    item_id: i64,
    project: Option<Project>,
    repository: Option<Repository>,
    workspace: Option<Workspace>,
    analysis: Option<RepositoryAnalysis>,
    report: Option<GenerationReport>,
    branch: String,
    committed: bool,
    request_url: Option<String>,
}

impl<'a> Run<'a> {
    fn new(request: &'a WorkRequest, item_id: i64) -> Self {
        Self {
            request,
            item_id,
            project: None,
            repository: None,
            workspace: None,
            analysis: None,
            report: None,
            branch: branch_name(&request.jira_issue_key),
            committed: false,
            request_url: None,
        }
    }

    fn key(&self) -> &str {
        &self.request.jira_issue_key
    }
}

/// Requires a value produced by an earlier stage.
fn earlier<'v, T>(value: &'v Option<T>, stage: Stage, what: &str) -> Result<&'v T, PipelineError> {
    value
        .as_ref()
        .ok_or_else(|| PipelineError::step(stage, anyhow::anyhow!("{} not available", what)))
}

pub struct Orchestrator {
    deps: PipelineDeps,
}

impl Orchestrator {
    pub fn new(deps: PipelineDeps) -> Self {
        Self { deps }
    }

    pub fn deps(&self) -> &PipelineDeps {
        &self.deps
    }

    fn skips_request(&self, run: &Run<'_>) -> bool {
        !run.committed && self.deps.empty_diff == EmptyDiffPolicy::SkipRequest
    }

    /// Drive one request through every stage and record the outcome.
    ///
    /// The work item is created before anything else, and exactly one
    /// terminal write follows. The workspace is removed on every path.
    pub async fn process(
        &self,
        request: &WorkRequest,
        cancel: &CancellationToken,
    ) -> Result<WorkItem, PipelineError> {
        let item = self
            .deps
            .store
            .create(NewWorkItem::from(request))
            .await
            .map_err(PipelineError::Record)?;
        let open = OpenItem::new(&item);
        info!(
            issue_key = %request.jira_issue_key,
            work_item_id = item.id,
            "work item created"
        );

        let mut run = Run::new(request, item.id);
        let mut stage = Some(Stage::Resolve);
        let result = loop {
            let current = match stage {
                Some(Stage::Record) | None => break Ok(()),
                Some(current) => current,
            };
            debug!(issue_key = %run.key(), stage = %current, "stage started");
            if let Err(err) = self.step(current, &mut run, cancel).await {
                break Err(err);
            }
            stage = current.next();
        };

        let recorded = match result {
            Ok(()) => self.record_success(open, &run).await,
            Err(err) => {
                warn!(
                    issue_key = %run.key(),
                    work_item_id = run.item_id,
                    error = %err,
                    "pipeline failed"
                );
                if let Err(record_err) = open.fail(self.deps.store.as_ref(), &err.record_text()).await {
                    error!(
                        work_item_id = run.item_id,
                        error = %record_err,
                        "failed to record work item failure"
                    );
                }
                Err(err)
            }
        };

        if let Some(workspace) = run.workspace.take()
            && let Err(e) = workspace.release()
        {
            warn!(issue_key = %run.key(), error = %e, "failed to release workspace");
        }

        recorded
    }

    async fn record_success(&self, open: OpenItem, run: &Run<'_>) -> Result<WorkItem, PipelineError> {
        let output = run
            .report
            .as_ref()
            .map(|r| r.output.as_str())
            .unwrap_or_default();
        let details = if self.skips_request(run) {
            format!("No changes produced; no request opened.\n\n{}", output)
        } else {
            output.to_string()
        };
        let item = open
            .complete(
                self.deps.store.as_ref(),
                run.request_url.as_deref(),
                &details,
            )
            .await
            .map_err(|e| {
                error!(
                    issue_key = %run.key(),
                    work_item_id = run.item_id,
                    pr_url = run.request_url.as_deref().unwrap_or("-"),
                    error = %e,
                    "failed to record completed work item"
                );
                PipelineError::Record(e)
            })?;
        info!(
            issue_key = %run.key(),
            work_item_id = item.id,
            pr_url = item.pr_mr_url.as_deref().unwrap_or("-"),
            files_changed = run.report.as_ref().map(|r| r.files_changed).unwrap_or(0),
            "work item completed"
        );
        Ok(item)
    }

    async fn step(
        &self,
        stage: Stage,
        run: &mut Run<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        match stage {
            Stage::Resolve => self.resolve(run).await,
            Stage::Clone => self.clone_repository(run).await,
            Stage::Analyze => self.analyze(run).await,
            Stage::Generate => self.generate(run, cancel).await,
            Stage::Commit => self.commit(run).await,
            Stage::Push => self.push(run).await,
            Stage::OpenRequest => self.open_request(run).await,
            Stage::Record => Ok(()),
        }
    }

    async fn resolve(&self, run: &mut Run<'_>) -> Result<(), PipelineError> {
        let project = self
            .deps
            .config_lookup
            .project_by_key(&run.request.jira_project_key)
            .await?;
        let repository = select_repository(&project, run.request.requested_repository())?.clone();
        info!(
            issue_key = %run.key(),
            repository_url = %repository.url,
            "repository selected"
        );
        self.deps
            .store
            .update_repository_info(run.item_id, &repository.url, None)
            .await
            .map_err(PipelineError::Record)?;
        run.project = Some(project);
        run.repository = Some(repository);
        Ok(())
    }

    async fn clone_repository(&self, run: &mut Run<'_>) -> Result<(), PipelineError> {
        let workspace = self
            .deps
            .workspaces
            .acquire(run.key())
            .map_err(|e| PipelineError::step(Stage::Clone, e))?;
        let workspace = run.workspace.insert(workspace);
        let repository = earlier(&run.repository, Stage::Clone, "repository")?;
        self.deps
            .vcs
            .clone_repo(&repository.url, &repository.credential, workspace.repo_path())
            .await
            .map_err(|e| PipelineError::step(Stage::Clone, e))
    }

    async fn analyze(&self, run: &mut Run<'_>) -> Result<(), PipelineError> {
        let path = earlier(&run.workspace, Stage::Analyze, "workspace")?
            .repo_path()
            .to_path_buf();
        let analyzer = self.deps.analyzer.clone();
        let analysis = tokio::task::spawn_blocking(move || analyzer.analyze(&path))
            .await
            .map_err(|e| PipelineError::step(Stage::Analyze, e.into()))?
            .map_err(|e| PipelineError::step(Stage::Analyze, e))?;
        run.analysis = Some(analysis);
        Ok(())
    }

    async fn generate(&self, run: &mut Run<'_>, cancel: &CancellationToken) -> Result<(), PipelineError> {
        let project = earlier(&run.project, Stage::Generate, "project")?;
        let analysis = earlier(&run.analysis, Stage::Generate, "analysis")?;
        let workspace = earlier(&run.workspace, Stage::Generate, "workspace")?;
        let artifacts_dir = self
            .deps
            .workspaces
            .prepare_artifacts(run.key())
            .map_err(|e| PipelineError::step(Stage::Generate, e))?;

        let instruction = build_instruction(run.request, project, analysis);
        debug!(
            issue_key = %run.key(),
            prompt_len = instruction.len(),
            context = %project_context(project, analysis),
            "starting code generation"
        );
        let job = GenerationJob {
            key: &run.request.jira_issue_key,
            artifacts_dir: &artifacts_dir,
            workdir: workspace.repo_path(),
            instruction: &instruction,
        };
        let report = self
            .deps
            .supervisor
            .generate(&job, cancel)
            .await
            .map_err(|source| PipelineError::Generation { source })?;
        run.report = Some(report);
        Ok(())
    }

    async fn commit(&self, run: &mut Run<'_>) -> Result<(), PipelineError> {
        let repo_path = earlier(&run.workspace, Stage::Commit, "workspace")?
            .repo_path()
            .to_path_buf();
        let repository_url = earlier(&run.repository, Stage::Commit, "repository")?
            .url
            .clone();

        self.deps
            .vcs
            .create_branch(&repo_path, &run.branch)
            .await
            .map_err(|e| PipelineError::step(Stage::Commit, e))?;
        self.deps
            .store
            .update_repository_info(run.item_id, &repository_url, Some(run.branch.as_str()))
            .await
            .map_err(PipelineError::Record)?;

        let message = commit_message(&run.request.jira_issue_key, &run.request.summary);
        run.committed = self
            .deps
            .vcs
            .commit_all(&repo_path, &message, &self.deps.identity)
            .await
            .map_err(|e| PipelineError::step(Stage::Commit, e))?;
        if !run.committed {
            info!(issue_key = %run.key(), "generation produced no changes; nothing to commit");
        }
        Ok(())
    }

    async fn push(&self, run: &mut Run<'_>) -> Result<(), PipelineError> {
        if self.skips_request(run) {
            return Ok(());
        }
        let repo_path = earlier(&run.workspace, Stage::Push, "workspace")?.repo_path();
        let repository = earlier(&run.repository, Stage::Push, "repository")?;
        self.deps
            .vcs
            .push(repo_path, &run.branch, &repository.credential)
            .await
            .map_err(|e| PipelineError::step(Stage::Push, e))?;
        info!(issue_key = %run.key(), branch = %run.branch, "branch pushed");
        Ok(())
    }

    async fn open_request(&self, run: &mut Run<'_>) -> Result<(), PipelineError> {
        if self.skips_request(run) {
            info!(issue_key = %run.key(), "skipping change request for empty diff");
            return Ok(());
        }
        let repository = earlier(&run.repository, Stage::OpenRequest, "repository")?;
        let request = ChangeRequest {
            repo_url: repository.url.clone(),
            branch: run.branch.clone(),
            base_branch: repository.base_branch.clone(),
            title: request_title(&run.request.jira_issue_key, &run.request.summary),
            body: request_body(&run.request.jira_issue_key, &run.request.description),
            credential: repository.credential.clone(),
        };
        let url = self
            .deps
            .hosting
            .open_request(&request)
            .await
            .map_err(|e| PipelineError::step(Stage::OpenRequest, e))?;
        run.request_url = Some(url);
        Ok(())
    }
}
