//! Typed error hierarchy for the development agent.
//!
//! One enum per subsystem:
//! - `LookupError`: project configuration lookup
//! - `SupervisorError`: the detached code-generation job
//! - `PipelineError`: a single orchestrator step failing
//! - `StoreError`: work item persistence rules
//! - `ConsumerError`: broker connection and consumption

use std::time::Duration;

use thiserror::Error;

use crate::orchestrator::state::Stage;

/// Errors from the configuration lookup collaborator.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("project not found for jira_project_key: {project_key}")]
    ProjectNotFound { project_key: String },

    #[error("configuration API returned status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

/// Errors from a supervised code-generation job.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to prepare job artifacts at {path}: {source}")]
    Artifacts {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to launch session {session}: {message}")]
    LaunchFailed { session: String, message: String },

    #[error("code generation exited with code {exit_code}")]
    NonZeroExit { exit_code: i32, output: String },

    #[error("code generation timed out after {}s", .after.as_secs())]
    TimedOut { after: Duration, output: String },

    #[error("code generation session {session} terminated unexpectedly without output")]
    UnexpectedTermination { session: String },

    #[error("code generation was cancelled")]
    Cancelled { output: String },
}

impl SupervisorError {
    /// Captured job output, when the failure carries any.
    pub fn diagnostic_output(&self) -> Option<&str> {
        match self {
            Self::NonZeroExit { output, .. }
            | Self::TimedOut { output, .. }
            | Self::Cancelled { output } => Some(output),
            _ => None,
        }
    }
}

/// A step of the pipeline failed. The rendered message is what gets recorded
/// on the work item and published to the error queue.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error("repository {url} not found in project {project}")]
    RepositoryNotFound { url: String, project: String },

    #[error("no repositories configured for project")]
    NoRepositories,

    #[error("{stage} failed: {source:#}")]
    Step {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },

    #[error("{source}")]
    Generation {
        #[source]
        source: SupervisorError,
    },

    #[error("failed to record work item: {0:#}")]
    Record(#[source] anyhow::Error),
}

impl PipelineError {
    pub fn step(stage: Stage, source: anyhow::Error) -> Self {
        Self::Step { stage, source }
    }

    /// Text stored on the failed work item. Generation failures append the
    /// captured job output so the record is self-contained.
    pub fn record_text(&self) -> String {
        match self {
            Self::Generation { source } => match source.diagnostic_output() {
                Some(output) if !output.trim().is_empty() => {
                    format!("{}\n\n{}", source, output.trim_end())
                }
                _ => source.to_string(),
            },
            other => other.to_string(),
        }
    }
}

/// Errors from the work item store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("work item {id} not found")]
    NotFound { id: i64 },

    #[error("work item {id} is already {status}; terminal records are immutable")]
    AlreadyTerminal { id: i64, status: String },

    #[error("database lock poisoned")]
    LockPoisoned,
}

/// Errors from the queue consumer.
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("failed to connect to broker after {attempts} attempts: {source}")]
    ConnectExhausted {
        attempts: u32,
        #[source]
        source: lapin::Error,
    },

    #[error("broker topology setup failed for {object}: {source}")]
    Topology {
        object: String,
        #[source]
        source: lapin::Error,
    },

    #[error("broker connection lost: {0}")]
    ConnectionLost(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_repositories_message_matches_record_text() {
        let err = PipelineError::NoRepositories;
        assert_eq!(err.record_text(), "no repositories configured for project");
    }

    #[test]
    fn repository_not_found_carries_url_and_project() {
        let err = PipelineError::RepositoryNotFound {
            url: "https://github.com/acme/api".into(),
            project: "Acme".into(),
        };
        let text = err.to_string();
        assert!(text.contains("https://github.com/acme/api"));
        assert!(text.contains("Acme"));
    }

    #[test]
    fn generation_failure_record_text_includes_output() {
        let err = PipelineError::Generation {
            source: SupervisorError::NonZeroExit {
                exit_code: 3,
                output: "error: could not compile\n".into(),
            },
        };
        let text = err.record_text();
        assert!(text.starts_with("code generation exited with code 3"));
        assert!(text.ends_with("error: could not compile"));
    }

    #[test]
    fn timeout_message_mentions_timeout() {
        let err = SupervisorError::TimedOut {
            after: Duration::from_secs(600),
            output: String::new(),
        };
        assert_eq!(err.to_string(), "code generation timed out after 600s");
        let record = PipelineError::Generation { source: err }.record_text();
        assert_eq!(record, "code generation timed out after 600s");
    }

    #[test]
    fn timeout_record_text_includes_partial_output() {
        let err = PipelineError::Generation {
            source: SupervisorError::TimedOut {
                after: Duration::from_secs(600),
                output: "partial progress: edited 3 files\n".into(),
            },
        };
        assert_eq!(
            err.record_text(),
            "code generation timed out after 600s\n\npartial progress: edited 3 files"
        );
    }

    #[test]
    fn step_error_names_the_stage() {
        let err = PipelineError::step(Stage::Push, anyhow::anyhow!("remote rejected"));
        assert_eq!(err.to_string(), "push failed: remote rejected");
    }

    #[test]
    fn lookup_error_converts_into_pipeline_error() {
        let err: PipelineError = LookupError::ProjectNotFound {
            project_key: "PROJ".into(),
        }
        .into();
        assert!(matches!(
            err,
            PipelineError::Lookup(LookupError::ProjectNotFound { .. })
        ));
        assert!(err.to_string().contains("PROJ"));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&PipelineError::NoRepositories);
        assert_std_error(&SupervisorError::Cancelled {
            output: String::new(),
        });
        assert_std_error(&StoreError::LockPoisoned);
        assert_std_error(&LookupError::ProjectNotFound {
            project_key: "X".into(),
        });
    }
}
