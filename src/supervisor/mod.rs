//! Supervision of the detached code-generation job.
//!
//! The job runs inside a named session with no handle back to this process.
//! A wrapper script redirects the job's output to a log file and, once the
//! job exits, writes its exit code to a sentinel file. The supervisor polls
//! for the sentinel on a fixed tick, watches the session for crashes and
//! kills it when the deadline passes.

pub mod session;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::GenerationSection;
use crate::errors::SupervisorError;
use crate::vcs::count_changed_files;

pub use session::{LaunchSpec, ProcessBackend, SessionBackend, TmuxBackend, shell_quote};

const PROMPT_FILE: &str = "generation.prompt";
const LOG_FILE: &str = "generation.log";
const SENTINEL_FILE: &str = "generation.exit";

/// Floor for the poll tick; `tokio::time::interval` rejects a zero period.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub command: String,
    pub args: Vec<String>,
    pub max_wait: Duration,
    pub poll_interval: Duration,
    pub session_prefix: String,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::from(&GenerationSection::default())
    }
}

impl From<&GenerationSection> for SupervisorConfig {
    fn from(section: &GenerationSection) -> Self {
        Self {
            command: section.command.clone(),
            args: section.args.clone(),
            max_wait: Duration::from_secs(section.timeout_secs),
            poll_interval: Duration::from_secs(section.poll_interval_secs.max(1)),
            session_prefix: section.session_prefix.clone(),
        }
    }
}

impl SupervisorConfig {
    pub fn with_command(mut self, command: &str, args: &[&str]) -> Self {
        self.command = command.to_string();
        self.args = args.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// One generation run.
#[derive(Debug, Clone, Copy)]
pub struct GenerationJob<'a> {
    /// Names the session; normally the issue key.
    pub key: &'a str,
    /// Where the prompt, log and sentinel files are written.
    pub artifacts_dir: &'a Path,
    /// Directory the job runs in.
    pub workdir: &'a Path,
    pub instruction: &'a str,
}

/// How a supervised job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Sentinel written with exit code 0.
    Completed { output: String },
    /// Sentinel written with a non-zero exit code.
    Failed { exit_code: i32, output: String },
    /// Session gone without a sentinel, but a log was left behind.
    EndedUnsigned { output: String },
    /// Session gone with neither sentinel nor log.
    Vanished,
    /// Deadline passed; carries whatever the job logged before it was killed.
    TimedOut { output: String },
    Cancelled { output: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationReport {
    pub output: String,
    pub files_changed: usize,
    /// False when the job ended without writing its exit code.
    pub signed: bool,
}

#[derive(Debug, Clone)]
struct JobFiles {
    prompt: PathBuf,
    log: PathBuf,
    sentinel: PathBuf,
    sentinel_tmp: PathBuf,
}

impl JobFiles {
    fn new(dir: &Path) -> Self {
        Self {
            prompt: dir.join(PROMPT_FILE),
            log: dir.join(LOG_FILE),
            sentinel: dir.join(SENTINEL_FILE),
            sentinel_tmp: dir.join(format!("{}.tmp", SENTINEL_FILE)),
        }
    }

    fn all(&self) -> [&Path; 4] {
        [
            self.prompt.as_path(),
            self.log.as_path(),
            self.sentinel.as_path(),
            self.sentinel_tmp.as_path(),
        ]
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "failed to remove job artifact");
    }
}

async fn read_sentinel(path: &Path) -> Option<i32> {
    let raw = tokio::fs::read_to_string(path).await.ok()?;
    match raw.trim().parse::<i32>() {
        Ok(code) => Some(code),
        Err(_) => {
            warn!(path = %path.display(), content = %raw.trim(), "unreadable exit code in sentinel");
            Some(-1)
        }
    }
}

async fn read_log(path: &Path) -> Option<String> {
    tokio::fs::read(path)
        .await
        .ok()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

pub struct Supervisor {
    backend: Arc<dyn SessionBackend>,
    config: SupervisorConfig,
}

impl Supervisor {
    pub fn new(backend: Arc<dyn SessionBackend>, mut config: SupervisorConfig) -> Self {
        config.poll_interval = config.poll_interval.max(MIN_POLL_INTERVAL);
        Self { backend, config }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn session_name(&self, key: &str) -> String {
        let key: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        format!("{}-{}", self.config.session_prefix, key)
    }

    fn script(&self, workdir: &Path, files: &JobFiles) -> String {
        let mut invocation = shell_quote(&self.config.command);
        for arg in &self.config.args {
            invocation.push(' ');
            invocation.push_str(&shell_quote(arg));
        }
        let quote = |p: &Path| shell_quote(&p.to_string_lossy());
        format!(
            "cd {workdir} && {invocation} < {prompt} > {log} 2>&1; echo $? > {tmp} && mv {tmp} {sentinel}",
            workdir = quote(workdir),
            prompt = quote(&files.prompt),
            log = quote(&files.log),
            tmp = quote(&files.sentinel_tmp),
            sentinel = quote(&files.sentinel),
        )
    }

    /// Launch the job and wait for it to end, time out or be cancelled.
    pub async fn run(
        &self,
        job: &GenerationJob<'_>,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome, SupervisorError> {
        let files = JobFiles::new(job.artifacts_dir);
        for path in files.all() {
            remove_quietly(path).await;
        }
        tokio::fs::write(&files.prompt, job.instruction)
            .await
            .map_err(|source| SupervisorError::Artifacts {
                path: files.prompt.clone(),
                source,
            })?;

        let session = self.session_name(job.key);
        if self.backend.exists(&session).await {
            warn!(session = %session, "killing leftover session");
            if let Err(e) = self.backend.kill(&session).await {
                warn!(session = %session, error = %e, "failed to kill leftover session");
            }
        }

        let script = self.script(job.workdir, &files);
        self.backend
            .start(LaunchSpec {
                session: &session,
                workdir: job.workdir,
                script: &script,
                log: &files.log,
                sentinel: &files.sentinel,
            })
            .await?;
        info!(session = %session, max_wait_secs = self.config.max_wait.as_secs(), "generation job launched");

        let deadline = Instant::now() + self.config.max_wait;
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!(session = %session, "generation job cancelled");
                    self.kill(&session).await;
                    let output = read_log(&files.log).await.unwrap_or_default();
                    return Ok(JobOutcome::Cancelled { output });
                }
                _ = ticker.tick() => {}
            }

            if let Some(outcome) = self.signalled(&files).await {
                return Ok(outcome);
            }

            if !self.backend.exists(&session).await {
                // The session can exit between the sentinel check and now.
                if let Some(outcome) = self.signalled(&files).await {
                    return Ok(outcome);
                }
                return Ok(match read_log(&files.log).await {
                    Some(output) => {
                        warn!(session = %session, "session ended without writing an exit code");
                        JobOutcome::EndedUnsigned { output }
                    }
                    None => JobOutcome::Vanished,
                });
            }

            if Instant::now() >= deadline {
                warn!(session = %session, "generation job timed out");
                self.kill(&session).await;
                let output = read_log(&files.log).await.unwrap_or_default();
                return Ok(JobOutcome::TimedOut { output });
            }
            debug!(session = %session, "generation job still running");
        }
    }

    async fn signalled(&self, files: &JobFiles) -> Option<JobOutcome> {
        let exit_code = read_sentinel(&files.sentinel).await?;
        let output = read_log(&files.log).await.unwrap_or_default();
        Some(if exit_code == 0 {
            JobOutcome::Completed { output }
        } else {
            JobOutcome::Failed { exit_code, output }
        })
    }

    async fn kill(&self, session: &str) {
        if let Err(e) = self.backend.kill(session).await {
            warn!(session, error = %e, "failed to kill generation session");
        }
    }

    /// Run the job and turn its outcome into a report or an error.
    ///
    /// Artifacts are removed only after a clean exit; every other outcome
    /// leaves them in place for inspection.
    pub async fn generate(
        &self,
        job: &GenerationJob<'_>,
        cancel: &CancellationToken,
    ) -> Result<GenerationReport, SupervisorError> {
        let (output, signed) = match self.run(job, cancel).await? {
            JobOutcome::Completed { output } => {
                for path in JobFiles::new(job.artifacts_dir).all() {
                    remove_quietly(path).await;
                }
                (output, true)
            }
            JobOutcome::EndedUnsigned { output } => (output, false),
            JobOutcome::Failed { exit_code, output } => {
                return Err(SupervisorError::NonZeroExit { exit_code, output });
            }
            JobOutcome::Vanished => {
                return Err(SupervisorError::UnexpectedTermination {
                    session: self.session_name(job.key),
                });
            }
            JobOutcome::TimedOut { output } => {
                return Err(SupervisorError::TimedOut {
                    after: self.config.max_wait,
                    output,
                });
            }
            JobOutcome::Cancelled { output } => {
                return Err(SupervisorError::Cancelled { output });
            }
        };

        let workdir = job.workdir.to_path_buf();
        let files_changed = match tokio::task::spawn_blocking(move || count_changed_files(&workdir)).await {
            Ok(Ok(count)) => count,
            Ok(Err(e)) => {
                warn!(error = %e, "could not count changed files");
                0
            }
            Err(e) => {
                warn!(error = %e, "changed-file count task failed");
                0
            }
        };
        info!(files_changed, signed, "generation job finished");

        Ok(GenerationReport {
            output,
            files_changed,
            signed,
        })
    }
}
