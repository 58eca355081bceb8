//! Detached session backends.
//!
//! A backend only knows how to start a shell script under a session name,
//! report whether that session is still alive, and kill it. Completion and
//! exit codes travel through the files the script writes.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::errors::SupervisorError;

/// Everything a backend needs to launch one job.
#[derive(Debug, Clone, Copy)]
pub struct LaunchSpec<'a> {
    pub session: &'a str,
    pub workdir: &'a Path,
    /// POSIX shell script that runs the job and writes the sentinel.
    pub script: &'a str,
    pub log: &'a Path,
    pub sentinel: &'a Path,
}

#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn start(&self, spec: LaunchSpec<'_>) -> Result<(), SupervisorError>;

    async fn exists(&self, session: &str) -> bool;

    async fn kill(&self, session: &str) -> Result<()>;
}

/// Single-quote `value` for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Runs each job in its own named `tmux` session.
#[derive(Debug, Clone)]
pub struct TmuxBackend {
    program: String,
}

impl Default for TmuxBackend {
    fn default() -> Self {
        Self {
            program: "tmux".to_string(),
        }
    }
}

impl TmuxBackend {
    fn target(session: &str) -> String {
        format!("={}", session)
    }
}

#[async_trait]
impl SessionBackend for TmuxBackend {
    async fn start(&self, spec: LaunchSpec<'_>) -> Result<(), SupervisorError> {
        // tmux hands the command to the user's default shell, which may not be POSIX.
        let command = format!("sh -c {}", shell_quote(spec.script));
        let output = Command::new(&self.program)
            .arg("new-session")
            .arg("-d")
            .arg("-s")
            .arg(spec.session)
            .arg("-c")
            .arg(spec.workdir)
            .arg(command)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| SupervisorError::LaunchFailed {
                session: spec.session.to_string(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(SupervisorError::LaunchFailed {
                session: spec.session.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        debug!(session = spec.session, "tmux session started");
        Ok(())
    }

    async fn exists(&self, session: &str) -> bool {
        Command::new(&self.program)
            .args(["has-session", "-t", &Self::target(session)])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    async fn kill(&self, session: &str) -> Result<()> {
        let status = Command::new(&self.program)
            .args(["kill-session", "-t", &Self::target(session)])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .context("Failed to run tmux kill-session")?;
        if !status.success() {
            debug!(session, "tmux kill-session reported no such session");
        }
        Ok(())
    }
}

/// Runs each job as a child `sh` in its own process group.
///
/// Jobs die with the agent, unlike tmux sessions.
#[derive(Debug, Default)]
pub struct ProcessBackend {
    children: std::sync::Mutex<HashMap<String, Child>>,
}

impl ProcessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn take(&self, session: &str) -> Option<Child> {
        self.children
            .lock()
            .ok()
            .and_then(|mut children| children.remove(session))
    }
}

#[async_trait]
impl SessionBackend for ProcessBackend {
    async fn start(&self, spec: LaunchSpec<'_>) -> Result<(), SupervisorError> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(spec.script)
            .current_dir(spec.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|e| SupervisorError::LaunchFailed {
            session: spec.session.to_string(),
            message: e.to_string(),
        })?;
        debug!(session = spec.session, pid = ?child.id(), "job process started");

        let mut children = self
            .children
            .lock()
            .map_err(|_| SupervisorError::LaunchFailed {
                session: spec.session.to_string(),
                message: "session table lock poisoned".to_string(),
            })?;
        children.insert(spec.session.to_string(), child);
        Ok(())
    }

    async fn exists(&self, session: &str) -> bool {
        let Ok(mut children) = self.children.lock() else {
            return false;
        };
        let running = match children.get_mut(session) {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => return false,
        };
        if !running {
            children.remove(session);
        }
        running
    }

    async fn kill(&self, session: &str) -> Result<()> {
        let Some(mut child) = self.take(session) else {
            return Ok(());
        };
        if let Some(pid) = child.id() {
            let group = format!("-{}", pid);
            if let Err(e) = Command::new("kill")
                .args(["-TERM", "--", &group])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await
            {
                warn!(session, error = %e, "failed to signal job process group");
            }
        }
        child.start_kill().ok();
        child.wait().await.context("Failed to reap job process")?;
        Ok(())
    }
}
