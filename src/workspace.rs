//! Per-issue scratch directories.
//!
//! Each work item gets `<root>/sdlc-<KEY>/` with the clone under `repo/`.
//! Generation job artifacts go to `<root>/.devagent-jobs/<KEY>/`, outside
//! both the clone and the workspace, so they survive workspace release.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

const JOBS_DIR: &str = ".devagent-jobs";

fn safe_key(issue_key: &str) -> String {
    issue_key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory used for an issue key. Anything outside `[A-Za-z0-9_-]`
    /// is replaced so the key cannot escape the root.
    pub fn dir_for(&self, issue_key: &str) -> PathBuf {
        self.root.join(format!("sdlc-{}", safe_key(issue_key)))
    }

    /// Where the generation job for an issue writes its prompt, log and
    /// sentinel. Not touched by `acquire` or `release`.
    pub fn artifacts_dir_for(&self, issue_key: &str) -> PathBuf {
        self.root.join(JOBS_DIR).join(safe_key(issue_key))
    }

    pub fn prepare_artifacts(&self, issue_key: &str) -> Result<PathBuf> {
        let dir = self.artifacts_dir_for(issue_key);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create job artifacts directory {}", dir.display()))?;
        Ok(dir)
    }

    /// Create a fresh workspace, removing any leftover from a crashed run.
    pub fn acquire(&self, issue_key: &str) -> Result<Workspace> {
        let dir = self.dir_for(issue_key);
        if dir.exists() {
            debug!(path = %dir.display(), "removing stale workspace");
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                warn!(path = %dir.display(), error = %e, "failed to remove stale workspace");
            }
        }
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create workspace {}", dir.display()))?;
        let repo_path = dir.join("repo");
        Ok(Workspace {
            dir,
            repo_path,
            released: false,
        })
    }
}

/// An acquired workspace. `release` removes it; dropping an unreleased
/// workspace removes it too.
#[derive(Debug)]
pub struct Workspace {
    dir: PathBuf,
    repo_path: PathBuf,
    released: bool,
}

impl Workspace {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Clone destination. Does not exist until the clone step runs.
    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    pub fn release(mut self) -> Result<()> {
        self.released = true;
        remove_if_present(&self.dir)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if !self.released
            && let Err(e) = remove_if_present(&self.dir)
        {
            warn!(path = %self.dir.display(), error = %e, "failed to remove workspace on drop");
        }
    }
}

fn remove_if_present(dir: &Path) -> Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove workspace {}", dir.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_dir_for_uses_issue_key() {
        let manager = WorkspaceManager::new("/tmp");
        assert_eq!(manager.dir_for("PROJ-1"), PathBuf::from("/tmp/sdlc-PROJ-1"));
        assert_eq!(
            manager.dir_for("../../etc"),
            PathBuf::from("/tmp/sdlc-______etc")
        );
    }

    #[test]
    fn test_artifacts_dir_outlives_workspace() {
        let root = tempdir().unwrap();
        let manager = WorkspaceManager::new(root.path());
        assert_eq!(
            manager.artifacts_dir_for("PROJ-1"),
            root.path().join(".devagent-jobs").join("PROJ-1")
        );

        let ws = manager.acquire("PROJ-1").unwrap();
        let artifacts = manager.prepare_artifacts("PROJ-1").unwrap();
        std::fs::write(artifacts.join("generation.log"), "output").unwrap();
        assert!(!artifacts.starts_with(ws.dir()));
        ws.release().unwrap();
        assert!(artifacts.join("generation.log").exists());

        let again = manager.acquire("PROJ-1").unwrap();
        assert!(artifacts.join("generation.log").exists());
        again.release().unwrap();
    }

    #[test]
    fn test_acquire_replaces_stale_directory() {
        let root = tempdir().unwrap();
        let manager = WorkspaceManager::new(root.path());
        let stale = manager.dir_for("PROJ-1").join("repo");
        std::fs::create_dir_all(&stale).unwrap();
        std::fs::write(stale.join("leftover.txt"), "old").unwrap();

        let ws = manager.acquire("PROJ-1").unwrap();
        assert!(ws.dir().exists());
        assert!(!ws.repo_path().exists());
        ws.release().unwrap();
    }

    #[test]
    fn test_release_removes_directory() {
        let root = tempdir().unwrap();
        let manager = WorkspaceManager::new(root.path());
        let ws = manager.acquire("PROJ-2").unwrap();
        let dir = ws.dir().to_path_buf();
        std::fs::create_dir_all(ws.repo_path()).unwrap();
        ws.release().unwrap();
        assert!(!dir.exists());
    }

    #[test]
    fn test_drop_removes_unreleased_directory() {
        let root = tempdir().unwrap();
        let manager = WorkspaceManager::new(root.path());
        let dir = {
            let ws = manager.acquire("PROJ-3").unwrap();
            ws.dir().to_path_buf()
        };
        assert!(!dir.exists());
    }

    #[test]
    fn test_release_tolerates_missing_directory() {
        let root = tempdir().unwrap();
        let manager = WorkspaceManager::new(root.path());
        let ws = manager.acquire("PROJ-4").unwrap();
        std::fs::remove_dir_all(ws.dir()).unwrap();
        assert!(ws.release().is_ok());
    }
}
