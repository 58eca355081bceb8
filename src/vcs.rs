//! Version-control collaborator: clone, branch, commit, push.
//!
//! `Git2Vcs` does everything in-process through libgit2 on the blocking
//! pool. Remote authentication uses HTTP basic auth with the project's
//! access token as the password.

use std::path::Path;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use git2::{
    Cred, FetchOptions, IndexAddOption, PushOptions, RemoteCallbacks, Repository, Signature,
    StatusOptions,
};
use tracing::debug;

use crate::config::GitSection;

/// Author identity stamped on automated commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitIdentity {
    pub name: String,
    pub email: String,
}

impl From<&GitSection> for GitIdentity {
    fn from(git: &GitSection) -> Self {
        Self {
            name: git.author_name.clone(),
            email: git.author_email.clone(),
        }
    }
}

#[async_trait]
pub trait VersionControl: Send + Sync {
    async fn clone_repo(&self, url: &str, credential: &str, dest: &Path) -> Result<()>;

    /// Create `name` at the current HEAD and switch to it.
    async fn create_branch(&self, repo: &Path, name: &str) -> Result<()>;

    /// Stage every working-tree change and commit. Returns `false` without
    /// committing when nothing changed.
    async fn commit_all(&self, repo: &Path, message: &str, author: &GitIdentity) -> Result<bool>;

    async fn push(&self, repo: &Path, branch: &str, credential: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct Git2Vcs {
    auth_username: String,
}

impl Git2Vcs {
    pub fn new(auth_username: impl Into<String>) -> Self {
        Self {
            auth_username: auth_username.into(),
        }
    }
}

impl Default for Git2Vcs {
    fn default() -> Self {
        Self::new("git")
    }
}

/// Callbacks that answer one credential challenge with the token. libgit2
/// re-invokes the callback after a rejected attempt, so a second call fails
/// instead of looping.
fn auth_callbacks<'a>(username: &'a str, token: &'a str) -> RemoteCallbacks<'a> {
    let mut callbacks = RemoteCallbacks::new();
    let mut attempted = false;
    callbacks.credentials(move |_url, _username_from_url, _allowed| {
        if attempted {
            return Err(git2::Error::from_str("authentication rejected by remote"));
        }
        attempted = true;
        if token.is_empty() {
            Cred::default()
        } else {
            Cred::userpass_plaintext(username, token)
        }
    });
    callbacks
}

async fn blocking<F, R>(f: F) -> Result<R>
where
    F: FnOnce() -> Result<R> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("git task panicked")?
}

#[async_trait]
impl VersionControl for Git2Vcs {
    async fn clone_repo(&self, url: &str, credential: &str, dest: &Path) -> Result<()> {
        let url = url.to_string();
        let token = credential.to_string();
        let username = self.auth_username.clone();
        let dest = dest.to_path_buf();
        blocking(move || {
            let mut fetch = FetchOptions::new();
            fetch.remote_callbacks(auth_callbacks(&username, &token));
            git2::build::RepoBuilder::new()
                .fetch_options(fetch)
                .clone(&url, &dest)
                .with_context(|| format!("Failed to clone {}", url))?;
            debug!(url = %url, dest = %dest.display(), "cloned repository");
            Ok(())
        })
        .await
    }

    async fn create_branch(&self, repo: &Path, name: &str) -> Result<()> {
        let repo_path = repo.to_path_buf();
        let name = name.to_string();
        blocking(move || {
            let repo = open(&repo_path)?;
            let head = repo
                .head()
                .and_then(|h| h.peel_to_commit())
                .context("Repository has no HEAD commit to branch from")?;
            repo.branch(&name, &head, true)
                .with_context(|| format!("Failed to create branch {}", name))?;
            repo.set_head(&format!("refs/heads/{}", name))
                .with_context(|| format!("Failed to check out branch {}", name))?;
            Ok(())
        })
        .await
    }

    async fn commit_all(&self, repo: &Path, message: &str, author: &GitIdentity) -> Result<bool> {
        let repo_path = repo.to_path_buf();
        let message = message.to_string();
        let author = author.clone();
        blocking(move || {
            let repo = open(&repo_path)?;
            let mut index = repo.index().context("Failed to read index")?;
            index
                .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
                .context("Failed to stage changes")?;
            index
                .update_all(["*"].iter(), None)
                .context("Failed to stage deletions")?;
            index.write().context("Failed to write index")?;
            let tree_id = index.write_tree().context("Failed to write tree")?;

            let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
            if let Some(parent) = &parent
                && parent.tree_id() == tree_id
            {
                return Ok(false);
            }

            let tree = repo.find_tree(tree_id)?;
            let sig = Signature::now(&author.name, &author.email)
                .context("Invalid commit author identity")?;
            let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
            repo.commit(Some("HEAD"), &sig, &sig, &message, &tree, &parents)
                .context("Failed to create commit")?;
            Ok(true)
        })
        .await
    }

    async fn push(&self, repo: &Path, branch: &str, credential: &str) -> Result<()> {
        let repo_path = repo.to_path_buf();
        let branch = branch.to_string();
        let token = credential.to_string();
        let username = self.auth_username.clone();
        blocking(move || {
            let repo = open(&repo_path)?;
            let mut remote = repo
                .find_remote("origin")
                .context("Repository has no origin remote")?;

            let mut rejection: Option<String> = None;
            {
                let mut callbacks = auth_callbacks(&username, &token);
                callbacks.push_update_reference(|refname, status| {
                    if let Some(msg) = status {
                        rejection = Some(format!("{}: {}", refname, msg));
                    }
                    Ok(())
                });
                let mut options = PushOptions::new();
                options.remote_callbacks(callbacks);
                let refspec = format!("refs/heads/{0}:refs/heads/{0}", branch);
                remote
                    .push(&[refspec.as_str()], Some(&mut options))
                    .with_context(|| format!("Failed to push branch {}", branch))?;
            }
            if let Some(reason) = rejection {
                bail!("Remote rejected push of {}", reason);
            }
            Ok(())
        })
        .await
    }
}

fn open(path: &Path) -> Result<Repository> {
    Repository::open(path).with_context(|| format!("Failed to open repository {}", path.display()))
}

pub fn count_changed_files(repo_path: &Path) -> Result<usize> {
    let repo = open(repo_path)?;
    let mut opts = StatusOptions::new();
    opts.include_untracked(true)
        .recurse_untracked_dirs(true)
        .include_ignored(false);
    let statuses = repo
        .statuses(Some(&mut opts))
        .context("Failed to read working tree status")?;
    Ok(statuses
        .iter()
        .filter(|entry| {
            let status = entry.status();
            !status.is_empty() && !status.is_ignored()
        })
        .count())
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::RepositoryInitOptions;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::{TempDir, tempdir};

    fn identity() -> GitIdentity {
        GitIdentity {
            name: "SDLC AI Agent".into(),
            email: "sdlc-agent@example.com".into(),
        }
    }

    /// A bare upstream with one commit on `main`.
    fn upstream() -> (TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let seed = dir.path().join("seed");
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("main");
        let repo = Repository::init_opts(&seed, &opts).unwrap();
        fs::write(seed.join("README.md"), "# demo\n").unwrap();
        let mut index = repo.index().unwrap();
        index
            .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
            .unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::now("test", "test@test.com").unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[])
            .unwrap();

        let bare = dir.path().join("upstream.git");
        git2::build::RepoBuilder::new()
            .bare(true)
            .clone(seed.to_str().unwrap(), &bare)
            .unwrap();
        (dir, bare)
    }

    #[tokio::test]
    async fn test_clone_branch_commit_push_round() {
        let (dir, bare) = upstream();
        let vcs = Git2Vcs::default();
        let work = dir.path().join("work");

        vcs.clone_repo(bare.to_str().unwrap(), "", &work).await.unwrap();
        vcs.create_branch(&work, "feature/PROJ-1").await.unwrap();
        fs::write(work.join("health.rs"), "fn health() {}\n").unwrap();
        assert_eq!(count_changed_files(&work).unwrap(), 1);

        let committed = vcs
            .commit_all(&work, "[PROJ-1] Add health endpoint", &identity())
            .await
            .unwrap();
        assert!(committed);
        assert_eq!(count_changed_files(&work).unwrap(), 0);

        vcs.push(&work, "feature/PROJ-1", "").await.unwrap();

        let remote = Repository::open_bare(&bare).unwrap();
        let pushed = remote
            .find_reference("refs/heads/feature/PROJ-1")
            .unwrap()
            .peel_to_commit()
            .unwrap();
        assert_eq!(pushed.message(), Some("[PROJ-1] Add health endpoint"));
        assert_eq!(pushed.author().name(), Some("SDLC AI Agent"));
    }

    #[tokio::test]
    async fn test_commit_all_without_changes_is_noop() {
        let (dir, bare) = upstream();
        let vcs = Git2Vcs::default();
        let work = dir.path().join("work");
        vcs.clone_repo(bare.to_str().unwrap(), "", &work).await.unwrap();

        let before = Repository::open(&work)
            .unwrap()
            .head()
            .unwrap()
            .target()
            .unwrap();
        let committed = vcs.commit_all(&work, "nothing", &identity()).await.unwrap();
        assert!(!committed);
        let after = Repository::open(&work)
            .unwrap()
            .head()
            .unwrap()
            .target()
            .unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_commit_all_stages_deletions() {
        let (dir, bare) = upstream();
        let vcs = Git2Vcs::default();
        let work = dir.path().join("work");
        vcs.clone_repo(bare.to_str().unwrap(), "", &work).await.unwrap();

        fs::remove_file(work.join("README.md")).unwrap();
        assert!(vcs.commit_all(&work, "remove readme", &identity()).await.unwrap());
        let repo = Repository::open(&work).unwrap();
        let tree = repo.head().unwrap().peel_to_tree().unwrap();
        assert!(tree.get_name("README.md").is_none());
    }

    #[tokio::test]
    async fn test_clone_missing_remote_fails() {
        let dir = tempdir().unwrap();
        let vcs = Git2Vcs::default();
        let err = vcs
            .clone_repo(
                dir.path().join("nope.git").to_str().unwrap(),
                "",
                &dir.path().join("work"),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to clone"));
    }

    #[tokio::test]
    async fn test_push_without_origin_fails() {
        let dir = tempdir().unwrap();
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("main");
        Repository::init_opts(dir.path(), &opts).unwrap();
        let err = Git2Vcs::default()
            .push(dir.path(), "main", "")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("origin"));
    }
}
