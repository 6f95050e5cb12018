pub mod error;

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::debug;

use crate::{SourceControl, SourceRepository};

use self::error::GitError;

/// Bare repositories stored as `{root}/{owner}/{name}.git`, read with the `git` CLI.
#[derive(Clone, Debug)]
pub struct LocalGit {
    root: PathBuf,
}

impl LocalGit {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn repository_path(&self, owner: &str, name: &str) -> PathBuf {
        self.root
            .join(owner.to_lowercase())
            .join(format!("{}.git", name.to_lowercase()))
    }
}

impl SourceControl for LocalGit {
    type Repository = GitRepository;
    type Error = GitError;

    async fn get_repository(&self, owner: &str, name: &str) -> Result<Self::Repository, Self::Error> {
        if [owner, name]
            .iter()
            .any(|part| part.is_empty() || part.contains(['/', '\\']) || part.starts_with('.'))
        {
            return Err(GitError::RepositoryNotFound(PathBuf::from(format!("{owner}/{name}"))));
        }

        let path = self.repository_path(owner, name);
        if !tokio::fs::try_exists(&path).await? {
            return Err(GitError::RepositoryNotFound(path));
        }

        Ok(GitRepository { path })
    }
}

#[derive(Clone, Debug)]
pub struct GitRepository {
    path: PathBuf,
}

impl GitRepository {
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn git(&self, args: &[&str]) -> Result<std::process::Output, GitError> {
        debug!(repository = %self.path.display(), ?args, "running git");

        let output = Command::new("git")
            .arg("--git-dir")
            .arg(&self.path)
            .args(args)
            .output()
            .await?;

        Ok(output)
    }

    async fn git_checked(&self, args: &[&str]) -> Result<Vec<u8>, GitError> {
        let output = self.git(args).await?;

        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(GitError::Command {
                command: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            })
        }
    }

    async fn rev_parse(&self, revision: &str) -> Result<String, GitError> {
        let revision = format!("{revision}^{{commit}}");
        let output = self.git(&["rev-parse", "--verify", "--quiet", &revision]).await?;

        if !output.status.success() {
            return Err(GitError::InvalidRevision(revision));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }
}

impl SourceRepository for GitRepository {
    type Error = GitError;

    async fn read_file_contents(&self, commit: &str, path: &str) -> Result<Option<String>, Self::Error> {
        check_revision(commit)?;
        let object = format!("{commit}:{}", path.trim_start_matches('/'));

        let exists = self.git(&["cat-file", "-e", &object]).await?;
        if !exists.status.success() {
            return Ok(None);
        }

        let content = self.git_checked(&["cat-file", "blob", &object]).await?;

        Ok(Some(String::from_utf8_lossy(&content).into_owned()))
    }

    async fn resolve_branch(&self, branch: &str) -> Result<String, Self::Error> {
        check_revision(branch)?;
        let branch = branch.strip_prefix("refs/heads/").unwrap_or(branch);

        self.rev_parse(&format!("refs/heads/{branch}")).await
    }

    async fn resolve_commit(&self, commit: &str) -> Result<String, Self::Error> {
        if commit.is_empty() || !commit.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(GitError::InvalidRevision(commit.to_owned()));
        }

        self.rev_parse(commit).await
    }

    async fn default_branch(&self) -> Result<String, Self::Error> {
        let output = self.git_checked(&["symbolic-ref", "--short", "HEAD"]).await?;

        Ok(String::from_utf8_lossy(&output).trim().to_owned())
    }

    async fn archive(&self, commit: &str) -> Result<Vec<u8>, Self::Error> {
        check_revision(commit)?;

        self.git_checked(&["archive", "--format=tar", commit]).await
    }
}

/// Revisions come from webhooks and API callers and end up on a command line.
fn check_revision(revision: &str) -> Result<(), GitError> {
    if revision.is_empty()
        || revision.starts_with('-')
        || revision.contains("..")
        || revision.chars().any(|c| c.is_whitespace() || c.is_control())
    {
        Err(GitError::InvalidRevision(revision.to_owned()))
    } else {
        Ok(())
    }
}
