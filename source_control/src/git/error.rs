use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("Repository {0} does not exist")]
    RepositoryNotFound(PathBuf),
    #[error("Invalid revision \"{0}\"")]
    InvalidRevision(String),
    #[error("git {command} failed: {stderr}")]
    Command { command: String, stderr: String },
    #[error(transparent)]
    Io(#[from] io::Error),
}
