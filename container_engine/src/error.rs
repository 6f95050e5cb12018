use std::{io, path::PathBuf};

use bollard::errors::Error as DockerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Docker(#[from] DockerError),
    #[error("Could not package build context {path}: {source}")]
    Context {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("A build needs at least one tag")]
    NoTags,
    #[error("Failed to get container exit code")]
    ExitCode,
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
}
