use std::time::Duration;

use domain::RepositoryError;
use thiserror::Error;

use crate::stages::StageError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Stage {stage} failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: StageError,
    },
    #[error("Pipeline timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),
    #[error("Pipeline panicked: {0}")]
    Panicked(String),
    #[error("Pipeline task was aborted")]
    Aborted,
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl PipelineError {
    pub fn stage(stage: &'static str) -> impl FnOnce(StageError) -> PipelineError {
        move |source| PipelineError::Stage { stage, source }
    }
}
