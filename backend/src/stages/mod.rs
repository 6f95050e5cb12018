mod build;
mod deploy;
mod load;
mod push;
mod tasks;

use std::{future::Future, path::Path, path::PathBuf};

use cluster::ClusterError;
use container_engine::{EngineError, EngineOutput};
use domain::{
    NewStageResult, Pipeline, PipelineId, Repositories, RepositoryError, StageKind, StagePayload, TaskError,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub use build::build_images;
pub use deploy::{deploy, DeployTools, PULL_SECRET_NAME};
pub use load::load_repository;
pub use push::push_images;
pub use tasks::run_tasks;

#[derive(Debug, Error)]
pub enum StageError {
    #[error("Could not read repository: {0}")]
    Source(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Could not prepare {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Cluster(#[from] ClusterError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("Background work failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("Task \"{name}\" failed: {message}")]
    TaskFailed { name: String, message: String },
    #[error("Build \"{name}\" failed: {message}")]
    BuildFailed { name: String, message: String },
    #[error("Pushing {tag} failed: {message}")]
    PushFailed { tag: String, message: String },
    #[error("Nothing was pushed that could be deployed")]
    NothingPushed,
    #[error("Cancelled")]
    Cancelled,
}

impl StageError {
    pub fn io(path: &Path) -> impl FnOnce(std::io::Error) -> StageError + '_ {
        move |source| StageError::Io {
            path: path.to_owned(),
            source,
        }
    }
}

/// What every stage after Load works with.
pub struct StageContext<'a, E> {
    pub pipeline: &'a Pipeline,
    pub engine: &'a E,
    pub recorder: Recorder<'a>,
    pub workspace: &'a Path,
    pub cancel: &'a CancellationToken,
}

impl<E> StageContext<'_, E> {
    pub fn check_cancelled(&self) -> Result<(), StageError> {
        if self.cancel.is_cancelled() {
            Err(StageError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Races `work` against the pipeline's cancellation.
pub async fn cancellable<T, Err>(
    cancel: &CancellationToken,
    work: impl Future<Output = Result<T, Err>>,
) -> Result<T, StageError>
where
    StageError: From<Err>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StageError::Cancelled),
        result = work => result.map_err(StageError::from),
    }
}

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// One executed task, ready to be stored.
pub struct TaskRecord {
    pub kind: StageKind,
    pub index: usize,
    pub name: String,
    pub log: String,
    pub error: Option<TaskError>,
    pub begin_at: i64,
    pub payload: Option<StagePayload>,
}

/// Writes stage results for one pipeline.
pub struct Recorder<'a> {
    repositories: &'a Repositories,
    pipeline_id: PipelineId,
}

impl<'a> Recorder<'a> {
    pub fn new(repositories: &'a Repositories, pipeline_id: PipelineId) -> Self {
        Self {
            repositories,
            pipeline_id,
        }
    }

    /// Stores `record`. When the task itself failed, a store error is only
    /// logged so it cannot hide the task's error.
    pub fn record(&self, record: TaskRecord) -> Result<(), StageError> {
        let failed = record.error.is_some();
        let kind = record.kind;
        let result = NewStageResult {
            pipeline_id: self.pipeline_id,
            kind,
            task_index: i32::try_from(record.index).unwrap_or(i32::MAX),
            success: !failed,
            name: record.name,
            log: record.log,
            error: record.error,
            begin_at: record.begin_at,
            end_at: now(),
            payload: record.payload,
        };

        match self
            .repositories
            .with_pipelines(|pipelines| pipelines.insert_stage_result(result))
        {
            Ok(_) => Ok(()),
            Err(err) if failed => {
                warn!(pipeline_id = %self.pipeline_id, stage = %kind, error = %err, "could not record failed task");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// The error carried by a build or push output. A failed output without a
/// structured error still gets one.
pub fn output_error(output: &EngineOutput, fallback: &str) -> Option<TaskError> {
    match &output.error {
        Some(error) => Some(TaskError {
            message: error.message.clone(),
            code: error.code,
        }),
        None if !output.success => Some(TaskError::new(fallback)),
        None => None,
    }
}
