use std::{any::Any, future::Future, path::PathBuf, sync::Arc, time::Duration};

use cluster::Cluster;
use container_engine::{ContainerEngine, RegistryCredentials};
use domain::{Pipeline, PipelineId, Repositories, Stage, StageKind};
use source_control::SourceControl;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use self::error::PipelineError;
use crate::{
    ip::IpAllocator,
    stages::{self, now, DeployTools, Recorder, StageContext, StageError},
};

pub mod error;


#[derive(Clone)]
pub struct RunnerSettings {
    pub work_root: PathBuf,
    pub cache_root: PathBuf,
    pub registry: RegistryCredentials,
    pub timeout: Duration,
}

#[derive(Debug)]
pub enum RunOutcome {
    /// Another run claimed the pipeline first.
    Skipped,
    Succeeded,
    Failed(PipelineError),
}

/// Executes claimed pipelines stage by stage. Every run is isolated in its own
/// task, so a panic or timeout only ends that run.
pub struct PipelineRunner<E, S> {
    repositories: Repositories,
    engine: Arc<E>,
    source: Arc<S>,
    cluster: Cluster,
    ips: Arc<dyn IpAllocator>,
    settings: RunnerSettings,
}

impl<E, S> PipelineRunner<E, S>
where
    E: ContainerEngine + Send + Sync + 'static,
    S: SourceControl + Send + Sync + 'static,
{
    pub fn new(
        repositories: Repositories,
        engine: Arc<E>,
        source: Arc<S>,
        cluster: Cluster,
        ips: Arc<dyn IpAllocator>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            repositories,
            engine,
            source,
            cluster,
            ips,
            settings,
        }
    }

    /// Claims `pipeline` and drives it to a final state. Safe to call more
    /// than once for the same pipeline: only the first claim runs it.
    pub async fn run(self: Arc<Self>, pipeline: Pipeline) -> RunOutcome {
        let id = pipeline.id;
        match self
            .repositories
            .with_pipelines(|pipelines| pipelines.claim(id, now()))
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(pipeline_id = %id, "pipeline already claimed");
                return RunOutcome::Skipped;
            }
            Err(err) => {
                error!(pipeline_id = %id, error = %err, "could not claim pipeline");
                return RunOutcome::Failed(err.into());
            }
        }
        info!(
            pipeline_id = %id,
            repository = %format!("{}/{}", pipeline.repository_owner, pipeline.repository_name),
            commit = %pipeline.commit(),
            "pipeline started"
        );

        let cancel = CancellationToken::new();
        let execution = tokio::spawn({
            let runner = self.clone();
            let cancel = cancel.clone();
            async move { runner.execute(&pipeline, &cancel).await }
        });

        let result = match tokio::time::timeout(self.settings.timeout, execution).await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) if err.is_panic() => Err(PipelineError::Panicked(panic_message(err.into_panic()))),
            Ok(Err(_)) => Err(PipelineError::Aborted),
            Err(_) => {
                // The detached task notices at its next await point.
                cancel.cancel();
                Err(PipelineError::Timeout(self.settings.timeout))
            }
        };

        self.finish(id, &result);

        match result {
            Ok(()) => {
                info!(pipeline_id = %id, "pipeline succeeded");
                RunOutcome::Succeeded
            }
            Err(err) => {
                warn!(pipeline_id = %id, error = %err, "pipeline failed");
                RunOutcome::Failed(err)
            }
        }
    }

    /// A failure to store the outcome is logged and never replaces the
    /// pipeline's own error.
    fn finish(&self, id: PipelineId, result: &Result<(), PipelineError>) {
        let error = result.as_ref().err().map(ToString::to_string);
        let stored = self
            .repositories
            .with_pipelines(|pipelines| pipelines.finish(id, result.is_ok(), error.as_deref(), now()));

        match stored {
            Ok(true) => {}
            Ok(false) => warn!(pipeline_id = %id, "pipeline was already finished"),
            Err(err) => warn!(pipeline_id = %id, error = %err, "could not record pipeline outcome"),
        }
    }

    async fn execute(&self, pipeline: &Pipeline, cancel: &CancellationToken) -> Result<(), PipelineError> {
        let configuration = &pipeline.configuration;

        let repository = self
            .source
            .get_repository(&pipeline.repository_owner, &pipeline.repository_name)
            .await
            .map_err(|err| PipelineError::stage("load")(StageError::Source(Box::new(err))))?;
        let workspace = stages::load_repository(
            &repository,
            pipeline,
            &self.settings.work_root,
            &self.settings.cache_root,
            cancel,
        )
        .await
        .map_err(PipelineError::stage("load"))?;

        let ctx = StageContext {
            pipeline,
            engine: self.engine.as_ref(),
            recorder: Recorder::new(&self.repositories, pipeline.id),
            workspace: &workspace,
            cancel,
        };

        self.stage(
            pipeline.id,
            (Stage::ValidateStart, Stage::ValidateEnd),
            StageKind::PreBuild,
            stages::run_tasks(&ctx, StageKind::PreBuild, &configuration.validation, None),
        )
        .await?;

        let built = self
            .stage(
                pipeline.id,
                (Stage::BuildStart, Stage::BuildEnd),
                StageKind::Build,
                stages::build_images(&ctx, configuration, &self.settings.registry.server),
            )
            .await?;

        self.stage(
            pipeline.id,
            (Stage::TestStart, Stage::TestEnd),
            StageKind::PostBuild,
            stages::run_tasks(
                &ctx,
                StageKind::PostBuild,
                &configuration.test,
                built.first().map(String::as_str),
            ),
        )
        .await?;

        let pushed = self
            .stage(
                pipeline.id,
                (Stage::PushStart, Stage::PushEnd),
                StageKind::Push,
                stages::push_images(&ctx, configuration, &built, &self.settings.registry),
            )
            .await?;

        let tools = DeployTools {
            cluster: &self.cluster,
            ips: self.ips.as_ref(),
            registry: &self.settings.registry,
        };
        self.stage(
            pipeline.id,
            (Stage::DeployStart, Stage::DeployEnd),
            StageKind::Deploy,
            stages::deploy(&ctx, configuration, &pushed, &tools),
        )
        .await?;

        Ok(())
    }

    /// Brackets `work` with the stage's start and end markers.
    async fn stage<T>(
        &self,
        id: PipelineId,
        (start, end): (Stage, Stage),
        kind: StageKind,
        work: impl Future<Output = Result<T, StageError>>,
    ) -> Result<T, PipelineError> {
        self.mark(id, start)?;
        debug!(pipeline_id = %id, stage = %kind, "stage started");

        let value = work.await.map_err(PipelineError::stage(kind.as_str()))?;

        self.mark(id, end)?;
        debug!(pipeline_id = %id, stage = %kind, "stage finished");
        Ok(value)
    }

    fn mark(&self, id: PipelineId, stage: Stage) -> Result<(), PipelineError> {
        self.repositories
            .with_pipelines(|pipelines| pipelines.advance_stage(id, stage))?;
        Ok(())
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}
