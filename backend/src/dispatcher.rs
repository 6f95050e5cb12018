use std::sync::Arc;

use container_engine::ContainerEngine;
use domain::{Pipeline, Repositories, RepositoryError};
use source_control::SourceControl;
use thiserror::Error;
use tokio::{sync::Semaphore, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    queue::{Consumer, DedupQueue, QueueError},
    runner::PipelineRunner,
};

#[derive(Debug, Error)]
pub enum DispatcherError {
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Turns repository wake-ups into pipeline runs. The store decides what runs;
/// the queue only says which repository to look at.
pub struct Dispatcher<E, S> {
    queue: Arc<DedupQueue<i64>>,
    runner: Arc<PipelineRunner<E, S>>,
    repositories: Repositories,
    limit: Option<Arc<Semaphore>>,
    cancel: CancellationToken,
}

impl<E, S> Dispatcher<E, S>
where
    E: ContainerEngine + Send + Sync + 'static,
    S: SourceControl + Send + Sync + 'static,
{
    /// `max_concurrent` caps simultaneously running pipelines; `None` runs
    /// every scheduled pipeline at once.
    pub fn new(
        queue: Arc<DedupQueue<i64>>,
        runner: Arc<PipelineRunner<E, S>>,
        repositories: Repositories,
        max_concurrent: Option<usize>,
    ) -> Self {
        Self {
            queue,
            runner,
            repositories,
            limit: max_concurrent.map(|permits| Arc::new(Semaphore::new(permits))),
            cancel: CancellationToken::new(),
        }
    }

    /// Schedules whatever was left unstarted by a previous process, then
    /// follows the queue until [`Dispatcher::shutdown`].
    pub fn start(self: &Arc<Self>) -> Result<JoinHandle<()>, DispatcherError> {
        let consumer = self.queue.consume()?;

        let recovered = self.schedule(None)?;
        if recovered > 0 {
            info!(count = recovered, "recovered unstarted pipelines");
        }

        let dispatcher = self.clone();
        Ok(tokio::spawn(async move { dispatcher.run(consumer).await }))
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn run(&self, mut consumer: Consumer<i64>) {
        info!("dispatcher started");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                next = consumer.next() => {
                    let Some(repository_id) = next else { break };

                    // Removed before the scan so a trigger arriving meanwhile
                    // wakes us up again.
                    self.queue.remove(&repository_id);
                    if let Err(err) = self.schedule(Some(repository_id)) {
                        error!(repository_id, error = %err, "could not schedule pipelines");
                    }
                }
            }
        }

        info!("dispatcher stopped");
    }

    /// Starts a run for every unstarted pipeline of `repository_id`, or of all
    /// repositories. Returns how many were scheduled.
    pub fn schedule(&self, repository_id: Option<i64>) -> Result<usize, RepositoryError> {
        let pipelines = self
            .repositories
            .with_pipelines(|pipelines| pipelines.list_not_started(repository_id))?;

        let count = pipelines.len();
        for pipeline in pipelines {
            self.spawn_run(pipeline);
        }

        Ok(count)
    }

    fn spawn_run(&self, pipeline: Pipeline) {
        debug!(pipeline_id = %pipeline.id, "scheduling pipeline");
        let runner = self.runner.clone();
        let limit = self.limit.clone();

        tokio::spawn(async move {
            let _permit = match limit {
                Some(limit) => match limit.acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => return,
                },
                None => None,
            };
            runner.run(pipeline).await;
        });
    }
}
