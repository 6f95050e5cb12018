use std::sync::Arc;

use api::{AppState, Server};
use cluster::{Cluster, ClusterProvider, InMemoryCluster, KubeCluster, RetryPolicy};
use config::{AppConfig, ClusterMode};
use container_engine::{docker::DockerEngine, RegistryCredentials};
use dispatcher::Dispatcher;
use domain::Repositories;
use ip::RoundRobinIps;
use queue::DedupQueue;
use runner::{PipelineRunner, RunnerSettings};
use source_control::git::LocalGit;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trigger::TriggerService;

mod api;
mod config;
mod dispatcher;
mod ip;
mod parser;
mod queue;
mod runner;
mod stages;
mod trigger;

#[cfg(test)]
mod testing;

#[tokio::main]
async fn main() -> Result<(), String> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "backend=info,cluster=info,container_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_environment()?;

    let repositories = Repositories::build(&config.database_url)
        .map_err(|e| format!("Failed to open pipeline store {e}"))?;
    let engine = DockerEngine::connect().map_err(|e| format!("Failed to connect to docker {e}"))?;
    let source = Arc::new(LocalGit::new(config.storage.repositories_root.clone()));

    let provider: Arc<dyn ClusterProvider> = match config.cluster.mode {
        ClusterMode::Kube => Arc::new(
            KubeCluster::connect()
                .await
                .map_err(|e| format!("Failed to connect to cluster {e}"))?,
        ),
        ClusterMode::DryRun => {
            tracing::warn!("cluster mode is dry-run, deployments stay in memory");
            Arc::new(InMemoryCluster::new())
        }
    };
    let cluster = Cluster::new(
        provider,
        RetryPolicy::with_attempts(config.cluster.update_attempts),
    );

    let runner = Arc::new(PipelineRunner::new(
        repositories.clone(),
        Arc::new(engine),
        source.clone(),
        cluster,
        Arc::new(RoundRobinIps::new(config.cluster.external_ips.clone())),
        RunnerSettings {
            work_root: config.storage.work_root.clone(),
            cache_root: config.storage.cache_root.clone(),
            registry: RegistryCredentials {
                server: config.registry.host.clone(),
                username: config.registry.username.clone(),
                password: config.registry.password.clone(),
            },
            timeout: config.pipelines.timeout,
        },
    ));

    let queue = Arc::new(DedupQueue::new(config.pipelines.queue_capacity));
    let dispatcher = Arc::new(Dispatcher::new(
        queue.clone(),
        runner,
        repositories.clone(),
        config.pipelines.max_concurrent,
    ));
    let dispatching = dispatcher
        .start()
        .map_err(|e| format!("Failed to start dispatcher {e}"))?;

    let state = AppState {
        triggers: Arc::new(TriggerService::new(source, repositories.clone(), queue)),
        repositories,
        webhook_secret: config.webhook_secret.clone(),
    };
    let server = Server::new(config.listen_address.clone(), state);

    let served = server
        .start()
        .await
        .map_err(|e| format!("Failed to start HTTP server {e}"));

    dispatcher.shutdown();
    let _ = dispatching.await;

    served
}
