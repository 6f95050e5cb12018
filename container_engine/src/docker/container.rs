use bollard::{
    container::{
        Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    },
    errors::Error::DockerContainerWaitError,
    models::{ContainerWaitResponse, HostConfig},
    Docker,
};
use futures::TryStreamExt;
use tracing::warn;

use crate::{EngineError, TaskSpec, WORKSPACE_MOUNT};

/// A task container. Removed by the caller once its logs are collected.
pub struct Container<'a> {
    pub id: String,
    docker: &'a Docker,
}

impl<'a> Container<'a> {
    pub async fn create(docker: &'a Docker, name: &str, task: &TaskSpec) -> Result<Self, EngineError> {
        let env: Vec<String> = task
            .env
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        let bind = format!("{}:{WORKSPACE_MOUNT}", task.workspace.display());

        let response = docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.to_owned(),
                    platform: None,
                }),
                Config {
                    image: Some(task.image.clone()),
                    working_dir: Some(task.working_dir()),
                    env: Some(env),
                    entrypoint: Some(vec!["/bin/sh".to_owned(), "-c".to_owned()]),
                    cmd: Some(vec![task.script()]),
                    host_config: Some(HostConfig {
                        binds: Some(vec![bind]),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
            .await?;

        Ok(Self {
            id: response.id,
            docker,
        })
    }

    pub async fn run(&self) -> Result<i64, EngineError> {
        self.docker.start_container::<String>(&self.id, None).await?;

        let result = self
            .docker
            .wait_container::<String>(&self.id, None)
            .try_collect::<Vec<_>>()
            .await;

        match result.as_deref() {
            Ok([ContainerWaitResponse { status_code, .. }, ..]) => Ok(*status_code),
            Err(DockerContainerWaitError { code, .. }) => Ok(*code),
            _ => Err(EngineError::ExitCode),
        }
    }

    pub async fn logs(&self) -> Result<String, EngineError> {
        let logs = self
            .docker
            .logs(
                &self.id,
                Some(LogsOptions::<String> {
                    stdout: true,
                    stderr: true,
                    ..Default::default()
                }),
            )
            .try_collect::<Vec<_>>()
            .await?;

        let text = logs
            .into_iter()
            .map(|log| match log {
                LogOutput::Console { message }
                | LogOutput::StdOut { message }
                | LogOutput::StdErr { message }
                | LogOutput::StdIn { message } => message,
            })
            .map(|message| String::from_utf8_lossy(&message).into_owned())
            .collect();

        Ok(text)
    }

    /// Removal that can run from a `Drop` impl: spawns the force-remove on the
    /// current runtime and returns immediately.
    pub fn detached_remove(&self) -> impl FnOnce() + Send + 'static {
        let docker = self.docker.clone();
        let id = self.id.clone();

        move || {
            let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                warn!(container = %id, "no runtime left to remove task container");
                return;
            };
            runtime.spawn(async move {
                let options = RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                };
                if let Err(err) = docker.remove_container(&id, Some(options)).await {
                    warn!(container = %id, error = %err, "failed to remove abandoned task container");
                }
            });
        }
    }

    pub async fn remove(&self) -> Result<(), EngineError> {
        Ok(self
            .docker
            .remove_container(
                &self.id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await?)
    }
}

/// Runs `action` when dropped unless disarmed first. Covers the task future
/// being dropped mid-run by a cancelled pipeline.
pub struct Cleanup<F: FnOnce()> {
    action: Option<F>,
}

impl<F: FnOnce()> Cleanup<F> {
    pub fn new(action: F) -> Self {
        Self { action: Some(action) }
    }

    pub fn disarm(mut self) {
        self.action = None;
    }
}

impl<F: FnOnce()> Drop for Cleanup<F> {
    fn drop(&mut self) {
        if let Some(action) = self.action.take() {
            action();
        }
    }
}
