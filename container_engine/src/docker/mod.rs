mod container;
pub mod context;

use std::{
    path::Path,
    sync::atomic::{AtomicU64, Ordering},
};

use bollard::{
    auth::DockerCredentials,
    errors::Error as DockerError,
    image::{BuildImageOptions, CreateImageOptions, PushImageOptions, TagImageOptions},
    Docker,
};
use futures::{Stream, StreamExt, TryStreamExt};
use secrecy::ExposeSecret;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    split_tag, ContainerEngine, EngineError, EngineOutput, LogCollector, RegistryCredentials,
    TaskOutput, TaskSpec,
};

use self::container::{Cleanup, Container};

pub struct DockerEngine {
    docker: Docker,
    task_counter: AtomicU64,
}

impl DockerEngine {
    pub fn connect() -> Result<Self, EngineError> {
        Ok(Self::new(Docker::connect_with_socket_defaults()?))
    }

    pub fn new(docker: Docker) -> Self {
        Self {
            docker,
            task_counter: AtomicU64::new(0),
        }
    }

    async fn pull(&self, image: &str) -> Result<(), EngineError> {
        let (name, tag) = split_tag(image);

        let statuses = self
            .docker
            .create_image(
                Some(CreateImageOptions {
                    from_image: name,
                    tag,
                    ..Default::default()
                }),
                None,
                None,
            )
            .try_collect::<Vec<_>>()
            .await?;

        if let Some(status) = statuses.last().and_then(|info| info.status.as_deref()) {
            debug!(image, status, "pulled task image");
        }

        Ok(())
    }

    async fn tag(&self, source: &str, target: &str) -> Result<(), EngineError> {
        let (repo, tag) = split_tag(target);

        self.docker
            .tag_image(source, Some(TagImageOptions { repo, tag }))
            .await?;

        Ok(())
    }
}

/// Drains an engine stream into a log. Errors raised by the stream itself end
/// the log with an error record, so the output still carries what ran before.
async fn collect<T, S>(stream: S) -> EngineOutput
where
    T: Serialize,
    S: Stream<Item = Result<T, DockerError>>,
{
    let mut collector = LogCollector::default();
    let mut stream = std::pin::pin!(stream);

    while let Some(item) = stream.next().await {
        match item {
            Ok(record) => collector.push_record(&record),
            Err(DockerError::DockerStreamError { error }) => {
                collector.push_error(&error);
                break;
            }
            Err(err) => {
                collector.push_error(&err.to_string());
                break;
            }
        }
    }

    collector.finish()
}

impl ContainerEngine for DockerEngine {
    async fn build(
        &self,
        dockerfile: &str,
        context: &Path,
        tags: &[String],
    ) -> Result<EngineOutput, EngineError> {
        let (first, rest) = tags.split_first().ok_or(EngineError::NoTags)?;
        let archive = context::pack(context).await?;

        info!(tag = %first, context = %context.display(), "building image");

        let options = BuildImageOptions {
            dockerfile: dockerfile.to_owned(),
            t: first.clone(),
            rm: true,
            forcerm: true,
            ..Default::default()
        };
        let output = collect(self.docker.build_image(options, None, Some(archive.into()))).await;

        if output.success {
            for tag in rest {
                self.tag(first, tag).await?;
            }
        }

        Ok(output)
    }

    async fn push(
        &self,
        tag: &str,
        credentials: &RegistryCredentials,
    ) -> Result<EngineOutput, EngineError> {
        let (name, image_tag) = split_tag(tag);

        info!(tag, "pushing image");

        let credentials = DockerCredentials {
            username: Some(credentials.username.clone()),
            password: Some(credentials.password.expose_secret().clone()),
            serveraddress: Some(credentials.server.clone()),
            ..Default::default()
        };
        let options = PushImageOptions { tag: image_tag };

        Ok(collect(self.docker.push_image(name, Some(options), Some(credentials))).await)
    }

    async fn run_task(&self, task: &TaskSpec) -> Result<TaskOutput, EngineError> {
        self.pull(&task.image).await?;

        let sequence = self.task_counter.fetch_add(1, Ordering::Relaxed);
        let name = format!(
            "task-{}-{}-{sequence}",
            std::process::id(),
            sanitize(&task.name)
        );
        let container = Container::create(&self.docker, &name, task).await?;
        let abandoned = Cleanup::new(container.detached_remove());

        let result = async {
            let exit_code = container.run().await?;
            let log = container.logs().await?;
            Ok::<_, EngineError>(TaskOutput { exit_code, log })
        }
        .await;

        if let Err(err) = container.remove().await {
            warn!(container = %container.id, error = %err, "failed to remove task container");
        }
        abandoned.disarm();

        result
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use serde_json::{json, Value};

    #[tokio::test]
    async fn collect_should_keep_log_before_stream_error() {
        let records: Vec<Result<Value, DockerError>> = vec![
            Ok(json!({ "stream": "Step 1/3 : FROM alpine" })),
            Err(DockerError::DockerStreamError {
                error: "manifest for alpine:nope not found".to_owned(),
            }),
            Ok(json!({ "stream": "never seen" })),
        ];

        let output = collect(stream::iter(records)).await;

        assert!(!output.success);
        assert!(output.log.contains("Step 1/3"));
        assert!(!output.log.contains("never seen"));
        assert_eq!(
            output.error.unwrap().message,
            "manifest for alpine:nope not found"
        );
    }

    #[tokio::test]
    async fn collect_should_treat_error_record_as_failure() {
        let records: Vec<Result<Value, DockerError>> = vec![
            Ok(json!({ "status": "The push refers to repository [registry/acme/web]" })),
            Ok(json!({ "error": "unauthorized", "errorDetail": { "message": "unauthorized" } })),
        ];

        let output = collect(stream::iter(records)).await;

        assert!(!output.success);
        assert_eq!(output.error.unwrap().message, "unauthorized");
    }

    #[test]
    fn sanitize_should_produce_container_safe_names() {
        assert_eq!(sanitize("Go Lint/vet"), "go-lint-vet");
    }
}
