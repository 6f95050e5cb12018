use container_engine::ContainerEngine;
use domain::{DockerImageReference, PipelineConfiguration, StageKind, StagePayload, TaskError};
use tracing::info;

use super::{cancellable, now, output_error, StageContext, StageError, TaskRecord};

/// Builds every configured image and returns the full references in
/// configuration order. The first failing build ends the stage.
pub async fn build_images<E>(
    ctx: &StageContext<'_, E>,
    configuration: &PipelineConfiguration,
    registry: &str,
) -> Result<Vec<String>, StageError>
where
    E: ContainerEngine,
{
    let pipeline = ctx.pipeline;
    let tag = configuration.image_tag(pipeline.commit());
    let mut built = Vec::with_capacity(configuration.build.len());

    for (index, build) in configuration.build.iter().enumerate() {
        ctx.check_cancelled()?;

        let image = image_name(&pipeline.repository_name, index, &build.name);
        let reference =
            DockerImageReference::for_repository(registry, &pipeline.repository_owner, &image, &tag).to_string();
        let context = ctx.workspace.join(build.scope());
        let begin_at = now();

        let (log, error) = match cancellable(
            ctx.cancel,
            ctx.engine
                .build(build.dockerfile(), &context, std::slice::from_ref(&reference)),
        )
        .await
        {
            Ok(output) => {
                let error = output_error(&output, "build failed");
                (output.log, error)
            }
            Err(StageError::Cancelled) => return Err(StageError::Cancelled),
            Err(err) => (String::new(), Some(TaskError::new(err.to_string()))),
        };

        ctx.recorder.record(TaskRecord {
            kind: StageKind::Build,
            index: index + 1,
            name: build.name.clone(),
            log,
            error: error.clone(),
            begin_at,
            payload: Some(StagePayload::Image {
                tag: reference.clone(),
            }),
        })?;

        if let Some(error) = error {
            return Err(StageError::BuildFailed {
                name: build.name.clone(),
                message: error.to_string(),
            });
        }

        info!(pipeline_id = %pipeline.id, image = %reference, "image built");
        built.push(reference);
    }

    Ok(built)
}

/// The first image carries the repository's name, later ones append their
/// task name.
fn image_name(repository: &str, index: usize, build_name: &str) -> String {
    if index == 0 {
        return repository.to_owned();
    }

    let suffix: String = build_name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '.' | '_' | '-' => c,
            _ => '-',
        })
        .collect();

    format!("{repository}-{}", suffix.trim_matches('-'))
}
