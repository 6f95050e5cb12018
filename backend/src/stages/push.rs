use container_engine::{ContainerEngine, RegistryCredentials};
use domain::{matches_any, PipelineConfiguration, StageKind, StagePayload, TaskError};
use tracing::info;

use super::{cancellable, now, output_error, StageContext, StageError, TaskRecord};

/// Pushes the built images when the push section applies to this trigger.
/// Returns what was pushed; empty when pushing was not configured or not
/// enabled for the ref.
pub async fn push_images<E>(
    ctx: &StageContext<'_, E>,
    configuration: &PipelineConfiguration,
    built: &[String],
    credentials: &RegistryCredentials,
) -> Result<Vec<String>, StageError>
where
    E: ContainerEngine,
{
    let pipeline = ctx.pipeline;
    let Some(push) = &configuration.push else {
        info!(pipeline_id = %pipeline.id, "no push configured");
        return Ok(vec![]);
    };
    if !matches_any(push.on.as_deref(), &pipeline.event) {
        info!(pipeline_id = %pipeline.id, branch = %pipeline.ref_name(), "push not enabled for this trigger");
        return Ok(vec![]);
    }

    for (index, tag) in built.iter().enumerate() {
        ctx.check_cancelled()?;
        let begin_at = now();

        let (log, error) = match cancellable(ctx.cancel, ctx.engine.push(tag, credentials)).await {
            Ok(output) => {
                let error = output_error(&output, "push failed");
                (output.log, error)
            }
            Err(StageError::Cancelled) => return Err(StageError::Cancelled),
            Err(err) => (String::new(), Some(TaskError::new(err.to_string()))),
        };

        ctx.recorder.record(TaskRecord {
            kind: StageKind::Push,
            index: index + 1,
            name: tag.clone(),
            log,
            error: error.clone(),
            begin_at,
            payload: Some(StagePayload::Image { tag: tag.clone() }),
        })?;

        if let Some(error) = error {
            return Err(StageError::PushFailed {
                tag: tag.clone(),
                message: error.to_string(),
            });
        }

        info!(pipeline_id = %pipeline.id, image = %tag, "image pushed");
    }

    Ok(built.to_vec())
}
