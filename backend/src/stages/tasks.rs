use container_engine::{ContainerEngine, TaskSpec};
use domain::{StageKind, TaskConfiguration, TaskError};
use tracing::{debug, info, warn};

use super::{cancellable, now, StageContext, StageError, TaskRecord};

/// Runs the tasks of a pre-build or post-build stage in order. A failing task
/// stops the stage unless it is marked `skip`. Tasks without an image run in
/// `default_image`, which post-build sets to the first built image.
pub async fn run_tasks<E>(
    ctx: &StageContext<'_, E>,
    kind: StageKind,
    tasks: &[TaskConfiguration],
    default_image: Option<&str>,
) -> Result<(), StageError>
where
    E: ContainerEngine,
{
    for (index, task) in tasks.iter().enumerate() {
        if !task.is_enabled() {
            debug!(pipeline_id = %ctx.pipeline.id, stage = %kind, task = %task.name, "task disabled");
            continue;
        }
        ctx.check_cancelled()?;

        let begin_at = now();
        let image = task
            .image
            .as_ref()
            .map(ToString::to_string)
            .or_else(|| default_image.map(str::to_owned));

        let (log, error) = match image {
            None => (
                String::new(),
                Some(TaskError::new("no image configured and no image was built")),
            ),
            Some(image) => {
                let spec = task_spec(ctx, kind, task, image);
                match cancellable(ctx.cancel, ctx.engine.run_task(&spec)).await {
                    Ok(output) if output.is_ok() => (output.log, None),
                    Ok(output) => {
                        let error = TaskError {
                            message: format!("exited with code {}", output.exit_code),
                            code: Some(output.exit_code),
                        };
                        (output.log, Some(error))
                    }
                    Err(StageError::Cancelled) => return Err(StageError::Cancelled),
                    Err(err) => (String::new(), Some(TaskError::new(err.to_string()))),
                }
            }
        };

        ctx.recorder.record(TaskRecord {
            kind,
            index: index + 1,
            name: task.name.clone(),
            log,
            error: error.clone(),
            begin_at,
            payload: None,
        })?;

        match error {
            None => info!(pipeline_id = %ctx.pipeline.id, stage = %kind, task = %task.name, "task passed"),
            Some(error) if task.skip => {
                warn!(pipeline_id = %ctx.pipeline.id, stage = %kind, task = %task.name, error = %error, "task failed, continuing")
            }
            Some(error) => {
                return Err(StageError::TaskFailed {
                    name: task.name.clone(),
                    message: error.to_string(),
                })
            }
        }
    }

    Ok(())
}

fn task_spec<E>(ctx: &StageContext<'_, E>, kind: StageKind, task: &TaskConfiguration, image: String) -> TaskSpec {
    let pipeline = ctx.pipeline;
    let mut env: Vec<(String, String)> = vec![
        ("CI".to_owned(), "true".to_owned()),
        ("CI_PIPELINE_ID".to_owned(), pipeline.id.to_string()),
        (
            "CI_REPOSITORY".to_owned(),
            format!("{}/{}", pipeline.repository_owner, pipeline.repository_name),
        ),
        ("CI_BRANCH".to_owned(), pipeline.ref_name().to_owned()),
        ("CI_COMMIT".to_owned(), pipeline.commit().to_owned()),
        ("CI_STAGE".to_owned(), kind.to_string()),
    ];
    if let Some(task_type) = &task.kind {
        env.push(("CI_TASK_TYPE".to_owned(), task_type.clone()));
    }
    if let Some(threshold) = task.threshold {
        env.push(("CI_THRESHOLD".to_owned(), threshold.to_string()));
    }
    env.extend(task.envs.iter().map(|(key, value)| (key.clone(), value.clone())));

    TaskSpec {
        name: task.name.clone(),
        image,
        commands: task.commands.clone(),
        env,
        workspace: ctx.workspace.to_owned(),
        scope: task.scope.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        stages::Recorder,
        testing::{pipeline_for, EngineCall, FakeEngine, TaskBehaviour},
    };
    use domain::{NewPipeline, Repositories};
    use tokio_util::sync::CancellationToken;

    fn task(name: &str) -> TaskConfiguration {
        TaskConfiguration {
            name: name.to_owned(),
            image: Some("alpine:3.20".parse().unwrap()),
            commands: vec!["true".to_owned()],
            ..Default::default()
        }
    }

    struct Fixture {
        repositories: Repositories,
        pipeline: domain::Pipeline,
        cancel: CancellationToken,
    }

    impl Fixture {
        fn new() -> Self {
            let repositories = Repositories::build(":memory:").unwrap();
            let template = pipeline_for("acme", "web", "main", "3f2a1c9");
            let pipeline = repositories
                .with_pipelines(|pipelines| {
                    pipelines.create_or_get(NewPipeline {
                        repository_id: 1,
                        repository_owner: template.repository_owner.clone(),
                        repository_name: template.repository_name.clone(),
                        pusher_id: 1,
                        event: template.event.clone(),
                        configuration: Default::default(),
                    })
                })
                .unwrap();

            Self {
                repositories,
                pipeline,
                cancel: CancellationToken::new(),
            }
        }

        fn context<'a>(&'a self, engine: &'a FakeEngine) -> StageContext<'a, FakeEngine> {
            StageContext {
                pipeline: &self.pipeline,
                engine,
                recorder: Recorder::new(&self.repositories, self.pipeline.id),
                workspace: std::path::Path::new("/tmp/workspace"),
                cancel: &self.cancel,
            }
        }

        fn results(&self) -> Vec<domain::StageResult> {
            self.repositories
                .with_pipelines(|pipelines| pipelines.list_stage_results(self.pipeline.id))
                .unwrap()
        }
    }

    #[tokio::test]
    async fn run_tasks_should_continue_past_skippable_failure() {
        let fixture = Fixture::new();
        let engine = FakeEngine::default().with_task("flaky", TaskBehaviour::Exit(1));
        let mut flaky = task("flaky");
        flaky.skip = true;

        run_tasks(
            &fixture.context(&engine),
            StageKind::PreBuild,
            &[flaky, task("lint")],
            None,
        )
        .await
        .unwrap();

        let results = fixture.results();
        assert_eq!(results.len(), 2);
        assert!(!results[0].success);
        assert_eq!(results[0].error.as_ref().unwrap().code, Some(1));
        assert!(results[1].success);
        assert_eq!(results[1].task_index, 2);
    }

    #[tokio::test]
    async fn run_tasks_should_stop_at_first_hard_failure() {
        let fixture = Fixture::new();
        let engine = FakeEngine::default().with_task("lint", TaskBehaviour::Exit(2));

        let result = run_tasks(
            &fixture.context(&engine),
            StageKind::PreBuild,
            &[task("lint"), task("vet")],
            None,
        )
        .await;

        assert!(matches!(result, Err(StageError::TaskFailed { ref name, .. }) if name == "lint"));
        assert_eq!(engine.tasks(), vec!["lint".to_owned()]);
        assert_eq!(fixture.results().len(), 1);
    }

    #[tokio::test]
    async fn run_tasks_should_skip_disabled_tasks() {
        let fixture = Fixture::new();
        let engine = FakeEngine::default();
        let mut disabled = task("docs");
        disabled.enable = Some(false);

        run_tasks(
            &fixture.context(&engine),
            StageKind::PreBuild,
            &[disabled, task("lint")],
            None,
        )
        .await
        .unwrap();

        assert_eq!(engine.tasks(), vec!["lint".to_owned()]);
        assert_eq!(fixture.results()[0].task_index, 2);
    }

    #[tokio::test]
    async fn run_tasks_should_fall_back_to_built_image() {
        let fixture = Fixture::new();
        let engine = FakeEngine::default();
        let mut unit = task("unit");
        unit.image = None;

        run_tasks(
            &fixture.context(&engine),
            StageKind::PostBuild,
            &[unit],
            Some("registry.local/acme/web:3f2a1"),
        )
        .await
        .unwrap();

        assert_eq!(
            engine.calls(),
            vec![EngineCall::Task {
                name: "unit".to_owned(),
                image: "registry.local/acme/web:3f2a1".to_owned(),
            }]
        );
    }

    #[tokio::test]
    async fn run_tasks_should_fail_task_without_any_image() {
        let fixture = Fixture::new();
        let engine = FakeEngine::default();
        let mut unit = task("unit");
        unit.image = None;

        let result = run_tasks(&fixture.context(&engine), StageKind::PostBuild, &[unit], None).await;

        assert!(matches!(result, Err(StageError::TaskFailed { .. })));
        assert!(engine.calls().is_empty());
        assert!(!fixture.results()[0].success);
    }

    #[test]
    fn task_spec_should_expose_pipeline_variables() {
        let fixture = Fixture::new();
        let engine = FakeEngine::default();
        let mut lint = task("lint");
        lint.threshold = Some(80);
        lint.envs.insert("GOFLAGS".to_owned(), "-mod=vendor".to_owned());

        let spec = task_spec(
            &fixture.context(&engine),
            StageKind::PreBuild,
            &lint,
            "alpine:3.20".to_owned(),
        );

        assert!(spec.env.contains(&("CI_COMMIT".to_owned(), "3f2a1c9".to_owned())));
        assert!(spec.env.contains(&("CI_THRESHOLD".to_owned(), "80".to_owned())));
        assert!(spec.env.contains(&("GOFLAGS".to_owned(), "-mod=vendor".to_owned())));
    }
}
