use std::sync::Arc;

use domain::{Branch, NewPipeline, Pipeline, Repositories, RepositoryError, RepositoryRef, Trigger, TriggerEvent};
use itertools::Itertools;
use serde::Deserialize;
use source_control::{SourceControl, SourceRepository};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    parser::{error::ParserError, find_pipeline},
    queue::{DedupQueue, QueueError},
};

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("Repository {owner}/{name} is not available: {message}")]
    Repository {
        owner: String,
        name: String,
        message: String,
    },
    #[error("Could not resolve revision: {0}")]
    Revision(String),
    #[error(transparent)]
    Parser(#[from] ParserError),
    #[error("Invalid pipeline configuration: {0}")]
    InvalidConfiguration(String),
    #[error(transparent)]
    Store(#[from] RepositoryError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

#[derive(Debug)]
pub enum TriggerOutcome {
    Created(Pipeline),
    /// A pipeline for this commit was already recorded; the dispatcher is
    /// woken again anyway.
    Existing(Pipeline),
    /// The commit has no pipeline configuration.
    NoConfiguration,
    /// The configuration's `on` list does not cover this event.
    NotMatched,
}

/// A pipeline requested by hand for a branch or a specific commit. Without
/// either, the head of the default branch is used.
#[derive(Deserialize, Clone, Debug)]
pub struct ManualTrigger {
    pub repository_id: i64,
    pub owner: String,
    pub name: String,
    #[serde(default)]
    pub pusher_id: i64,
    pub branch: Option<String>,
    pub commit: Option<String>,
}

/// Creates pipelines from push events and manual requests and wakes the
/// dispatcher for their repository.
pub struct TriggerService<S> {
    source: Arc<S>,
    repositories: Repositories,
    queue: Arc<DedupQueue<i64>>,
}

impl<S> TriggerService<S>
where
    S: SourceControl + Send + Sync,
{
    pub fn new(source: Arc<S>, repositories: Repositories, queue: Arc<DedupQueue<i64>>) -> Self {
        Self {
            source,
            repositories,
            queue,
        }
    }

    pub async fn handle(&self, trigger: Trigger) -> Result<TriggerOutcome, TriggerError> {
        let repository = self.repository(&trigger.repository).await?;
        self.create(&repository, trigger).await
    }

    pub async fn manual(&self, request: ManualTrigger) -> Result<TriggerOutcome, TriggerError> {
        let reference = RepositoryRef {
            id: request.repository_id,
            owner: request.owner,
            name: request.name,
        };
        let repository = self.repository(&reference).await?;

        let branch = match request.branch {
            Some(branch) => branch,
            None => repository
                .default_branch()
                .await
                .map_err(|err| TriggerError::Revision(err.to_string()))?,
        };
        let commit = match request.commit {
            Some(commit) => repository.resolve_commit(&commit).await,
            None => repository.resolve_branch(&branch).await,
        }
        .map_err(|err| TriggerError::Revision(err.to_string()))?;

        let trigger = Trigger {
            repository: reference,
            pusher_id: request.pusher_id,
            event: TriggerEvent::Manual {
                branch: Branch { name: branch, commit },
            },
        };
        self.create(&repository, trigger).await
    }

    async fn repository(&self, reference: &RepositoryRef) -> Result<S::Repository, TriggerError> {
        self.source
            .get_repository(&reference.owner, &reference.name)
            .await
            .map_err(|err| TriggerError::Repository {
                owner: reference.owner.clone(),
                name: reference.name.clone(),
                message: err.to_string(),
            })
    }

    async fn create(&self, repository: &S::Repository, trigger: Trigger) -> Result<TriggerOutcome, TriggerError> {
        let commit = trigger.event.branch().commit.clone();

        let Some((path, configuration)) = find_pipeline(repository, &commit).await? else {
            debug!(commit = %commit, "no pipeline configuration");
            return Ok(TriggerOutcome::NoConfiguration);
        };
        configuration
            .validate()
            .map_err(TriggerError::InvalidConfiguration)?;

        if !configuration
            .on
            .iter()
            .any(|rule| rule.matches(&trigger.event))
        {
            debug!(
                commit = %commit,
                event = trigger.event.name(),
                branch = %trigger.event.branch().name,
                on = %configuration.on.iter().join(","),
                "event not covered by on"
            );
            return Ok(TriggerOutcome::NotMatched);
        }

        let (pipeline, created) = self.repositories.with_pipelines(|pipelines| {
            if let Some(existing) = pipelines.find_by_commit(trigger.repository.id, &commit)? {
                return Ok((existing, false));
            }
            let pipeline = pipelines.create_or_get(NewPipeline {
                repository_id: trigger.repository.id,
                repository_owner: trigger.repository.owner.clone(),
                repository_name: trigger.repository.name.clone(),
                pusher_id: trigger.pusher_id,
                event: trigger.event.clone(),
                configuration,
            })?;
            Ok((pipeline, true))
        })?;
        self.queue.add(trigger.repository.id).await?;

        if !created {
            debug!(pipeline_id = %pipeline.id, commit = %commit, "pipeline already exists");
            return Ok(TriggerOutcome::Existing(pipeline));
        }

        info!(
            pipeline_id = %pipeline.id,
            repository = %format!("{}/{}", trigger.repository.owner, trigger.repository.name),
            commit = %commit,
            configuration = %path,
            "pipeline created"
        );
        Ok(TriggerOutcome::Created(pipeline))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeRepository, FakeSource};

    const COMMIT: &str = "3f2a1c9d8e7f6a5b4c3d2e1f0a9b8c7d6e5f4a3b";

    struct Fixture {
        service: TriggerService<FakeSource>,
        repositories: Repositories,
        queue: Arc<DedupQueue<i64>>,
    }

    fn fixture(configuration: Option<&str>) -> Fixture {
        let mut repository = FakeRepository::new("main", COMMIT).with_branch("dev", "0badc0de");
        if let Some(configuration) = configuration {
            repository = repository
                .with_file(COMMIT, ".ci/pipeline.json", configuration)
                .with_file("0badc0de", ".ci/pipeline.json", configuration);
        }
        let source = FakeSource::default().with_repository("acme", "web", repository);
        let repositories = Repositories::build(":memory:").unwrap();
        let queue = Arc::new(DedupQueue::new(10));

        Fixture {
            service: TriggerService::new(Arc::new(source), repositories.clone(), queue.clone()),
            repositories,
            queue,
        }
    }

    fn push(branch: &str, commit: &str) -> Trigger {
        Trigger {
            repository: RepositoryRef {
                id: 1,
                owner: "acme".to_owned(),
                name: "web".to_owned(),
            },
            pusher_id: 7,
            event: TriggerEvent::Push {
                branch: Branch {
                    name: branch.to_owned(),
                    commit: commit.to_owned(),
                },
            },
        }
    }

    fn stored(fixture: &Fixture) -> Vec<Pipeline> {
        fixture
            .repositories
            .with_pipelines(|pipelines| pipelines.list_not_started(None))
            .unwrap()
    }

    #[tokio::test]
    async fn push_should_create_pipeline_and_wake_dispatcher() {
        let fixture = fixture(Some(r#"{ "on": ["push"], "build": [{ "name": "web" }] }"#));

        let outcome = fixture.service.handle(push("main", COMMIT)).await.unwrap();

        let TriggerOutcome::Created(pipeline) = outcome else {
            panic!("expected a pipeline, got {outcome:?}");
        };
        assert_eq!(pipeline.commit(), COMMIT);
        assert_eq!(pipeline.configuration.build[0].name, "web");
        assert!(fixture.queue.is_pending(&1));
    }

    #[tokio::test]
    async fn push_to_unlisted_ref_should_create_nothing() {
        let fixture = fixture(Some(r#"{ "on": ["main"] }"#));

        let outcome = fixture.service.handle(push("dev", "0badc0de")).await.unwrap();

        assert!(matches!(outcome, TriggerOutcome::NotMatched));
        assert!(stored(&fixture).is_empty());
        assert!(!fixture.queue.is_pending(&1));
    }

    #[tokio::test]
    async fn push_without_configuration_should_create_nothing() {
        let fixture = fixture(None);

        let outcome = fixture.service.handle(push("main", COMMIT)).await.unwrap();

        assert!(matches!(outcome, TriggerOutcome::NoConfiguration));
        assert!(stored(&fixture).is_empty());
    }

    #[tokio::test]
    async fn repeated_push_should_reuse_pipeline() {
        let fixture = fixture(Some(r#"{ "on": ["push"] }"#));

        let first = fixture.service.handle(push("main", COMMIT)).await.unwrap();
        let second = fixture.service.handle(push("main", COMMIT)).await.unwrap();

        match (first, second) {
            (TriggerOutcome::Created(first), TriggerOutcome::Existing(second)) => assert_eq!(first.id, second.id),
            other => panic!("expected a created then an existing outcome, got {other:?}"),
        }
        assert_eq!(stored(&fixture).len(), 1);
        assert!(fixture.queue.is_pending(&1));
    }

    #[tokio::test]
    async fn invalid_configuration_should_be_rejected() {
        let fixture = fixture(Some(
            r#"{ "on": ["push"], "validation": [{ "name": "lint" }] }"#,
        ));

        let result = fixture.service.handle(push("main", COMMIT)).await;

        assert!(matches!(result, Err(TriggerError::InvalidConfiguration(_))));
        assert!(stored(&fixture).is_empty());
    }

    #[tokio::test]
    async fn manual_should_default_to_head_of_default_branch() {
        let fixture = fixture(Some(r#"{ "on": ["manual"] }"#));

        let outcome = fixture
            .service
            .manual(ManualTrigger {
                repository_id: 1,
                owner: "acme".to_owned(),
                name: "web".to_owned(),
                pusher_id: 7,
                branch: None,
                commit: None,
            })
            .await
            .unwrap();

        let TriggerOutcome::Created(pipeline) = outcome else {
            panic!("expected a pipeline, got {outcome:?}");
        };
        assert_eq!(pipeline.ref_name(), "main");
        assert_eq!(pipeline.commit(), COMMIT);
        assert_eq!(pipeline.event.name(), "manual");
    }

    #[tokio::test]
    async fn manual_should_expand_abbreviated_commit() {
        let fixture = fixture(Some(r#"{ "on": ["*"] }"#));

        let outcome = fixture
            .service
            .manual(ManualTrigger {
                repository_id: 1,
                owner: "acme".to_owned(),
                name: "web".to_owned(),
                pusher_id: 7,
                branch: Some("dev".to_owned()),
                commit: Some("3f2a1c9".to_owned()),
            })
            .await
            .unwrap();

        let TriggerOutcome::Created(pipeline) = outcome else {
            panic!("expected a pipeline, got {outcome:?}");
        };
        assert_eq!(pipeline.commit(), COMMIT);
        assert_eq!(pipeline.ref_name(), "dev");
    }

    #[tokio::test]
    async fn manual_should_report_unknown_repository() {
        let fixture = fixture(None);

        let result = fixture
            .service
            .manual(ManualTrigger {
                repository_id: 2,
                owner: "acme".to_owned(),
                name: "api".to_owned(),
                pusher_id: 0,
                branch: None,
                commit: None,
            })
            .await;

        assert!(matches!(result, Err(TriggerError::Repository { .. })));
    }
}
