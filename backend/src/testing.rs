//! In-process stand-ins for git, the container engine and the cluster.

use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use cluster::{Cluster, InMemoryCluster, RetryPolicy};
use container_engine::{
    ContainerEngine, EngineError, EngineOutput, LogCollector, RegistryCredentials, TaskOutput, TaskSpec,
};
use domain::{
    Branch, NewPipeline, Pipeline, PipelineConfiguration, PipelineId, Repositories, RunStatus, Stage,
    StageResult, TriggerEvent,
};
use secrecy::SecretString;
use serde_json::json;
use source_control::{SourceControl, SourceRepository};
use tempfile::TempDir;
use thiserror::Error;

use crate::{
    ip::RoundRobinIps,
    runner::{PipelineRunner, RunnerSettings},
};

#[derive(Debug, Error)]
#[error("{0}")]
pub struct FakeError(pub String);

/// A repository whose files are listed per commit.
#[derive(Clone, Debug)]
pub struct FakeRepository {
    default_branch: String,
    branches: BTreeMap<String, String>,
    files: BTreeMap<(String, String), String>,
    archive_reads: Arc<AtomicUsize>,
}

impl FakeRepository {
    pub fn new(default_branch: &str, head: &str) -> Self {
        Self {
            default_branch: default_branch.to_owned(),
            branches: BTreeMap::from([(default_branch.to_owned(), head.to_owned())]),
            files: BTreeMap::new(),
            archive_reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_file(mut self, commit: &str, path: &str, content: &str) -> Self {
        self.files
            .insert((commit.to_owned(), path.to_owned()), content.to_owned());
        self
    }

    pub fn with_branch(mut self, name: &str, commit: &str) -> Self {
        self.branches.insert(name.to_owned(), commit.to_owned());
        self
    }

    pub fn archive_reads(&self) -> usize {
        self.archive_reads.load(Ordering::SeqCst)
    }

    fn commits(&self) -> impl Iterator<Item = &String> {
        self.branches
            .values()
            .chain(self.files.keys().map(|(commit, _)| commit))
    }
}

impl SourceRepository for FakeRepository {
    type Error = FakeError;

    async fn read_file_contents(&self, commit: &str, path: &str) -> Result<Option<String>, FakeError> {
        Ok(self
            .files
            .get(&(commit.to_owned(), path.to_owned()))
            .cloned())
    }

    async fn resolve_branch(&self, branch: &str) -> Result<String, FakeError> {
        self.branches
            .get(branch)
            .cloned()
            .ok_or_else(|| FakeError(format!("unknown branch {branch}")))
    }

    async fn resolve_commit(&self, commit: &str) -> Result<String, FakeError> {
        self.commits()
            .find(|candidate| candidate.starts_with(commit))
            .cloned()
            .ok_or_else(|| FakeError(format!("unknown commit {commit}")))
    }

    async fn default_branch(&self) -> Result<String, FakeError> {
        Ok(self.default_branch.clone())
    }

    async fn archive(&self, commit: &str) -> Result<Vec<u8>, FakeError> {
        if !self.commits().any(|candidate| candidate == commit) {
            return Err(FakeError(format!("unknown commit {commit}")));
        }
        self.archive_reads.fetch_add(1, Ordering::SeqCst);

        let mut builder = tar::Builder::new(Vec::new());
        for ((_, path), content) in self.files.iter().filter(|((c, _), _)| c == commit) {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, path, content.as_bytes())
                .map_err(|err| FakeError(err.to_string()))?;
        }
        builder.into_inner().map_err(|err| FakeError(err.to_string()))
    }
}

#[derive(Default)]
pub struct FakeSource {
    repositories: HashMap<(String, String), FakeRepository>,
}

impl FakeSource {
    pub fn with_repository(mut self, owner: &str, name: &str, repository: FakeRepository) -> Self {
        self.repositories
            .insert((owner.to_owned(), name.to_owned()), repository);
        self
    }
}

impl SourceControl for FakeSource {
    type Repository = FakeRepository;
    type Error = FakeError;

    async fn get_repository(&self, owner: &str, name: &str) -> Result<FakeRepository, FakeError> {
        self.repositories
            .get(&(owner.to_owned(), name.to_owned()))
            .cloned()
            .ok_or_else(|| FakeError(format!("repository {owner}/{name} not found")))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineCall {
    Build { tag: String, dockerfile: String, context: PathBuf },
    Push { tag: String },
    Task { name: String, image: String },
}

#[derive(Clone, Debug)]
pub enum TaskBehaviour {
    Exit(i64),
    /// The engine itself fails, not the task.
    EngineFailure,
    Panic,
    Hang,
}

/// Records every call. Tasks exit 0 unless told otherwise.
#[derive(Default)]
pub struct FakeEngine {
    calls: Mutex<Vec<EngineCall>>,
    tasks: HashMap<String, TaskBehaviour>,
    build_error: Option<String>,
    push_error: Option<String>,
    build_delay: Option<Duration>,
}

impl FakeEngine {
    pub fn with_task(mut self, name: &str, behaviour: TaskBehaviour) -> Self {
        self.tasks.insert(name.to_owned(), behaviour);
        self
    }

    pub fn failing_build(mut self, message: &str) -> Self {
        self.build_error = Some(message.to_owned());
        self
    }

    pub fn failing_push(mut self, message: &str) -> Self {
        self.push_error = Some(message.to_owned());
        self
    }

    pub fn slow_build(mut self, delay: Duration) -> Self {
        self.build_delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn tasks(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                EngineCall::Task { name, .. } => Some(name),
                _ => None,
            })
            .collect()
    }

    pub fn builds(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                EngineCall::Build { tag, .. } => Some(tag),
                _ => None,
            })
            .collect()
    }

    pub fn pushes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                EngineCall::Push { tag } => Some(tag),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: EngineCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl ContainerEngine for FakeEngine {
    async fn build(&self, dockerfile: &str, context: &Path, tags: &[String]) -> Result<EngineOutput, EngineError> {
        for tag in tags {
            self.record(EngineCall::Build {
                tag: tag.clone(),
                dockerfile: dockerfile.to_owned(),
                context: context.to_owned(),
            });
        }
        if let Some(delay) = self.build_delay {
            tokio::time::sleep(delay).await;
        }

        let mut collector = LogCollector::default();
        collector.push_record(&json!({ "stream": format!("Step 1/1 : FROM scratch\n") }));
        match &self.build_error {
            Some(message) => collector.push_error(message),
            None => collector.push_record(&json!({ "stream": "Successfully built\n" })),
        }
        Ok(collector.finish())
    }

    async fn push(&self, tag: &str, _credentials: &RegistryCredentials) -> Result<EngineOutput, EngineError> {
        self.record(EngineCall::Push { tag: tag.to_owned() });

        let mut collector = LogCollector::default();
        collector.push_record(&json!({ "status": "Pushing", "id": tag }));
        if let Some(message) = &self.push_error {
            collector.push_error(message);
        }
        Ok(collector.finish())
    }

    async fn run_task(&self, task: &TaskSpec) -> Result<TaskOutput, EngineError> {
        self.record(EngineCall::Task {
            name: task.name.clone(),
            image: task.image.clone(),
        });

        match self.tasks.get(&task.name).cloned() {
            None => Ok(TaskOutput {
                exit_code: 0,
                log: format!("{} ok\n", task.name),
            }),
            Some(TaskBehaviour::Exit(exit_code)) => Ok(TaskOutput {
                exit_code,
                log: format!("{} exited with {exit_code}\n", task.name),
            }),
            Some(TaskBehaviour::EngineFailure) => Err(EngineError::ExitCode),
            Some(TaskBehaviour::Panic) => panic!("task {} blew up", task.name),
            Some(TaskBehaviour::Hang) => Ok(std::future::pending().await),
        }
    }
}

/// A pipeline value that was never stored. Good enough for code that only
/// reads it.
pub fn pipeline_for(owner: &str, name: &str, branch: &str, commit: &str) -> Pipeline {
    Pipeline {
        id: PipelineId::new(1),
        repository_id: 1,
        repository_owner: owner.to_owned(),
        repository_name: name.to_owned(),
        pusher_id: 7,
        event: TriggerEvent::Push {
            branch: Branch {
                name: branch.to_owned(),
                commit: commit.to_owned(),
            },
        },
        configuration: PipelineConfiguration::default(),
        stage: Stage::NotStarted,
        status: RunStatus::NotStarted,
        success: false,
        error: None,
        begin_at: None,
        end_at: None,
        created_at: 0,
    }
}

pub fn registry() -> RegistryCredentials {
    RegistryCredentials {
        server: "registry.local".to_owned(),
        username: "bot".to_owned(),
        password: SecretString::new("hunter2".to_owned()),
    }
}

/// `acme/web` with a Dockerfile at each of `commits`. The first commit is
/// the head of `main`.
pub fn acme_web(commits: &[&str]) -> FakeSource {
    let mut repository = FakeRepository::new("main", commits.first().copied().unwrap_or_default());
    for commit in commits {
        repository = repository
            .with_file(commit, "Dockerfile", "FROM alpine\n")
            .with_file(commit, "main.go", "package main\n");
    }
    FakeSource::default().with_repository("acme", "web", repository)
}

/// A runner wired to fakes, with its store, engine and cluster exposed.
pub struct Harness {
    pub repositories: Repositories,
    pub engine: Arc<FakeEngine>,
    pub cluster: InMemoryCluster,
    pub runner: Arc<PipelineRunner<FakeEngine, FakeSource>>,
    pub dirs: TempDir,
}

impl Harness {
    pub fn new(source: FakeSource, engine: FakeEngine) -> Self {
        Self::with_timeout(source, engine, Duration::from_secs(3600))
    }

    pub fn with_timeout(source: FakeSource, engine: FakeEngine, timeout: Duration) -> Self {
        let repositories = Repositories::build(":memory:").unwrap();
        let engine = Arc::new(engine);
        let cluster = InMemoryCluster::new();
        let dirs = tempfile::tempdir().unwrap();

        let runner = PipelineRunner::new(
            repositories.clone(),
            engine.clone(),
            Arc::new(source),
            Cluster::new(Arc::new(cluster.clone()), RetryPolicy::default()),
            Arc::new(RoundRobinIps::new(vec!["10.0.0.7".to_owned(), "10.0.0.8".to_owned()])),
            RunnerSettings {
                work_root: dirs.path().join("work"),
                cache_root: dirs.path().join("cache"),
                registry: registry(),
                timeout,
            },
        );

        Self {
            repositories,
            engine,
            cluster,
            runner: Arc::new(runner),
            dirs,
        }
    }
}

impl Harness {
    /// Stores a push-triggered pipeline for `acme/web`.
    pub fn create(&self, branch: &str, commit: &str, configuration: PipelineConfiguration) -> Pipeline {
        self.repositories
            .with_pipelines(|pipelines| {
                pipelines.create_or_get(NewPipeline {
                    repository_id: 1,
                    repository_owner: "acme".to_owned(),
                    repository_name: "web".to_owned(),
                    pusher_id: 7,
                    event: TriggerEvent::Push {
                        branch: Branch {
                            name: branch.to_owned(),
                            commit: commit.to_owned(),
                        },
                    },
                    configuration,
                })
            })
            .unwrap()
    }

    pub fn pipeline(&self, id: PipelineId) -> Pipeline {
        self.repositories
            .with_pipelines(|pipelines| pipelines.get(id))
            .unwrap()
            .unwrap()
    }

    pub fn results(&self, id: PipelineId) -> Vec<StageResult> {
        self.repositories
            .with_pipelines(|pipelines| pipelines.list_stage_results(id))
            .unwrap()
    }
}
