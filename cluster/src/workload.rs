use std::{collections::BTreeMap, fmt::Debug, sync::Arc};

use async_trait::async_trait;
use k8s_openapi::api::{
    apps::v1::{Deployment, StatefulSet},
    core::v1::{EnvVar, LocalObjectReference, Pod, PodTemplateSpec},
};
use kube::Resource;
use tracing::info;

use crate::{desired, retry_on_conflict, ClusterError, ClusterProvider, ResourceApi, RetryPolicy, WorkloadSpec};

#[async_trait]
pub trait Workload: Send + Sync {
    fn kind(&self) -> &'static str;
    fn name(&self) -> &str;
    async fn exists(&self) -> Result<bool, ClusterError>;
    /// Creates the workload, or brings an existing one to the desired spec.
    async fn deploy_or_update(&self) -> Result<(), ClusterError>;
    async fn pods(&self) -> Result<Vec<Pod>, ClusterError>;
    async fn delete(&self) -> Result<(), ClusterError>;
}

/// A pod-owning kind that can be rendered from a [`WorkloadSpec`].
pub trait WorkloadResource: Resource + Clone + Debug + Send + Sync + 'static {
    const KIND: &'static str;

    fn api(provider: &dyn ClusterProvider, namespace: &str) -> Arc<dyn ResourceApi<Self>>;
    fn render(spec: &WorkloadSpec) -> Result<Self, ClusterError>;
    fn spec_matches(&self, desired: &Self) -> bool;
    fn take_spec(&mut self, desired: &Self);
}

fn labels_match<K: Resource>(current: &K, desired: &K) -> bool {
    let current = current.meta().labels.as_ref();
    desired.meta().labels.iter().flatten().all(|(key, value)| {
        current
            .and_then(|labels| labels.get(key))
            .is_some_and(|actual| actual == value)
    })
}

/// The parts of a workload rendered from a [`WorkloadSpec`]. Fields the API
/// server fills with defaults (strategy, pull policy, port protocol, ...) are
/// left out so an unchanged workload compares equal against a live cluster.
#[derive(Debug, PartialEq)]
struct RenderedFields {
    replicas: Option<i32>,
    template_labels: BTreeMap<String, String>,
    containers: Vec<ContainerFields>,
    pull_secrets: Vec<LocalObjectReference>,
}

#[derive(Debug, PartialEq)]
struct ContainerFields {
    name: String,
    image: Option<String>,
    ports: Vec<i32>,
    env: Vec<EnvVar>,
    working_dir: Option<String>,
    args: Vec<String>,
}

impl RenderedFields {
    fn of(replicas: Option<i32>, template: &PodTemplateSpec) -> Self {
        let pod = template.spec.as_ref();
        Self {
            replicas,
            template_labels: template
                .metadata
                .as_ref()
                .and_then(|metadata| metadata.labels.clone())
                .unwrap_or_default(),
            containers: pod
                .map(|pod| pod.containers.iter())
                .into_iter()
                .flatten()
                .map(|container| ContainerFields {
                    name: container.name.clone(),
                    image: container.image.clone(),
                    ports: container
                        .ports
                        .iter()
                        .flatten()
                        .map(|port| port.container_port)
                        .collect(),
                    env: container.env.clone().unwrap_or_default(),
                    working_dir: container.working_dir.clone(),
                    args: container.args.clone().unwrap_or_default(),
                })
                .collect(),
            pull_secrets: pod
                .and_then(|pod| pod.image_pull_secrets.clone())
                .unwrap_or_default(),
        }
    }
}

fn take_labels<K: Resource>(current: &mut K, desired: &K) {
    let labels: BTreeMap<String, String> = desired.meta().labels.clone().unwrap_or_default();
    current
        .meta_mut()
        .labels
        .get_or_insert_with(BTreeMap::new)
        .extend(labels);
}

impl WorkloadResource for Deployment {
    const KIND: &'static str = "Deployment";

    fn api(provider: &dyn ClusterProvider, namespace: &str) -> Arc<dyn ResourceApi<Self>> {
        provider.deployments(namespace)
    }

    fn render(spec: &WorkloadSpec) -> Result<Self, ClusterError> {
        desired::deployment(spec)
    }

    fn spec_matches(&self, desired: &Self) -> bool {
        let rendered = |workload: &Self| {
            workload
                .spec
                .as_ref()
                .map(|spec| RenderedFields::of(spec.replicas, &spec.template))
        };
        rendered(self) == rendered(desired) && labels_match(self, desired)
    }

    fn take_spec(&mut self, desired: &Self) {
        self.spec = desired.spec.clone();
        take_labels(self, desired);
    }
}

impl WorkloadResource for StatefulSet {
    const KIND: &'static str = "StatefulSet";

    fn api(provider: &dyn ClusterProvider, namespace: &str) -> Arc<dyn ResourceApi<Self>> {
        provider.stateful_sets(namespace)
    }

    fn render(spec: &WorkloadSpec) -> Result<Self, ClusterError> {
        desired::stateful_set(spec)
    }

    fn spec_matches(&self, desired: &Self) -> bool {
        let rendered = |workload: &Self| {
            workload
                .spec
                .as_ref()
                .map(|spec| RenderedFields::of(spec.replicas, &spec.template))
        };
        rendered(self) == rendered(desired) && labels_match(self, desired)
    }

    fn take_spec(&mut self, desired: &Self) {
        self.spec = desired.spec.clone();
        take_labels(self, desired);
    }
}

pub struct WorkloadHandle<K> {
    name: String,
    label_selector: String,
    desired: K,
    api: Arc<dyn ResourceApi<K>>,
    pods: Arc<dyn ResourceApi<Pod>>,
    retry: RetryPolicy,
}

impl<K: WorkloadResource> WorkloadHandle<K> {
    pub fn new(provider: &dyn ClusterProvider, spec: &WorkloadSpec, retry: RetryPolicy) -> Result<Self, ClusterError> {
        Ok(Self {
            name: spec.name.clone(),
            label_selector: spec.label_selector(),
            desired: K::render(spec)?,
            api: K::api(provider, &spec.namespace),
            pods: provider.pods(&spec.namespace),
            retry,
        })
    }
}

/// Picks the StatefulSet variant for stateful workloads and a Deployment
/// otherwise.
pub fn workload_for(
    provider: &dyn ClusterProvider,
    spec: &WorkloadSpec,
    retry: RetryPolicy,
) -> Result<Box<dyn Workload>, ClusterError> {
    Ok(if spec.stateful {
        Box::new(WorkloadHandle::<StatefulSet>::new(provider, spec, retry)?)
    } else {
        Box::new(WorkloadHandle::<Deployment>::new(provider, spec, retry)?)
    })
}

#[async_trait]
impl<K: WorkloadResource> Workload for WorkloadHandle<K> {
    fn kind(&self) -> &'static str {
        K::KIND
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self) -> Result<bool, ClusterError> {
        Ok(self.api.get_opt(&self.name).await?.is_some())
    }

    async fn deploy_or_update(&self) -> Result<(), ClusterError> {
        match self.api.get_opt(&self.name).await? {
            None => match self.api.create(&self.desired).await {
                Ok(_) => {
                    info!(kind = K::KIND, name = %self.name, "created workload");
                    return Ok(());
                }
                Err(ClusterError::AlreadyExists(_)) => {}
                Err(err) => return Err(err),
            },
            Some(current) if current.spec_matches(&self.desired) => return Ok(()),
            Some(_) => {}
        }

        let api = &self.api;
        let desired = &self.desired;
        let name = self.name.as_str();

        retry_on_conflict(&self.retry, K::KIND, name, move || async move {
            let mut current = api
                .get_opt(name)
                .await?
                .ok_or_else(|| ClusterError::NotFound(name.to_owned()))?;

            if current.spec_matches(desired) {
                return Ok(());
            }

            current.take_spec(desired);
            api.replace(name, &current).await.map(|_| ())
        })
        .await?;

        info!(kind = K::KIND, name = %self.name, "updated workload");
        Ok(())
    }

    async fn pods(&self) -> Result<Vec<Pod>, ClusterError> {
        self.pods.list(&self.label_selector).await
    }

    async fn delete(&self) -> Result<(), ClusterError> {
        match self.api.delete(&self.name).await {
            Ok(()) | Err(ClusterError::NotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }
}
