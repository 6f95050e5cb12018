mod api;
pub mod desired;
mod error;
mod memory;
mod namespace;
mod provider;
mod retry;
mod secret;
mod service;
mod workload;

use std::sync::Arc;

use k8s_openapi::api::core::v1::{Namespace, ResourceQuota, Secret, Service};
use kube::Resource;

pub use api::{KubeApi, ResourceApi};
pub use desired::WorkloadSpec;
pub use error::ClusterError;
pub use memory::{InMemoryApi, InMemoryCluster, NODE_PORT_BASE};
pub use namespace::{ensure_namespace, ensure_quota};
pub use provider::{ClusterProvider, KubeCluster};
pub use retry::{retry_on_conflict, RetryPolicy};
pub use secret::ensure_secret;
pub use service::{ensure_service, external_ip_of, node_ports};
pub use workload::{workload_for, Workload, WorkloadHandle, WorkloadResource};

/// Idempotent reconciliation of the objects one deployment owns.
#[derive(Clone)]
pub struct Cluster {
    provider: Arc<dyn ClusterProvider>,
    retry: RetryPolicy,
}

impl Cluster {
    pub fn new(provider: Arc<dyn ClusterProvider>, retry: RetryPolicy) -> Self {
        Self { provider, retry }
    }

    /// Ensures the namespace exists and, when any limit is given, carries a
    /// matching quota.
    pub async fn ensure_namespace(
        &self,
        name: &str,
        cpu: Option<&str>,
        memory: Option<&str>,
    ) -> Result<(Namespace, Option<ResourceQuota>), ClusterError> {
        let namespace = ensure_namespace(self.provider.namespaces().as_ref(), name).await?;

        let quota = match desired::resource_quota(name, cpu, memory) {
            Some(quota) => {
                let api = self.provider.resource_quotas(name);
                Some(ensure_quota(api.as_ref(), &quota, &self.retry).await?)
            }
            None => None,
        };

        Ok((namespace, quota))
    }

    pub async fn ensure_secret(&self, secret: &Secret) -> Result<Secret, ClusterError> {
        let api = self.provider.secrets(namespace_of(secret)?);
        ensure_secret(api.as_ref(), secret, &self.retry).await
    }

    pub fn workload(&self, spec: &WorkloadSpec) -> Result<Box<dyn Workload>, ClusterError> {
        workload_for(self.provider.as_ref(), spec, self.retry)
    }

    /// Reconciles the service. A newly created service takes its external
    /// address from `external_ip`; an existing one keeps whatever it has.
    pub async fn ensure_service<F>(&self, service: &Service, external_ip: F) -> Result<Service, ClusterError>
    where
        F: FnOnce() -> Option<String> + Send,
    {
        let api = self.provider.services(namespace_of(service)?);
        ensure_service(api.as_ref(), service, external_ip).await
    }
}

fn namespace_of<K: Resource>(resource: &K) -> Result<&str, ClusterError> {
    resource
        .meta()
        .namespace
        .as_deref()
        .ok_or_else(|| ClusterError::Invalid("resource has no namespace".to_owned()))
}
