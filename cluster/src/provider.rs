use std::sync::Arc;

use k8s_openapi::api::{
    apps::v1::{Deployment, StatefulSet},
    core::v1::{Namespace, Pod, ResourceQuota, Secret, Service},
};
use kube::{Api, Client};

use crate::{ClusterError, KubeApi, ResourceApi};

/// Hands out typed collections for every kind a deployment touches.
pub trait ClusterProvider: Send + Sync {
    fn namespaces(&self) -> Arc<dyn ResourceApi<Namespace>>;
    fn resource_quotas(&self, namespace: &str) -> Arc<dyn ResourceApi<ResourceQuota>>;
    fn secrets(&self, namespace: &str) -> Arc<dyn ResourceApi<Secret>>;
    fn deployments(&self, namespace: &str) -> Arc<dyn ResourceApi<Deployment>>;
    fn stateful_sets(&self, namespace: &str) -> Arc<dyn ResourceApi<StatefulSet>>;
    fn services(&self, namespace: &str) -> Arc<dyn ResourceApi<Service>>;
    fn pods(&self, namespace: &str) -> Arc<dyn ResourceApi<Pod>>;
}

#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    /// Connects using the in-cluster service account or the local kubeconfig.
    pub async fn connect() -> Result<Self, ClusterError> {
        Ok(Self {
            client: Client::try_default().await?,
        })
    }

    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl ClusterProvider for KubeCluster {
    fn namespaces(&self) -> Arc<dyn ResourceApi<Namespace>> {
        Arc::new(KubeApi::new(Api::all(self.client.clone())))
    }

    fn resource_quotas(&self, namespace: &str) -> Arc<dyn ResourceApi<ResourceQuota>> {
        Arc::new(KubeApi::new(Api::namespaced(self.client.clone(), namespace)))
    }

    fn secrets(&self, namespace: &str) -> Arc<dyn ResourceApi<Secret>> {
        Arc::new(KubeApi::new(Api::namespaced(self.client.clone(), namespace)))
    }

    fn deployments(&self, namespace: &str) -> Arc<dyn ResourceApi<Deployment>> {
        Arc::new(KubeApi::new(Api::namespaced(self.client.clone(), namespace)))
    }

    fn stateful_sets(&self, namespace: &str) -> Arc<dyn ResourceApi<StatefulSet>> {
        Arc::new(KubeApi::new(Api::namespaced(self.client.clone(), namespace)))
    }

    fn services(&self, namespace: &str) -> Arc<dyn ResourceApi<Service>> {
        Arc::new(KubeApi::new(Api::namespaced(self.client.clone(), namespace)))
    }

    fn pods(&self, namespace: &str) -> Arc<dyn ResourceApi<Pod>> {
        Arc::new(KubeApi::new(Api::namespaced(self.client.clone(), namespace)))
    }
}
