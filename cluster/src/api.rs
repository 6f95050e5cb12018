use std::fmt::Debug;

use async_trait::async_trait;
use kube::{
    api::{DeleteParams, ListParams, PostParams},
    Api,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::ClusterError;

/// The handful of calls reconciliation makes against one resource kind in one
/// scope. Implemented for the real API server and for [`crate::InMemoryApi`].
#[async_trait]
pub trait ResourceApi<K>: Send + Sync
where
    K: Send + Sync + 'static,
{
    async fn get_opt(&self, name: &str) -> Result<Option<K>, ClusterError>;
    async fn create(&self, resource: &K) -> Result<K, ClusterError>;
    /// Fails with [`ClusterError::Conflict`] when `resource` carries a stale
    /// resource version.
    async fn replace(&self, name: &str, resource: &K) -> Result<K, ClusterError>;
    async fn delete(&self, name: &str) -> Result<(), ClusterError>;
    async fn list(&self, label_selector: &str) -> Result<Vec<K>, ClusterError>;
}

pub struct KubeApi<K> {
    api: Api<K>,
}

impl<K> KubeApi<K> {
    pub fn new(api: Api<K>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl<K> ResourceApi<K> for KubeApi<K>
where
    K: Clone + DeserializeOwned + Serialize + Debug + Send + Sync + 'static,
{
    async fn get_opt(&self, name: &str) -> Result<Option<K>, ClusterError> {
        Ok(self.api.get_opt(name).await?)
    }

    async fn create(&self, resource: &K) -> Result<K, ClusterError> {
        Ok(self.api.create(&PostParams::default(), resource).await?)
    }

    async fn replace(&self, name: &str, resource: &K) -> Result<K, ClusterError> {
        Ok(self
            .api
            .replace(name, &PostParams::default(), resource)
            .await?)
    }

    async fn delete(&self, name: &str) -> Result<(), ClusterError> {
        self.api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn list(&self, label_selector: &str) -> Result<Vec<K>, ClusterError> {
        let params = ListParams::default().labels(label_selector);
        Ok(self.api.list(&params).await?.items)
    }
}
