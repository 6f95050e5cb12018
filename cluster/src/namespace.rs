use std::collections::BTreeMap;

use k8s_openapi::{
    api::core::v1::{Namespace, ResourceQuota},
    apimachinery::pkg::api::resource::Quantity,
};
use tracing::{debug, info};

use crate::{desired, retry_on_conflict, ClusterError, ResourceApi, RetryPolicy};

/// Get-or-create. Losing the creation race to another writer still counts as
/// success.
pub async fn ensure_namespace(api: &dyn ResourceApi<Namespace>, name: &str) -> Result<Namespace, ClusterError> {
    if let Some(existing) = api.get_opt(name).await? {
        return Ok(existing);
    }

    match api.create(&desired::namespace(name)).await {
        Ok(created) => {
            info!(namespace = name, "created namespace");
            Ok(created)
        }
        Err(ClusterError::AlreadyExists(_)) => {
            debug!(namespace = name, "namespace created concurrently");
            api.get_opt(name)
                .await?
                .ok_or_else(|| ClusterError::NotFound(name.to_owned()))
        }
        Err(err) => Err(err),
    }
}

/// Creates or updates `desired`. Quotas whose hard limits already match are
/// left untouched.
pub async fn ensure_quota(
    api: &dyn ResourceApi<ResourceQuota>,
    desired: &ResourceQuota,
    retry: &RetryPolicy,
) -> Result<ResourceQuota, ClusterError> {
    let name = desired
        .metadata
        .name
        .clone()
        .ok_or_else(|| ClusterError::Invalid("quota has no name".to_owned()))?;

    if api.get_opt(&name).await?.is_none() {
        match api.create(desired).await {
            Ok(created) => {
                info!(quota = %name, "created resource quota");
                return Ok(created);
            }
            Err(ClusterError::AlreadyExists(_)) => {}
            Err(err) => return Err(err),
        }
    }

    let name = name.as_str();
    retry_on_conflict(retry, "ResourceQuota", name, move || async move {
        let mut current = api
            .get_opt(name)
            .await?
            .ok_or_else(|| ClusterError::NotFound(name.to_owned()))?;

        if hard_limits(&current) == hard_limits(desired) {
            return Ok(current);
        }

        current.spec = desired.spec.clone();
        api.replace(name, &current).await
    })
    .await
}

fn hard_limits(quota: &ResourceQuota) -> Option<&BTreeMap<String, Quantity>> {
    quota.spec.as_ref().and_then(|spec| spec.hard.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryApi;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Reports the namespace as missing once, then behaves as if someone else
    /// created it in the meantime.
    struct RacingNamespaces {
        inner: InMemoryApi<Namespace>,
        raced: AtomicBool,
    }

    #[async_trait]
    impl ResourceApi<Namespace> for RacingNamespaces {
        async fn get_opt(&self, name: &str) -> Result<Option<Namespace>, ClusterError> {
            if !self.raced.swap(true, Ordering::SeqCst) {
                self.inner.create(&desired::namespace(name)).await?;
                return Ok(None);
            }
            self.inner.get_opt(name).await
        }

        async fn create(&self, resource: &Namespace) -> Result<Namespace, ClusterError> {
            self.inner.create(resource).await
        }

        async fn replace(&self, name: &str, resource: &Namespace) -> Result<Namespace, ClusterError> {
            self.inner.replace(name, resource).await
        }

        async fn delete(&self, name: &str) -> Result<(), ClusterError> {
            self.inner.delete(name).await
        }

        async fn list(&self, label_selector: &str) -> Result<Vec<Namespace>, ClusterError> {
            self.inner.list(label_selector).await
        }
    }

    #[tokio::test]
    async fn ensure_namespace_should_be_idempotent() {
        let api = InMemoryApi::<Namespace>::new();

        ensure_namespace(&api, "acme").await.unwrap();
        ensure_namespace(&api, "acme").await.unwrap();

        assert_eq!(api.objects().len(), 1);
        assert_eq!(api.write_count(), 1);
    }

    #[tokio::test]
    async fn ensure_namespace_should_tolerate_creation_race() {
        let api = RacingNamespaces {
            inner: InMemoryApi::new(),
            raced: AtomicBool::new(false),
        };

        let namespace = ensure_namespace(&api, "acme").await.unwrap();

        assert_eq!(namespace.metadata.name.as_deref(), Some("acme"));
        assert_eq!(api.inner.objects().len(), 1);
    }

    #[tokio::test]
    async fn ensure_quota_should_update_changed_limits_only() {
        let api = InMemoryApi::<ResourceQuota>::new();
        let retry = RetryPolicy::default();
        let small = desired::resource_quota("acme", Some("1"), Some("1Gi")).unwrap();
        let large = desired::resource_quota("acme", Some("2"), Some("1Gi")).unwrap();

        ensure_quota(&api, &small, &retry).await.unwrap();
        ensure_quota(&api, &small, &retry).await.unwrap();
        assert_eq!(api.write_count(), 1);

        let updated = ensure_quota(&api, &large, &retry).await.unwrap();
        assert_eq!(api.write_count(), 2);
        assert_eq!(hard_limits(&updated), hard_limits(&large));
    }
}
