use std::{
    any::{Any, TypeId},
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicI32, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use async_trait::async_trait;
use k8s_openapi::api::{
    apps::v1::{Deployment, StatefulSet},
    core::v1::{Namespace, Pod, ResourceQuota, Secret, Service},
};
use kube::Resource;

use crate::{ClusterError, ClusterProvider, ResourceApi};

/// First port handed out by the in-memory service allocator, matching the
/// bottom of the default node port range.
pub const NODE_PORT_BASE: i32 = 30000;

type CreateHook<K> = Arc<dyn Fn(&mut K) + Send + Sync>;

struct Store<K> {
    objects: BTreeMap<String, K>,
    version: u64,
    pending_conflicts: u32,
    writes: u64,
}

/// A single resource collection held in memory. Mirrors the optimistic
/// concurrency of the API server: every write bumps `resourceVersion` and a
/// replace carrying a stale version is rejected as a conflict.
pub struct InMemoryApi<K> {
    store: Arc<Mutex<Store<K>>>,
    on_create: Option<CreateHook<K>>,
}

impl<K> Clone for InMemoryApi<K> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            on_create: self.on_create.clone(),
        }
    }
}

impl<K> Default for InMemoryApi<K> {
    fn default() -> Self {
        Self {
            store: Arc::new(Mutex::new(Store {
                objects: BTreeMap::new(),
                version: 0,
                pending_conflicts: 0,
                writes: 0,
            })),
            on_create: None,
        }
    }
}

impl<K> InMemoryApi<K>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_create_hook(mut self, hook: impl Fn(&mut K) + Send + Sync + 'static) -> Self {
        self.on_create = Some(Arc::new(hook));
        self
    }

    /// Makes the next `count` replaces fail as if another writer got there
    /// first.
    pub fn inject_conflicts(&self, count: u32) {
        self.lock().pending_conflicts = count;
    }

    /// Number of successful create, replace and delete calls so far.
    pub fn write_count(&self) -> u64 {
        self.lock().writes
    }

    pub fn objects(&self) -> Vec<K> {
        self.lock().objects.values().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<K> {
        self.lock().objects.get(name).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, Store<K>> {
        self.store
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn name_of<K: Resource>(resource: &K) -> Result<String, ClusterError> {
    resource
        .meta()
        .name
        .clone()
        .ok_or_else(|| ClusterError::Invalid("resource has no name".to_owned()))
}

fn selector_matches(labels: Option<&BTreeMap<String, String>>, selector: &str) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => labels
                .and_then(|labels| labels.get(key.trim()))
                .is_some_and(|actual| actual == value.trim()),
            None => labels.is_some_and(|labels| labels.contains_key(term)),
        })
}

#[async_trait]
impl<K> ResourceApi<K> for InMemoryApi<K>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    async fn get_opt(&self, name: &str) -> Result<Option<K>, ClusterError> {
        Ok(self.get(name))
    }

    async fn create(&self, resource: &K) -> Result<K, ClusterError> {
        let name = name_of(resource)?;
        let mut store = self.lock();

        if store.objects.contains_key(&name) {
            return Err(ClusterError::AlreadyExists(name));
        }

        store.version += 1;
        let mut created = resource.clone();
        let meta = created.meta_mut();
        meta.resource_version = Some(store.version.to_string());
        meta.uid = Some(format!("uid-{}", store.version));

        if let Some(hook) = &self.on_create {
            hook(&mut created);
        }

        store.objects.insert(name, created.clone());
        store.writes += 1;

        Ok(created)
    }

    async fn replace(&self, name: &str, resource: &K) -> Result<K, ClusterError> {
        let mut store = self.lock();
        let current_version = match store.objects.get(name) {
            Some(current) => current.meta().resource_version.clone(),
            None => return Err(ClusterError::NotFound(name.to_owned())),
        };

        if store.pending_conflicts > 0 {
            store.pending_conflicts -= 1;
            store.version += 1;
            let version = store.version.to_string();
            if let Some(current) = store.objects.get_mut(name) {
                current.meta_mut().resource_version = Some(version);
            }
            return Err(ClusterError::Conflict(format!(
                "{name} was modified concurrently"
            )));
        }

        let requested = resource.meta().resource_version.as_ref();
        if requested.is_some_and(|requested| Some(requested) != current_version.as_ref()) {
            return Err(ClusterError::Conflict(format!(
                "{name} has resource version {current_version:?}"
            )));
        }

        store.version += 1;
        let mut replaced = resource.clone();
        let uid = store
            .objects
            .get(name)
            .and_then(|current| current.meta().uid.clone());
        let meta = replaced.meta_mut();
        meta.resource_version = Some(store.version.to_string());
        meta.uid = uid;

        store.objects.insert(name.to_owned(), replaced.clone());
        store.writes += 1;

        Ok(replaced)
    }

    async fn delete(&self, name: &str) -> Result<(), ClusterError> {
        let mut store = self.lock();

        store
            .objects
            .remove(name)
            .ok_or_else(|| ClusterError::NotFound(name.to_owned()))?;
        store.writes += 1;

        Ok(())
    }

    async fn list(&self, label_selector: &str) -> Result<Vec<K>, ClusterError> {
        Ok(self
            .lock()
            .objects
            .values()
            .filter(|object| selector_matches(object.meta().labels.as_ref(), label_selector))
            .cloned()
            .collect())
    }
}

/// A whole cluster held in memory, one [`InMemoryApi`] per kind and namespace.
/// Services get node ports assigned on creation.
#[derive(Clone, Default)]
pub struct InMemoryCluster {
    apis: Arc<Mutex<HashMap<(TypeId, String), Box<dyn Any + Send + Sync>>>>,
    node_ports: Arc<AtomicI32>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn api<K>(&self, namespace: &str) -> InMemoryApi<K>
    where
        K: Resource + Clone + Send + Sync + 'static,
    {
        self.api_or_insert(namespace, InMemoryApi::new)
    }

    pub fn services_api(&self, namespace: &str) -> InMemoryApi<Service> {
        let next = self.node_ports.clone();

        self.api_or_insert(namespace, move || {
            InMemoryApi::new().with_create_hook(move |service: &mut Service| {
                let ports = service
                    .spec
                    .as_mut()
                    .and_then(|spec| spec.ports.as_mut());
                for port in ports.into_iter().flatten() {
                    if port.node_port.is_none() {
                        port.node_port = Some(NODE_PORT_BASE + next.fetch_add(1, Ordering::Relaxed));
                    }
                }
            })
        })
    }

    fn api_or_insert<K>(&self, namespace: &str, make: impl FnOnce() -> InMemoryApi<K>) -> InMemoryApi<K>
    where
        K: Resource + Clone + Send + Sync + 'static,
    {
        let key = (TypeId::of::<K>(), namespace.to_owned());
        let mut apis = self
            .apis
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(api) = apis
            .get(&key)
            .and_then(|api| api.downcast_ref::<InMemoryApi<K>>())
        {
            return api.clone();
        }

        let api = make();
        apis.insert(key, Box::new(api.clone()));
        api
    }
}

impl ClusterProvider for InMemoryCluster {
    fn namespaces(&self) -> Arc<dyn ResourceApi<Namespace>> {
        Arc::new(self.api::<Namespace>(""))
    }

    fn resource_quotas(&self, namespace: &str) -> Arc<dyn ResourceApi<ResourceQuota>> {
        Arc::new(self.api::<ResourceQuota>(namespace))
    }

    fn secrets(&self, namespace: &str) -> Arc<dyn ResourceApi<Secret>> {
        Arc::new(self.api::<Secret>(namespace))
    }

    fn deployments(&self, namespace: &str) -> Arc<dyn ResourceApi<Deployment>> {
        Arc::new(self.api::<Deployment>(namespace))
    }

    fn stateful_sets(&self, namespace: &str) -> Arc<dyn ResourceApi<StatefulSet>> {
        Arc::new(self.api::<StatefulSet>(namespace))
    }

    fn services(&self, namespace: &str) -> Arc<dyn ResourceApi<Service>> {
        Arc::new(self.services_api(namespace))
    }

    fn pods(&self, namespace: &str) -> Arc<dyn ResourceApi<Pod>> {
        Arc::new(self.api::<Pod>(namespace))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn secret(name: &str) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                labels: Some(BTreeMap::from([("app".to_owned(), name.to_owned())])),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_should_reject_duplicates() {
        let api = InMemoryApi::<Secret>::new();

        api.create(&secret("a")).await.unwrap();
        let result = api.create(&secret("a")).await;

        assert!(matches!(result, Err(ClusterError::AlreadyExists(_))));
        assert_eq!(api.write_count(), 1);
    }

    #[tokio::test]
    async fn replace_should_reject_stale_resource_version() {
        let api = InMemoryApi::<Secret>::new();
        let created = api.create(&secret("a")).await.unwrap();
        api.replace("a", &created).await.unwrap();

        let result = api.replace("a", &created).await;

        assert!(matches!(result, Err(ClusterError::Conflict(_))));
    }

    #[tokio::test]
    async fn injected_conflicts_should_invalidate_the_read_version() {
        let api = InMemoryApi::<Secret>::new();
        api.create(&secret("a")).await.unwrap();
        api.inject_conflicts(1);

        let read = api.get_opt("a").await.unwrap().unwrap();
        assert!(matches!(
            api.replace("a", &read).await,
            Err(ClusterError::Conflict(_))
        ));

        let reread = api.get_opt("a").await.unwrap().unwrap();
        assert!(api.replace("a", &reread).await.is_ok());
    }

    #[tokio::test]
    async fn list_should_filter_by_label_selector() {
        let api = InMemoryApi::<Secret>::new();
        api.create(&secret("a")).await.unwrap();
        api.create(&secret("b")).await.unwrap();

        let selected = api.list("app=b").await.unwrap();

        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].metadata.name.as_deref(), Some("b"));
    }

    #[test]
    fn cluster_should_hand_out_the_same_collection_per_namespace() {
        let cluster = InMemoryCluster::new();

        let first = cluster.api::<Secret>("acme");
        let second = cluster.api::<Secret>("acme");
        let other = cluster.api::<Secret>("other");

        assert!(Arc::ptr_eq(&first.store, &second.store));
        assert!(!Arc::ptr_eq(&first.store, &other.store));
    }
}
