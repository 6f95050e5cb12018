//! Builders for the objects a deployment reconciles.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine};
use k8s_openapi::{
    api::{
        apps::v1::{Deployment, StatefulSet},
        core::v1::{Namespace, ResourceQuota, ResourceQuotaSpec, Secret, Service},
    },
    apimachinery::pkg::{api::resource::Quantity, apis::meta::v1::ObjectMeta},
    ByteString,
};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

use crate::ClusterError;

pub const DOCKER_CONFIG_SECRET_TYPE: &str = "kubernetes.io/dockerconfigjson";
pub const DOCKER_CONFIG_KEY: &str = ".dockerconfigjson";
pub const APP_LABEL: &str = "app";

const DNS_LABEL_MAX: usize = 63;

/// Everything needed to render a Deployment or StatefulSet and its Service.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkloadSpec {
    pub namespace: String,
    pub name: String,
    pub image: String,
    pub replicas: i32,
    pub ports: Vec<u16>,
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<String>,
    pub args: Vec<String>,
    /// Provenance labels. `app` is always set to the workload name.
    pub labels: BTreeMap<String, String>,
    pub image_pull_secret: Option<String>,
    pub stateful: bool,
}

impl WorkloadSpec {
    pub fn selector(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(APP_LABEL.to_owned(), self.name.clone())])
    }

    pub fn label_selector(&self) -> String {
        format!("{APP_LABEL}={}", self.name)
    }

    fn labels(&self) -> BTreeMap<String, String> {
        let mut labels = self.labels.clone();
        labels.extend(self.selector());
        labels
    }

    fn metadata(&self) -> Value {
        json!({
            "name": self.name,
            "namespace": self.namespace,
            "labels": self.labels(),
        })
    }

    fn pod_template(&self) -> Value {
        let mut container = json!({
            "name": self.name,
            "image": self.image,
        });

        if !self.ports.is_empty() {
            container["ports"] = self
                .ports
                .iter()
                .map(|port| json!({ "containerPort": port }))
                .collect();
        }
        if !self.env.is_empty() {
            container["env"] = self
                .env
                .iter()
                .map(|(name, value)| json!({ "name": name, "value": value }))
                .collect();
        }
        if let Some(working_dir) = &self.working_dir {
            container["workingDir"] = json!(working_dir);
        }
        if !self.args.is_empty() {
            container["args"] = json!(self.args);
        }

        let mut spec = json!({ "containers": [container] });
        if let Some(secret) = &self.image_pull_secret {
            spec["imagePullSecrets"] = json!([{ "name": secret }]);
        }

        json!({
            "metadata": { "labels": self.labels() },
            "spec": spec,
        })
    }
}

/// Lowercases `value` and squeezes it into an RFC 1123 label.
pub fn dns_label(value: &str) -> String {
    let mut label = String::with_capacity(value.len());

    for c in value.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() {
            label.push(c);
        } else if !label.ends_with('-') {
            label.push('-');
        }
    }

    let label = label.trim_matches('-');
    let label = &label[..label.len().min(DNS_LABEL_MAX)];
    label.trim_end_matches('-').to_owned()
}

pub fn namespace(name: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn quota_name(namespace: &str) -> String {
    format!("{namespace}-quota")
}

/// `None` when neither limit is given, in which case no quota is wanted.
pub fn resource_quota(namespace: &str, cpu: Option<&str>, memory: Option<&str>) -> Option<ResourceQuota> {
    let hard: BTreeMap<String, Quantity> = [("limits.cpu", cpu), ("limits.memory", memory)]
        .into_iter()
        .filter_map(|(key, value)| {
            let value = value.map(str::trim).filter(|value| !value.is_empty())?;
            Some((key.to_owned(), Quantity(value.to_owned())))
        })
        .collect();

    if hard.is_empty() {
        return None;
    }

    Some(ResourceQuota {
        metadata: ObjectMeta {
            name: Some(quota_name(namespace)),
            namespace: Some(namespace.to_owned()),
            ..Default::default()
        },
        spec: Some(ResourceQuotaSpec {
            hard: Some(hard),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// A pull secret carrying a single registry login.
pub fn registry_secret(
    namespace: &str,
    name: &str,
    registry: &str,
    username: &str,
    password: &SecretString,
) -> Result<Secret, ClusterError> {
    let password = password.expose_secret();
    let auth = STANDARD.encode(format!("{username}:{password}"));
    let config = json!({
        "auths": {
            (registry): {
                "username": username,
                "password": password,
                "auth": auth,
            }
        }
    });

    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            namespace: Some(namespace.to_owned()),
            ..Default::default()
        },
        type_: Some(DOCKER_CONFIG_SECRET_TYPE.to_owned()),
        data: Some(BTreeMap::from([(
            DOCKER_CONFIG_KEY.to_owned(),
            ByteString(serde_json::to_vec(&config)?),
        )])),
        ..Default::default()
    })
}

pub fn deployment(spec: &WorkloadSpec) -> Result<Deployment, ClusterError> {
    Ok(serde_json::from_value(json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": spec.metadata(),
        "spec": {
            "replicas": spec.replicas,
            "selector": { "matchLabels": spec.selector() },
            "template": spec.pod_template(),
        }
    }))?)
}

pub fn stateful_set(spec: &WorkloadSpec) -> Result<StatefulSet, ClusterError> {
    Ok(serde_json::from_value(json!({
        "apiVersion": "apps/v1",
        "kind": "StatefulSet",
        "metadata": spec.metadata(),
        "spec": {
            "replicas": spec.replicas,
            "serviceName": spec.name,
            "selector": { "matchLabels": spec.selector() },
            "template": spec.pod_template(),
        }
    }))?)
}

/// A NodePort service exposing every configured port. Node ports are left to
/// the cluster.
pub fn node_port_service(spec: &WorkloadSpec, external_ip: Option<&str>) -> Result<Service, ClusterError> {
    let ports: Vec<Value> = spec
        .ports
        .iter()
        .map(|port| {
            json!({
                "name": format!("port-{port}"),
                "protocol": "TCP",
                "port": port,
                "targetPort": port,
            })
        })
        .collect();

    let mut service_spec = json!({
        "type": "NodePort",
        "selector": spec.selector(),
        "ports": ports,
    });
    if let Some(ip) = external_ip {
        service_spec["externalIPs"] = json!([ip]);
    }

    Ok(serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": spec.metadata(),
        "spec": service_spec,
    }))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> WorkloadSpec {
        WorkloadSpec {
            namespace: "acme".to_owned(),
            name: "web".to_owned(),
            image: "registry.local/acme/web:abcde".to_owned(),
            replicas: 2,
            ports: vec![8080, 9090],
            env: BTreeMap::from([("MODE".to_owned(), "prod".to_owned())]),
            working_dir: Some("/app".to_owned()),
            args: vec!["serve".to_owned()],
            labels: BTreeMap::from([("pipeline-id".to_owned(), "7".to_owned())]),
            image_pull_secret: Some("registry-credentials".to_owned()),
            stateful: false,
        }
    }

    #[test]
    fn dns_label_should_sanitize_names() {
        assert_eq!(dns_label("Acme_Corp"), "acme-corp");
        assert_eq!(dns_label("--My..Repo--"), "my-repo");
        assert_eq!(dns_label(&"x".repeat(80)).len(), 63);
    }

    #[test]
    fn quota_should_only_exist_with_limits() {
        assert!(resource_quota("acme", None, Some("  ")).is_none());

        let quota = resource_quota("acme", Some("500m"), None).unwrap();
        let hard = quota.spec.unwrap().hard.unwrap();

        assert_eq!(quota.metadata.name.as_deref(), Some("acme-quota"));
        assert_eq!(hard.get("limits.cpu"), Some(&Quantity("500m".to_owned())));
        assert!(!hard.contains_key("limits.memory"));
    }

    #[test]
    fn registry_secret_should_carry_docker_config() {
        let password = SecretString::new("hunter2".to_owned());

        let secret = registry_secret("acme", "registry-credentials", "registry.local", "bot", &password).unwrap();

        assert_eq!(secret.type_.as_deref(), Some(DOCKER_CONFIG_SECRET_TYPE));
        let payload = &secret.data.unwrap()[DOCKER_CONFIG_KEY];
        let config: Value = serde_json::from_slice(&payload.0).unwrap();
        assert_eq!(config["auths"]["registry.local"]["auth"], STANDARD.encode("bot:hunter2"));
    }

    #[test]
    fn deployment_should_render_container_and_labels() {
        let deployment = deployment(&spec()).unwrap();

        let labels = deployment.metadata.labels.clone().unwrap();
        assert_eq!(labels["app"], "web");
        assert_eq!(labels["pipeline-id"], "7");

        let spec = deployment.spec.unwrap();
        assert_eq!(spec.replicas, Some(2));
        let pod = spec.template.spec.unwrap();
        let container = &pod.containers[0];
        assert_eq!(container.image.as_deref(), Some("registry.local/acme/web:abcde"));
        assert_eq!(container.ports.as_ref().unwrap().len(), 2);
        assert_eq!(container.working_dir.as_deref(), Some("/app"));
        assert_eq!(container.args, Some(vec!["serve".to_owned()]));
        assert_eq!(pod.image_pull_secrets.unwrap().len(), 1);
    }

    #[test]
    fn stateful_set_should_name_its_service() {
        let stateful_set = serde_json::to_value(stateful_set(&spec()).unwrap()).unwrap();

        assert_eq!(stateful_set["spec"]["serviceName"], "web");
        assert_eq!(stateful_set["kind"], "StatefulSet");
    }

    #[test]
    fn service_should_expose_ports_without_node_ports() {
        let service = node_port_service(&spec(), Some("10.0.0.5")).unwrap();
        let service_spec = service.spec.unwrap();

        assert_eq!(service_spec.type_.as_deref(), Some("NodePort"));
        assert_eq!(service_spec.external_ips, Some(vec!["10.0.0.5".to_owned()]));
        let ports = service_spec.ports.unwrap();
        assert_eq!(ports.iter().map(|port| port.port).collect::<Vec<_>>(), vec![8080, 9090]);
        assert!(ports.iter().all(|port| port.node_port.is_none()));
    }
}
