use std::collections::BTreeMap;

use cluster::{
    desired::{self, dns_label},
    external_ip_of, node_ports, Cluster, ClusterError, WorkloadSpec,
};
use container_engine::RegistryCredentials;
use domain::{matches_any, DeployConfiguration, Pipeline, PipelineConfiguration, PortMapping, StageKind, StagePayload, TaskError};
use tracing::info;

use super::{cancellable, now, StageContext, StageError, TaskRecord};
use crate::ip::IpAllocator;

pub const PULL_SECRET_NAME: &str = "registry-credentials";

/// Commit prefix length used for the `commit` label.
const COMMIT_LABEL_LENGTH: usize = 12;

pub struct DeployTools<'a> {
    pub cluster: &'a Cluster,
    pub ips: &'a dyn IpAllocator,
    pub registry: &'a RegistryCredentials,
}

/// Reconciles the namespace, pull secret, workload and service for the first
/// pushed image. Skipped when deploy is not configured or not enabled for this
/// trigger.
pub async fn deploy<E>(
    ctx: &StageContext<'_, E>,
    configuration: &PipelineConfiguration,
    pushed: &[String],
    tools: &DeployTools<'_>,
) -> Result<(), StageError> {
    let pipeline = ctx.pipeline;
    let Some(deploy) = &configuration.deploy else {
        info!(pipeline_id = %pipeline.id, "no deploy configured");
        return Ok(());
    };
    if !matches_any(deploy.on.as_deref(), &pipeline.event) {
        info!(pipeline_id = %pipeline.id, branch = %pipeline.ref_name(), "deploy not enabled for this trigger");
        return Ok(());
    }
    ctx.check_cancelled()?;

    let begin_at = now();
    let name = dns_label(&pipeline.repository_name);
    let outcome = match pushed.first() {
        None => Err(StageError::NothingPushed),
        Some(image) => cancellable(ctx.cancel, reconcile(pipeline, deploy, image, tools)).await,
    };

    match outcome {
        Ok((payload, log)) => {
            ctx.recorder.record(TaskRecord {
                kind: StageKind::Deploy,
                index: 1,
                name,
                log,
                error: None,
                begin_at,
                payload: Some(payload),
            })?;
            info!(pipeline_id = %pipeline.id, "deployed");
            Ok(())
        }
        Err(StageError::Cancelled) => Err(StageError::Cancelled),
        Err(err) => {
            ctx.recorder.record(TaskRecord {
                kind: StageKind::Deploy,
                index: 1,
                name,
                log: String::new(),
                error: Some(TaskError::new(err.to_string())),
                begin_at,
                payload: None,
            })?;
            Err(err)
        }
    }
}

async fn reconcile(
    pipeline: &Pipeline,
    deploy: &DeployConfiguration,
    image: &str,
    tools: &DeployTools<'_>,
) -> Result<(StagePayload, String), ClusterError> {
    let namespace = dns_label(&pipeline.repository_owner);
    let mut log = Vec::new();

    tools
        .cluster
        .ensure_namespace(&namespace, deploy.cpu.as_deref(), deploy.memory.as_deref())
        .await?;
    log.push(format!("namespace {namespace} ready"));

    let registry = tools.registry;
    let secret = desired::registry_secret(
        &namespace,
        PULL_SECRET_NAME,
        &registry.server,
        &registry.username,
        &registry.password,
    )?;
    tools.cluster.ensure_secret(&secret).await?;
    log.push(format!("secret {PULL_SECRET_NAME} ready"));

    let spec = WorkloadSpec {
        namespace,
        name: dns_label(&pipeline.repository_name),
        image: image.to_owned(),
        replicas: deploy.replicas.unwrap_or(1),
        ports: deploy.ports.clone(),
        env: deploy.envs.clone(),
        working_dir: deploy.working_dir.clone(),
        args: deploy.cmd.clone(),
        labels: provenance_labels(pipeline),
        image_pull_secret: Some(PULL_SECRET_NAME.to_owned()),
        stateful: deploy.stateful,
    };
    let workload = tools.cluster.workload(&spec)?;
    workload.deploy_or_update().await?;
    log.push(format!("{} {} running {image}", workload.kind(), workload.name()));

    let (ip, ports) = if spec.ports.is_empty() {
        (None, vec![])
    } else {
        let ips = tools.ips;
        let service = desired::node_port_service(&spec, None)?;
        let service = tools.cluster.ensure_service(&service, || ips.next_ip()).await?;
        let ports = node_ports(&service)
            .into_iter()
            .filter_map(|(port, node_port)| {
                Some(PortMapping {
                    container_port: u16::try_from(port).ok()?,
                    node_port,
                })
            })
            .collect();
        (external_ip_of(&service), ports)
    };
    for port in &ports {
        match port.node_port {
            Some(node_port) => log.push(format!("port {} exposed on {node_port}", port.container_port)),
            None => log.push(format!("port {} exposed", port.container_port)),
        }
    }

    Ok((StagePayload::Deployment { ip, ports }, log.join("\n")))
}

fn provenance_labels(pipeline: &Pipeline) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("pipeline-id".to_owned(), pipeline.id.to_string()),
        (
            "commit".to_owned(),
            pipeline.commit().chars().take(COMMIT_LABEL_LENGTH).collect(),
        ),
        ("trigger".to_owned(), pipeline.event.name().to_owned()),
        ("pusher-id".to_owned(), pipeline.pusher_id.to_string()),
    ])
}
