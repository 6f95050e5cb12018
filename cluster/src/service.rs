use std::collections::BTreeSet;

use k8s_openapi::{api::core::v1::Service, apimachinery::pkg::util::intstr::IntOrString};
use tracing::info;

use crate::{ClusterError, ResourceApi};

type PortKey = (i32, String, String);

/// Leaves an existing service with the same port set alone, external address
/// included. A changed port set replaces the service wholesale, so its node
/// ports may change too. `external_ip` is only called when a service is
/// created.
pub async fn ensure_service<F>(
    api: &dyn ResourceApi<Service>,
    desired: &Service,
    external_ip: F,
) -> Result<Service, ClusterError>
where
    F: FnOnce() -> Option<String> + Send,
{
    let name = desired
        .metadata
        .name
        .clone()
        .ok_or_else(|| ClusterError::Invalid("service has no name".to_owned()))?;

    if let Some(existing) = api.get_opt(&name).await? {
        if port_set(&existing) == port_set(desired) {
            return Ok(existing);
        }

        info!(service = %name, "service ports changed, recreating");
        match api.delete(&name).await {
            Ok(()) | Err(ClusterError::NotFound(_)) => {}
            Err(err) => return Err(err),
        }
    }

    let mut desired = desired.clone();
    if let Some(ip) = external_ip() {
        desired.spec.get_or_insert_with(Default::default).external_ips = Some(vec![ip]);
    }

    let created = api.create(&desired).await?;
    info!(service = %name, ip = ?external_ip_of(&created), "created service");
    Ok(created)
}

/// Ports compared by number, protocol and target; node ports are assigned by
/// the cluster and ignored.
fn port_set(service: &Service) -> BTreeSet<PortKey> {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .into_iter()
        .flatten()
        .map(|port| {
            let protocol = port.protocol.clone().unwrap_or_else(|| "TCP".to_owned());
            let target = match &port.target_port {
                Some(IntOrString::Int(target)) => target.to_string(),
                Some(IntOrString::String(target)) => target.clone(),
                None => port.port.to_string(),
            };
            (port.port, protocol, target)
        })
        .collect()
}

/// The first external address the service is reachable on.
pub fn external_ip_of(service: &Service) -> Option<String> {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.external_ips.as_ref())
        .and_then(|ips| ips.first().cloned())
}

/// Node ports of `service` keyed by container port.
pub fn node_ports(service: &Service) -> Vec<(i32, Option<i32>)> {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .into_iter()
        .flatten()
        .map(|port| (port.port, port.node_port))
        .collect()
}
