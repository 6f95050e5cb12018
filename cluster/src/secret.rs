use k8s_openapi::api::core::v1::Secret;
use tracing::{debug, info};

use crate::{retry_on_conflict, ClusterError, ResourceApi, RetryPolicy};

/// Get; absent → create; immutable → leave alone; otherwise replace the
/// payload when it differs.
pub async fn ensure_secret(
    api: &dyn ResourceApi<Secret>,
    desired: &Secret,
    retry: &RetryPolicy,
) -> Result<Secret, ClusterError> {
    let name = desired
        .metadata
        .name
        .clone()
        .ok_or_else(|| ClusterError::Invalid("secret has no name".to_owned()))?;

    match api.get_opt(&name).await? {
        None => match api.create(desired).await {
            Ok(created) => {
                info!(secret = %name, "created secret");
                return Ok(created);
            }
            Err(ClusterError::AlreadyExists(_)) => {}
            Err(err) => return Err(err),
        },
        Some(existing) if is_immutable(&existing) => {
            debug!(secret = %name, "secret is immutable, skipping");
            return Ok(existing);
        }
        Some(_) => {}
    }

    let name = name.as_str();
    retry_on_conflict(retry, "Secret", name, move || async move {
        let mut current = api
            .get_opt(name)
            .await?
            .ok_or_else(|| ClusterError::NotFound(name.to_owned()))?;

        if is_immutable(&current) || (current.data == desired.data && current.type_ == desired.type_) {
            return Ok(current);
        }

        current.data = desired.data.clone();
        current.string_data = None;
        current.type_ = desired.type_.clone();
        api.replace(name, &current).await
    })
    .await
}

fn is_immutable(secret: &Secret) -> bool {
    secret.immutable == Some(true)
}
