use std::path::{Path, PathBuf};

use domain::Pipeline;
use sha2::{Digest, Sha256};
use source_control::SourceRepository;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{cancellable, StageError};

/// Stable key for one commit of one repository. Names both the working
/// directory and the cached archive.
pub fn working_key(owner: &str, name: &str, commit: &str) -> String {
    let digest = Sha256::digest(format!("{owner}/{name}@{commit}"));
    hex::encode(digest)[..16].to_owned()
}

/// Materializes the tree at the pipeline's commit under `work_root` and
/// returns its path. An existing directory is reused as is; the archive is
/// only fetched when the cache does not have it yet.
pub async fn load_repository<R>(
    repository: &R,
    pipeline: &Pipeline,
    work_root: &Path,
    cache_root: &Path,
    cancel: &CancellationToken,
) -> Result<PathBuf, StageError>
where
    R: SourceRepository,
{
    let key = working_key(
        &pipeline.repository_owner,
        &pipeline.repository_name,
        pipeline.commit(),
    );
    let workspace = work_root.join(&key);

    if fs::try_exists(&workspace)
        .await
        .map_err(StageError::io(&workspace))?
    {
        debug!(pipeline_id = %pipeline.id, workspace = %workspace.display(), "reusing workspace");
        return Ok(workspace);
    }

    let cached = cache_root.join(format!("{key}.tar"));
    let archive = if fs::try_exists(&cached).await.map_err(StageError::io(&cached))? {
        debug!(pipeline_id = %pipeline.id, archive = %cached.display(), "using cached archive");
        fs::read(&cached).await.map_err(StageError::io(&cached))?
    } else {
        let archive = cancellable(cancel, async {
            repository
                .archive(pipeline.commit())
                .await
                .map_err(|err| StageError::Source(Box::new(err)))
        })
        .await?;

        fs::create_dir_all(cache_root)
            .await
            .map_err(StageError::io(cache_root))?;
        fs::write(&cached, &archive)
            .await
            .map_err(StageError::io(&cached))?;
        archive
    };

    unpack(archive, work_root, &key).await?;
    info!(pipeline_id = %pipeline.id, workspace = %workspace.display(), "workspace ready");

    Ok(workspace)
}

/// Extracts into a staging directory first so a half-written workspace is
/// never mistaken for a complete one.
async fn unpack(archive: Vec<u8>, work_root: &Path, key: &str) -> Result<(), StageError> {
    fs::create_dir_all(work_root)
        .await
        .map_err(StageError::io(work_root))?;

    let workspace = work_root.join(key);
    let staging = work_root.join(format!(".{key}.{}.partial", std::process::id()));

    let target = staging.clone();
    tokio::task::spawn_blocking(move || {
        if target.exists() {
            std::fs::remove_dir_all(&target)?;
        }
        tar::Archive::new(archive.as_slice()).unpack(&target)
    })
    .await?
    .map_err(StageError::io(&staging))?;

    match fs::rename(&staging, &workspace).await {
        Ok(()) => Ok(()),
        // Another run of the same commit got there first.
        Err(_) if fs::try_exists(&workspace).await.unwrap_or(false) => {
            let _ = fs::remove_dir_all(&staging).await;
            Ok(())
        }
        Err(source) => Err(StageError::Io {
            path: workspace,
            source,
        }),
    }
}
