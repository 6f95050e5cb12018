use std::path::{Path, PathBuf};

use crate::EngineError;

/// Tars a build context directory the way the engine expects it.
pub async fn pack(context: &Path) -> Result<Vec<u8>, EngineError> {
    let context: PathBuf = context.to_owned();

    tokio::task::spawn_blocking(move || {
        let wrap = |source: std::io::Error| EngineError::Context {
            path: context.clone(),
            source,
        };

        let mut builder = tar::Builder::new(Vec::new());
        builder.follow_symlinks(false);
        builder.append_dir_all(".", &context).map_err(wrap)?;
        builder.into_inner().map_err(wrap)
    })
    .await?
}
