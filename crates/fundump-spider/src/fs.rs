use crate::error::Result;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Reads a `.json` file from `path`.
pub async fn read_json<T: serde::de::DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    trace!("reading file path: {}", path.display());
    let file = tokio::fs::read(path).await?;
    trace!("file read; deserializing bytes ...");
    let data: T = serde_json::from_slice(&file)?;
    Ok(data)
}

/// Creates `dir` (and any parents) if it does not exist yet, returning it.
pub async fn ensure_dir(dir: impl AsRef<Path>) -> Result<PathBuf> {
    let dir = dir.as_ref();
    trace!("checking directory path: {}", dir.display());
    tokio::fs::create_dir_all(dir).await?;
    Ok(dir.to_path_buf())
}
