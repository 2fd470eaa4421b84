// SPDX-License-Identifier: CEPL-1.0
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("failed to open file {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("file {} is empty", .0.display())]
    Empty(PathBuf),
}

/// Reads a whole file into memory. Empty files are rejected since every
/// caller (shader modules, meshes) needs at least one byte to work with.
pub fn read_blob(path: impl AsRef<Path>) -> Result<Vec<u8>, BlobError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|source| BlobError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    if bytes.is_empty() {
        return Err(BlobError::Empty(path.to_path_buf()));
    }
    debug!("read {} bytes from {}", bytes.len(), path.display());
    Ok(bytes)
}
