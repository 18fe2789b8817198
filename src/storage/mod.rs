//! Durable state on the local filesystem: model artifacts, the metadata
//! index and uploaded datasets.

mod artifacts;
mod datasets;
mod metadata;

pub use artifacts::ArtifactStore;
pub use datasets::{DatasetRecord, DatasetRepository, SyncSummary};
pub use metadata::{MetadataStore, ModelRecord};

use std::io::Write;
use std::path::Path;

use crate::error::{Result, ServiceError};

/// Reject names that could escape their storage directory.
pub fn validate_name(kind: &str, name: &str) -> Result<()> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::invalid(format!("{} name must not be empty", kind)));
    }
    if name.contains('/') || name.contains('\\') || name.contains("..") || name.contains('\0') {
        return Err(ServiceError::invalid(format!(
            "{} name '{}' must not contain path separators or '..'",
            kind, name
        )));
    }
    Ok(())
}

/// Replace `path` with `bytes` via a sibling temp file and a rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| ServiceError::from(e.error))?;
    Ok(())
}
