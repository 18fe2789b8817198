//! One serialized unit per model name

use std::path::{Path, PathBuf};

use crate::error::{Result, ServiceError};
use crate::training::TrainedUnit;
use super::{validate_name, write_atomic};

const ARTIFACT_EXTENSION: &str = "model";

/// Directory of `{name}.model` files
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str) -> Result<PathBuf> {
        validate_name("Model", name)?;
        Ok(self.dir.join(format!("{}.{}", name, ARTIFACT_EXTENSION)))
    }

    pub fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.path(name)?.is_file())
    }

    /// Persist `unit`, replacing any previous artifact of the same name.
    pub fn save(&self, name: &str, unit: &TrainedUnit) -> Result<PathBuf> {
        let path = self.path(name)?;
        let json = serde_json::to_vec(unit)?;
        write_atomic(&path, &json)?;
        tracing::debug!(model = %name, path = %path.display(), bytes = json.len(), "Artifact saved");
        Ok(path)
    }

    pub fn load(&self, name: &str) -> Result<TrainedUnit> {
        let path = self.path(name)?;
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ServiceError::not_found(format!("Model '{}'", name)));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes).map_err(|e| {
            ServiceError::internal(format!("Artifact for model '{}' is corrupt: {}", name, e))
        })
    }

    /// Remove the artifact. Absence is `NotFound`.
    pub fn delete(&self, name: &str) -> Result<()> {
        let path = self.path(name)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ServiceError::not_found(format!("Model '{}'", name)))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::{CapabilityRegistry, NoopObserver};
    use polars::prelude::*;

    fn trained_unit() -> TrainedUnit {
        let mut unit = CapabilityRegistry::builtin().create_unit("DecisionTree", None).unwrap();
        let a: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let y: Vec<i64> = (0..20).map(|i| (i >= 10) as i64).collect();
        let df = DataFrame::new(vec![Series::new("a".into(), a)]).unwrap();
        unit.train(&df, &Series::new("y".into(), y), &NoopObserver).unwrap();
        unit
    }

    #[test]
    fn test_save_load_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let unit = trained_unit();

        let path = store.save("tree", &unit).unwrap();
        assert!(path.ends_with("tree.model"));
        assert!(store.exists("tree").unwrap());

        let loaded = store.load("tree").unwrap();
        assert!(loaded.is_trained());
        assert_eq!(loaded.model_type(), "DecisionTree");

        store.delete("tree").unwrap();
        assert!(!store.exists("tree").unwrap());
        assert!(matches!(store.delete("tree"), Err(ServiceError::NotFound(_))));
        assert!(matches!(store.load("tree"), Err(ServiceError::NotFound(_))));
    }

    #[test]
    fn test_corrupt_artifact_is_internal() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        std::fs::write(dir.path().join("broken.model"), b"not json").unwrap();
        assert!(matches!(store.load("broken"), Err(ServiceError::Internal(_))));
    }

    #[test]
    fn test_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        assert!(matches!(store.load("../x"), Err(ServiceError::InvalidInput(_))));
    }
}
