//! Model metadata index persisted as a single JSON document

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Result, ServiceError};
use crate::training::Hyperparameters;
use super::write_atomic;

const METADATA_FILE: &str = "metadata.json";

/// Descriptive record of a trained model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    /// Filled from the map key on load
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub model_type: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub hyperparameters: Hyperparameters,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default, alias = "clearml_task_id", skip_serializing_if = "Option::is_none")]
    pub tracking_id: Option<String>,
}

/// Accepts RFC 3339 as well as naive `YYYY-mm-ddTHH:MM:SS[.ffffff]` (read as UTC).
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|t| t.and_utc())
        })
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{}'", raw)))
}

/// In-memory copy of `metadata.json`, written through on every mutation
#[derive(Debug)]
pub struct MetadataStore {
    path: PathBuf,
    records: RwLock<BTreeMap<String, ModelRecord>>,
}

impl MetadataStore {
    /// Open `{models_dir}/metadata.json`; a missing file is an empty store.
    pub fn open(models_dir: &Path) -> Result<Self> {
        let path = models_dir.join(METADATA_FILE);
        let records = read_records(&path)?;
        tracing::debug!(path = %path.display(), models = records.len(), "Metadata loaded");
        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file, discarding the in-memory copy.
    pub fn reload(&self) -> Result<()> {
        let records = read_records(&self.path)?;
        *self.records.write() = records;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<ModelRecord> {
        self.records.read().get(name).cloned()
    }

    /// All records sorted by name
    pub fn list(&self) -> Vec<ModelRecord> {
        self.records.read().values().cloned().collect()
    }

    /// Insert or overwrite the record stored under `record.name`.
    pub fn upsert(&self, record: ModelRecord) -> Result<()> {
        let mut guard = self.records.write();
        let mut next = guard.clone();
        next.insert(record.name.clone(), record);
        self.persist(&next)?;
        *guard = next;
        Ok(())
    }

    /// Remove a record. Returns whether one existed.
    pub fn remove(&self, name: &str) -> Result<bool> {
        let mut guard = self.records.write();
        if !guard.contains_key(name) {
            return Ok(false);
        }
        let mut next = guard.clone();
        next.remove(name);
        self.persist(&next)?;
        *guard = next;
        Ok(true)
    }

    fn persist(&self, records: &BTreeMap<String, ModelRecord>) -> Result<()> {
        let json = serde_json::to_vec_pretty(records)?;
        write_atomic(&self.path, &json)
    }
}

fn read_records(path: &Path) -> Result<BTreeMap<String, ModelRecord>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(e.into()),
    };
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(BTreeMap::new());
    }

    let mut records: BTreeMap<String, ModelRecord> = serde_json::from_slice(&bytes).map_err(|e| {
        ServiceError::internal(format!("Metadata file {} is unreadable: {}", path.display(), e))
    })?;
    for (name, record) in records.iter_mut() {
        record.name = name.clone();
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(name: &str) -> ModelRecord {
        ModelRecord {
            name: name.to_string(),
            model_type: "RandomForest".to_string(),
            created_at: Utc::now(),
            hyperparameters: [("n_estimators".to_string(), json!(10))].into_iter().collect(),
            metrics: [("accuracy".to_string(), 0.9)].into_iter().collect(),
            tracking_id: None,
        }
    }

    #[test]
    fn test_upsert_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::open(dir.path()).unwrap();
        store.upsert(record("b")).unwrap();
        store.upsert(record("a")).unwrap();

        let reopened = MetadataStore::open(dir.path()).unwrap();
        let names: Vec<String> = reopened.list().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(reopened.get("a").unwrap().hyperparameters["n_estimators"], json!(10));
    }

    #[test]
    fn test_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::open(dir.path()).unwrap();
        store.upsert(record("a")).unwrap();
        assert!(store.remove("a").unwrap());
        assert!(!store.remove("a").unwrap());
        assert!(store.get("a").is_none());
        store.reload().unwrap();
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_reads_legacy_document() {
        let dir = tempfile::tempdir().unwrap();
        let legacy = json!({
            "iris_rf": {
                "type": "RandomForest",
                "created_at": "2024-05-01T12:30:45.123456",
                "metrics": {"accuracy": 0.93},
                "hyperparameters": {"n_estimators": 10},
                "clearml_task_id": "abc123"
            }
        });
        std::fs::write(dir.path().join("metadata.json"), legacy.to_string()).unwrap();

        let store = MetadataStore::open(dir.path()).unwrap();
        let rec = store.get("iris_rf").unwrap();
        assert_eq!(rec.name, "iris_rf");
        assert_eq!(rec.tracking_id.as_deref(), Some("abc123"));
        assert_eq!(rec.created_at.to_rfc3339(), "2024-05-01T12:30:45.123456+00:00");
    }

    #[test]
    fn test_corrupt_file_is_internal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("metadata.json"), "{oops").unwrap();
        assert!(matches!(MetadataStore::open(dir.path()), Err(ServiceError::Internal(_))));
    }
}
