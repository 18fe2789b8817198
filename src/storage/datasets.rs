//! Dataset files on disk, with extension-insensitive lookup

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use polars::prelude::*;
use serde::Serialize;

use crate::error::{Result, ServiceError};
use crate::tabular::{column_names, parse_bytes, read_frame, write_frame, DatasetFormat};
use crate::versioning::{DatasetVersioning, DisabledVersioning};
use super::validate_name;

/// Descriptive info, computed on demand
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetRecord {
    /// File name including extension
    pub name: String,
    /// Bytes on disk
    pub size: u64,
    #[serde(rename = "rows")]
    pub row_count: Option<usize>,
    #[serde(rename = "columns")]
    pub column_names: Option<Vec<String>>,
    pub uploaded_at: DateTime<Utc>,
}

/// Outcome of re-pushing every dataset
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncSummary {
    pub versioning_enabled: bool,
    pub synced: Vec<String>,
    pub failed: Vec<String>,
}

pub struct DatasetRepository {
    dir: PathBuf,
    versioning: Arc<dyn DatasetVersioning>,
}

impl std::fmt::Debug for DatasetRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetRepository")
            .field("dir", &self.dir)
            .field("versioning", &self.versioning.enabled())
            .finish()
    }
}

impl DatasetRepository {
    pub fn open(dir: impl Into<PathBuf>, versioning: Arc<dyn DatasetVersioning>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, versioning })
    }

    /// Repository without a versioning side-channel
    pub fn local(dir: impl Into<PathBuf>) -> Result<Self> {
        Self::open(dir, Arc::new(DisabledVersioning))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn versioning(&self) -> &dyn DatasetVersioning {
        self.versioning.as_ref()
    }

    /// Find the file for `name`: as given, then with `.csv`, then with `.json`.
    pub fn resolve(&self, name: &str) -> Result<Option<PathBuf>> {
        validate_name("Dataset", name)?;
        let exact = self.dir.join(name);
        if exact.is_file() {
            return Ok(Some(exact));
        }
        if DatasetFormat::from_name(name).is_none() {
            for ext in [".csv", ".json"] {
                let candidate = self.dir.join(format!("{}{}", name, ext));
                if candidate.is_file() {
                    return Ok(Some(candidate));
                }
            }
        }
        // Extensions in other cases, e.g. `X.CSV` for `X` or `X.csv`
        Ok(self
            .data_files()?
            .into_iter()
            .filter(|p| names_dataset(p, name))
            .min_by_key(|p| matches!(format_of(p), DatasetFormat::Json)))
    }

    fn require(&self, name: &str) -> Result<PathBuf> {
        self.resolve(name)?
            .ok_or_else(|| ServiceError::not_found(format!("Dataset '{}'", name)))
    }

    /// Write `data` as `name` and version it. A `.json` name is stored as a JSON
    /// array of records; anything else as CSV, adding `.csv` when missing.
    pub fn save(&self, name: &str, data: &DataFrame) -> Result<DatasetRecord> {
        validate_name("Dataset", name)?;
        let (file_name, format) = match DatasetFormat::from_name(name) {
            Some(DatasetFormat::Json) => (name.to_string(), DatasetFormat::Json),
            Some(DatasetFormat::Csv) => (name.to_string(), DatasetFormat::Csv),
            None => (format!("{}.csv", name), DatasetFormat::Csv),
        };
        let path = self.dir.join(&file_name);
        write_frame(&path, data, format)?;
        tracing::info!(
            dataset = %file_name,
            rows = data.height(),
            columns = data.width(),
            "Dataset saved"
        );

        self.version(&file_name);
        self.describe(&path)
    }

    /// add, then push only if add succeeded
    fn version(&self, file_name: &str) -> bool {
        if !self.versioning.enabled() {
            tracing::debug!(dataset = %file_name, "Versioning disabled, dataset stays local");
            return false;
        }
        if !self.versioning.add(file_name) {
            tracing::warn!(dataset = %file_name, "Could not add dataset to version control");
            return false;
        }
        if !self.versioning.push(Some(file_name)) {
            tracing::warn!(dataset = %file_name, "Could not push dataset to remote storage");
            return false;
        }
        tracing::info!(dataset = %file_name, "Dataset versioned and pushed");
        true
    }

    pub fn load(&self, name: &str) -> Result<DataFrame> {
        let path = self.require(name)?;
        let df = read_frame(&path, format_of(&path))?;
        tracing::debug!(dataset = %name, rows = df.height(), columns = df.width(), "Dataset loaded");
        Ok(df)
    }

    pub fn info(&self, name: &str) -> Result<DatasetRecord> {
        let path = self.require(name)?;
        self.describe(&path)
    }

    fn describe(&self, path: &Path) -> Result<DatasetRecord> {
        let meta = std::fs::metadata(path)?;
        let uploaded_at: DateTime<Utc> = meta.modified()?.into();
        let (row_count, column_names) = match read_frame(path, format_of(path)) {
            Ok(df) => (Some(df.height()), Some(column_names(&df))),
            Err(_) => (None, None),
        };
        Ok(DatasetRecord {
            name: file_name_of(path),
            size: meta.len(),
            row_count,
            column_names,
            uploaded_at,
        })
    }

    fn data_files(&self) -> Result<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .and_then(DatasetFormat::from_name)
                    .is_some()
            })
            .collect();
        files.sort();
        Ok(files)
    }

    /// Every `.csv`/`.json` file, sorted by name
    pub fn list(&self) -> Result<Vec<DatasetRecord>> {
        let mut records = Vec::new();
        for path in self.data_files()? {
            match self.describe(&path) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "Skipping unreadable dataset")
                }
            }
        }
        Ok(records)
    }

    /// Remove the data file and its `.dvc` sidecar.
    pub fn delete(&self, name: &str) -> Result<()> {
        let path = self.require(name)?;
        std::fs::remove_file(&path)?;

        let sidecar = PathBuf::from(format!("{}.dvc", path.display()));
        if sidecar.is_file() {
            if let Err(e) = std::fs::remove_file(&sidecar) {
                tracing::warn!(path = %sidecar.display(), error = %e, "Could not remove DVC sidecar");
            }
        }
        tracing::info!(dataset = %name, "Dataset deleted");
        Ok(())
    }

    /// Re-add and push every dataset. Per-file failures are only recorded.
    pub fn sync_all(&self) -> Result<SyncSummary> {
        let mut summary = SyncSummary {
            versioning_enabled: self.versioning.enabled(),
            ..Default::default()
        };
        if !summary.versioning_enabled {
            tracing::warn!("Versioning disabled, skipping dataset sync");
            return Ok(summary);
        }

        tracing::info!("Syncing datasets to remote storage");
        for path in self.data_files()? {
            let file_name = file_name_of(&path);
            if self.version(&file_name) {
                summary.synced.push(file_name);
            } else {
                summary.failed.push(file_name);
            }
        }
        tracing::info!(
            synced = summary.synced.len(),
            failed = summary.failed.len(),
            "Dataset sync finished"
        );
        Ok(summary)
    }

    /// Fetch dataset files from the remote. `file_name` is the stored file
    /// name (`iris.csv`); `None` pulls everything tracked.
    pub fn pull(&self, file_name: Option<&str>) -> Result<bool> {
        if let Some(name) = file_name {
            validate_name("Dataset", name)?;
        }
        if !self.versioning.enabled() {
            tracing::warn!("Versioning disabled, skipping dataset pull");
            return Ok(false);
        }
        Ok(self.versioning.pull(file_name))
    }

    /// Files the versioning backend reports as tracked under the dataset dir.
    pub fn tracked(&self) -> Vec<String> {
        if !self.versioning.enabled() {
            return Vec::new();
        }
        self.versioning.tracked_files()
    }

    /// Parse an uploaded file body. Only `.csv` and `.json` names are accepted.
    pub fn parse_upload(&self, file_name: &str, bytes: &[u8]) -> Result<DataFrame> {
        validate_name("Dataset", file_name)?;
        let format = DatasetFormat::from_name(file_name).ok_or_else(|| {
            ServiceError::invalid(format!(
                "Unsupported file format for '{}': only .csv and .json are accepted",
                file_name
            ))
        })?;
        parse_bytes(bytes, format)
    }
}

fn format_of(path: &Path) -> DatasetFormat {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(DatasetFormat::from_name)
        .unwrap_or(DatasetFormat::Csv)
}

/// `path` is the dataset `name`, extension compared without case.
/// A bare `name` matches any data extension.
fn names_dataset(path: &Path, name: &str) -> bool {
    let (Some(stem), Some(ext)) = (
        path.file_stem().and_then(|s| s.to_str()),
        path.extension().and_then(|e| e.to_str()),
    ) else {
        return false;
    };
    match DatasetFormat::from_name(name) {
        Some(format) => {
            Path::new(name).file_stem().and_then(|s| s.to_str()) == Some(stem)
                && ext.eq_ignore_ascii_case(format.extension())
        }
        None => stem == name,
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        fail_add: bool,
        fail_on: Option<&'static str>,
    }

    impl DatasetVersioning for Recorder {
        fn enabled(&self) -> bool {
            true
        }
        fn add(&self, file_name: &str) -> bool {
            self.calls.lock().push(format!("add {}", file_name));
            !self.fail_add && self.fail_on != Some(file_name)
        }
        fn push(&self, file_name: Option<&str>) -> bool {
            self.calls.lock().push(format!("push {}", file_name.unwrap_or("*")));
            true
        }
        fn pull(&self, file_name: Option<&str>) -> bool {
            self.calls.lock().push(format!("pull {}", file_name.unwrap_or("*")));
            true
        }
        fn tracked_files(&self) -> Vec<String> {
            vec!["iris.csv".to_string()]
        }
    }

    fn frame() -> DataFrame {
        DataFrame::new(vec![
            Series::new("x".into(), vec![1.0, 2.0, 3.0]),
            Series::new("label".into(), vec!["a", "b", "a"]),
        ])
        .unwrap()
    }

    #[test]
    fn test_save_appends_csv_and_versions() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let repo = DatasetRepository::open(dir.path(), recorder.clone()).unwrap();

        let record = repo.save("iris", &frame()).unwrap();
        assert_eq!(record.name, "iris.csv");
        assert_eq!(record.row_count, Some(3));
        assert_eq!(record.column_names, Some(vec!["x".to_string(), "label".to_string()]));
        assert_eq!(*recorder.calls.lock(), vec!["add iris.csv", "push iris.csv"]);
    }

    #[test]
    fn test_push_skipped_when_add_fails() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder {
            fail_add: true,
            ..Default::default()
        });
        let repo = DatasetRepository::open(dir.path(), recorder.clone()).unwrap();
        repo.save("data.json", &frame()).unwrap();
        assert_eq!(*recorder.calls.lock(), vec!["add data.json"]);
        assert!(dir.path().join("data.json").is_file());
    }

    #[test]
    fn test_lookup_is_extension_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let repo = DatasetRepository::local(dir.path()).unwrap();
        repo.save("x", &frame()).unwrap();

        let a = repo.load("x").unwrap();
        let b = repo.load("x.csv").unwrap();
        assert!(a.equals(&b));
        assert!(matches!(repo.load("y"), Err(ServiceError::NotFound(_))));
    }

    #[test]
    fn test_upper_case_extension_is_listed_and_resolved() {
        let dir = tempfile::tempdir().unwrap();
        let repo = DatasetRepository::local(dir.path()).unwrap();
        repo.save("X.CSV", &frame()).unwrap();
        std::fs::write(dir.path().join("Y.Json"), r#"[{"x": 1.0}]"#).unwrap();

        let names: Vec<String> = repo.list().unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["X.CSV", "Y.Json"]);

        assert_eq!(repo.load("X").unwrap().height(), 3);
        assert_eq!(repo.load("X.csv").unwrap().height(), 3);
        assert_eq!(repo.load("Y").unwrap().height(), 1);
        assert!(matches!(repo.load("x"), Err(ServiceError::NotFound(_))));

        repo.delete("X").unwrap();
        assert!(!dir.path().join("X.CSV").exists());
    }

    #[test]
    fn test_json_dataset_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let repo = DatasetRepository::local(dir.path()).unwrap();
        repo.save("records.json", &frame()).unwrap();
        let df = repo.load("records").unwrap();
        assert_eq!(df.height(), 3);
        assert_eq!(column_names(&df), vec!["x", "label"]);
    }

    #[test]
    fn test_list_skips_other_files_and_reports_unparseable() {
        let dir = tempfile::tempdir().unwrap();
        let repo = DatasetRepository::local(dir.path()).unwrap();
        repo.save("b", &frame()).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        std::fs::write(dir.path().join("a.json"), "{broken").unwrap();

        let listed = repo.list().unwrap();
        let names: Vec<&str> = listed.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a.json", "b.csv"]);
        assert_eq!(listed[0].row_count, None);
        assert_eq!(listed[0].column_names, None);
    }

    #[test]
    fn test_delete_removes_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let repo = DatasetRepository::local(dir.path()).unwrap();
        repo.save("iris", &frame()).unwrap();
        std::fs::write(dir.path().join("iris.csv.dvc"), "outs: []").unwrap();

        repo.delete("iris").unwrap();
        assert!(!dir.path().join("iris.csv").exists());
        assert!(!dir.path().join("iris.csv.dvc").exists());
        assert!(matches!(repo.delete("iris"), Err(ServiceError::NotFound(_))));
    }

    #[test]
    fn test_sync_all() {
        let dir = tempfile::tempdir().unwrap();
        let local = DatasetRepository::local(dir.path()).unwrap();
        local.save("a", &frame()).unwrap();
        assert!(!local.sync_all().unwrap().versioning_enabled);

        let recorder = Arc::new(Recorder::default());
        let repo = DatasetRepository::open(dir.path(), recorder.clone()).unwrap();
        let summary = repo.sync_all().unwrap();
        assert_eq!(summary.synced, vec!["a.csv"]);
        assert!(summary.failed.is_empty());
    }

    #[test]
    fn test_sync_all_reports_partial_failure() {
        let dir = tempfile::tempdir().unwrap();
        let local = DatasetRepository::local(dir.path()).unwrap();
        for name in ["a", "b", "c"] {
            local.save(name, &frame()).unwrap();
        }

        let recorder = Arc::new(Recorder {
            fail_on: Some("b.csv"),
            ..Default::default()
        });
        let repo = DatasetRepository::open(dir.path(), recorder.clone()).unwrap();
        let summary = repo.sync_all().unwrap();
        assert!(summary.versioning_enabled);
        assert_eq!(summary.synced, vec!["a.csv", "c.csv"]);
        assert_eq!(summary.failed, vec!["b.csv"]);
        assert_eq!(
            *recorder.calls.lock(),
            vec!["add a.csv", "push a.csv", "add b.csv", "add c.csv", "push c.csv"]
        );
    }

    #[test]
    fn test_pull_and_tracked() {
        let dir = tempfile::tempdir().unwrap();
        let local = DatasetRepository::local(dir.path()).unwrap();
        assert!(!local.pull(None).unwrap());
        assert!(local.tracked().is_empty());

        let recorder = Arc::new(Recorder::default());
        let repo = DatasetRepository::open(dir.path(), recorder.clone()).unwrap();
        assert!(repo.pull(Some("iris.csv")).unwrap());
        assert!(repo.pull(None).unwrap());
        assert!(matches!(repo.pull(Some("../x")), Err(ServiceError::InvalidInput(_))));
        assert_eq!(*recorder.calls.lock(), vec!["pull iris.csv", "pull *"]);
        assert_eq!(repo.tracked(), vec!["iris.csv"]);
    }

    #[test]
    fn test_parse_upload_rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let repo = DatasetRepository::local(dir.path()).unwrap();
        assert!(matches!(
            repo.parse_upload("data.xlsx", b"a,b\n1,2\n"),
            Err(ServiceError::InvalidInput(_))
        ));
        assert_eq!(repo.parse_upload("data.csv", b"a,b\n1,2\n").unwrap().height(), 1);
    }
}
