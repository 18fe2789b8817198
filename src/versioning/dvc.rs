//! DVC command-line driver

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::config::Settings;
use super::DatasetVersioning;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const ADD_TIMEOUT: Duration = Duration::from_secs(30);
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(120);
const LIST_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs `dvc` in the project root with the S3 credentials in its environment
#[derive(Debug, Clone)]
pub struct DvcVersioning {
    program: PathBuf,
    work_dir: PathBuf,
    datasets_dir: PathBuf,
    remote: String,
    env: Vec<(&'static str, String)>,
    enabled: bool,
}

impl DvcVersioning {
    /// Probe `dvc version`; if it is missing or fails, the channel is disabled.
    pub fn new(settings: &Settings) -> Self {
        Self::with_program("dvc", settings)
    }

    pub fn with_program(program: impl Into<PathBuf>, settings: &Settings) -> Self {
        let mut dvc = Self {
            program: program.into(),
            work_dir: settings.base_dir.clone(),
            datasets_dir: settings.datasets_dir.clone(),
            remote: settings.dvc_remote.clone(),
            env: settings.s3.child_env(),
            enabled: false,
        };
        dvc.enabled = match dvc.run(&["version"], PROBE_TIMEOUT) {
            Ok(_) => {
                tracing::info!(program = %dvc.program.display(), "DVC available");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "DVC unavailable, dataset versioning disabled");
                false
            }
        };
        dvc
    }

    fn sidecar(&self, file_name: &str) -> String {
        self.datasets_dir
            .join(format!("{}.dvc", file_name))
            .to_string_lossy()
            .into_owned()
    }

    /// Datasets directory relative to the project root, as `dvc list` wants it.
    fn datasets_rel(&self) -> String {
        self.datasets_dir
            .strip_prefix(&self.work_dir)
            .unwrap_or_else(|_| Path::new("datasets"))
            .to_string_lossy()
            .into_owned()
    }

    /// Run one dvc command to completion within `timeout`, returning stdout.
    ///
    /// Callers are synchronous (startup or the blocking pool), so each command
    /// gets its own current-thread runtime. The child is killed when the
    /// timeout drops its future.
    fn run(&self, args: &[&str], timeout: Duration) -> Result<String, String> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| format!("failed to start runtime for dvc: {}", e))?;

        let mut command = Command::new(&self.program);
        command
            .args(args)
            .current_dir(&self.work_dir)
            .envs(self.env.iter().map(|(k, v)| (*k, v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = runtime
            .block_on(async { tokio::time::timeout(timeout, command.output()).await })
            .map_err(|_| format!("dvc {} timed out after {}s", args.join(" "), timeout.as_secs()))?
            .map_err(|e| format!("failed to start {}: {}", self.program.display(), e))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(format!(
                "dvc {} exited with {}: {}",
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))
        }
    }
}

impl DatasetVersioning for DvcVersioning {
    fn enabled(&self) -> bool {
        self.enabled
    }

    fn add(&self, file_name: &str) -> bool {
        if !self.enabled {
            tracing::warn!("DVC unavailable, skipping add");
            return false;
        }
        let path = self.datasets_dir.join(file_name);
        if !path.is_file() {
            tracing::error!(path = %path.display(), "Dataset to version does not exist");
            return false;
        }
        let target = path.to_string_lossy();
        match self.run(&["add", target.as_ref()], ADD_TIMEOUT) {
            Ok(_) => {
                tracing::info!(dataset = %file_name, "Dataset added to DVC");
                true
            }
            Err(e) => {
                tracing::error!(dataset = %file_name, error = %e, "DVC add failed");
                false
            }
        }
    }

    fn push(&self, file_name: Option<&str>) -> bool {
        if !self.enabled {
            tracing::warn!("DVC unavailable, skipping push");
            return false;
        }
        let target = file_name.map(|f| self.sidecar(f));
        let mut args = vec!["push", "-r", self.remote.as_str()];
        args.extend(target.as_deref());
        match self.run(&args, TRANSFER_TIMEOUT) {
            Ok(_) => {
                tracing::info!(dataset = ?file_name, remote = %self.remote, "DVC push complete");
                true
            }
            Err(e) => {
                tracing::error!(dataset = ?file_name, error = %e, "DVC push failed");
                false
            }
        }
    }

    fn pull(&self, file_name: Option<&str>) -> bool {
        if !self.enabled {
            tracing::warn!("DVC unavailable, skipping pull");
            return false;
        }
        let target = file_name.map(|f| self.sidecar(f));
        let mut args = vec!["pull", "-r", self.remote.as_str()];
        args.extend(target.as_deref());
        match self.run(&args, TRANSFER_TIMEOUT) {
            Ok(_) => {
                tracing::info!(dataset = ?file_name, "DVC pull complete");
                true
            }
            Err(e) => {
                tracing::error!(dataset = ?file_name, error = %e, "DVC pull failed");
                false
            }
        }
    }

    fn tracked_files(&self) -> Vec<String> {
        if !self.enabled {
            return Vec::new();
        }
        let rel = self.datasets_rel();
        match self.run(&["list", ".", rel.as_str()], LIST_TIMEOUT) {
            Ok(out) => out
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
            Err(e) => {
                tracing::error!(error = %e, "Listing DVC-tracked files failed");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(dir: &Path) -> Settings {
        let base = dir.to_string_lossy().into_owned();
        Settings::from_lookup(move |key| (key == "BASE_DIR").then(|| base.clone()))
    }

    #[test]
    fn test_missing_binary_disables_channel() {
        let dir = tempfile::tempdir().unwrap();
        let dvc = DvcVersioning::with_program("/nonexistent/dvc-binary", &settings(dir.path()));
        assert!(!dvc.enabled());
        assert!(!dvc.add("iris.csv"));
        assert!(!dvc.push(Some("iris.csv")));
        assert!(!dvc.pull(None));
        assert!(dvc.tracked_files().is_empty());
    }

    #[test]
    fn test_sidecar_and_relative_dir() {
        let dir = tempfile::tempdir().unwrap();
        let dvc = DvcVersioning::with_program("/nonexistent/dvc-binary", &settings(dir.path()));
        assert!(dvc.sidecar("iris.csv").ends_with("datasets/iris.csv.dvc"));
        assert_eq!(dvc.datasets_rel(), "datasets");
    }

    #[cfg(unix)]
    #[test]
    fn test_run_reports_exit_status_and_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let dvc = DvcVersioning::with_program("echo", &settings(dir.path()));
        assert!(dvc.enabled());
        assert_eq!(dvc.run(&["datasets/iris.csv"], LIST_TIMEOUT).unwrap().trim(), "datasets/iris.csv");

        let failing = DvcVersioning::with_program("false", &settings(dir.path()));
        assert!(!failing.enabled());
        assert!(failing.run(&["add"], ADD_TIMEOUT).unwrap_err().contains("exited with"));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_inside_blocking_pool() {
        let dir = tempfile::tempdir().unwrap();
        let dvc = DvcVersioning::with_program("echo", &settings(dir.path()));
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let out = runtime
            .block_on(runtime.spawn_blocking(move || dvc.run(&["ok"], LIST_TIMEOUT)))
            .unwrap();
        assert_eq!(out.unwrap().trim(), "ok");
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_child() {
        let dir = tempfile::tempdir().unwrap();
        let dvc = DvcVersioning::with_program("sleep", &settings(dir.path()));
        let started = std::time::Instant::now();
        let result = dvc.run(&["5"], Duration::from_millis(200));
        assert!(result.unwrap_err().contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
