//! Dataset versioning side-channel
//!
//! Every operation reports success as a `bool` and never fails the caller.
//! When versioning is unavailable all operations are no-ops returning `false`
//! (or an empty list).

mod dvc;

pub use dvc::DvcVersioning;

/// Puts dataset files under version control and syncs them with a remote
pub trait DatasetVersioning: Send + Sync {
    /// Decided once, at construction
    fn enabled(&self) -> bool;

    /// Track `file_name` (relative to the datasets directory).
    fn add(&self, file_name: &str) -> bool;

    /// Upload one tracked file, or everything when `file_name` is `None`.
    fn push(&self, file_name: Option<&str>) -> bool;

    /// Fetch one tracked file, or everything when `file_name` is `None`.
    fn pull(&self, file_name: Option<&str>) -> bool;

    fn tracked_files(&self) -> Vec<String>;
}

/// Versioning switched off
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledVersioning;

impl DatasetVersioning for DisabledVersioning {
    fn enabled(&self) -> bool {
        false
    }

    fn add(&self, _file_name: &str) -> bool {
        false
    }

    fn push(&self, _file_name: Option<&str>) -> bool {
        false
    }

    fn pull(&self, _file_name: Option<&str>) -> bool {
        false
    }

    fn tracked_files(&self) -> Vec<String> {
        Vec::new()
    }
}
