//! Configuration for the ingest module.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the ingest pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Uploads allowed to stream at the same time.
    #[serde(default = "default_admission_window")]
    pub admission_window: usize,

    /// Root of the content-addressed store.
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,

    /// Directory for partial uploads. Defaults to `<storage_root>/.partial`.
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,

    /// Append a JSON line per stored upload to `<storage_root>/manifest.jsonl`.
    #[serde(default = "default_manifest")]
    pub manifest: bool,

    /// Backlog limit of the manifest writer.
    #[serde(default = "default_manifest_depth")]
    pub manifest_depth: usize,
}

fn default_admission_window() -> usize {
    4
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("intake-store")
}

fn default_manifest() -> bool {
    true
}

fn default_manifest_depth() -> usize {
    64
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            admission_window: default_admission_window(),
            storage_root: default_storage_root(),
            temp_dir: None,
            manifest: default_manifest(),
            manifest_depth: default_manifest_depth(),
        }
    }
}

impl IngestConfig {
    /// Sets the admission window.
    pub fn with_admission_window(mut self, window: usize) -> Self {
        self.admission_window = window;
        self
    }

    /// Sets the storage root.
    pub fn with_storage_root(mut self, root: PathBuf) -> Self {
        self.storage_root = root;
        self
    }

    /// Enables or disables the manifest.
    pub fn with_manifest(mut self, enabled: bool) -> Self {
        self.manifest = enabled;
        self
    }

    /// Directory partial uploads are written to.
    pub fn partial_dir(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(|| self.storage_root.join(".partial"))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.storage_root.join("manifest.jsonl")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = IngestConfig::default();
        assert_eq!(config.admission_window, 4);
        assert_eq!(config.storage_root, PathBuf::from("intake-store"));
        assert!(config.manifest);
        assert_eq!(config.partial_dir(), PathBuf::from("intake-store/.partial"));
    }

    #[test]
    fn test_explicit_temp_dir() {
        let config = IngestConfig {
            temp_dir: Some(PathBuf::from("/scratch")),
            ..IngestConfig::default()
        };
        assert_eq!(config.partial_dir(), PathBuf::from("/scratch"));
    }

    #[test]
    fn test_config_builder() {
        let config = IngestConfig::default()
            .with_admission_window(2)
            .with_storage_root(PathBuf::from("/data"))
            .with_manifest(false);

        assert_eq!(config.admission_window, 2);
        assert_eq!(config.manifest_path(), PathBuf::from("/data/manifest.jsonl"));
        assert!(!config.manifest);
    }
}
