//! Version discovery: which versions of a model should be served right now.
//!
//! A model repository holds one directory per model and, below it, one numeric
//! directory per version:
//!
//! ```text
//! models/
//!   resnet/
//!     1/model.onnx
//!     2/model.onnx
//! ```
//!
//! Each discovered version carries a fingerprint of its directory contents, so a
//! version whose files change on disk compares unequal and gets replaced.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::engine::{DesiredVersions, VersionConfig};

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Model directory not found: {0}")]
    ModelDirMissing(PathBuf),

    #[error("Discovery task failed: {0}")]
    TaskFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which discovered versions to serve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionPolicy {
    All,
    /// The `n` highest versions.
    Latest(usize),
    Specific(BTreeSet<u64>),
}

impl Default for VersionPolicy {
    fn default() -> Self {
        Self::Latest(1)
    }
}

impl VersionPolicy {
    /// Filter an ascending list of discovered versions.
    pub fn select(&self, available: &[u64]) -> Vec<u64> {
        match self {
            Self::All => available.to_vec(),
            Self::Latest(n) => {
                let skip = available.len().saturating_sub(*n);
                available[skip..].to_vec()
            }
            Self::Specific(wanted) => available
                .iter()
                .copied()
                .filter(|v| wanted.contains(v))
                .collect(),
        }
    }
}

/// Produces the desired version set of one model on every reload tick.
#[async_trait]
pub trait VersionSource: Send + Sync + 'static {
    fn model_name(&self) -> &str;

    async fn desired_versions(&self) -> Result<DesiredVersions, DiscoveryError>;
}

/// Reads versions from `<root>/<model>/<version>/` on the local filesystem.
#[derive(Debug, Clone)]
pub struct DirectoryVersionReader {
    name: String,
    model_dir: PathBuf,
    policy: VersionPolicy,
    stateful: bool,
}

impl DirectoryVersionReader {
    pub fn new(root: impl AsRef<Path>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            model_dir: root.as_ref().join(&name),
            name,
            policy: VersionPolicy::default(),
            stateful: false,
        }
    }

    pub fn with_policy(mut self, policy: VersionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn stateful(mut self, stateful: bool) -> Self {
        self.stateful = stateful;
        self
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    /// One reader per model directory under `root`, sorted by model name.
    pub fn discover_models(
        root: impl AsRef<Path>,
        stateful_models: &BTreeSet<String>,
    ) -> Result<Vec<Self>, DiscoveryError> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(DiscoveryError::ModelDirMissing(root.to_path_buf()));
        }
        let mut names: Vec<String> = std::fs::read_dir(root)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .filter(|name| !name.starts_with('.'))
            .collect();
        names.sort();
        Ok(names
            .into_iter()
            .map(|name| {
                let stateful = stateful_models.contains(&name);
                Self::new(root, name).stateful(stateful)
            })
            .collect())
    }

    /// Blocking scan of the model directory.
    pub fn scan(&self) -> Result<DesiredVersions, DiscoveryError> {
        if !self.model_dir.is_dir() {
            return Err(DiscoveryError::ModelDirMissing(self.model_dir.clone()));
        }

        let mut found = BTreeMap::new();
        for entry in std::fs::read_dir(&self.model_dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            // Version 0 is reserved for "default"; non-numeric dirs are not versions.
            let version = match entry.file_name().to_str().and_then(|s| s.parse::<u64>().ok()) {
                Some(0) | None => {
                    tracing::debug!(model = %self.name, path = %path.display(), "skipping non-version directory");
                    continue;
                }
                Some(v) => v,
            };
            found.insert(version, path);
        }

        let available: Vec<u64> = found.keys().copied().collect();
        let mut desired = DesiredVersions::new();
        for version in self.policy.select(&available) {
            if let Some(path) = found.remove(&version) {
                let fingerprint = fingerprint_dir(&path)?;
                let config = VersionConfig::new(path)
                    .stateful(self.stateful)
                    .with_fingerprint(fingerprint);
                desired.insert(version, config);
            }
        }
        Ok(desired)
    }
}

#[async_trait]
impl VersionSource for DirectoryVersionReader {
    fn model_name(&self) -> &str {
        &self.name
    }

    async fn desired_versions(&self) -> Result<DesiredVersions, DiscoveryError> {
        let reader = self.clone();
        tokio::task::spawn_blocking(move || reader.scan())
            .await
            .map_err(|e| DiscoveryError::TaskFailed(e.to_string()))?
    }
}

/// SHA-256 over relative path, size and mtime of every file below `dir`.
pub fn fingerprint_dir(dir: &Path) -> Result<String, DiscoveryError> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if meta.is_dir() {
                pending.push(entry.path());
            } else {
                let relative = entry
                    .path()
                    .strip_prefix(dir)
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|_| entry.path());
                let mtime = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .unwrap_or_default();
                files.push((relative, meta.len(), mtime));
            }
        }
    }
    files.sort();

    let mut hasher = Sha256::new();
    for (relative, len, mtime) in &files {
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(len.to_le_bytes());
        hasher.update(mtime.as_secs().to_le_bytes());
        hasher.update(mtime.subsec_nanos().to_le_bytes());
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_version(root: &Path, model: &str, version: &str, contents: &[u8]) {
        let dir = root.join(model).join(version);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("model.onnx"), contents).unwrap();
    }

    #[test]
    fn test_policy_select() {
        let available = [1, 2, 5, 9];
        assert_eq!(VersionPolicy::All.select(&available), vec![1, 2, 5, 9]);
        assert_eq!(VersionPolicy::Latest(2).select(&available), vec![5, 9]);
        assert_eq!(VersionPolicy::Latest(10).select(&available), vec![1, 2, 5, 9]);
        assert!(VersionPolicy::Latest(0).select(&available).is_empty());
        let specific = VersionPolicy::Specific([2, 3, 9].into_iter().collect());
        assert_eq!(specific.select(&available), vec![2, 9]);
    }

    #[test]
    fn test_scan_skips_zero_and_non_numeric() {
        let root = tempfile::tempdir().unwrap();
        make_version(root.path(), "resnet", "0", b"a");
        make_version(root.path(), "resnet", "1", b"b");
        make_version(root.path(), "resnet", "3", b"c");
        make_version(root.path(), "resnet", "tmp", b"d");
        std::fs::write(root.path().join("resnet").join("4"), b"file, not dir").unwrap();

        let reader = DirectoryVersionReader::new(root.path(), "resnet").with_policy(VersionPolicy::All);
        let desired = reader.scan().unwrap();
        assert_eq!(desired.keys().copied().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(desired[&1].fingerprint.len(), 64);
        assert!(!desired[&1].stateful);
    }

    #[test]
    fn test_default_policy_serves_latest() {
        let root = tempfile::tempdir().unwrap();
        make_version(root.path(), "bert", "1", b"a");
        make_version(root.path(), "bert", "2", b"b");
        let desired = DirectoryVersionReader::new(root.path(), "bert").scan().unwrap();
        assert_eq!(desired.keys().copied().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_fingerprint_tracks_content_changes() {
        let root = tempfile::tempdir().unwrap();
        make_version(root.path(), "m", "1", b"abc");
        let dir = root.path().join("m").join("1");
        let before = fingerprint_dir(&dir).unwrap();
        assert_eq!(before, fingerprint_dir(&dir).unwrap());

        std::fs::write(dir.join("extra.bin"), b"more").unwrap();
        assert_ne!(before, fingerprint_dir(&dir).unwrap());
    }

    #[test]
    fn test_missing_model_dir() {
        let root = tempfile::tempdir().unwrap();
        let reader = DirectoryVersionReader::new(root.path(), "ghost");
        assert!(matches!(reader.scan(), Err(DiscoveryError::ModelDirMissing(_))));
    }

    #[test]
    fn test_discover_models_marks_stateful() {
        let root = tempfile::tempdir().unwrap();
        make_version(root.path(), "b", "1", b"x");
        make_version(root.path(), "a", "1", b"y");
        let stateful: BTreeSet<String> = ["b".to_string()].into_iter().collect();

        let readers = DirectoryVersionReader::discover_models(root.path(), &stateful).unwrap();
        let names: Vec<&str> = readers.iter().map(|r| r.model_name()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(readers[1].scan().unwrap()[&1].stateful);
    }

    #[tokio::test]
    async fn test_desired_versions_async() {
        let root = tempfile::tempdir().unwrap();
        make_version(root.path(), "m", "7", b"z");
        let reader = DirectoryVersionReader::new(root.path(), "m");
        let desired = reader.desired_versions().await.unwrap();
        assert!(desired.contains_key(&7));
    }
}
