//! Memory-mapped native engine.
//!
//! Loads a version by mapping its model file read-only. The handle is the mapping
//! itself; the request path downcasts it to `MappedModel` to reach the bytes.

use std::any::Any;
use std::fs::File;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use memmap2::Mmap;

use super::engine::{EngineError, ModelEngine, NativeHandle, VersionConfig};
use super::instance::InstanceId;

/// File extensions recognized as model artifacts, in preference order.
const MODEL_EXTENSIONS: &[&str] = &["gguf", "onnx", "safetensors", "bin"];

/// Read-only mapping of one model file.
pub struct MappedModel {
    mmap: Mmap,
    path: PathBuf,
}

impl MappedModel {
    pub fn open(path: &Path) -> Result<Self, EngineError> {
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Err(EngineError::InvalidFormat(format!("{} is empty", path.display())));
        }
        // SAFETY: the file is opened read-only and model artifacts are immutable
        // while served; a changed file produces a new version fingerprint instead.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self {
            mmap,
            path: path.to_path_buf(),
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }
}

impl NativeHandle for MappedModel {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn footprint_bytes(&self) -> usize {
        self.mmap.len()
    }
}

/// Engine that maps model files found under a repository root.
pub struct MappedEngine {
    root: PathBuf,
}

impl MappedEngine {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Canonicalize `dir` and require it to sit under the repository root.
    pub fn validate_path(&self, dir: &Path) -> Result<PathBuf, EngineError> {
        let canonical = dir
            .canonicalize()
            .map_err(|_| EngineError::NotFound(dir.to_path_buf()))?;
        let root = self
            .root
            .canonicalize()
            .map_err(|_| EngineError::NotFound(self.root.clone()))?;
        if !canonical.starts_with(&root) {
            return Err(EngineError::PathNotAllowed(canonical));
        }
        Ok(canonical)
    }
}

/// Pick the model file of a version directory by extension preference.
fn find_model_file(dir: &Path) -> Result<PathBuf, EngineError> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();

    MODEL_EXTENSIONS
        .iter()
        .find_map(|ext| {
            files
                .iter()
                .find(|p| p.extension().and_then(|e| e.to_str()) == Some(*ext))
                .cloned()
        })
        .ok_or_else(|| EngineError::NotFound(dir.to_path_buf()))
}

#[async_trait]
impl ModelEngine for MappedEngine {
    async fn create_handle(
        &self,
        instance: InstanceId,
        config: &VersionConfig,
    ) -> Result<Box<dyn NativeHandle>, EngineError> {
        let dir = self.validate_path(&config.base_path)?;
        let model = tokio::task::spawn_blocking(move || {
            let file = find_model_file(&dir)?;
            MappedModel::open(&file)
        })
        .await
        .map_err(|e| EngineError::Backend(format!("mapping task failed: {}", e)))??;

        tracing::debug!(
            instance = %instance,
            path = %model.path().display(),
            bytes = model.len(),
            "mapped model file"
        );
        Ok(Box::new(model))
    }

    async fn destroy_handle(&self, instance: InstanceId, handle: Box<dyn NativeHandle>) {
        let bytes = handle.footprint_bytes();
        drop(handle);
        tracing::debug!(instance = %instance, bytes, "unmapped model file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(path: &Path, bytes: &[u8]) {
        let mut f = File::create(path).unwrap();
        f.write_all(bytes).unwrap();
    }

    #[test]
    fn test_prefers_known_extensions() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join("README.txt"), b"docs");
        write_file(&dir.path().join("weights.bin"), b"bin");
        write_file(&dir.path().join("model.onnx"), b"onnx");
        let found = find_model_file(dir.path()).unwrap();
        assert_eq!(found.file_name().unwrap(), "model.onnx");
    }

    #[test]
    fn test_missing_model_file() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join("notes.md"), b"x");
        assert!(matches!(find_model_file(dir.path()), Err(EngineError::NotFound(_))));
    }

    #[test]
    fn test_path_outside_root_rejected() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let engine = MappedEngine::new(root.path());
        assert!(matches!(
            engine.validate_path(outside.path()),
            Err(EngineError::PathNotAllowed(_))
        ));
    }

    #[tokio::test]
    async fn test_create_and_destroy_handle() {
        let root = tempfile::tempdir().unwrap();
        let version_dir = root.path().join("resnet").join("1");
        std::fs::create_dir_all(&version_dir).unwrap();
        write_file(&version_dir.join("model.gguf"), b"GGUF0000");

        let engine = MappedEngine::new(root.path());
        let config = VersionConfig::new(&version_dir);
        let handle = engine.create_handle(InstanceId::new(1), &config).await.unwrap();
        assert_eq!(handle.footprint_bytes(), 8);
        let mapped = handle.as_any().downcast_ref::<MappedModel>().unwrap();
        assert_eq!(&mapped.as_bytes()[..4], b"GGUF");
        engine.destroy_handle(InstanceId::new(1), handle).await;
    }

    #[tokio::test]
    async fn test_empty_file_is_invalid() {
        let root = tempfile::tempdir().unwrap();
        write_file(&root.path().join("model.gguf"), b"");
        let engine = MappedEngine::new(root.path());
        let err = engine
            .create_handle(InstanceId::new(2), &VersionConfig::new(root.path()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::InvalidFormat(_)));
    }
}
