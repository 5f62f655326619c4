//! Native engine adapter seam.
//!
//! The runtime never executes inference itself. It asks a `ModelEngine` for an
//! opaque `NativeHandle` when a version loads and gives it back when the version
//! unloads. Production engines and test fakes are interchangeable behind this trait.

use std::any::Any;
use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::instance::InstanceId;

/// Errors reported by a native engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Model path not allowed: {0}")]
    PathNotAllowed(PathBuf),

    #[error("Model file not found in {0}")]
    NotFound(PathBuf),

    #[error("Invalid model format: {0}")]
    InvalidFormat(String),

    #[error("Engine failure: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Opaque resource owned by exactly one model instance.
pub trait NativeHandle: Send + Sync + 'static {
    /// Downcast hook for the request path that knows the concrete engine.
    fn as_any(&self) -> &dyn Any;

    /// Approximate resident size, reported in status snapshots.
    fn footprint_bytes(&self) -> usize {
        0
    }
}

/// Creates and destroys native handles.
#[async_trait]
pub trait ModelEngine: Send + Sync + 'static {
    async fn create_handle(
        &self,
        instance: InstanceId,
        config: &VersionConfig,
    ) -> Result<Box<dyn NativeHandle>, EngineError>;

    async fn destroy_handle(&self, instance: InstanceId, handle: Box<dyn NativeHandle>);
}

/// Everything needed to load one version.
///
/// Two configs comparing unequal means the version changed on disk or in
/// configuration and must be replaced, never patched in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionConfig {
    /// Directory holding the version's artifacts.
    pub base_path: PathBuf,
    /// Stateful versions track sequences and are registered with the reaper.
    pub stateful: bool,
    /// Digest of the on-disk content, empty when unknown.
    pub fingerprint: String,
    /// Engine-specific settings passed through untouched.
    pub parameters: BTreeMap<String, String>,
}

impl VersionConfig {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            ..Default::default()
        }
    }

    pub fn stateful(mut self, stateful: bool) -> Self {
        self.stateful = stateful;
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = fingerprint.into();
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

/// Desired set of versions for one model: version number to load config.
pub type DesiredVersions = BTreeMap<u64, VersionConfig>;
