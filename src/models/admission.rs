//! RAII admission guard handed to the request path.
//!
//! Holding a guard pins the instance's native handle: unload waits until every
//! guard is dropped. Dropping is the only way to release, so early returns, `?`
//! and cancelled futures all release exactly once.

use std::fmt;
use std::sync::Arc;

use super::engine::NativeHandle;
use super::error::ServingError;
use super::instance::ModelInstance;
use crate::sequence::{SequenceError, SequenceId, SequenceTouch};

/// Permission to use one available instance for one request.
pub struct AdmissionGuard {
    instance: Arc<ModelInstance>,
}

impl AdmissionGuard {
    pub(super) fn new(instance: Arc<ModelInstance>) -> Self {
        Self { instance }
    }

    pub fn instance(&self) -> &Arc<ModelInstance> {
        &self.instance
    }

    pub fn version(&self) -> u64 {
        self.instance.version()
    }

    /// Run `f` against the native handle.
    ///
    /// Only fails if the handle was force-released at the end of a shutdown grace period.
    pub fn with_handle<R>(&self, f: impl FnOnce(&dyn NativeHandle) -> R) -> Result<R, ServingError> {
        self.instance.with_handle(f)
    }

    /// Create or refresh a sequence on a stateful instance.
    pub fn touch_sequence(&self, id: SequenceId) -> Result<SequenceTouch, ServingError> {
        let seqs = self.instance.sequences().ok_or(SequenceError::Stateless)?;
        Ok(seqs.touch(id)?)
    }

    /// End a sequence on a stateful instance.
    pub fn end_sequence(&self, id: SequenceId) -> Result<(), ServingError> {
        let seqs = self.instance.sequences().ok_or(SequenceError::Stateless)?;
        Ok(seqs.remove(id)?)
    }
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        self.instance.release();
    }
}

impl fmt::Debug for AdmissionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionGuard")
            .field("instance", &self.instance.id())
            .field("model", &self.instance.name())
            .field("version", &self.instance.version())
            .finish()
    }
}
