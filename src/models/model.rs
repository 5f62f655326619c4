//! All versions of one named model and their reconciliation.
//!
//! The version table lock is only ever held for map reads and writes. Loads and
//! unloads run outside it, so a slow load of one version never delays lookups of
//! another. Reconciliations of the same model are serialized by a separate async
//! lock.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};

use super::engine::DesiredVersions;
use super::error::ServingError;
use super::instance::{DrainOutcome, LoadContext, ModelInstance, VersionSnapshot};
use super::status::VersionState;

/// Version selector of an incoming request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionRequest {
    /// Highest available version.
    Default,
    Specific(u64),
}

impl VersionRequest {
    /// Map a wire version number; 0 means "unversioned" and selects the default.
    pub fn from_wire(version: u64) -> Self {
        match version {
            0 => Self::Default,
            v => Self::Specific(v),
        }
    }
}

impl From<Option<u64>> for VersionRequest {
    fn from(version: Option<u64>) -> Self {
        version.map_or(Self::Default, Self::from_wire)
    }
}

impl fmt::Display for VersionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("default"),
            Self::Specific(v) => write!(f, "{}", v),
        }
    }
}

/// What one reconciliation did.
///
/// Failures of individual versions are collected; one bad version never stops
/// the others from being processed.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub loaded: Vec<u64>,
    pub replaced: Vec<u64>,
    pub retired: Vec<u64>,
    pub failures: Vec<(u64, ServingError)>,
}

impl ReconcileReport {
    /// Nothing was loaded, replaced, retired, or attempted and failed.
    pub fn is_noop(&self) -> bool {
        self.loaded.is_empty()
            && self.replaced.is_empty()
            && self.retired.is_empty()
            && self.failures.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

struct VersionTable {
    instances: BTreeMap<u64, Arc<ModelInstance>>,
    default_version: Option<u64>,
}

/// A named model and its versions.
pub struct Model {
    name: String,
    ctx: Arc<LoadContext>,
    table: RwLock<VersionTable>,
    /// Instances still draining in the background; shutdown waits on these too.
    retiring: Mutex<Vec<Arc<ModelInstance>>>,
    reconcile_lock: tokio::sync::Mutex<()>,
}

impl Model {
    pub fn new(name: impl Into<String>, ctx: Arc<LoadContext>) -> Self {
        Self {
            name: name.into(),
            ctx,
            table: RwLock::new(VersionTable {
                instances: BTreeMap::new(),
                default_version: None,
            }),
            retiring: Mutex::new(Vec::new()),
            reconcile_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Highest version that was available at the end of the last reconciliation.
    pub fn default_version(&self) -> Option<u64> {
        self.table.read().default_version
    }

    pub fn versions(&self) -> Vec<u64> {
        self.table.read().instances.keys().copied().collect()
    }

    pub fn instances(&self) -> Vec<Arc<ModelInstance>> {
        self.table.read().instances.values().cloned().collect()
    }

    pub fn snapshot(&self) -> Vec<VersionSnapshot> {
        self.instances().iter().map(|i| i.snapshot()).collect()
    }

    /// Look up an instance without admitting.
    ///
    /// With no available version, a default request falls back to the highest
    /// known version so the caller sees why it is unusable (loading, retired).
    pub fn get_instance(&self, request: VersionRequest) -> Result<Arc<ModelInstance>, ServingError> {
        let table = self.table.read();
        let found = match request {
            VersionRequest::Specific(version) => table.instances.get(&version),
            VersionRequest::Default => table
                .default_version
                .and_then(|v| table.instances.get(&v))
                .or_else(|| table.instances.values().next_back()),
        };
        found.cloned().ok_or_else(|| ServingError::ModelVersionMissing {
            name: self.name.clone(),
            version: request,
        })
    }

    /// Bring the loaded versions in line with `desired`.
    ///
    /// - absent versions are created and loaded
    /// - versions not desired begin unloading; teardown finishes in the background
    /// - available versions whose config changed are replaced: the new instance
    ///   loads alongside the old one and takes over only once available
    /// - failed or retired versions that are desired again get a fresh instance
    pub async fn reconcile(&self, desired: &DesiredVersions) -> ReconcileReport {
        let _serial = self.reconcile_lock.lock().await;
        let mut report = ReconcileReport::default();
        let mut fresh = Vec::new();
        let mut replacements = Vec::new();
        let mut discarded = Vec::new();
        let mut retiring = Vec::new();

        {
            let mut table = self.table.write();
            for (&version, config) in desired {
                let current = table.instances.get(&version).cloned();
                match current {
                    None => {
                        let instance = ModelInstance::new(&self.ctx, &self.name, version, config.clone());
                        table.instances.insert(version, instance.clone());
                        fresh.push(instance);
                    }
                    Some(current) => match current.state() {
                        VersionState::Available if current.config() != config => {
                            let instance = ModelInstance::new(&self.ctx, &self.name, version, config.clone());
                            replacements.push((instance, current));
                        }
                        VersionState::Available => {}
                        VersionState::Start | VersionState::Loading => {
                            tracing::warn!(
                                model = %self.name,
                                version,
                                "version left mid-load by an abandoned reconciliation"
                            );
                        }
                        VersionState::LoadingFailed | VersionState::Unloading | VersionState::End => {
                            let instance = ModelInstance::new(&self.ctx, &self.name, version, config.clone());
                            table.instances.insert(version, instance.clone());
                            fresh.push(instance);
                            if current.state() == VersionState::LoadingFailed {
                                discarded.push(current);
                            }
                        }
                    },
                }
            }
            for (version, current) in table.instances.iter() {
                if !desired.contains_key(version) && current.state().is_unloadable() {
                    retiring.push(current.clone());
                }
            }
        }

        for instance in retiring {
            let version = instance.version();
            match self.retire_in_background(instance) {
                Ok(()) => report.retired.push(version),
                Err(e) => report.failures.push((version, e)),
            }
        }
        for instance in discarded {
            if let Err(e) = self.retire_in_background(instance) {
                tracing::debug!(model = %self.name, error = %e, "failed version already retired");
            }
        }
        // A retired default must not keep answering default requests while the
        // remaining loads are awaited.
        self.recompute_default();

        let fresh_loads = join_all(fresh.iter().map(|i| async move { (i.version(), i.load().await) }));
        let replacement_loads = join_all(
            replacements
                .iter()
                .map(|(new, _)| async move { (new.version(), new.load().await) }),
        );
        let (fresh_results, replacement_results) = futures::join!(fresh_loads, replacement_loads);

        for (version, result) in fresh_results {
            match result {
                Ok(()) => report.loaded.push(version),
                Err(e) => report.failures.push((version, e)),
            }
        }
        for ((version, result), (new, old)) in replacement_results.into_iter().zip(replacements) {
            if let Err(e) = result {
                tracing::warn!(
                    model = %self.name,
                    version,
                    error = %e,
                    "replacement failed to load, previous instance keeps serving"
                );
                report.failures.push((version, e));
                continue;
            }
            let swapped = {
                let mut table = self.table.write();
                match table.instances.get(&version) {
                    Some(current) if Arc::ptr_eq(current, &old) => {
                        table.instances.insert(version, new.clone());
                        true
                    }
                    _ => false,
                }
            };
            if !swapped {
                // Cannot happen while reconciliations are serialized; keep the map as is.
                report.failures.push((
                    version,
                    ServingError::Internal(format!("version {} changed during replacement", version)),
                ));
                continue;
            }
            if let Err(e) = self.retire_in_background(old) {
                report.failures.push((version, e));
            }
            report.replaced.push(version);
        }

        self.recompute_default();

        if !report.is_noop() {
            tracing::info!(
                model = %self.name,
                loaded = ?report.loaded,
                replaced = ?report.replaced,
                retired = ?report.retired,
                failed = report.failures.len(),
                default_version = ?self.default_version(),
                "reconciled model versions"
            );
        }
        report
    }

    /// Retire every version within `grace`, concurrently.
    ///
    /// Covers instances already dropped from the version table whose background
    /// drain has not finished.
    pub async fn retire_all(&self, grace: Duration) -> Vec<(u64, Result<DrainOutcome, ServingError>)> {
        let mut instances = self.instances();
        for instance in self.retiring.lock().drain(..) {
            if instance.state() != VersionState::End && !instances.iter().any(|i| i.id() == instance.id()) {
                instances.push(instance);
            }
        }
        let results = join_all(instances.iter().map(|i| i.retire(grace))).await;
        self.recompute_default();
        instances.iter().map(|i| i.version()).zip(results).collect()
    }

    fn retire_in_background(&self, instance: Arc<ModelInstance>) -> Result<(), ServingError> {
        instance.begin_unload()?;
        {
            let mut retiring = self.retiring.lock();
            retiring.retain(|i| i.state() != VersionState::End);
            retiring.push(Arc::clone(&instance));
        }
        tokio::spawn(async move {
            if let Err(e) = instance.finish_unload(None).await {
                tracing::error!(
                    model = %instance.name(),
                    version = instance.version(),
                    error = %e,
                    "version teardown failed"
                );
            }
        });
        Ok(())
    }

    fn recompute_default(&self) {
        let mut table = self.table.write();
        let default_version = table
            .instances
            .iter()
            .rev()
            .find(|(_, i)| i.state() == VersionState::Available)
            .map(|(v, _)| *v);
        if table.default_version != default_version {
            tracing::debug!(
                model = %self.name,
                previous = ?table.default_version,
                current = ?default_version,
                "default version changed"
            );
            table.default_version = default_version;
        }
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("versions", &self.versions())
            .field("default_version", &self.default_version())
            .finish()
    }
}
