//! Registry of served models: the entry point for reloads and request lookups.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::admission::AdmissionGuard;
use super::engine::{DesiredVersions, ModelEngine};
use super::error::{ServingError, StatusCode};
use super::instance::{DrainOutcome, LoadContext, VersionSnapshot};
use super::model::{Model, ReconcileReport, VersionRequest};
use crate::sequence::SequenceReaper;
use crate::telemetry::{self, AdmissionSpan, SpanExt};

/// Status of every version of one model.
#[derive(Debug, Clone, Serialize)]
pub struct ModelSnapshot {
    pub name: String,
    pub default_version: Option<u64>,
    pub versions: Vec<VersionSnapshot>,
}

/// Outcome of retiring every version of every model.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RetireSummary {
    pub drained: usize,
    pub forced: usize,
    pub failed: usize,
}

/// Thread-safe registry of models keyed by name.
///
/// Models are created on the first reload that names them and are never removed
/// implicitly; retiring a model means reloading it with an empty version set.
pub struct ModelRegistry {
    models: DashMap<String, Arc<Model>>,
    ctx: Arc<LoadContext>,
}

impl ModelRegistry {
    pub fn new(engine: Arc<dyn ModelEngine>, reaper: Arc<SequenceReaper>, max_sequences: usize) -> Self {
        Self {
            models: DashMap::new(),
            ctx: Arc::new(LoadContext::new(engine, reaper, max_sequences)),
        }
    }

    pub fn reaper(&self) -> &Arc<SequenceReaper> {
        self.ctx.reaper()
    }

    /// Reconcile `name` against `desired`, creating the model on first use.
    pub async fn reload(&self, name: &str, desired: &DesiredVersions) -> ReconcileReport {
        let model = self
            .models
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::info!(model = %name, "registered model");
                Arc::new(Model::new(name, Arc::clone(&self.ctx)))
            })
            .value()
            .clone();
        model.reconcile(desired).await
    }

    /// Retire every version of `name`. The model itself stays known.
    pub async fn retire_model(&self, name: &str) -> Result<ReconcileReport, ServingError> {
        let model = self.model(name)?;
        Ok(model.reconcile(&DesiredVersions::new()).await)
    }

    pub fn model(&self, name: &str) -> Result<Arc<Model>, ServingError> {
        self.models
            .get(name)
            .map(|m| Arc::clone(m.value()))
            .ok_or_else(|| ServingError::ModelNameMissing {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    pub fn model_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.models.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Find the requested version and admit one request against it.
    ///
    /// Waits at most `timeout` if the version is still loading.
    pub async fn resolve(
        &self,
        name: &str,
        version: VersionRequest,
        timeout: Duration,
    ) -> Result<AdmissionGuard, ServingError> {
        let span = AdmissionSpan::new(name, &version.to_string());
        let result = async {
            let model = self.model(name)?;
            let instance = model.get_instance(version)?;
            instance.try_admit(timeout).await
        }
        .instrument(span.clone())
        .await;
        self.record(name, &span, &result);
        result
    }

    /// `resolve` that abandons the wait once `cancel` fires.
    pub async fn resolve_cancellable(
        &self,
        name: &str,
        version: VersionRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<AdmissionGuard, ServingError> {
        let span = AdmissionSpan::new(name, &version.to_string());
        let result = async {
            let model = self.model(name)?;
            let instance = model.get_instance(version)?;
            instance.try_admit_cancellable(timeout, cancel).await
        }
        .instrument(span.clone())
        .await;
        self.record(name, &span, &result);
        result
    }

    fn record(&self, name: &str, span: &tracing::Span, result: &Result<AdmissionGuard, ServingError>) {
        span.record_result(result);
        match result {
            Ok(_) => telemetry::record_admission(name, StatusCode::Ok),
            Err(e) => {
                telemetry::record_admission(name, e.code());
                if e.is_warning() {
                    tracing::debug!(parent: span, model = %name, code = %e.code(), "admission rejected");
                } else {
                    tracing::error!(parent: span, model = %name, error = %e, "admission failed");
                }
            }
        }
    }

    /// Per-version status of one model.
    pub fn model_status(&self, name: &str) -> Result<ModelSnapshot, ServingError> {
        let model = self.model(name)?;
        Ok(Self::snapshot_of(&model))
    }

    /// Status of every model, sorted by name.
    pub fn snapshot(&self) -> Vec<ModelSnapshot> {
        let models: Vec<Arc<Model>> = self.models.iter().map(|e| Arc::clone(e.value())).collect();
        let mut snapshots: Vec<ModelSnapshot> = models.iter().map(|m| Self::snapshot_of(m)).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    fn snapshot_of(model: &Model) -> ModelSnapshot {
        ModelSnapshot {
            name: model.name().to_string(),
            default_version: model.default_version(),
            versions: model.snapshot(),
        }
    }

    /// Retire every version of every model, waiting at most `grace` for drains.
    pub async fn retire_all(&self, grace: Duration) -> RetireSummary {
        let models: Vec<Arc<Model>> = self.models.iter().map(|e| Arc::clone(e.value())).collect();
        let results = futures::future::join_all(models.iter().map(|m| m.retire_all(grace))).await;

        let mut summary = RetireSummary::default();
        for (model, versions) in models.iter().zip(results) {
            for (version, result) in versions {
                match result {
                    Ok(DrainOutcome::Drained) => summary.drained += 1,
                    Ok(DrainOutcome::Forced { .. }) => summary.forced += 1,
                    Err(e) => {
                        summary.failed += 1;
                        tracing::warn!(model = %model.name(), version, error = %e, "version did not retire cleanly");
                    }
                }
            }
        }
        summary
    }
}
