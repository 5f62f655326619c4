//! gg-serving Runtime
//!
//! Keeps multiple versions of multiple models loaded and queryable while
//! requests arrive concurrently and versions are hot-reloaded or retired.
//!
//! # Guarantees
//!
//! - No request is admitted against a half-loaded or unloaded version
//! - Unloading a version waits for every admitted request to release it
//! - Reloading one version never blocks or disturbs another
//! - Waiting on a version that is still loading is bounded by a timeout
//!
//! The runtime never runs inference or parses requests. It answers one
//! question: is version V of model M usable right now, and if so, hands out
//! an [`AdmissionGuard`](models::AdmissionGuard) that pins it.

pub mod config;
pub mod health;
pub mod models;
pub mod sequence;
pub mod shutdown;
pub mod telemetry;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use config::EnvConfig;
use health::{HealthChecker, HealthConfig, HealthReport};
use models::{
    AdmissionGuard, DirectoryVersionReader, DiscoveryError, MappedEngine, ModelEngine, ModelRegistry,
    ReloadDriver, ServingError, TickReport, VersionRequest, VersionSource,
};
use sequence::SequenceReaper;
use shutdown::{ShutdownCoordinator, ShutdownResult};

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub model_root: PathBuf,
    pub load_wait_timeout: Duration,
    pub sequence_idle: Duration,
    pub sequence_cleaner_interval: Duration,
    pub max_sequences: usize,
    pub reload_interval: Duration,
    pub shutdown_grace: Duration,
    pub stateful_models: BTreeSet<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::from(&EnvConfig::default())
    }
}

impl From<&EnvConfig> for RuntimeConfig {
    fn from(env: &EnvConfig) -> Self {
        Self {
            model_root: env.model_root.clone(),
            load_wait_timeout: env.load_wait_timeout,
            sequence_idle: env.sequence_idle,
            sequence_cleaner_interval: env.sequence_cleaner_interval,
            max_sequences: env.max_sequences,
            reload_interval: env.reload_interval,
            shutdown_grace: env.shutdown_grace,
            stateful_models: env.stateful_models.clone(),
        }
    }
}

/// The serving runtime: registry, background tasks and shutdown.
pub struct Runtime {
    pub config: RuntimeConfig,
    pub registry: Arc<ModelRegistry>,
    pub reaper: Arc<SequenceReaper>,
    pub driver: Arc<ReloadDriver>,
    pub shutdown: ShutdownCoordinator,
    pub health: HealthChecker,
}

impl Runtime {
    /// Runtime over the model repository at `config.model_root`, serving the
    /// latest version of every model directory found there.
    pub fn new(config: RuntimeConfig) -> Result<Self, DiscoveryError> {
        let sources: Vec<Arc<dyn VersionSource>> =
            DirectoryVersionReader::discover_models(&config.model_root, &config.stateful_models)?
                .into_iter()
                .map(|reader| Arc::new(reader) as Arc<dyn VersionSource>)
                .collect();
        let engine = Arc::new(MappedEngine::new(&config.model_root));
        Ok(Self::with_parts(config, engine, sources))
    }

    /// Runtime over an explicit engine and set of version sources.
    pub fn with_parts(
        config: RuntimeConfig,
        engine: Arc<dyn ModelEngine>,
        sources: Vec<Arc<dyn VersionSource>>,
    ) -> Self {
        let reaper = Arc::new(SequenceReaper::new());
        let registry = Arc::new(ModelRegistry::new(engine, Arc::clone(&reaper), config.max_sequences));
        let driver = Arc::new(ReloadDriver::new(Arc::clone(&registry), sources));
        let shutdown = ShutdownCoordinator::new(Arc::clone(&registry), Arc::clone(&reaper))
            .with_driver(Arc::clone(&driver));
        let health = HealthChecker::new(HealthConfig {
            require_available_version: driver.source_count() > 0,
        });

        Self {
            config,
            registry,
            reaper,
            driver,
            shutdown,
            health,
        }
    }

    /// Load the initial version sets, then start the background tasks.
    pub async fn start(&self) -> TickReport {
        let initial = self.driver.tick().await;
        tracing::info!(
            models = initial.models,
            loaded = initial.loaded,
            failed = initial.failed + initial.discovery_failed,
            "initial model load complete"
        );
        self.reaper
            .start(self.config.sequence_cleaner_interval, self.config.sequence_idle);
        self.driver.start(self.config.reload_interval);
        initial
    }

    /// Admit one request against `name`/`version`, waiting at most the
    /// configured load-wait timeout for a version that is still loading.
    pub async fn resolve(&self, name: &str, version: VersionRequest) -> Result<AdmissionGuard, ServingError> {
        self.registry
            .resolve(name, version, self.config.load_wait_timeout)
            .await
    }

    pub async fn health_report(&self) -> HealthReport {
        let state = self.shutdown.state().await;
        self.health.report(state, &self.registry.snapshot())
    }

    /// Stop background tasks and retire every version within the grace period.
    pub async fn shutdown(&self) -> ShutdownResult {
        self.shutdown.initiate(self.config.shutdown_grace).await
    }
}
