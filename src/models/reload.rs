//! Periodic reload driver.
//!
//! Every tick asks each version source for its desired set and reconciles the
//! matching model. Failures are logged and left for the next tick; nothing is
//! retried inside a tick.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::discovery::VersionSource;
use super::registry::ModelRegistry;

/// Totals of one reload tick.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub models: usize,
    pub loaded: usize,
    pub replaced: usize,
    pub retired: usize,
    pub failed: usize,
    pub discovery_failed: usize,
}

#[derive(Default)]
struct DriverTask {
    shutdown: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

/// Reconciles the registry against its version sources on a fixed interval.
pub struct ReloadDriver {
    registry: Arc<ModelRegistry>,
    sources: Vec<Arc<dyn VersionSource>>,
    task: Mutex<DriverTask>,
}

impl ReloadDriver {
    pub fn new(registry: Arc<ModelRegistry>, sources: Vec<Arc<dyn VersionSource>>) -> Self {
        Self {
            registry,
            sources,
            task: Mutex::new(DriverTask::default()),
        }
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Run one discovery and reconciliation pass over every source.
    pub async fn tick(&self) -> TickReport {
        let mut tick = TickReport::default();
        for source in &self.sources {
            let name = source.model_name();
            let desired = match source.desired_versions().await {
                Ok(desired) => desired,
                Err(e) => {
                    tick.discovery_failed += 1;
                    tracing::warn!(model = %name, error = %e, "version discovery failed");
                    continue;
                }
            };

            let report = self.registry.reload(name, &desired).await;
            tick.models += 1;
            tick.loaded += report.loaded.len();
            tick.replaced += report.replaced.len();
            tick.retired += report.retired.len();
            tick.failed += report.failures.len();
            for (version, e) in &report.failures {
                tracing::warn!(model = %name, version, error = %e, "version will be retried on next reload");
            }
        }
        tick
    }

    /// Spawn the periodic task. Returns false if already running or `interval`
    /// is zero.
    pub fn start(self: &Arc<Self>, interval: Duration) -> bool {
        if interval.is_zero() {
            tracing::info!("periodic reload disabled");
            return false;
        }
        let mut task = self.task.lock();
        if task.handle.is_some() {
            return false;
        }
        let shutdown = CancellationToken::new();
        let driver = Arc::clone(self);
        let token = shutdown.clone();
        task.handle = Some(tokio::spawn(async move {
            driver.run(interval, token).await;
        }));
        task.shutdown = Some(shutdown);
        true
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .handle
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Stop the periodic task, letting a tick in progress finish first.
    pub async fn join(&self) {
        let (shutdown, handle) = {
            let mut task = self.task.lock();
            (task.shutdown.take(), task.handle.take())
        };
        if let Some(shutdown) = shutdown {
            shutdown.cancel();
        }
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "reload task panicked");
            }
            tracing::info!("shutdown reload driver");
        }
    }

    async fn run(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        tracing::info!(interval_ms = interval.as_millis() as u64, sources = self.sources.len(), "started reload driver");
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(interval) => {}
            }
            // Outside the select: a reconciliation is never abandoned halfway.
            let tick = self.tick().await;
            if tick.loaded + tick.replaced + tick.retired + tick.failed + tick.discovery_failed > 0 {
                tracing::debug!(
                    loaded = tick.loaded,
                    replaced = tick.replaced,
                    retired = tick.retired,
                    failed = tick.failed,
                    discovery_failed = tick.discovery_failed,
                    "reload tick"
                );
            }
        }
        tracing::info!("stopped reload driver");
    }
}
