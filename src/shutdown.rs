//! Graceful shutdown coordination.
//!
//! Shutdown order: stop the reload driver so nothing new loads, stop the
//! sequence cleaner, then retire every version of every model, waiting for
//! admitted requests up to the grace period.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, RwLock};

use crate::models::{ModelRegistry, ReloadDriver};
use crate::sequence::SequenceReaper;

/// Shutdown state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Draining,
    Stopped,
}

/// Result of a shutdown operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownResult {
    /// Every version drained before release.
    Complete,
    /// The grace period elapsed: `forced` versions were released with requests
    /// still admitted, `failed` could not be retired at all.
    Timeout { forced: usize, failed: usize },
}

/// Coordinates graceful shutdown across runtime components.
pub struct ShutdownCoordinator {
    state: RwLock<ShutdownState>,
    outcome: watch::Sender<Option<ShutdownResult>>,
    registry: Arc<ModelRegistry>,
    reaper: Arc<SequenceReaper>,
    driver: Option<Arc<ReloadDriver>>,
}

impl ShutdownCoordinator {
    pub fn new(registry: Arc<ModelRegistry>, reaper: Arc<SequenceReaper>) -> Self {
        Self {
            state: RwLock::new(ShutdownState::Running),
            outcome: watch::channel(None).0,
            registry,
            reaper,
            driver: None,
        }
    }

    pub fn with_driver(mut self, driver: Arc<ReloadDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    /// Get current shutdown state.
    pub async fn state(&self) -> ShutdownState {
        *self.state.read().await
    }

    /// Check if accepting new requests.
    pub fn is_accepting(&self) -> bool {
        // try_read: never block a request on a shutdown in progress
        self.state
            .try_read()
            .map(|s| *s == ShutdownState::Running)
            .unwrap_or(false)
    }

    /// Stop background tasks and retire all versions within `grace`.
    ///
    /// Only the first call does the work; later calls wait for it to reach
    /// `Stopped` and return the same result.
    pub async fn initiate(&self, grace: Duration) -> ShutdownResult {
        {
            let mut state = self.state.write().await;
            if *state != ShutdownState::Running {
                tracing::debug!(state = ?*state, "shutdown already initiated");
                drop(state);
                let mut outcome = self.outcome.subscribe();
                let result = outcome
                    .wait_for(Option::is_some)
                    .await
                    .ok()
                    .and_then(|r| (*r).clone());
                return result.unwrap_or(ShutdownResult::Complete);
            }
            *state = ShutdownState::Draining;
        }
        let started = Instant::now();
        tracing::info!(grace_secs = grace.as_secs(), "shutdown initiated");

        if let Some(driver) = &self.driver {
            driver.join().await;
        }
        self.reaper.join().await;

        let remaining = grace.saturating_sub(started.elapsed());
        let summary = self.registry.retire_all(remaining).await;

        {
            let mut state = self.state.write().await;
            *state = ShutdownState::Stopped;
        }

        tracing::info!(
            drained = summary.drained,
            forced = summary.forced,
            failed = summary.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "shutdown complete"
        );
        let result = if summary.forced == 0 && summary.failed == 0 {
            ShutdownResult::Complete
        } else {
            ShutdownResult::Timeout {
                forced: summary.forced,
                failed: summary.failed,
            }
        };
        self.outcome.send_replace(Some(result.clone()));
        result
    }
}
