//! Background eviction of idle sequences across all stateful instances.
//!
//! Instances register their sequence table when they load and unregister before
//! they tear down. A single task wakes every scan interval and sweeps a snapshot of
//! the registrations, so registering or unregistering never waits on a sweep.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::registry::SequenceSweep;
use crate::models::InstanceId;
use crate::telemetry;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReaperError {
    #[error("Instance {0} is already registered for sequence cleanup")]
    AlreadyRegistered(InstanceId),
}

struct Registration {
    label: String,
    sweep: Arc<dyn SequenceSweep>,
}

/// Result of one sweep over all registrations.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub scanned: usize,
    pub evicted: usize,
    pub failed: usize,
}

#[derive(Default)]
struct ReaperTask {
    shutdown: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

/// Owner of the sequence cleanup task and its registration table.
pub struct SequenceReaper {
    registrations: Mutex<HashMap<InstanceId, Registration>>,
    task: Mutex<ReaperTask>,
}

impl SequenceReaper {
    pub fn new() -> Self {
        Self {
            registrations: Mutex::new(HashMap::new()),
            task: Mutex::new(ReaperTask::default()),
        }
    }

    /// Add an instance's sequence table to the sweep list.
    pub fn register(
        &self,
        id: InstanceId,
        label: impl Into<String>,
        sweep: Arc<dyn SequenceSweep>,
    ) -> Result<(), ReaperError> {
        let label = label.into();
        let mut registrations = self.registrations.lock();
        if let Some(existing) = registrations.get(&id) {
            tracing::error!(
                instance = %id,
                registered = %existing.label,
                attempted = %label,
                "cannot register instance in sequence cleaner: already registered"
            );
            return Err(ReaperError::AlreadyRegistered(id));
        }
        tracing::debug!(instance = %id, label = %label, "registered in sequence cleaner");
        registrations.insert(id, Registration { label, sweep });
        Ok(())
    }

    /// Remove an instance from the sweep list. Unknown ids are ignored.
    pub fn unregister(&self, id: InstanceId) {
        match self.registrations.lock().remove(&id) {
            Some(reg) => {
                tracing::debug!(instance = %id, label = %reg.label, "unregistered from sequence cleaner")
            }
            None => tracing::debug!(instance = %id, "not registered in sequence cleaner, nothing to remove"),
        }
    }

    pub fn is_registered(&self, id: InstanceId) -> bool {
        self.registrations.lock().contains_key(&id)
    }

    pub fn registered_count(&self) -> usize {
        self.registrations.lock().len()
    }

    /// Sweep every registered table once.
    ///
    /// A failing table is logged and skipped; the rest are still swept.
    pub fn scan(&self, max_idle: Duration) -> ScanReport {
        let snapshot: Vec<(InstanceId, String, Arc<dyn SequenceSweep>)> = self
            .registrations
            .lock()
            .iter()
            .map(|(id, reg)| (*id, reg.label.clone(), reg.sweep.clone()))
            .collect();

        let mut report = ScanReport::default();
        for (id, label, sweep) in snapshot {
            report.scanned += 1;
            match sweep.remove_idle(max_idle) {
                Ok(evicted) => {
                    if evicted > 0 {
                        tracing::debug!(instance = %id, label = %label, evicted, "evicted idle sequences");
                    }
                    report.evicted += evicted;
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(instance = %id, label = %label, error = %e, "idle sequence sweep failed");
                }
            }
        }
        telemetry::record_sequences_evicted(report.evicted);
        report
    }

    /// Spawn the cleanup task. Returns false if it is already running or
    /// `interval` is zero.
    pub fn start(self: &Arc<Self>, interval: Duration, max_idle: Duration) -> bool {
        if interval.is_zero() {
            tracing::info!("sequence cleaner disabled");
            return false;
        }
        let mut task = self.task.lock();
        if task.handle.is_some() {
            return false;
        }
        let shutdown = CancellationToken::new();
        let reaper = Arc::clone(self);
        let token = shutdown.clone();
        task.handle = Some(tokio::spawn(async move {
            reaper.run(interval, max_idle, token).await;
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

    /// Cancel the cleanup task and wait for it to exit. Safe to call repeatedly.
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
                tracing::error!(error = %e, "sequence cleaner task panicked");
            }
            tracing::info!("shutdown sequence cleaner");
        }
    }

    /// Cleanup loop: sleep, sweep, repeat until cancelled.
    pub async fn run(self: Arc<Self>, interval: Duration, max_idle: Duration, cancel: CancellationToken) {
        tracing::info!(interval_secs = interval.as_secs(), "started sequence cleaner");
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(interval) => {
                    tracing::debug!("sequence cleaner scan begin");
                    let report = self.scan(max_idle);
                    tracing::debug!(
                        scanned = report.scanned,
                        evicted = report.evicted,
                        failed = report.failed,
                        "sequence cleaner scan end"
                    );
                }
            }
        }
        tracing::info!("stopped sequence cleaner");
    }
}

impl Default for SequenceReaper {
    fn default() -> Self {
        Self::new()
    }
}
