//! One version of one model and its request-admission contract.
//!
//! Lifecycle state and the in-flight counter live under a single lock so that
//! "is it available?" and "count me in" are one step. State changes are published
//! on a watch channel; requests arriving during a load wait on that channel with a
//! deadline instead of polling.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;

use super::admission::AdmissionGuard;
use super::engine::{ModelEngine, NativeHandle, VersionConfig};
use super::error::ServingError;
use super::status::{TransitionError, VersionState, VersionStatus};
use crate::sequence::{SequenceReaper, SequenceRegistry};
use crate::telemetry;

/// Process-unique identity of a model instance.
///
/// A version that is replaced gets a new instance id, so old and new
/// incarnations never collide in the reaper's registration table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct InstanceId(u64);

impl InstanceId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Collaborators shared by every instance the registry creates.
pub struct LoadContext {
    engine: Arc<dyn ModelEngine>,
    reaper: Arc<SequenceReaper>,
    max_sequences: usize,
    next_id: AtomicU64,
}

impl LoadContext {
    pub fn new(engine: Arc<dyn ModelEngine>, reaper: Arc<SequenceReaper>, max_sequences: usize) -> Self {
        Self {
            engine,
            reaper,
            max_sequences: max_sequences.max(1),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn reaper(&self) -> &Arc<SequenceReaper> {
        &self.reaper
    }

    fn next_instance_id(&self) -> InstanceId {
        InstanceId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

/// How an unload finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every admitted request released before teardown.
    Drained,
    /// The grace period elapsed and the handle was released anyway.
    Forced { remaining: u32 },
}

/// Point-in-time view of one version, as reported by model status queries.
#[derive(Debug, Clone, Serialize)]
pub struct VersionSnapshot {
    pub version: u64,
    pub instance: InstanceId,
    pub state: VersionState,
    pub last_error: Option<String>,
    pub in_flight: u32,
    pub live_sequences: Option<usize>,
    pub footprint_bytes: usize,
    pub changed_at: DateTime<Utc>,
}

struct Lifecycle {
    status: VersionStatus,
    in_flight: u32,
}

enum Admission {
    Admitted,
    Wait,
    Rejected(ServingError),
}

/// A single loaded (or loading, or retired) model version.
pub struct ModelInstance {
    id: InstanceId,
    name: String,
    version: u64,
    config: VersionConfig,
    engine: Arc<dyn ModelEngine>,
    reaper: Arc<SequenceReaper>,
    lifecycle: Mutex<Lifecycle>,
    state_tx: watch::Sender<VersionState>,
    drained: Notify,
    handle: RwLock<Option<Box<dyn NativeHandle>>>,
    torn_down: AtomicBool,
    sequences: Option<Arc<SequenceRegistry>>,
}

impl ModelInstance {
    pub fn new(ctx: &LoadContext, name: impl Into<String>, version: u64, config: VersionConfig) -> Arc<Self> {
        let name = name.into();
        let (state_tx, _) = watch::channel(VersionState::Start);
        let sequences = config
            .stateful
            .then(|| Arc::new(SequenceRegistry::new(ctx.max_sequences)));
        Arc::new(Self {
            id: ctx.next_instance_id(),
            lifecycle: Mutex::new(Lifecycle {
                status: VersionStatus::new(name.clone(), version),
                in_flight: 0,
            }),
            name,
            version,
            config,
            engine: Arc::clone(&ctx.engine),
            reaper: Arc::clone(&ctx.reaper),
            state_tx,
            drained: Notify::new(),
            handle: RwLock::new(None),
            torn_down: AtomicBool::new(false),
            sequences,
        })
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn config(&self) -> &VersionConfig {
        &self.config
    }

    pub fn state(&self) -> VersionState {
        self.lifecycle.lock().status.state()
    }

    pub fn in_flight(&self) -> u32 {
        self.lifecycle.lock().in_flight
    }

    pub fn sequences(&self) -> Option<&Arc<SequenceRegistry>> {
        self.sequences.as_ref()
    }

    pub fn snapshot(&self) -> VersionSnapshot {
        let (state, last_error, in_flight, changed_at) = {
            let lc = self.lifecycle.lock();
            (
                lc.status.state(),
                lc.status.last_error().map(str::to_string),
                lc.in_flight,
                lc.status.changed_at(),
            )
        };
        VersionSnapshot {
            version: self.version,
            instance: self.id,
            state,
            last_error,
            in_flight,
            live_sequences: self.sequences.as_ref().map(|s| s.len()),
            footprint_bytes: self.handle.read().as_ref().map_or(0, |h| h.footprint_bytes()),
            changed_at,
        }
    }

    /// Acquire the native handle: `Start -> Loading -> Available`.
    ///
    /// A failed acquisition leaves the instance in `LoadingFailed`; retrying is
    /// the reload driver's business.
    pub async fn load(&self) -> Result<(), ServingError> {
        self.transition(VersionStatus::set_loading)?;
        let started = Instant::now();

        let handle = match self.engine.create_handle(self.id, &self.config).await {
            Ok(handle) => handle,
            Err(e) => return Err(self.fail_load(e.to_string())),
        };

        if let Some(seqs) = &self.sequences {
            let sweep: Arc<dyn crate::sequence::SequenceSweep> = seqs.clone();
            if let Err(e) = self.reaper.register(self.id, self.label(), sweep) {
                self.engine.destroy_handle(self.id, handle).await;
                let _ = self.fail_load(e.to_string());
                return Err(e.into());
            }
        }

        *self.handle.write() = Some(handle);
        self.transition(VersionStatus::set_available)?;
        telemetry::record_load_duration(&self.name, started.elapsed());
        Ok(())
    }

    fn fail_load(&self, reason: String) -> ServingError {
        tracing::error!(
            model = %self.name,
            version = self.version,
            instance = %self.id,
            reason = %reason,
            "version failed to load"
        );
        if let Err(e) = self.transition(|s| s.set_loading_failed(reason.clone())) {
            return e.into();
        }
        ServingError::LoadFailed {
            name: self.name.clone(),
            version: self.version,
            reason,
        }
    }

    /// Admit one request.
    ///
    /// Available: counted in immediately. Loading: wait for the next transition,
    /// at most `timeout`. Anything else fails without waiting.
    pub async fn try_admit(self: &Arc<Self>, timeout: Duration) -> Result<AdmissionGuard, ServingError> {
        // Subscribe before checking so a transition between the two is not missed.
        let mut state_rx = self.state_tx.subscribe();
        match self.try_enter() {
            Admission::Admitted => return Ok(AdmissionGuard::new(Arc::clone(self))),
            Admission::Rejected(e) => return Err(e),
            Admission::Wait => {}
        }

        let wait = async {
            loop {
                if state_rx.changed().await.is_err() {
                    return Err(ServingError::Internal("instance state channel closed".into()));
                }
                match self.try_enter() {
                    Admission::Admitted => return Ok(AdmissionGuard::new(Arc::clone(self))),
                    Admission::Rejected(e) => return Err(e),
                    Admission::Wait => continue,
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => match self.try_enter() {
                Admission::Admitted => Ok(AdmissionGuard::new(Arc::clone(self))),
                Admission::Rejected(e) => Err(e),
                Admission::Wait => {
                    tracing::debug!(
                        model = %self.name,
                        version = self.version,
                        timeout_ms = timeout.as_millis() as u64,
                        "gave up waiting for version to load"
                    );
                    Err(self.not_loaded_yet())
                }
            },
        }
    }

    /// `try_admit` that also gives up as soon as `cancel` fires.
    pub async fn try_admit_cancellable(
        self: &Arc<Self>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<AdmissionGuard, ServingError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ServingError::Cancelled {
                name: self.name.clone(),
                version: self.version,
            }),
            result = self.try_admit(timeout) => result,
        }
    }

    fn try_enter(&self) -> Admission {
        let mut lc = self.lifecycle.lock();
        match lc.status.state() {
            VersionState::Available => {
                lc.in_flight += 1;
                let in_flight = lc.in_flight;
                drop(lc);
                telemetry::record_in_flight(&self.name, self.version, in_flight);
                Admission::Admitted
            }
            VersionState::Loading => Admission::Wait,
            VersionState::Start | VersionState::LoadingFailed => {
                Admission::Rejected(self.not_loaded_yet())
            }
            VersionState::Unloading | VersionState::End => {
                Admission::Rejected(self.not_loaded_anymore())
            }
        }
    }

    /// Called exactly once per admission, from the guard's `Drop`.
    pub(super) fn release(&self) {
        let remaining = {
            let mut lc = self.lifecycle.lock();
            lc.in_flight = lc.in_flight.saturating_sub(1);
            lc.in_flight
        };
        telemetry::record_in_flight(&self.name, self.version, remaining);
        if remaining == 0 {
            self.drained.notify_waiters();
        }
    }

    pub(super) fn with_handle<R>(&self, f: impl FnOnce(&dyn NativeHandle) -> R) -> Result<R, ServingError> {
        let slot = self.handle.read();
        match slot.as_deref() {
            Some(handle) => Ok(f(handle)),
            None => Err(self.not_loaded_anymore()),
        }
    }

    /// Stop admitting: `Available | LoadingFailed -> Unloading`.
    ///
    /// Also drops the version out of sequence cleanup and discards its sequences.
    /// Returns immediately; `finish_unload` does the draining.
    pub fn begin_unload(&self) -> Result<(), ServingError> {
        self.transition(VersionStatus::set_unloading)?;
        if let Some(seqs) = &self.sequences {
            self.reaper.unregister(self.id);
            let dropped = seqs.close();
            if dropped > 0 {
                tracing::info!(
                    model = %self.name,
                    version = self.version,
                    dropped,
                    "dropped live sequences of retiring version"
                );
            }
        }
        Ok(())
    }

    /// Wait for in-flight requests, release the handle, `Unloading -> End`.
    ///
    /// With a grace period, teardown proceeds when it elapses even if requests
    /// are still admitted.
    pub async fn finish_unload(&self, grace: Option<Duration>) -> Result<DrainOutcome, ServingError> {
        let state = self.state();
        if !state.is_retired() {
            return Err(TransitionError {
                model: self.name.clone(),
                version: self.version,
                from: state,
                to: VersionState::End,
            }
            .into());
        }
        let outcome = match grace {
            None => {
                self.wait_drained().await;
                DrainOutcome::Drained
            }
            Some(grace) => match tokio::time::timeout(grace, self.wait_drained()).await {
                Ok(()) => DrainOutcome::Drained,
                Err(_) => DrainOutcome::Forced {
                    remaining: self.in_flight(),
                },
            },
        };
        if let DrainOutcome::Forced { remaining } = outcome {
            tracing::warn!(
                model = %self.name,
                version = self.version,
                remaining,
                "grace period elapsed, force-releasing version with requests in flight"
            );
        }
        self.teardown().await?;
        Ok(outcome)
    }

    /// Full unload: `begin_unload` then `finish_unload` without a deadline.
    pub async fn unload(&self) -> Result<(), ServingError> {
        self.begin_unload()?;
        self.finish_unload(None).await.map(|_| ())
    }

    /// Bring the instance to `End` from wherever it is, within `grace`.
    ///
    /// Used at shutdown. A load still in progress is given the grace period to
    /// finish before being retired.
    pub async fn retire(&self, grace: Duration) -> Result<DrainOutcome, ServingError> {
        let deadline = tokio::time::Instant::now() + grace;
        let mut state_rx = self.state_tx.subscribe();
        let settled = tokio::time::timeout_at(
            deadline,
            state_rx.wait_for(|s| !matches!(s, VersionState::Start | VersionState::Loading)),
        )
        .await
        .is_ok();
        if !settled {
            tracing::warn!(
                model = %self.name,
                version = self.version,
                "version still loading at end of grace period, leaving it"
            );
            return Err(self.not_loaded_yet());
        }

        if self.state().is_unloadable() {
            // Losing a race to another retirer is fine; the state check below covers it.
            if let Err(e) = self.begin_unload() {
                tracing::debug!(model = %self.name, version = self.version, error = %e, "unload already begun");
            }
        }
        match self.state() {
            VersionState::End => Ok(DrainOutcome::Drained),
            _ => {
                let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                self.finish_unload(Some(remaining)).await
            }
        }
    }

    /// Resolves once the instance reaches `state`.
    pub async fn wait_for_state(&self, state: VersionState) {
        let mut rx = self.state_tx.subscribe();
        let _ = rx.wait_for(|s| *s == state).await;
    }

    async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    async fn teardown(&self) -> Result<(), ServingError> {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            // Another retirer owns the release; report only once it is done.
            self.wait_for_state(VersionState::End).await;
            return Ok(());
        }
        let handle = self.handle.write().take();
        if let Some(handle) = handle {
            self.engine.destroy_handle(self.id, handle).await;
        }
        self.transition(VersionStatus::set_end)?;
        Ok(())
    }

    fn transition(
        &self,
        apply: impl FnOnce(&mut VersionStatus) -> Result<(), TransitionError>,
    ) -> Result<VersionState, TransitionError> {
        let state = {
            let mut lc = self.lifecycle.lock();
            if let Err(e) = apply(&mut lc.status) {
                drop(lc);
                tracing::error!(instance = %self.id, error = %e, "rejected lifecycle transition");
                return Err(e);
            }
            let state = lc.status.state();
            self.state_tx.send_replace(state);
            state
        };
        tracing::info!(
            model = %self.name,
            version = self.version,
            instance = %self.id,
            state = %state,
            "version state changed"
        );
        telemetry::record_transition(state);
        Ok(state)
    }

    fn label(&self) -> String {
        format!("{}:{}", self.name, self.version)
    }

    fn not_loaded_yet(&self) -> ServingError {
        ServingError::ModelVersionNotLoadedYet {
            name: self.name.clone(),
            version: self.version,
        }
    }

    fn not_loaded_anymore(&self) -> ServingError {
        ServingError::ModelVersionNotLoadedAnymore {
            name: self.name.clone(),
            version: self.version,
        }
    }
}

impl fmt::Debug for ModelInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelInstance")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("version", &self.version)
            .field("state", &self.state())
            .finish()
    }
}
