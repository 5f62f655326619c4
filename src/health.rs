//! Health check support.
//!
//! Liveness, readiness and a full report derived from the shutdown state and
//! the registry's version snapshots.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::models::{ModelSnapshot, VersionState};
use crate::shutdown::ShutdownState;

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Detailed health report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub state: HealthState,
    pub ready: bool,
    pub accepting_requests: bool,
    pub models: usize,
    pub versions_available: usize,
    pub versions_loading: usize,
    pub versions_failed: usize,
    pub in_flight: u64,
    pub uptime_secs: u64,
}

/// Health check configuration.
#[derive(Debug, Clone, Default)]
pub struct HealthConfig {
    /// Not ready until at least one version is available.
    pub require_available_version: bool,
}

#[derive(Default)]
struct VersionCounts {
    available: usize,
    loading: usize,
    failed: usize,
    in_flight: u64,
}

impl VersionCounts {
    fn tally(models: &[ModelSnapshot]) -> Self {
        let mut counts = Self::default();
        for version in models.iter().flat_map(|m| &m.versions) {
            match version.state {
                VersionState::Available => counts.available += 1,
                VersionState::Start | VersionState::Loading => counts.loading += 1,
                VersionState::LoadingFailed => counts.failed += 1,
                VersionState::Unloading | VersionState::End => {}
            }
            counts.in_flight += u64::from(version.in_flight);
        }
        counts
    }
}

/// Aggregates health information from runtime components.
pub struct HealthChecker {
    config: HealthConfig,
    start_time: Instant,
}

impl HealthChecker {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            start_time: Instant::now(),
        }
    }

    /// Check liveness: process is responsive.
    pub fn is_alive(&self) -> bool {
        true
    }

    /// Check readiness: accepting traffic.
    pub fn is_ready(&self, shutdown_state: ShutdownState, models: &[ModelSnapshot]) -> bool {
        self.ready_with(shutdown_state, &VersionCounts::tally(models))
    }

    /// Generate full health report.
    pub fn report(&self, shutdown_state: ShutdownState, models: &[ModelSnapshot]) -> HealthReport {
        let counts = VersionCounts::tally(models);
        HealthReport {
            state: self.compute_state(shutdown_state, &counts),
            ready: self.ready_with(shutdown_state, &counts),
            accepting_requests: shutdown_state == ShutdownState::Running,
            models: models.len(),
            versions_available: counts.available,
            versions_loading: counts.loading,
            versions_failed: counts.failed,
            in_flight: counts.in_flight,
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    fn ready_with(&self, shutdown_state: ShutdownState, counts: &VersionCounts) -> bool {
        if shutdown_state != ShutdownState::Running {
            return false;
        }
        !(self.config.require_available_version && counts.available == 0)
    }

    fn compute_state(&self, shutdown_state: ShutdownState, counts: &VersionCounts) -> HealthState {
        if shutdown_state != ShutdownState::Running {
            return HealthState::Unhealthy;
        }
        if self.config.require_available_version && counts.available == 0 {
            return HealthState::Degraded;
        }
        if counts.failed > 0 {
            return HealthState::Degraded;
        }
        HealthState::Healthy
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}
