//! Version lifecycle state machine.
//!
//! Every model version walks `Start -> Loading -> Available -> Unloading -> End`,
//! with `Loading -> LoadingFailed -> Unloading` as the failure branch. Transitions
//! that skip a state are contract violations and are rejected.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of one model version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VersionState {
    Start,
    Loading,
    Available,
    Unloading,
    End,
    LoadingFailed,
}

impl VersionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::Loading => "LOADING",
            Self::Available => "AVAILABLE",
            Self::Unloading => "UNLOADING",
            Self::End => "END",
            Self::LoadingFailed => "LOADING_FAILED",
        }
    }

    /// Only available versions may serve requests.
    pub fn is_admissible(&self) -> bool {
        *self == Self::Available
    }

    /// States from which `unload` may begin.
    pub fn is_unloadable(&self) -> bool {
        matches!(self, Self::Available | Self::LoadingFailed)
    }

    /// The version was retired and will never serve again.
    pub fn is_retired(&self) -> bool {
        matches!(self, Self::Unloading | Self::End)
    }
}

impl fmt::Display for VersionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected lifecycle transition.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid transition for {model} v{version}: {from} -> {to}")]
pub struct TransitionError {
    pub model: String,
    pub version: u64,
    pub from: VersionState,
    pub to: VersionState,
}

/// State of one version plus the identity it describes.
#[derive(Debug, Clone)]
pub struct VersionStatus {
    model: String,
    version: u64,
    state: VersionState,
    last_error: Option<String>,
    changed_at: DateTime<Utc>,
}

impl VersionStatus {
    pub fn new(model: impl Into<String>, version: u64) -> Self {
        Self {
            model: model.into(),
            version,
            state: VersionState::Start,
            last_error: None,
            changed_at: Utc::now(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn state(&self) -> VersionState {
        self.state
    }

    /// Reason recorded by the last `set_loading_failed`.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn changed_at(&self) -> DateTime<Utc> {
        self.changed_at
    }

    pub fn set_loading(&mut self) -> Result<(), TransitionError> {
        self.transition(&[VersionState::Start], VersionState::Loading)
    }

    pub fn set_available(&mut self) -> Result<(), TransitionError> {
        self.transition(&[VersionState::Loading], VersionState::Available)?;
        self.last_error = None;
        Ok(())
    }

    pub fn set_loading_failed(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(&[VersionState::Loading], VersionState::LoadingFailed)?;
        self.last_error = Some(reason.into());
        Ok(())
    }

    pub fn set_unloading(&mut self) -> Result<(), TransitionError> {
        self.transition(
            &[VersionState::Available, VersionState::LoadingFailed],
            VersionState::Unloading,
        )
    }

    pub fn set_end(&mut self) -> Result<(), TransitionError> {
        self.transition(&[VersionState::Unloading], VersionState::End)
    }

    fn transition(&mut self, from: &[VersionState], to: VersionState) -> Result<(), TransitionError> {
        if !from.contains(&self.state) {
            return Err(TransitionError {
                model: self.model.clone(),
                version: self.version,
                from: self.state,
                to,
            });
        }
        self.state = to;
        self.changed_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut status = VersionStatus::new("resnet", 1);
        assert_eq!(status.state(), VersionState::Start);
        status.set_loading().unwrap();
        status.set_available().unwrap();
        assert!(status.state().is_admissible());
        status.set_unloading().unwrap();
        status.set_end().unwrap();
        assert_eq!(status.state(), VersionState::End);
        assert!(status.state().is_retired());
    }

    #[test]
    fn test_failed_load_can_be_retired() {
        let mut status = VersionStatus::new("resnet", 2);
        status.set_loading().unwrap();
        status.set_loading_failed("weights truncated").unwrap();
        assert_eq!(status.last_error(), Some("weights truncated"));
        assert!(status.state().is_unloadable());
        status.set_unloading().unwrap();
        status.set_end().unwrap();
    }

    #[test]
    fn test_skipping_states_is_rejected() {
        let mut status = VersionStatus::new("resnet", 3);
        let err = status.set_available().unwrap_err();
        assert_eq!(err.from, VersionState::Start);
        assert_eq!(err.to, VersionState::Available);
        assert_eq!(status.state(), VersionState::Start);

        assert!(status.set_unloading().is_err());
        assert!(status.set_end().is_err());
        assert!(status.set_loading_failed("x").is_err());
    }

    #[test]
    fn test_end_is_terminal() {
        let mut status = VersionStatus::new("resnet", 4);
        status.set_loading().unwrap();
        status.set_available().unwrap();
        status.set_unloading().unwrap();
        status.set_end().unwrap();
        assert!(status.set_loading().is_err());
        assert!(status.set_unloading().is_err());
        assert!(status.set_end().is_err());
    }

    #[test]
    fn test_available_clears_stale_error() {
        let mut status = VersionStatus::new("resnet", 5);
        status.set_loading().unwrap();
        status.set_available().unwrap();
        assert!(status.last_error().is_none());
    }
}
