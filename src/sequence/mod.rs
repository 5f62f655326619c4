//! Stateful sequence tracking and idle eviction.

mod reaper;
mod registry;

pub use reaper::{ReaperError, ScanReport, SequenceReaper};
pub use registry::{SequenceError, SequenceId, SequenceRegistry, SequenceSweep, SequenceTouch};
