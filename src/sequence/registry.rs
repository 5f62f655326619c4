//! Per-instance table of live stateful sequences.
//!
//! The table has its own lock, separate from the owning instance's lifecycle lock,
//! so the reaper and the request path never contend with admission.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;

/// Identifier of a stateful session, supplied by the client.
pub type SequenceId = u64;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SequenceError {
    #[error("Sequence {0} does not exist")]
    Missing(SequenceId),

    #[error("Sequence limit reached: {limit} live sequences")]
    CapacityExceeded { limit: usize },

    #[error("Sequence table closed: owning version retired")]
    Closed,

    #[error("Model version is not stateful")]
    Stateless,
}

/// Outcome of a successful `touch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceTouch {
    Created,
    Refreshed,
}

/// Capability the reaper needs from a sequence table.
pub trait SequenceSweep: Send + Sync + 'static {
    /// Evict entries idle for strictly longer than `max_idle`; returns the count evicted.
    fn remove_idle(&self, max_idle: Duration) -> Result<usize, SequenceError>;
}

struct SequenceTable {
    entries: HashMap<SequenceId, Instant>,
    closed: bool,
}

/// Live sequences of one stateful model instance.
pub struct SequenceRegistry {
    table: Mutex<SequenceTable>,
    max_sequences: usize,
}

impl SequenceRegistry {
    pub fn new(max_sequences: usize) -> Self {
        Self {
            table: Mutex::new(SequenceTable {
                entries: HashMap::new(),
                closed: false,
            }),
            max_sequences: max_sequences.max(1),
        }
    }

    /// Insert or refresh a sequence at the current time.
    pub fn touch(&self, id: SequenceId) -> Result<SequenceTouch, SequenceError> {
        self.touch_at(id, Instant::now())
    }

    /// Insert or refresh a sequence with an explicit timestamp.
    pub fn touch_at(&self, id: SequenceId, at: Instant) -> Result<SequenceTouch, SequenceError> {
        let mut table = self.table.lock();
        if table.closed {
            return Err(SequenceError::Closed);
        }
        if let Some(last) = table.entries.get_mut(&id) {
            *last = at;
            return Ok(SequenceTouch::Refreshed);
        }
        if table.entries.len() >= self.max_sequences {
            return Err(SequenceError::CapacityExceeded {
                limit: self.max_sequences,
            });
        }
        table.entries.insert(id, at);
        Ok(SequenceTouch::Created)
    }

    /// End a sequence explicitly.
    pub fn remove(&self, id: SequenceId) -> Result<(), SequenceError> {
        let mut table = self.table.lock();
        if table.closed {
            return Err(SequenceError::Closed);
        }
        table
            .entries
            .remove(&id)
            .map(|_| ())
            .ok_or(SequenceError::Missing(id))
    }

    /// Evict idle entries as of `now`. Idle time equal to `max_idle` is kept.
    pub fn remove_idle_at(&self, max_idle: Duration, now: Instant) -> usize {
        let mut table = self.table.lock();
        let before = table.entries.len();
        table
            .entries
            .retain(|_, last| now.saturating_duration_since(*last) <= max_idle);
        before - table.entries.len()
    }

    /// Drop every sequence and refuse new ones. Returns the number dropped.
    pub fn close(&self) -> usize {
        let mut table = self.table.lock();
        table.closed = true;
        let dropped = table.entries.len();
        table.entries.clear();
        dropped
    }

    pub fn contains(&self, id: SequenceId) -> bool {
        self.table.lock().entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.table.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.table.lock().closed
    }

    pub fn max_sequences(&self) -> usize {
        self.max_sequences
    }
}

impl SequenceSweep for SequenceRegistry {
    fn remove_idle(&self, max_idle: Duration) -> Result<usize, SequenceError> {
        Ok(self.remove_idle_at(max_idle, Instant::now()))
    }
}
