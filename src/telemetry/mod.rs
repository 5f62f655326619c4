//! Telemetry for the serving runtime.
//!
//! Structured logging, request spans and metrics. The crate records metrics
//! through the `metrics` facade; installing an exporter is up to the embedder.

mod logging;
mod metrics;
mod spans;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use metrics::{
    record_admission, record_in_flight, record_load_duration, record_sequences_evicted,
    record_transition,
};
pub use spans::{AdmissionSpan, SpanExt};
