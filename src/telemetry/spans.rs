//! Span utilities for request admission.

use tracing::{info_span, Span};

/// Extension trait for recording an operation's outcome on a span.
pub trait SpanExt {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }
}

/// Factory for admission spans.
pub struct AdmissionSpan;

impl AdmissionSpan {
    /// Span covering one `resolve`, from lookup to admission or rejection.
    ///
    /// `status` and `error.message` are filled by `SpanExt::record_result`.
    pub fn new(model: &str, version: &str) -> Span {
        info_span!(
            "admission",
            model = %model,
            version = %version,
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
        )
    }
}
