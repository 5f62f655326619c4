//! Metric names and recording helpers.

use std::time::Duration;

use crate::models::{StatusCode, VersionState};

pub const ADMISSIONS_TOTAL: &str = "gg_serving_admissions_total";
pub const IN_FLIGHT_REQUESTS: &str = "gg_serving_in_flight_requests";
pub const VERSION_TRANSITIONS_TOTAL: &str = "gg_serving_version_transitions_total";
pub const LOAD_SECONDS: &str = "gg_serving_load_seconds";
pub const SEQUENCES_EVICTED_TOTAL: &str = "gg_serving_sequences_evicted_total";

/// Count one resolve outcome.
pub fn record_admission(model: &str, outcome: StatusCode) {
    ::metrics::counter!(ADMISSIONS_TOTAL, "model" => model.to_string(), "outcome" => outcome.as_str())
        .increment(1);
}

pub fn record_in_flight(model: &str, version: u64, in_flight: u32) {
    ::metrics::gauge!(IN_FLIGHT_REQUESTS, "model" => model.to_string(), "version" => version.to_string())
        .set(f64::from(in_flight));
}

pub fn record_transition(state: VersionState) {
    ::metrics::counter!(VERSION_TRANSITIONS_TOTAL, "state" => state.as_str()).increment(1);
}

pub fn record_load_duration(model: &str, elapsed: Duration) {
    ::metrics::histogram!(LOAD_SECONDS, "model" => model.to_string()).record(elapsed.as_secs_f64());
}

pub fn record_sequences_evicted(count: usize) {
    if count > 0 {
        ::metrics::counter!(SEQUENCES_EVICTED_TOTAL).increment(count as u64);
    }
}
