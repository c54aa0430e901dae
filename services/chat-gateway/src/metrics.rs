//! Prometheus metrics exposition
//!
//! HTTP-level metrics recorded here:
//!
//! - `chat_requests_total` (counter): labels `status`, `route`
//! - `chat_request_duration_seconds` (histogram): label `route`
//! - `chat_sessions_active` (gauge)
//!
//! Dispatch metrics (`dispatch_attempts_total`, `credential_rotations_total`,
//! `transient_retries_total`, `dispatch_exhausted_total`) are emitted by the
//! key-pool crate and rendered by the same recorder.

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

const DURATION_METRIC: &str = "chat_request_duration_seconds";

/// Provider answers run from sub-second to the full per-attempt timeout,
/// times a few retries.
const DURATION_BUCKETS: &[f64] = &[
    0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0,
];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(DURATION_METRIC.to_string()), DURATION_BUCKETS)
}

/// Install the global Prometheus recorder and return a handle for `/metrics`.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    Ok(builder()?.install_recorder()?)
}

/// Record a finished HTTP request.
pub fn record_request(status: u16, route: &'static str, duration_secs: f64) {
    metrics::counter!("chat_requests_total", "status" => status.to_string(), "route" => route)
        .increment(1);
    metrics::histogram!(DURATION_METRIC, "route" => route).record(duration_secs);
}

pub fn set_sessions_active(count: usize) {
    metrics::gauge!("chat_sessions_active").set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusRecorder;

    /// Isolated recorder so tests never touch the global singleton.
    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = builder().unwrap().build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        record_request(200, "messages", 0.05);
        set_sessions_active(3);
    }

    #[test]
    fn record_request_writes_counter_and_histogram() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_request(200, "messages", 1.2);
        record_request(503, "messages", 0.3);

        let output = handle.render();
        assert!(output.contains("chat_requests_total"));
        assert!(output.contains("status=\"200\""));
        assert!(output.contains("status=\"503\""));
        assert!(output.contains("route=\"messages\""));
        assert!(
            output.contains("chat_request_duration_seconds_bucket"),
            "duration must render as a histogram, got: {output}"
        );
        assert!(output.contains("le=\"300\""));
    }

    #[test]
    fn sessions_gauge_reflects_last_value() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        set_sessions_active(4);
        set_sessions_active(2);

        let output = handle.render();
        assert!(output.contains("chat_sessions_active 2"), "got: {output}");
    }
}
