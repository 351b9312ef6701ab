//! Prometheus metrics recorder and `/metrics` rendering.

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tether_core::metric_names as names;
use tracing::info;

/// Install the Prometheus recorder as the global `metrics` recorder.
///
/// Call once at startup before anything is recorded. Returns the handle
/// `/metrics` renders from.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

fn describe_metrics() {
    describe_counter!(names::EVENTS_ROUTED_TOTAL, "Events entering the router");
    describe_histogram!(
        names::EVENT_DISPATCH_DURATION_SECONDS,
        "Time spent in middleware and handlers per event"
    );
    describe_counter!(names::EVENT_ERRORS_TOTAL, "Events whose dispatch failed");
    describe_gauge!(names::ACKS_PENDING, "Acknowledgments currently awaited");
    describe_counter!(names::ACKS_RESOLVED_TOTAL, "Acknowledgments resolved, by outcome");
    describe_counter!(names::ACK_BATCHES_FLUSHED_TOTAL, "Ack batches flushed");
    describe_counter!(names::WS_CONNECTIONS_TOTAL, "WebSocket connections opened");
    describe_counter!(names::WS_DISCONNECTIONS_TOTAL, "WebSocket connections closed");
    describe_gauge!(names::WS_CONNECTIONS_ACTIVE, "Live WebSocket connections");
    describe_histogram!(
        names::WS_CONNECTION_DURATION_SECONDS,
        "WebSocket connection lifetime"
    );
    describe_counter!(names::WS_UPGRADES_REJECTED_TOTAL, "Refused WebSocket upgrades");
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics::counter;

    #[test]
    fn local_recorder_renders_recorded_counter() {
        // Local recorder only: installing globally would leak across tests.
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            counter!(names::EVENTS_ROUTED_TOTAL, "type" => "ping").increment(2);
        });

        let output = render(&handle);
        assert!(output.contains("events_routed_total{type=\"ping\"} 2"));
    }
}
