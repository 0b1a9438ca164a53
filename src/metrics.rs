//! Prometheus metrics for storage operations.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`
//! and defines the metric name constants.  Recording goes through the
//! `metrics` facade, so it is a no-op until [`init_metrics`] has run.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::warn;

// -- Metric name constants ----------------------------------------------------

/// Total storage operations (counter). Labels: operation, status.
pub const OPERATIONS_TOTAL: &str = "storage_operations_total";

/// Storage operation duration in seconds (histogram). Labels: operation.
pub const OPERATION_DURATION_SECONDS: &str = "storage_operation_duration_seconds";

/// Total bytes uploaded (counter).
pub const BYTES_UPLOADED_TOTAL: &str = "storage_bytes_uploaded_total";

/// Total bytes downloaded (counter).
pub const BYTES_DOWNLOADED_TOTAL: &str = "storage_bytes_downloaded_total";

// -- Global recorder installation ---------------------------------------------

/// Singleton handle to the Prometheus recorder.  `None` if another recorder
/// was already installed.
static PROMETHEUS_HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

/// Install the global Prometheus recorder and register metric descriptions.
/// Idempotent.  Returns `None` if a different global recorder was installed
/// first.
pub fn init_metrics() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                describe_metrics();
                Some(handle)
            }
            Err(e) => {
                warn!("Prometheus recorder not installed: {e}");
                None
            }
        })
        .as_ref()
}

fn describe_metrics() {
    describe_counter!(OPERATIONS_TOTAL, "Total storage operations by type and outcome");
    describe_histogram!(
        OPERATION_DURATION_SECONDS,
        "Storage operation duration in seconds"
    );
    describe_counter!(BYTES_UPLOADED_TOTAL, "Total bytes uploaded to object storage");
    describe_counter!(
        BYTES_DOWNLOADED_TOTAL,
        "Total bytes downloaded from object storage"
    );
}

/// Render the Prometheus exposition text, or an empty string if the
/// recorder is not installed.
pub fn render() -> String {
    PROMETHEUS_HANDLE
        .get()
        .and_then(Option::as_ref)
        .map(PrometheusHandle::render)
        .unwrap_or_default()
}

// -- Recording helpers --------------------------------------------------------

/// Record one completed operation.
pub fn record_operation(operation: &'static str, ok: bool, elapsed: Duration) {
    let status = if ok { "ok" } else { "error" };
    counter!(OPERATIONS_TOTAL, "operation" => operation, "status" => status).increment(1);
    histogram!(OPERATION_DURATION_SECONDS, "operation" => operation)
        .record(elapsed.as_secs_f64());
}

pub fn record_bytes_uploaded(bytes: u64) {
    counter!(BYTES_UPLOADED_TOTAL).increment(bytes);
}

pub fn record_bytes_downloaded(bytes: u64) {
    counter!(BYTES_DOWNLOADED_TOTAL).increment(bytes);
}
