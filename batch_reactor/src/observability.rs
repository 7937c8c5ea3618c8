//! Metric names and the optional Prometheus exporter.
//!
//! Every reactor records through the `metrics` facade, labelled with the
//! reactor's name. Nothing is exported until a recorder is installed, either
//! by the application or with [`install_prometheus_exporter`].

use std::io;
use std::net::SocketAddr;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};

/// Items accepted into a back buffer.
pub const ITEMS_ADMITTED_TOTAL: &str = "batch_reactor_items_admitted_total";
/// Admissions refused, labelled by `reason` (`stopped`, `overflow`, `throttled`).
pub const ADMISSIONS_REJECTED_TOTAL: &str = "batch_reactor_admissions_rejected_total";
/// Batch callback invocations.
pub const BATCHES_TOTAL: &str = "batch_reactor_batches_total";
/// Batches whose outcome failed.
pub const BATCH_FAILURES_TOTAL: &str = "batch_reactor_batch_failures_total";
/// Items handed back for another attempt by a retry policy.
pub const ITEMS_RETRIED_TOTAL: &str = "batch_reactor_items_retried_total";
/// Items per batch.
pub const BATCH_SIZE: &str = "batch_reactor_batch_size";
/// Batches dispatched whose outcome has not settled yet.
pub const BATCHES_IN_FLIGHT: &str = "batch_reactor_batches_in_flight";

/// Registers descriptions for every reactor metric with the installed recorder.
pub fn describe_metrics() {
    describe_counter!(ITEMS_ADMITTED_TOTAL, Unit::Count, "Items accepted into a back buffer");
    describe_counter!(
        ADMISSIONS_REJECTED_TOTAL,
        Unit::Count,
        "Admissions refused because the reactor stopped, the buffer was full or retries throttled it"
    );
    describe_counter!(BATCHES_TOTAL, Unit::Count, "Batch callback invocations");
    describe_counter!(BATCH_FAILURES_TOTAL, Unit::Count, "Batches whose outcome failed");
    describe_counter!(ITEMS_RETRIED_TOTAL, Unit::Count, "Items queued for another attempt");
    describe_histogram!(BATCH_SIZE, Unit::Count, "Items per batch");
    describe_gauge!(BATCHES_IN_FLIGHT, Unit::Count, "Batches awaiting their outcome");
}

/// Installs a Prometheus recorder serving `/metrics` on `addr`.
///
/// # Errors
///
/// Returns an error if a recorder is already installed or the listener cannot
/// be started.
pub fn install_prometheus_exporter(addr: SocketAddr) -> io::Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(io::Error::other)?;
    describe_metrics();
    tracing::info!(%addr, "batch reactor metrics exported");
    Ok(())
}
