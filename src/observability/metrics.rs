//! Prometheus metrics.

use crate::{Error, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Installs the Prometheus recorder and returns its render handle.
///
/// Returns `Ok(None)` when metrics are disabled. Rendering is served by the
/// HTTP layer rather than a separate listener.
///
/// # Errors
///
/// Returns an error if a global recorder is already installed.
pub fn install_prometheus(enabled: bool) -> Result<Option<PrometheusHandle>> {
    if !enabled {
        return Ok(None);
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| Error::OperationFailed {
            operation: "metrics_recorder_install".to_string(),
            cause: e.to_string(),
        })?;

    describe_metrics();
    Ok(Some(handle))
}

fn describe_metrics() {
    metrics::describe_counter!("annotations_write_total", "Annotation sets written");
    metrics::describe_counter!(
        "annotations_write_failed_total",
        "Annotation writes rejected by the graph store"
    );
    metrics::describe_counter!("annotations_read_total", "Annotation reads");
    metrics::describe_counter!("annotations_delete_total", "Annotation scope deletes");
    metrics::describe_counter!(
        "annotations_forward_failed_total",
        "Written annotation sets that could not be forwarded"
    );
    metrics::describe_counter!("queue_messages_total", "Queue messages by outcome");
    metrics::describe_histogram!(
        "annotations_store_duration_seconds",
        metrics::Unit::Seconds,
        "Graph store call latency by operation"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_metrics_install_nothing() {
        assert!(install_prometheus(false).unwrap().is_none());
    }
}
