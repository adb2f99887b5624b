//! Prometheus metrics exposition
//!
//! Counters emitted during a run:
//!
//! - `graph_api_calls_total` (counter): one per attempt, including retries
//! - `graph_api_errors_total` (counter): label `kind` (error class)
//! - `graph_sync_records_total` (counter): label `resource`
//!
//! A sync run is a batch job, so the rendered exposition is written to a
//! textfile for the node exporter's textfile collector instead of being
//! served.

use std::path::Path;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::debug;

/// Install the global Prometheus recorder and return its handle.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Write the rendered exposition to `path` through a temp file and rename.
pub fn write_textfile(handle: &PrometheusHandle, path: &Path) -> std::io::Result<()> {
    let rendered = handle.render();
    let tmp_path = path.with_extension("prom.tmp");
    std::fs::write(&tmp_path, rendered.as_bytes())?;
    std::fs::rename(&tmp_path, path)?;
    debug!(path = %path.display(), bytes = rendered.len(), "wrote metrics textfile");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusRecorder;

    /// Isolated recorder/handle pair; only one global recorder may exist
    /// per process.
    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn counters_render_with_labels() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        metrics::counter!("graph_api_calls_total").increment(3);
        metrics::counter!("graph_api_errors_total", "kind" => "app_rate_limit").increment(1);
        metrics::counter!("graph_sync_records_total", "resource" => "likes").increment(24);

        let output = handle.render();
        assert!(output.contains("graph_api_calls_total 3"), "got: {output}");
        assert!(output.contains("kind=\"app_rate_limit\""), "got: {output}");
        assert!(output.contains("resource=\"likes\""), "got: {output}");
    }

    #[test]
    fn textfile_is_written() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);
        metrics::counter!("graph_sync_records_total", "resource" => "object").increment(1);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph_sync.prom");
        write_textfile(&handle, &path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("graph_sync_records_total"));
        assert!(!dir.path().join("graph_sync.prom.tmp").exists());
    }
}
