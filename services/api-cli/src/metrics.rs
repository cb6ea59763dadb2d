//! Prometheus metrics exposition
//!
//! Installs the recorder behind the client's counters. With `--metrics` the
//! rendered exposition is written to stderr when the command finishes.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the global Prometheus recorder and return a handle for rendering.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}
