//! Stats gauge sink.

/// Sink for scheduler gauges.
///
/// The stats tick pushes the current torrent and connection counts here;
/// wiring them into a metrics backend is the embedder's concern.
pub trait StatsSink: Send + Sync {
    /// Records the current value of a gauge.
    fn gauge(&self, name: &'static str, value: f64);
}

/// Stats sink that logs gauges at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingStats;

impl StatsSink for TracingStats {
    fn gauge(&self, name: &'static str, value: f64) {
        tracing::debug!("gauge {name}={value}");
    }
}
