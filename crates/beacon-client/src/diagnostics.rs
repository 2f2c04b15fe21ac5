use std::time::{Duration, SystemTime};

/// Receives connection diagnostics from the update processors. Upload and
/// aggregation live outside the core; this is the boundary.
pub trait DiagnosticsSink: Send + Sync {
    /// Records one streaming connection attempt: when it started, whether
    /// it failed, and how long establishing (or failing) took.
    fn record_stream_init(&self, start: SystemTime, failed: bool, duration: Duration);
}

pub struct NullDiagnosticsSink;

impl DiagnosticsSink for NullDiagnosticsSink {
    fn record_stream_init(&self, _start: SystemTime, _failed: bool, _duration: Duration) {}
}
