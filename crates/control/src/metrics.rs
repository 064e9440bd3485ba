//! Best-effort metrics hooks.

/// Receives per-level limits after each pass. Must not block.
pub trait MetricsSink: Send + Sync {
	fn record_concurrency_limit(&self, level: &str, limit: u32);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
	fn record_concurrency_limit(&self, _level: &str, _limit: u32) {}
}
