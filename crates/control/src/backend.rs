//! Contract with the per-level queueing implementation.
//!
//! The fair-queuing algorithm lives elsewhere. The controller only creates
//! backends, pushes new limits into them, and asks them to drain.

use std::sync::Arc;
use std::time::Duration;

use crate::quiesce::RetirementHandle;

/// Parameters pushed into a backend on creation and on every pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
	pub concurrency_limit: u32,
	/// Zero means excess requests are rejected rather than queued.
	pub queues: u32,
	pub queue_length_limit: u32,
	pub hand_size: u32,
	pub request_wait_limit: Duration,
}

/// Live queueing state of one priority level.
///
/// Implementations are shared with request dispatch and must be internally
/// synchronized.
pub trait Backend: Send + Sync {
	/// Applies new parameters without dropping queued or executing requests.
	fn reconfigure(&self, config: &QueueConfig);

	/// `Some` asks the backend to stop admitting new work and call
	/// [`RetirementHandle::handle_empty`] once nothing is queued or executing.
	/// `None` cancels a pending quiesce. Repeated calls are idempotent.
	fn quiesce(&self, on_empty: Option<RetirementHandle>);
}

/// Creates backends for levels that need one.
pub trait BackendFactory: Send + Sync {
	fn new_backend(&self, level: &str, config: &QueueConfig) -> Arc<dyn Backend>;
}
