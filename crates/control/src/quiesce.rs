//! Drain tracking for retiring priority levels.
//!
//! A backend reports "empty" from whatever thread it runs on. The handle only
//! flips its own flag and sends a [`ResyncReason::Drained`] message through
//! the trigger; the reconciler notices the flag on its next pass and drops the
//! level. Nothing here touches published state.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use flowgate_worker::{ResyncReason, ResyncTrigger};
use parking_lot::Mutex;
use tokio::sync::Notify;

/// Progress of one retirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
	/// Waiting for the backend to empty.
	Draining,
	/// The backend reported that nothing is queued or executing.
	Empty,
	/// The level became desired again before it drained.
	Cancelled,
}

struct HandleInner {
	level: String,
	state: Mutex<DrainState>,
	trigger: ResyncTrigger,
	outstanding: Arc<Outstanding>,
}

/// Shared by a retiring level and its backend.
#[derive(Clone)]
pub struct RetirementHandle {
	inner: Arc<HandleInner>,
}

impl std::fmt::Debug for RetirementHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RetirementHandle")
			.field("level", &self.inner.level)
			.field("state", &self.state())
			.finish()
	}
}

impl RetirementHandle {
	/// Name of the retiring level.
	pub fn level(&self) -> &str {
		&self.inner.level
	}

	pub fn state(&self) -> DrainState {
		*self.inner.state.lock()
	}

	/// True once the backend has reported empty.
	pub fn is_empty(&self) -> bool {
		self.state() == DrainState::Empty
	}

	/// Called by the backend when it has drained.
	///
	/// Tolerates repeated calls. A call after [`Self::cancel`] is stale and
	/// ignored.
	pub fn handle_empty(&self) {
		let mut state = self.inner.state.lock();
		match *state {
			DrainState::Draining => {
				*state = DrainState::Empty;
				drop(state);
				self.inner.outstanding.release();
				tracing::debug!(priority_level = %self.inner.level, "flowcontrol.level.drained");
				self.inner.trigger.trigger(ResyncReason::Drained {
					level: self.inner.level.clone(),
				});
			}
			DrainState::Empty => {}
			DrainState::Cancelled => {
				tracing::debug!(priority_level = %self.inner.level, "flowcontrol.level.drained_after_cancel");
			}
		}
	}

	/// Abandons the retirement. Returns false if it had already ended.
	pub(crate) fn cancel(&self) -> bool {
		let mut state = self.inner.state.lock();
		if *state != DrainState::Draining {
			return false;
		}
		*state = DrainState::Cancelled;
		drop(state);
		self.inner.outstanding.release();
		true
	}

	/// Whether both handles track the same retirement.
	pub fn same_as(&self, other: &RetirementHandle) -> bool {
		Arc::ptr_eq(&self.inner, &other.inner)
	}
}

#[derive(Default)]
struct Outstanding {
	count: AtomicUsize,
	quiescent: Notify,
}

impl Outstanding {
	fn acquire(&self) {
		self.count.fetch_add(1, Ordering::AcqRel);
	}

	fn release(&self) {
		if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
			self.quiescent.notify_waiters();
		}
	}
}

/// Issues retirement handles and counts the ones still draining.
#[derive(Clone)]
pub struct QuiesceCoordinator {
	outstanding: Arc<Outstanding>,
	trigger: ResyncTrigger,
}

impl QuiesceCoordinator {
	pub fn new(trigger: ResyncTrigger) -> Self {
		Self {
			outstanding: Arc::new(Outstanding::default()),
			trigger,
		}
	}

	/// Starts tracking a retirement for `level`.
	pub fn begin(&self, level: &str) -> RetirementHandle {
		self.outstanding.acquire();
		RetirementHandle {
			inner: Arc::new(HandleInner {
				level: level.to_string(),
				state: Mutex::new(DrainState::Draining),
				trigger: self.trigger.clone(),
				outstanding: Arc::clone(&self.outstanding),
			}),
		}
	}

	/// Number of retirements neither drained nor cancelled.
	pub fn outstanding(&self) -> usize {
		self.outstanding.count.load(Ordering::Acquire)
	}

	/// Resolves once no level is draining.
	pub async fn wait_quiescent(&self) {
		loop {
			let notified = self.outstanding.quiescent.notified();
			if self.outstanding() == 0 {
				return;
			}
			notified.await;
		}
	}
}
