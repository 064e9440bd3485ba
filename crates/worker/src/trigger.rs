use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::Backoff;

/// Why a resync was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResyncReason {
	/// First pass after startup.
	Initial,
	/// A watched configuration object was added, updated or deleted.
	Changed,
	/// A retiring resource finished draining.
	Drained { level: String },
	/// A previous pass failed and is being retried.
	Retry { attempt: u32 },
}

/// Outcome of [`ResyncTrigger::trigger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
	/// No run was pending; one is now.
	Scheduled,
	/// A run was already pending and absorbed this request.
	Coalesced,
	/// The receiver side has been closed.
	Closed,
}

/// One dequeued resync run.
#[derive(Debug)]
pub struct ResyncTicket {
	reasons: Vec<ResyncReason>,
	coalesced: usize,
	attempt: u32,
}

impl ResyncTicket {
	/// Distinct reasons folded into this run, in arrival order.
	pub fn reasons(&self) -> &[ResyncReason] {
		&self.reasons
	}

	/// Number of trigger calls absorbed by this run beyond the first.
	pub fn coalesced(&self) -> usize {
		self.coalesced
	}

	/// Consecutive failures preceding this run.
	pub fn attempt(&self) -> u32 {
		self.attempt
	}
}

#[derive(Default)]
struct TriggerState {
	pending: bool,
	running: bool,
	closed: bool,
	reasons: Vec<ResyncReason>,
	coalesced: usize,
	not_before: Option<Instant>,
	attempts: u32,
}

struct TriggerInner {
	state: Mutex<TriggerState>,
	notify: Notify,
}

/// Producer side of a coalescing resync queue.
///
/// `trigger` never blocks and never awaits, so it may be called from
/// callbacks running on threads outside the async runtime.
#[derive(Clone)]
pub struct ResyncTrigger {
	inner: Arc<TriggerInner>,
}

/// Consumer side of a coalescing resync queue. There is exactly one.
pub struct ResyncReceiver {
	inner: Arc<TriggerInner>,
}

impl std::fmt::Debug for ResyncTrigger {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let state = self.inner.state.lock();
		f.debug_struct("ResyncTrigger")
			.field("pending", &state.pending)
			.field("running", &state.running)
			.field("closed", &state.closed)
			.finish()
	}
}

impl ResyncTrigger {
	/// Creates a connected trigger/receiver pair in the idle state.
	pub fn new() -> (ResyncTrigger, ResyncReceiver) {
		let inner = Arc::new(TriggerInner {
			state: Mutex::new(TriggerState::default()),
			notify: Notify::new(),
		});
		(ResyncTrigger { inner: Arc::clone(&inner) }, ResyncReceiver { inner })
	}

	/// Requests a resync.
	///
	/// A fresh request cancels any backoff delay left by a failed run, so a
	/// real change is picked up immediately.
	pub fn trigger(&self, reason: ResyncReason) -> TriggerOutcome {
		let mut state = self.inner.state.lock();
		if state.closed {
			return TriggerOutcome::Closed;
		}
		let outcome = if state.pending {
			state.coalesced = state.coalesced.saturating_add(1);
			TriggerOutcome::Coalesced
		} else {
			state.pending = true;
			TriggerOutcome::Scheduled
		};
		state.not_before = None;
		if !state.reasons.contains(&reason) {
			state.reasons.push(reason);
		}
		drop(state);
		self.inner.notify.notify_one();
		outcome
	}

	/// Stops accepting requests. The receiver drains what is pending.
	pub fn close(&self) {
		self.inner.state.lock().closed = true;
		self.inner.notify.notify_one();
	}

	/// Returns true when a run is waiting to be dequeued.
	pub fn is_pending(&self) -> bool {
		self.inner.state.lock().pending
	}
}

impl ResyncReceiver {
	/// Waits for the next run. Returns `None` once closed and drained.
	///
	/// A run deferred by [`Self::retry`] is abandoned on close rather than
	/// waited out.
	pub async fn recv(&self) -> Option<ResyncTicket> {
		loop {
			let wait_until = {
				let mut state = self.inner.state.lock();
				if state.closed && (!state.pending || state.not_before.is_some()) {
					return None;
				}
				match state.not_before {
					Some(deadline) if state.pending && deadline > Instant::now() => Some(deadline),
					_ if state.pending && !state.running => {
						state.pending = false;
						state.running = true;
						state.not_before = None;
						let ticket = ResyncTicket {
							reasons: std::mem::take(&mut state.reasons),
							coalesced: std::mem::take(&mut state.coalesced),
							attempt: state.attempts,
						};
						return Some(ticket);
					}
					_ => None,
				}
			};

			match wait_until {
				Some(deadline) => {
					tokio::select! {
						_ = self.inner.notify.notified() => {}
						_ = tokio::time::sleep_until(deadline) => {}
					}
				}
				None => self.inner.notify.notified().await,
			}
		}
	}

	/// Marks a run as successful and forgets its failure history.
	pub fn complete(&self, ticket: ResyncTicket) {
		let mut state = self.inner.state.lock();
		state.running = false;
		state.attempts = 0;
		let rerun = state.pending;
		drop(state);
		drop(ticket);
		if rerun {
			self.inner.notify.notify_one();
		}
	}

	/// Marks a run as failed and schedules it again after the backoff delay.
	///
	/// If a fresh trigger arrived while the run was in flight, the follow-up
	/// run is not delayed. Returns the delay applied.
	pub fn retry(&self, ticket: ResyncTicket, backoff: &Backoff) -> Duration {
		let mut state = self.inner.state.lock();
		state.running = false;
		let attempt = state.attempts;
		state.attempts = state.attempts.saturating_add(1);
		let delay = if state.pending {
			Duration::ZERO
		} else {
			let delay = backoff.delay(attempt);
			state.pending = true;
			state.not_before = Some(Instant::now() + delay);
			delay
		};
		let retry = ResyncReason::Retry { attempt: state.attempts };
		if !state.reasons.contains(&retry) {
			state.reasons.push(retry);
		}
		drop(state);
		drop(ticket);
		self.inner.notify.notify_one();
		delay
	}

	/// Consecutive failed runs since the last success.
	pub fn failed_attempts(&self) -> u32 {
		self.inner.state.lock().attempts
	}
}
