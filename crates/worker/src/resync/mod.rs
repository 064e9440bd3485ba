use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::trigger::{ResyncReceiver, ResyncTicket, ResyncTrigger};
use crate::{Backoff, TaskClass};

mod join;

use join::WorkerJoin;

/// One pass of a level-triggered control loop.
///
/// Passes are never run concurrently: the worker awaits each one before
/// dequeuing the next ticket.
#[async_trait]
pub trait ResyncHandler: Send + 'static {
	/// Recomputes derived state. `Err` schedules a retry with backoff.
	async fn resync(&mut self, ticket: &ResyncTicket) -> Result<(), String>;

	/// Called once after the loop exits.
	async fn on_stop(&mut self) {}
}

/// Configuration for one resync worker.
#[derive(Debug, Clone)]
pub struct ResyncWorkerSpec {
	pub(crate) name: String,
	pub(crate) class: TaskClass,
	pub(crate) backoff: Backoff,
}

impl ResyncWorkerSpec {
	/// Creates a spec with the default backoff.
	pub fn new(name: impl Into<String>, class: TaskClass) -> Self {
		Self {
			name: name.into(),
			class,
			backoff: Backoff::default(),
		}
	}

	/// Sets the retry backoff applied after failed passes.
	#[must_use]
	pub fn backoff(mut self, backoff: Backoff) -> Self {
		self.backoff = backoff;
		self
	}
}

/// How to stop a resync worker.
#[derive(Debug, Clone, Copy)]
pub enum ShutdownMode {
	/// Stop waiting for triggers and backoff delays now. A pass already in
	/// flight still runs to completion.
	Immediate,
	/// Close the trigger, let pending work drain, then stop.
	Graceful { timeout: Duration },
}

/// Result of [`ResyncWorkerHandle::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
	completed: bool,
	timed_out: bool,
}

impl ShutdownReport {
	pub fn completed(&self) -> bool {
		self.completed
	}

	pub fn timed_out(&self) -> bool {
		self.timed_out
	}
}

#[derive(Default)]
struct WorkerStats {
	passes: AtomicU64,
	failures: AtomicU64,
}

/// Handle for a spawned resync worker. Dropping it cancels the worker.
pub struct ResyncWorkerHandle {
	name: String,
	trigger: ResyncTrigger,
	cancel: CancellationToken,
	stats: Arc<WorkerStats>,
	join: Arc<WorkerJoin>,
}

impl Drop for ResyncWorkerHandle {
	fn drop(&mut self) {
		self.cancel.cancel();
	}
}

impl ResyncWorkerHandle {
	/// Worker name.
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Number of successful passes.
	pub fn passes(&self) -> u64 {
		self.stats.passes.load(Ordering::Acquire)
	}

	/// Number of failed passes.
	pub fn failures(&self) -> u64 {
		self.stats.failures.load(Ordering::Acquire)
	}

	/// Requests cancellation without waiting.
	pub fn cancel(&self) {
		self.cancel.cancel();
		self.trigger.close();
	}

	/// Stops the worker.
	pub async fn shutdown(&self, mode: ShutdownMode) -> ShutdownReport {
		match mode {
			ShutdownMode::Immediate => {
				self.cancel();
				self.join.join(None).await;
				ShutdownReport {
					completed: true,
					timed_out: false,
				}
			}
			ShutdownMode::Graceful { timeout } => {
				self.trigger.close();
				let completed = self.join.join(Some(tokio::time::Instant::now() + timeout)).await;
				if !completed {
					tracing::warn!(worker = %self.name, "worker.resync.graceful_timeout");
					self.cancel.cancel();
				}
				ShutdownReport {
					completed,
					timed_out: !completed,
				}
			}
		}
	}
}

/// Spawns the single task that drains `receiver` into `handler`.
pub fn spawn_resync_worker<H>(spec: ResyncWorkerSpec, trigger: ResyncTrigger, receiver: ResyncReceiver, mut handler: H) -> ResyncWorkerHandle
where
	H: ResyncHandler,
{
	let cancel = CancellationToken::new();
	let stats = Arc::new(WorkerStats::default());
	let task_cancel = cancel.clone();
	let task_stats = Arc::clone(&stats);
	let task_name = spec.name.clone();
	let backoff = spec.backoff;

	let task = crate::spawn(spec.class, async move {
		loop {
			let ticket = tokio::select! {
				biased;
				_ = task_cancel.cancelled() => break,
				ticket = receiver.recv() => match ticket {
					Some(ticket) => ticket,
					None => break,
				},
			};

			tracing::debug!(
				worker = %task_name,
				reasons = ?ticket.reasons(),
				coalesced = ticket.coalesced(),
				attempt = ticket.attempt(),
				"worker.resync.start"
			);

			match handler.resync(&ticket).await {
				Ok(()) => {
					task_stats.passes.fetch_add(1, Ordering::AcqRel);
					receiver.complete(ticket);
				}
				Err(err) => {
					task_stats.failures.fetch_add(1, Ordering::AcqRel);
					let attempt = ticket.attempt();
					let delay = receiver.retry(ticket, &backoff);
					tracing::warn!(
						worker = %task_name,
						attempt,
						delay_ms = delay.as_millis() as u64,
						error = %err,
						"worker.resync.retry"
					);
				}
			}
		}

		handler.on_stop().await;
		tracing::debug!(worker = %task_name, "worker.resync.stopped");
	});

	ResyncWorkerHandle {
		name: spec.name,
		trigger,
		cancel,
		stats,
		join: Arc::new(WorkerJoin::new(task)),
	}
}
