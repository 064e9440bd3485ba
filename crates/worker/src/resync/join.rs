use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Who currently owns the worker's join handle.
enum JoinState {
	/// Not yet joined; the first shutdown caller takes the handle.
	Owned(JoinHandle<()>),
	/// Some caller is awaiting the handle; others wait for `Finished`.
	Joining,
	/// The worker task has ended.
	Finished,
}

/// Lets several shutdown callers wait on one worker task without racing.
pub(super) struct WorkerJoin {
	state: Mutex<JoinState>,
	finished: Notify,
}

impl WorkerJoin {
	pub(super) fn new(handle: JoinHandle<()>) -> Self {
		Self {
			state: Mutex::new(JoinState::Owned(handle)),
			finished: Notify::new(),
		}
	}

	/// Waits for the worker task, optionally bounded by `deadline`.
	///
	/// Returns `true` if the task finished. On timeout the leader puts the
	/// handle back so a later caller can retry.
	pub(super) async fn join(&self, deadline: Option<Instant>) -> bool {
		loop {
			let mut state = self.state.lock().await;
			let mut handle = match std::mem::replace(&mut *state, JoinState::Joining) {
				JoinState::Finished => {
					*state = JoinState::Finished;
					return true;
				}
				JoinState::Joining => {
					// Registered under the lock so the leader's notify cannot slip in before the await.
					let finished = self.finished.notified();
					tokio::pin!(finished);
					finished.as_mut().enable();
					drop(state);
					match deadline {
						Some(deadline) => {
							tokio::select! {
								_ = &mut finished => continue,
								_ = tokio::time::sleep_until(deadline) => return false,
							}
						}
						None => {
							finished.await;
							continue;
						}
					}
				}
				JoinState::Owned(handle) => handle,
			};
			drop(state);

			let done = match deadline {
				Some(deadline) => {
					tokio::select! {
						res = &mut handle => {
							log_join_result(res);
							true
						}
						_ = tokio::time::sleep_until(deadline) => false,
					}
				}
				None => {
					log_join_result((&mut handle).await);
					true
				}
			};

			*self.state.lock().await = if done { JoinState::Finished } else { JoinState::Owned(handle) };
			self.finished.notify_waiters();
			return done;
		}
	}
}

fn log_join_result(res: Result<(), tokio::task::JoinError>) {
	if let Err(err) = res {
		if err.is_panic() {
			tracing::error!("worker.resync.panicked");
		} else if !err.is_cancelled() {
			tracing::warn!(error = %err, "worker.resync.join_failed");
		}
	}
}
