use std::future::Future;
use std::sync::OnceLock;

use tokio::task::JoinHandle;

use crate::TaskClass;

fn runtime_handle() -> tokio::runtime::Handle {
	if let Ok(handle) = tokio::runtime::Handle::try_current() {
		return handle;
	}

	static GLOBAL_RT: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
	let runtime = GLOBAL_RT.get_or_init(|| {
		tokio::runtime::Builder::new_multi_thread()
			.enable_all()
			.worker_threads(2)
			.thread_name("flowgate-worker-global")
			.build()
			.expect("failed to build flowgate-worker global tokio runtime")
	});
	runtime.handle().clone()
}

/// Spawns an async task tagged with its worker class.
///
/// Falls back to a small process-wide runtime when called outside of one, so
/// controllers can be started from synchronous setup code.
pub fn spawn<F>(class: TaskClass, fut: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	tracing::trace!(worker_class = class.as_str(), "worker.spawn");
	runtime_handle().spawn(fut)
}
