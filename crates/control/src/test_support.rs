//! Fakes shared by the crate's unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use flowgate_worker::{ResyncReceiver, ResyncTrigger};
use parking_lot::Mutex;

use crate::backend::{Backend, BackendFactory, QueueConfig};
use crate::backstop::BackstopTemplates;
use crate::error::{ObjectKind, SourceError, StatusError};
use crate::metrics::MetricsSink;
use crate::model::{FlowSchemaConfig, PriorityLevelConfig, SchemaCondition};
use crate::quiesce::{QuiesceCoordinator, RetirementHandle};
use crate::reconcile::{ReconcileParams, Reconciliation, reconcile};
use crate::source::{ConfigSource, MemorySource};
use crate::state::PublishedState;
use crate::status::StatusWriter;

/// Records every call made by the reconciler.
pub(crate) struct FakeBackend {
	pub level: String,
	configs: Mutex<Vec<QueueConfig>>,
	quiesce_calls: Mutex<Vec<bool>>,
	on_empty: Mutex<Option<RetirementHandle>>,
	hook: Mutex<Option<QuiesceHook>>,
}

type QuiesceHook = Box<dyn FnOnce(&RetirementHandle) + Send>;

impl FakeBackend {
	pub fn configs(&self) -> Vec<QueueConfig> {
		self.configs.lock().clone()
	}

	pub fn last_config(&self) -> QueueConfig {
		*self.configs.lock().last().expect("backend was configured")
	}

	/// `true` for each `quiesce(Some(_))`, `false` for each `quiesce(None)`.
	pub fn quiesce_calls(&self) -> Vec<bool> {
		self.quiesce_calls.lock().clone()
	}

	/// Runs `hook` inside the next `quiesce(Some(_))`, before the handle is stored.
	pub fn when_quiescing(&self, hook: impl FnOnce(&RetirementHandle) + Send + 'static) {
		*self.hook.lock() = Some(Box::new(hook));
	}

	pub fn is_quiescing(&self) -> bool {
		self.on_empty.lock().is_some()
	}

	/// Reports empty if a quiesce is pending. Returns whether it was.
	pub fn drain(&self) -> bool {
		let handle = self.on_empty.lock().take();
		match handle {
			Some(handle) => {
				handle.handle_empty();
				true
			}
			None => false,
		}
	}
}

impl Backend for FakeBackend {
	fn reconfigure(&self, config: &QueueConfig) {
		self.configs.lock().push(*config);
	}

	fn quiesce(&self, on_empty: Option<RetirementHandle>) {
		self.quiesce_calls.lock().push(on_empty.is_some());
		if let Some(handle) = &on_empty {
			let hook = self.hook.lock().take();
			if let Some(hook) = hook {
				hook(handle);
			}
		}
		*self.on_empty.lock() = on_empty;
	}
}

#[derive(Default)]
pub(crate) struct FakeFactory {
	created: Mutex<Vec<Arc<FakeBackend>>>,
}

impl FakeFactory {
	pub fn created(&self) -> usize {
		self.created.lock().len()
	}

	pub fn all(&self) -> Vec<Arc<FakeBackend>> {
		self.created.lock().clone()
	}

	/// Most recently created backend for `level`.
	pub fn backend(&self, level: &str) -> Arc<FakeBackend> {
		self.created
			.lock()
			.iter()
			.rev()
			.find(|backend| backend.level == level)
			.cloned()
			.unwrap_or_else(|| panic!("no backend created for {level:?}"))
	}
}

impl BackendFactory for FakeFactory {
	fn new_backend(&self, level: &str, config: &QueueConfig) -> Arc<dyn Backend> {
		let backend = Arc::new(FakeBackend {
			level: level.to_string(),
			configs: Mutex::new(vec![*config]),
			quiesce_calls: Mutex::new(Vec::new()),
			on_empty: Mutex::new(None),
			hook: Mutex::new(None),
		});
		self.created.lock().push(Arc::clone(&backend));
		backend
	}
}

/// Whether `published` is the very backend `fake` points at.
pub(crate) fn same_backend(published: Option<&Arc<dyn Backend>>, fake: &Arc<FakeBackend>) -> bool {
	published.is_some_and(|backend| std::ptr::addr_eq(Arc::as_ptr(backend), Arc::as_ptr(fake)))
}

/// Status writer that records writes and can be told to fail.
#[derive(Default)]
pub(crate) struct FakeStatusWriter {
	writes: Mutex<Vec<(String, SchemaCondition)>>,
	fail: AtomicBool,
}

impl FakeStatusWriter {
	pub fn writes(&self) -> Vec<(String, SchemaCondition)> {
		self.writes.lock().clone()
	}

	pub fn set_failing(&self, fail: bool) {
		self.fail.store(fail, Ordering::Release);
	}
}

#[async_trait]
impl StatusWriter for FakeStatusWriter {
	async fn update_schema_status(&self, schema: &str, condition: &SchemaCondition) -> Result<(), StatusError> {
		if self.fail.load(Ordering::Acquire) {
			return Err(StatusError::Rejected {
				schema: schema.to_string(),
				message: "injected".into(),
			});
		}
		self.writes.lock().push((schema.to_string(), condition.clone()));
		Ok(())
	}
}

#[derive(Default)]
pub(crate) struct RecordingMetrics {
	limits: Mutex<Vec<(String, u32)>>,
}

impl RecordingMetrics {
	pub fn last_limit(&self, level: &str) -> Option<u32> {
		self.limits.lock().iter().rev().find(|(name, _)| name == level).map(|(_, limit)| *limit)
	}
}

impl MetricsSink for RecordingMetrics {
	fn record_concurrency_limit(&self, level: &str, limit: u32) {
		self.limits.lock().push((level.to_string(), limit));
	}
}

/// A [`MemorySource`] whose next `failures` level lists fail.
#[derive(Default)]
pub(crate) struct FlakySource {
	pub inner: MemorySource,
	failures: AtomicUsize,
}

impl FlakySource {
	pub fn fail_next(&self, failures: usize) {
		self.failures.store(failures, Ordering::Release);
	}
}

impl ConfigSource for FlakySource {
	fn list_priority_levels(&self) -> Result<Vec<PriorityLevelConfig>, SourceError> {
		let failing = self
			.failures
			.fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| left.checked_sub(1))
			.is_ok();
		if failing {
			return Err(SourceError::Unavailable {
				kind: ObjectKind::PriorityLevel,
				message: "injected".into(),
			});
		}
		self.inner.list_priority_levels()
	}

	fn list_flow_schemas(&self) -> Result<Vec<FlowSchemaConfig>, SourceError> {
		self.inner.list_flow_schemas()
	}
}

/// Drives [`reconcile`] pass after pass the way the controller does, minus
/// status and metrics.
pub(crate) struct Harness {
	pub trigger: ResyncTrigger,
	pub receiver: ResyncReceiver,
	pub coordinator: QuiesceCoordinator,
	pub factory: FakeFactory,
	pub templates: BackstopTemplates,
	pub server_concurrency_limit: u32,
	pub state: Arc<PublishedState>,
}

impl Harness {
	pub fn new(server_concurrency_limit: u32) -> Self {
		let (trigger, receiver) = ResyncTrigger::new();
		Self {
			coordinator: QuiesceCoordinator::new(trigger.clone()),
			trigger,
			receiver,
			factory: FakeFactory::default(),
			templates: BackstopTemplates::default(),
			server_concurrency_limit,
			state: Arc::new(PublishedState::empty()),
		}
	}

	/// Runs one pass, publishes it, then quiesces newly retiring backends.
	pub fn pass(&mut self, levels: &[PriorityLevelConfig], schemas: &[FlowSchemaConfig]) -> Reconciliation {
		let params = ReconcileParams {
			server_concurrency_limit: self.server_concurrency_limit,
			request_wait_limit: std::time::Duration::from_secs(15),
			templates: &self.templates,
			backends: &self.factory,
			quiesce: &self.coordinator,
		};
		let reconciliation = reconcile(&self.state, levels, schemas, &params);
		self.state = Arc::new(reconciliation.state.clone());
		for level in &reconciliation.newly_retiring {
			if let (Some(backend), Some(handle)) = (level.backend(), level.retirement()) {
				backend.quiesce(Some(handle.clone()));
			}
		}
		reconciliation
	}
}
