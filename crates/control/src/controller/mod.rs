//! The controller: one writer, many readers.
//!
//! # Mental model
//!
//! * A single resync worker runs [`Controller::sync_once`] whenever the
//!   configuration changes or a retiring level drains.
//! * Each pass lists declared objects, computes the next state, publishes it
//!   with one pointer swap, then tells newly retiring backends to quiesce and
//!   persists schema status.
//! * Readers call [`Controller::load`] and never wait on a pass.
//!
//! # Invariants
//!
//! * Passes never overlap, even when `sync_once` is called directly while
//!   the worker runs.
//! * A failed listing leaves the published state untouched.
//! * Backends are told to quiesce only after the state naming their
//!   retirement handle is visible to readers.

use std::sync::Arc;

use flowgate_worker::{ResyncHandler, ResyncReason, ResyncReceiver, ResyncTicket, ResyncTrigger, ResyncWorkerHandle, ResyncWorkerSpec, TaskClass, spawn_resync_worker};
use parking_lot::Mutex;

use crate::backend::BackendFactory;
use crate::backstop::BackstopTemplates;
use crate::config::ControllerConfig;
use crate::error::{ConfigError, ControlError, Result};
use crate::metrics::MetricsSink;
use crate::quiesce::QuiesceCoordinator;
use crate::reconcile::{ReconcileParams, Reconciliation, SchemaDangling, reconcile};
use crate::source::ConfigSource;
use crate::state::{PublishedState, StateCell};
use crate::status::{StatusSync, StatusWriter, SyncOutcome};

/// Worker name used in logs.
const WORKER_NAME: &str = "flowcontrol";

/// Summary of one successful pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
	pub generation: u64,
	pub levels: usize,
	/// Published schemas, backstops included.
	pub schemas: usize,
	pub newly_retiring: Vec<String>,
	pub share_sum: u64,
	/// Declared objects skipped as invalid.
	pub rejected: usize,
	pub status_updates: usize,
	pub status_failures: usize,
}

struct Inner {
	config: ControllerConfig,
	templates: BackstopTemplates,
	source: Arc<dyn ConfigSource>,
	backends: Arc<dyn BackendFactory>,
	status: StatusSync,
	metrics: Arc<dyn MetricsSink>,
	state: StateCell,
	trigger: ResyncTrigger,
	receiver: Mutex<Option<ResyncReceiver>>,
	quiesce: QuiesceCoordinator,
	pass: tokio::sync::Mutex<()>,
}

/// Shared handle to the controller. Clones refer to the same instance.
#[derive(Clone)]
pub struct Controller {
	inner: Arc<Inner>,
}

impl Controller {
	/// Builds a controller whose state holds only the synthesized levels and
	/// backstop schemas until the first pass succeeds.
	pub fn new(
		config: ControllerConfig,
		source: Arc<dyn ConfigSource>,
		backends: Arc<dyn BackendFactory>,
		status: Arc<dyn StatusWriter>,
		metrics: Arc<dyn MetricsSink>,
	) -> Result<Self, ConfigError> {
		config.validate()?;
		let (trigger, receiver) = ResyncTrigger::new();
		let templates = BackstopTemplates::from_config(&config.backstop);
		let quiesce = QuiesceCoordinator::new(trigger.clone());

		let bootstrap = {
			let params = ReconcileParams {
				server_concurrency_limit: config.server_concurrency_limit,
				request_wait_limit: config.request_wait_limit(),
				templates: &templates,
				backends: &*backends,
				quiesce: &quiesce,
			};
			reconcile(&PublishedState::empty(), &[], &[], &params).state
		};
		record_limits(&*metrics, &bootstrap);

		Ok(Self {
			inner: Arc::new(Inner {
				config,
				templates,
				source,
				backends,
				status: StatusSync::new(status),
				metrics,
				state: StateCell::new(bootstrap),
				trigger,
				receiver: Mutex::new(Some(receiver)),
				quiesce,
				pass: tokio::sync::Mutex::new(()),
			}),
		})
	}

	/// Spawns the resync worker and schedules the first pass.
	///
	/// # Errors
	///
	/// [`ControlError::AlreadyStarted`] on a second call.
	pub fn start(&self) -> Result<ResyncWorkerHandle> {
		let receiver = self.inner.receiver.lock().take().ok_or(ControlError::AlreadyStarted)?;
		let spec = ResyncWorkerSpec::new(WORKER_NAME, TaskClass::Control).backoff(self.inner.config.backoff());
		let handle = spawn_resync_worker(spec, self.inner.trigger.clone(), receiver, ControllerResync { controller: self.clone() });
		self.inner.trigger.trigger(ResyncReason::Initial);
		tracing::info!(worker = WORKER_NAME, "flowcontrol.controller.started");
		Ok(handle)
	}

	/// Requests a pass. Call on every change to declared objects.
	pub fn trigger_resync(&self) {
		self.inner.trigger.trigger(ResyncReason::Changed);
	}

	/// Trigger to hand to change notifiers such as [`crate::MemorySource::subscribe`].
	pub fn resync_trigger(&self) -> ResyncTrigger {
		self.inner.trigger.clone()
	}

	/// Latest published state.
	pub fn load(&self) -> Arc<PublishedState> {
		self.inner.state.load()
	}

	pub fn quiesce(&self) -> &QuiesceCoordinator {
		&self.inner.quiesce
	}

	/// Resolves once no retiring level is still draining.
	pub async fn wait_quiescent(&self) {
		self.inner.quiesce.wait_quiescent().await;
	}

	/// Runs one reconciliation pass to completion.
	///
	/// # Errors
	///
	/// [`ControlError::List`] if declared objects could not be listed. The
	/// published state is unchanged in that case.
	pub async fn sync_once(&self) -> Result<PassReport> {
		let _pass = self.inner.pass.lock().await;
		let inner = &*self.inner;

		let levels = inner.source.list_priority_levels().inspect_err(|err| {
			tracing::warn!(error = %err, "flowcontrol.pass.list_failed");
		})?;
		let schemas = inner.source.list_flow_schemas().inspect_err(|err| {
			tracing::warn!(error = %err, "flowcontrol.pass.list_failed");
		})?;

		let Reconciliation {
			state,
			newly_retiring,
			schema_status,
			share_sum,
			rejected,
		} = {
			let previous = inner.state.load();
			let params = ReconcileParams {
				server_concurrency_limit: inner.config.server_concurrency_limit,
				request_wait_limit: inner.config.request_wait_limit(),
				templates: &inner.templates,
				backends: &*inner.backends,
				quiesce: &inner.quiesce,
			};
			reconcile(&previous, &levels, &schemas, &params)
		};

		let state = Arc::new(state);
		inner.state.publish(Arc::clone(&state));

		for level in &newly_retiring {
			if let (Some(backend), Some(handle)) = (level.backend(), level.retirement()) {
				backend.quiesce(Some(handle.clone()));
			}
		}
		record_limits(&*inner.metrics, &state);

		let mut status_updates = 0;
		let mut status_failures = 0;
		for SchemaDangling { schema, dangling } in &schema_status {
			match inner.status.sync_schema_status(schema, *dangling).await {
				SyncOutcome::Updated => status_updates += 1,
				SyncOutcome::Failed => status_failures += 1,
				SyncOutcome::Unchanged => {}
			}
		}
		inner.status.retain(|name| schema_status.iter().any(|s| s.schema.name == name));

		let report = PassReport {
			generation: state.generation(),
			levels: state.levels().len(),
			schemas: state.schemas().len(),
			newly_retiring: newly_retiring.iter().map(|level| level.name().to_string()).collect(),
			share_sum,
			rejected,
			status_updates,
			status_failures,
		};
		tracing::info!(
			generation = report.generation,
			levels = report.levels,
			schemas = report.schemas,
			retiring = report.newly_retiring.len(),
			share_sum,
			status_failures,
			"flowcontrol.pass.complete"
		);
		Ok(report)
	}
}

fn record_limits(metrics: &dyn MetricsSink, state: &PublishedState) {
	for level in state.levels().filter(|level| !level.is_exempt()) {
		metrics.record_concurrency_limit(level.name(), level.concurrency_limit());
	}
}

struct ControllerResync {
	controller: Controller,
}

#[async_trait::async_trait]
impl ResyncHandler for ControllerResync {
	async fn resync(&mut self, ticket: &ResyncTicket) -> Result<(), String> {
		if ticket.attempt() > 0 {
			tracing::debug!(attempt = ticket.attempt(), "flowcontrol.pass.retrying");
		}
		self.controller.sync_once().await.map(drop).map_err(|err| err.to_string())
	}

	async fn on_stop(&mut self) {
		tracing::info!(
			outstanding = self.controller.quiesce().outstanding(),
			"flowcontrol.controller.stopped"
		);
	}
}
