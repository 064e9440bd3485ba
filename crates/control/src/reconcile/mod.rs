//! One reconciliation pass: declared configuration to published state.
//!
//! # Data flow
//!
//! 1. Merge declared levels into the previous runtime state, reusing
//!    backends by name. Levels turning exempt while holding a backend start
//!    retiring; retiring levels declared again are revived.
//! 2. Resolve schemas against the merged levels. Schemas naming a missing
//!    level are dangling and left out; the rest are stably sorted by
//!    matching precedence.
//! 3. Keep undesired levels that still have work, attaching a retirement
//!    handle; drop those that drained or never had a backend.
//! 4. Synthesize the exempt and global-default levels if nothing claimed
//!    those roles.
//! 5. Append the two backstop schemas.
//! 6. Split server concurrency by shares and push limits into backends,
//!    allocating backends where missing.
//!
//! Publishing, starting quiesce on newly retiring levels, and persisting
//! schema status happen afterwards in the controller, in that order.
//!
//! # Invariants
//!
//! * A backend carried by a previous level survives into the next state
//!   unless that level's retirement handle reported empty.
//! * Role ties resolve by input order: the last declared claimant wins.
//! * The default role is only ever held by a limited level, so the share
//!   sum is positive whenever any level needs a limit.

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;

use crate::backend::{BackendFactory, QueueConfig};
use crate::backstop::{BackstopTemplates, backstop_schemas, unique_level_name};
use crate::error::{ObjectKind, ValidationError};
use crate::model::{FlowSchemaConfig, PriorityLevelConfig};
use crate::quiesce::{QuiesceCoordinator, RetirementHandle};
use crate::state::{FlowSchema, LevelRole, Origin, PriorityLevel, PublishedState};
use crate::validation::{validate_level, validate_schema};

/// Inputs of a pass besides the declared objects.
pub struct ReconcileParams<'a> {
	pub server_concurrency_limit: u32,
	/// Applied to levels that do not set their own.
	pub request_wait_limit: Duration,
	pub templates: &'a BackstopTemplates,
	pub backends: &'a dyn BackendFactory,
	pub quiesce: &'a QuiesceCoordinator,
}

/// Danglingness computed for one valid declared schema.
#[derive(Debug, Clone)]
pub struct SchemaDangling {
	pub schema: FlowSchemaConfig,
	pub dangling: bool,
}

/// Output of [`reconcile`].
#[derive(Debug)]
pub struct Reconciliation {
	pub state: PublishedState,
	/// Levels that got a retirement handle in this pass. Their backends must
	/// be told to quiesce only after `state` is published.
	pub newly_retiring: Vec<Arc<PriorityLevel>>,
	pub schema_status: Vec<SchemaDangling>,
	pub share_sum: u64,
	/// Declared objects skipped as invalid.
	pub rejected: usize,
}

/// `ceil(server * shares / share_sum)`.
pub fn concurrency_limit(server_concurrency_limit: u32, shares: u32, share_sum: u64) -> u32 {
	if share_sum == 0 {
		return 0;
	}
	let limit = (u64::from(server_concurrency_limit) * u64::from(shares)).div_ceil(share_sum);
	u32::try_from(limit).unwrap_or(u32::MAX)
}

/// Computes the next state from `previous` and the declared objects.
///
/// Backends carried over from `previous` are reconfigured in place, and
/// backends are allocated for limited levels that lack one.
pub fn reconcile(
	previous: &PublishedState,
	declared_levels: &[PriorityLevelConfig],
	declared_schemas: &[FlowSchemaConfig],
	params: &ReconcileParams<'_>,
) -> Reconciliation {
	let mut pass = Pass {
		previous,
		params,
		levels: IndexMap::new(),
		roles: Roles::default(),
		retiring: Vec::new(),
		rejected: 0,
	};
	pass.merge_levels(declared_levels);
	let (schemas, schema_status) = pass.resolve_schemas(declared_schemas);
	pass.retire_undesired();
	let (exempt_level, default_level) = pass.synthesize_backstops();
	let share_sum = pass.apply_limits();

	let mut schemas = schemas;
	schemas.extend(backstop_schemas(&exempt_level, &default_level));

	let levels: IndexMap<String, Arc<PriorityLevel>> = pass.levels.into_iter().map(|(name, level)| (name, Arc::new(level))).collect();
	let newly_retiring = pass.retiring.iter().filter_map(|name| levels.get(name).cloned()).collect();
	let state = PublishedState {
		generation: previous.generation.wrapping_add(1),
		levels,
		schemas: schemas.into_iter().map(Arc::new).collect(),
		exempt_level,
		default_level,
	};
	state.assert_consistent();

	Reconciliation {
		state,
		newly_retiring,
		schema_status,
		share_sum,
		rejected: pass.rejected,
	}
}

#[derive(Default)]
struct Roles {
	exempt: Option<String>,
	global_default: Option<String>,
}

impl Roles {
	/// Declared claim; a later claimant replaces an earlier one.
	fn claim(&mut self, config: &PriorityLevelConfig) {
		if config.is_exempt() {
			if let Some(previous) = self.exempt.replace(config.name.clone()) {
				tracing::warn!(previous = %previous, winner = %config.name, "flowcontrol.role.exempt_conflict");
			}
		}
		if config.global_default {
			if config.is_exempt() {
				tracing::warn!(priority_level = %config.name, "flowcontrol.role.exempt_default_ignored");
			} else if let Some(previous) = self.global_default.replace(config.name.clone()) {
				tracing::warn!(previous = %previous, winner = %config.name, "flowcontrol.role.default_conflict");
			}
		}
	}

	/// Claim by a retiring level; only fills roles nobody holds.
	fn claim_if_free(&mut self, config: &PriorityLevelConfig) {
		if config.is_exempt() && self.exempt.is_none() {
			self.exempt = Some(config.name.clone());
		}
		if config.global_default && !config.is_exempt() && self.global_default.is_none() {
			self.global_default = Some(config.name.clone());
		}
	}

	fn is_free(&self, role: LevelRole) -> bool {
		match role {
			LevelRole::Exempt => self.exempt.is_none(),
			LevelRole::GlobalDefault => self.global_default.is_none(),
			LevelRole::Normal => false,
		}
	}

	fn set(&mut self, role: LevelRole, name: &str) {
		match role {
			LevelRole::Exempt => self.exempt = Some(name.to_string()),
			LevelRole::GlobalDefault => self.global_default = Some(name.to_string()),
			LevelRole::Normal => unreachable!("normal is not a claimable role"),
		}
	}
}

struct Pass<'p, 'a> {
	previous: &'p PublishedState,
	params: &'p ReconcileParams<'a>,
	levels: IndexMap<String, PriorityLevel>,
	roles: Roles,
	retiring: Vec<String>,
	rejected: usize,
}

impl Pass<'_, '_> {
	fn merge_levels(&mut self, declared: &[PriorityLevelConfig]) {
		let previous = self.previous;
		let declared = last_wins(declared, ObjectKind::PriorityLevel, |l| &l.name, validate_level, &mut self.rejected);
		for config in declared.into_values() {
			let level = match previous.levels.get(&config.name) {
				Some(previous) => self.reuse(previous, config),
				None => PriorityLevel::new(config.clone(), Origin::Declared),
			};
			self.roles.claim(config);
			self.levels.insert(config.name.clone(), level);
		}
	}

	fn reuse(&mut self, previous: &PriorityLevel, config: &PriorityLevelConfig) -> PriorityLevel {
		let mut level = previous.clone();
		level.config = config.clone();
		level.origin = Origin::Declared;

		if config.is_exempt() {
			level.concurrency_limit = 0;
			if level.backend.is_some() {
				match level.retirement.as_ref().map(RetirementHandle::is_empty) {
					Some(true) => {
						tracing::info!(priority_level = %level.name, "flowcontrol.level.backend_released");
						level.backend = None;
						level.retirement = None;
					}
					Some(false) => {}
					None => self.begin_retirement(&mut level),
				}
			}
		} else if let Some(handle) = level.retirement.take() {
			revive(&level, &handle);
		}
		level
	}

	fn begin_retirement(&mut self, level: &mut PriorityLevel) {
		level.retirement = Some(self.params.quiesce.begin(&level.name));
		self.retiring.push(level.name.clone());
		tracing::info!(priority_level = %level.name, shares = level.config.shares(), "flowcontrol.level.retiring");
	}

	fn resolve_schemas(&mut self, declared: &[FlowSchemaConfig]) -> (Vec<FlowSchema>, Vec<SchemaDangling>) {
		let declared = last_wins(declared, ObjectKind::FlowSchema, |s| &s.name, validate_schema, &mut self.rejected);
		let mut kept = Vec::with_capacity(declared.len());
		let mut status = Vec::with_capacity(declared.len());
		for config in declared.into_values() {
			let dangling = !self.levels.contains_key(&config.priority_level);
			if dangling {
				tracing::debug!(flow_schema = %config.name, priority_level = %config.priority_level, "flowcontrol.schema.dangling");
			} else {
				kept.push(FlowSchema::from(config));
			}
			status.push(SchemaDangling {
				schema: config.clone(),
				dangling,
			});
		}
		kept.sort_by_key(|schema| schema.matching_precedence);
		(kept, status)
	}

	fn retire_undesired(&mut self) {
		let previous = self.previous;
		let mut ordered: Vec<&Arc<PriorityLevel>> = Vec::with_capacity(previous.levels.len());
		// Role holders go first so they keep their role until something else claims it.
		for holder in [&previous.exempt_level, &previous.default_level] {
			if let Some(level) = previous.levels.get(holder)
				&& !ordered.iter().any(|seen| Arc::ptr_eq(seen, level))
			{
				ordered.push(level);
			}
		}
		for level in previous.levels.values() {
			if !ordered.iter().any(|seen| Arc::ptr_eq(seen, level)) {
				ordered.push(level);
			}
		}

		for previous_level in ordered {
			let name = &previous_level.name;
			if self.levels.contains_key(name) {
				continue;
			}
			if previous_level.retirement.as_ref().is_some_and(RetirementHandle::is_empty) {
				tracing::info!(priority_level = %name, "flowcontrol.level.removed");
				continue;
			}
			if let Origin::Imaginary(role) = previous_level.origin
				&& self.roles.is_free(role)
			{
				let mut level = (**previous_level).clone();
				level.config = match role {
					LevelRole::Exempt => self.params.templates.exempt_named(name),
					LevelRole::GlobalDefault => self.params.templates.global_default_named(name),
					LevelRole::Normal => unreachable!("imaginary level {name:?} without a role"),
				};
				if let Some(handle) = level.retirement.take() {
					revive(&level, &handle);
				}
				self.roles.set(role, name);
				self.levels.insert(name.clone(), level);
				continue;
			}
			if previous_level.backend.is_none() {
				tracing::debug!(priority_level = %name, "flowcontrol.level.removed");
				continue;
			}

			let mut level = (**previous_level).clone();
			if level.retirement.is_none() {
				self.begin_retirement(&mut level);
			}
			self.roles.claim_if_free(&level.config);
			self.levels.insert(name.clone(), level);
		}
	}

	/// Fills unclaimed roles with template levels. Returns the role holders.
	fn synthesize_backstops(&mut self) -> (String, String) {
		let templates = self.params.templates;
		let exempt = match self.roles.exempt.take() {
			Some(name) => name,
			None => {
				let name = unique_level_name(&templates.exempt().name, |n| self.levels.contains_key(n));
				tracing::info!(priority_level = %name, role = "exempt", "flowcontrol.level.imagined");
				let level = PriorityLevel::new(templates.exempt_named(&name), Origin::Imaginary(LevelRole::Exempt));
				self.levels.insert(name.clone(), level);
				name
			}
		};
		let global_default = match self.roles.global_default.take() {
			Some(name) => name,
			None => {
				let name = unique_level_name(&templates.global_default().name, |n| self.levels.contains_key(n));
				tracing::info!(priority_level = %name, role = "global-default", "flowcontrol.level.imagined");
				let level = PriorityLevel::new(templates.global_default_named(&name), Origin::Imaginary(LevelRole::GlobalDefault));
				self.levels.insert(name.clone(), level);
				name
			}
		};
		(exempt, global_default)
	}

	fn apply_limits(&mut self) -> u64 {
		let share_sum: u64 = self.levels.values().map(|level| u64::from(level.config.shares())).sum();
		let server = self.params.server_concurrency_limit;
		for level in self.levels.values_mut() {
			let Some(limited) = level.config.limited_config() else {
				level.concurrency_limit = 0;
				continue;
			};
			let queue = QueueConfig {
				concurrency_limit: concurrency_limit(server, limited.shares, share_sum),
				queues: limited.queues,
				queue_length_limit: limited.queue_length_limit,
				hand_size: limited.hand_size,
				request_wait_limit: limited.request_wait_limit.unwrap_or(self.params.request_wait_limit),
			};
			level.concurrency_limit = queue.concurrency_limit;
			if let Some(backend) = &level.backend {
				backend.reconfigure(&queue);
			} else {
				level.backend = Some(self.params.backends.new_backend(&level.name, &queue));
			}
		}
		share_sum
	}
}

fn revive(level: &PriorityLevel, handle: &RetirementHandle) {
	handle.cancel();
	if let Some(backend) = &level.backend {
		backend.quiesce(None);
	}
	tracing::info!(priority_level = %level.name, "flowcontrol.level.revived");
}

/// Drops invalid objects and keeps the last of each name, in input order.
fn last_wins<'c, T>(
	items: &'c [T],
	kind: ObjectKind,
	name: impl Fn(&T) -> &String,
	validate: impl Fn(&T) -> Result<(), ValidationError>,
	rejected: &mut usize,
) -> IndexMap<&'c str, &'c T> {
	let mut kept: IndexMap<&str, &T> = IndexMap::with_capacity(items.len());
	for item in items {
		let item_name = name(item);
		if let Err(err) = validate(item) {
			tracing::warn!(kind = %kind, name = %item_name, error = %err, "flowcontrol.object.invalid");
			*rejected += 1;
			continue;
		}
		if kept.shift_remove(item_name.as_str()).is_some() {
			tracing::warn!(kind = %kind, name = %item_name, "flowcontrol.object.duplicate");
		}
		kept.insert(item_name.as_str(), item);
	}
	kept
}
