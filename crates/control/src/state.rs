//! Published runtime state with atomic publication.
//!
//! # Mental model
//!
//! * The reconciler builds a complete [`PublishedState`] per pass and swaps it
//!   into the [`StateCell`] as one pointer store.
//! * Request dispatch loads the pointer and works against that immutable
//!   view for the lifetime of one request.
//! * Backends are shared between consecutive snapshots through `Arc`; they
//!   synchronize themselves, so sharing them does not break immutability of
//!   the snapshot.
//!
//! # Invariants
//!
//! * Every schema in [`PublishedState::schemas`] targets a level in
//!   [`PublishedState::levels`] of the same snapshot.
//! * The last two schemas are the exempt and catch-all backstops.
//! * The exempt and default level names resolve in the same snapshot.

use std::sync::Arc;

use arc_swap::ArcSwap;
use indexmap::IndexMap;

use crate::backend::Backend;
use crate::model::{FlowDistinguisher, FlowSchemaConfig, PolicyRules, PriorityLevelConfig};
use crate::quiesce::RetirementHandle;

/// Special role of a priority level within a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LevelRole {
	Exempt,
	GlobalDefault,
	Normal,
}

/// Where a level came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
	Declared,
	/// Synthesized because nothing declared claimed `role`.
	Imaginary(LevelRole),
}

/// Whether a level is still desired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetirementState {
	Active,
	/// Draining queued and executing work before removal.
	Retiring,
}

/// Runtime state of one priority level.
#[derive(Clone)]
pub struct PriorityLevel {
	pub(crate) name: String,
	pub(crate) config: PriorityLevelConfig,
	pub(crate) origin: Origin,
	pub(crate) concurrency_limit: u32,
	pub(crate) backend: Option<Arc<dyn Backend>>,
	pub(crate) retirement: Option<RetirementHandle>,
}

impl std::fmt::Debug for PriorityLevel {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("PriorityLevel")
			.field("name", &self.name)
			.field("config", &self.config)
			.field("origin", &self.origin)
			.field("concurrency_limit", &self.concurrency_limit)
			.field("backend", &self.backend.is_some())
			.field("retirement", &self.retirement)
			.finish()
	}
}

impl PriorityLevel {
	pub(crate) fn new(config: PriorityLevelConfig, origin: Origin) -> Self {
		Self {
			name: config.name.clone(),
			config,
			origin,
			concurrency_limit: 0,
			backend: None,
			retirement: None,
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// The declared (or template) configuration currently applied.
	pub fn config(&self) -> &PriorityLevelConfig {
		&self.config
	}

	pub fn origin(&self) -> Origin {
		self.origin
	}

	pub fn is_exempt(&self) -> bool {
		self.config.is_exempt()
	}

	/// Concurrency limit from the last pass; zero for exempt levels.
	pub fn concurrency_limit(&self) -> u32 {
		self.concurrency_limit
	}

	/// The queueing backend, if one has been allocated.
	pub fn backend(&self) -> Option<&Arc<dyn Backend>> {
		self.backend.as_ref()
	}

	pub fn retirement(&self) -> Option<&RetirementHandle> {
		self.retirement.as_ref()
	}

	pub fn retirement_state(&self) -> RetirementState {
		match self.retirement {
			Some(_) => RetirementState::Retiring,
			None => RetirementState::Active,
		}
	}
}

/// A classification rule as published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowSchema {
	pub name: String,
	pub priority_level: String,
	pub matching_precedence: u32,
	pub distinguisher: Option<FlowDistinguisher>,
	pub rules: Vec<PolicyRules>,
	/// Synthesized catch-all that never exists in the store.
	pub backstop: bool,
}

impl From<&FlowSchemaConfig> for FlowSchema {
	fn from(config: &FlowSchemaConfig) -> Self {
		Self {
			name: config.name.clone(),
			priority_level: config.priority_level.clone(),
			matching_precedence: config.matching_precedence,
			distinguisher: config.distinguisher,
			rules: config.rules.clone(),
			backstop: false,
		}
	}
}

/// Immutable snapshot read by request dispatch.
#[derive(Debug, Clone, Default)]
pub struct PublishedState {
	pub(crate) generation: u64,
	pub(crate) levels: IndexMap<String, Arc<PriorityLevel>>,
	pub(crate) schemas: Vec<Arc<FlowSchema>>,
	pub(crate) exempt_level: String,
	pub(crate) default_level: String,
}

impl PublishedState {
	/// A state with no levels and no schemas, used as the first "previous".
	pub fn empty() -> Self {
		Self::default()
	}

	/// Number of passes that produced this state.
	pub fn generation(&self) -> u64 {
		self.generation
	}

	/// Every live level, desired or retiring.
	pub fn levels(&self) -> impl ExactSizeIterator<Item = &Arc<PriorityLevel>> {
		self.levels.values()
	}

	pub fn level(&self, name: &str) -> Option<&Arc<PriorityLevel>> {
		self.levels.get(name)
	}

	/// Schemas in evaluation order, backstops last.
	pub fn schemas(&self) -> &[Arc<FlowSchema>] {
		&self.schemas
	}

	pub fn exempt_level(&self) -> &str {
		&self.exempt_level
	}

	pub fn default_level(&self) -> &str {
		&self.default_level
	}

	/// Panics if a schema or role points at a level missing from this snapshot.
	pub(crate) fn assert_consistent(&self) {
		for schema in &self.schemas {
			assert!(
				self.levels.contains_key(&schema.priority_level),
				"schema {:?} targets unpublished level {:?}",
				schema.name,
				schema.priority_level
			);
		}
		for role in [&self.exempt_level, &self.default_level] {
			assert!(self.levels.contains_key(role), "role level {role:?} is not published");
		}
	}
}

/// The single atomically swapped pointer shared by writer and readers.
pub struct StateCell {
	current: ArcSwap<PublishedState>,
}

impl StateCell {
	pub fn new(initial: PublishedState) -> Self {
		Self {
			current: ArcSwap::from_pointee(initial),
		}
	}

	/// Lock-free read of the latest snapshot.
	pub fn load(&self) -> Arc<PublishedState> {
		self.current.load_full()
	}

	/// Replaces the snapshot in one store.
	pub(crate) fn publish(&self, next: Arc<PublishedState>) {
		self.current.store(next);
	}
}
