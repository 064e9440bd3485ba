//! Error types for the control plane.

use thiserror::Error;

/// Declared object kinds served by a [`crate::ConfigSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
	PriorityLevel,
	FlowSchema,
}

impl std::fmt::Display for ObjectKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::PriorityLevel => f.write_str("priority level"),
			Self::FlowSchema => f.write_str("flow schema"),
		}
	}
}

/// Failure to enumerate declared configuration.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
	/// The backing store or cache could not serve the list.
	#[error("{kind} list unavailable: {message}")]
	Unavailable { kind: ObjectKind, message: String },
}

/// Failure to persist a flow-schema status condition.
#[derive(Debug, Clone, Error)]
pub enum StatusError {
	/// The store rejected the write.
	#[error("status update for flow schema {schema:?} rejected: {message}")]
	Rejected { schema: String, message: String },
	/// The flow schema was deleted before its status could be written.
	#[error("flow schema {0:?} not found")]
	NotFound(String),
}

/// Rejection reason for one declared object.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
	#[error("name must not be empty")]
	EmptyName,
	#[error("limited priority level needs at least one concurrency share")]
	ZeroShares,
	#[error("queuing priority level needs a queue length limit of at least 1")]
	ZeroQueueLengthLimit,
	#[error("hand size {hand_size} must be between 1 and the queue count {queues}")]
	HandSize { hand_size: u32, queues: u32 },
	#[error("flow schema must name a target priority level")]
	MissingTarget,
	#[error("matching precedence {0} outside 1..={max}", max = crate::model::MAX_MATCHING_PRECEDENCE)]
	Precedence(u32),
	#[error("flow schema has no rules")]
	NoRules,
	#[error("rule {0} has no subjects")]
	NoSubjects(usize),
	#[error("rule {0} has neither resource nor non-resource rules")]
	NoTargets(usize),
	#[error("rule {rule}: {field} must not be empty")]
	EmptyField { rule: usize, field: &'static str },
}

/// Invalid controller configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// The TOML document could not be parsed.
	#[error("config parse error: {0}")]
	Parse(#[from] toml::de::Error),
	/// A field holds an unusable value.
	#[error("invalid config field {field}: {message}")]
	Invalid { field: &'static str, message: String },
}

/// Errors surfaced by [`crate::Controller`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ControlError {
	/// Listing declared objects failed; nothing was changed.
	#[error("listing declared configuration: {0}")]
	List(#[from] SourceError),
	/// `start` was called on a controller whose worker already runs.
	#[error("controller already started")]
	AlreadyStarted,
}

/// A convenient type alias for `Result` with `E` = [`ControlError`].
pub type Result<T, E = ControlError> = std::result::Result<T, E>;
