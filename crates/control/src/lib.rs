//! Priority-level and flow-schema reconciliation for API admission control.
//!
//! Declared priority levels and flow schemas live in an external store. The
//! [`Controller`] turns them into a [`PublishedState`]: every level with its
//! concurrency limit and queueing backend, and every schema in evaluation
//! order. Request dispatch reads that state without locks and classifies
//! each request with [`PublishedState::classify`].
//!
//! # Key types
//!
//! | Type | Meaning |
//! |---|---|
//! | [`Controller`] | Owns the published state and the single resync worker. |
//! | [`ConfigSource`] | Lists declared objects. |
//! | [`BackendFactory`] / [`Backend`] | Per-level queueing, implemented elsewhere. |
//! | [`StatusWriter`] | Persists schema dangling conditions. |
//! | [`RetirementHandle`] | Lets a draining backend report that it is empty. |
//!
//! # Lifecycle of a level
//!
//! Declared levels are `Active`. A level removed from the store, or turned
//! exempt while it still owns a backend, becomes `Retiring`: it keeps serving
//! queued and executing work while its backend drains, then disappears on
//! the pass after its handle reports empty. Declaring it again first revives
//! it with the same backend.
//!
//! Two roles always resolve: the exempt level and the global-default level.
//! Where nothing declared claims one, a level is synthesized from
//! [`BackstopTemplates`], and two backstop schemas route otherwise unmatched
//! requests to those levels.

mod backend;
mod backstop;
mod classify;
mod config;
mod controller;
mod error;
mod metrics;
pub mod model;
mod quiesce;
pub mod reconcile;
mod source;
mod state;
mod status;
pub mod validation;

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod test_support;

pub use backend::{Backend, BackendFactory, QueueConfig};
pub use backstop::{BACKSTOP_PRECEDENCE, BackstopTemplates, CATCH_ALL_BACKSTOP_SCHEMA, EXEMPT_BACKSTOP_SCHEMA};
pub use classify::Classification;
pub use config::{BackoffConfig, BackstopConfig, ControllerConfig};
pub use controller::{Controller, PassReport};
pub use error::{ConfigError, ControlError, ObjectKind, Result, SourceError, StatusError, ValidationError};
pub use metrics::{MetricsSink, NoopMetrics};
pub use quiesce::{DrainState, QuiesceCoordinator, RetirementHandle};
pub use source::{ConfigSource, MemorySource};
pub use state::{FlowSchema, LevelRole, Origin, PriorityLevel, PublishedState, RetirementState, StateCell};
pub use status::{StatusSync, StatusWriter, SyncOutcome};
