//! Worker runtime primitives for level-triggered control loops.
//!
//! A control loop here is one task that repeatedly recomputes derived state
//! from a source of truth. Producers never hand it work items; they only say
//! "something changed" through a [`ResyncTrigger`]. Many such signals collapse
//! into at most one pending run, and failed runs are retried with
//! exponential [`Backoff`].
//!
//! # Key types
//!
//! | Type | Meaning |
//! |---|---|
//! | [`ResyncTrigger`] | Cloneable, non-blocking producer side. Safe to call from any thread. |
//! | [`ResyncReceiver`] | Single consumer side, owned by the worker loop. |
//! | [`ResyncHandler`] | One pass of the control loop. |
//! | [`ResyncWorkerHandle`] | Stats and shutdown for a spawned loop. |
//!
//! # Lifecycle
//!
//! `Idle -> Pending -> Running -> Idle`. Triggers arriving while `Running`
//! leave exactly one follow-up run pending.

mod backoff;
mod class;
mod resync;
mod spawn;
mod trigger;

pub use backoff::Backoff;
pub use class::TaskClass;
pub use resync::{ResyncHandler, ResyncWorkerHandle, ResyncWorkerSpec, ShutdownMode, ShutdownReport, spawn_resync_worker};
pub use spawn::spawn;
pub use trigger::{ResyncReason, ResyncReceiver, ResyncTicket, ResyncTrigger, TriggerOutcome};
