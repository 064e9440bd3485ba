//! Persisting flow-schema danglingness.
//!
//! Writes are level-triggered: a pass compares the computed value with the
//! condition the store last reported and writes only on a difference. A
//! failed write is logged and left for the next pass to redo.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::StatusError;
use crate::model::{FlowSchemaConfig, SchemaCondition};

/// Write side of the configuration store for schema status.
#[async_trait]
pub trait StatusWriter: Send + Sync {
	async fn update_schema_status(&self, schema: &str, condition: &SchemaCondition) -> Result<(), StatusError>;
}

/// What [`StatusSync::sync_schema_status`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
	/// Store already holds the value, or this value was just written.
	Unchanged,
	Updated,
	/// The write failed; the next pass tries again.
	Failed,
}

/// A write the store may not have reflected back yet.
#[derive(Debug, Clone, Copy)]
struct PendingWrite {
	/// Danglingness the store reported when the write was issued.
	observed: Option<bool>,
	written: bool,
}

/// Issues dangling-condition writes, at most one per distinct value.
pub struct StatusSync {
	writer: Arc<dyn StatusWriter>,
	pending: Mutex<HashMap<String, PendingWrite>>,
}

impl StatusSync {
	pub fn new(writer: Arc<dyn StatusWriter>) -> Self {
		Self {
			writer,
			pending: Mutex::new(HashMap::new()),
		}
	}

	/// Persists `dangling` for `schema` unless it is already recorded.
	pub async fn sync_schema_status(&self, schema: &FlowSchemaConfig, dangling: bool) -> SyncOutcome {
		let observed = schema.status.dangling();
		if observed == Some(dangling) {
			self.pending.lock().remove(&schema.name);
			return SyncOutcome::Unchanged;
		}
		{
			let mut pending = self.pending.lock();
			if let Some(write) = pending.get(&schema.name) {
				if write.observed == observed && write.written == dangling {
					return SyncOutcome::Unchanged;
				}
				pending.remove(&schema.name);
			}
		}

		let condition = SchemaCondition::dangling(dangling, &schema.priority_level, SystemTime::now());
		match self.writer.update_schema_status(&schema.name, &condition).await {
			Ok(()) => {
				self.pending.lock().insert(schema.name.clone(), PendingWrite { observed, written: dangling });
				tracing::info!(flow_schema = %schema.name, priority_level = %schema.priority_level, dangling, "flowcontrol.schema.status_updated");
				SyncOutcome::Updated
			}
			Err(err) => {
				tracing::warn!(flow_schema = %schema.name, dangling, error = %err, "flowcontrol.schema.status_failed");
				SyncOutcome::Failed
			}
		}
	}

	/// Forgets pending writes for schemas `keep` rejects.
	pub fn retain(&self, keep: impl Fn(&str) -> bool) {
		self.pending.lock().retain(|name, _| keep(name));
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::{PolicyRules, Subject};
	use crate::test_support::FakeStatusWriter;

	fn setup() -> (Arc<FakeStatusWriter>, StatusSync) {
		let writer = Arc::new(FakeStatusWriter::default());
		let sync = StatusSync::new(Arc::clone(&writer) as Arc<dyn StatusWriter>);
		(writer, sync)
	}

	fn schema() -> FlowSchemaConfig {
		FlowSchemaConfig::new("to-batch", "batch", 100).with_rule(PolicyRules::everything_for(vec![Subject::User("alice".into())]))
	}

	#[tokio::test]
	async fn recorded_value_is_not_rewritten() {
		let (writer, sync) = setup();
		let schema = schema().with_condition(SchemaCondition::dangling(true, "batch", SystemTime::UNIX_EPOCH));
		assert_eq!(sync.sync_schema_status(&schema, true).await, SyncOutcome::Unchanged);
		assert!(writer.writes().is_empty());
	}

	#[tokio::test]
	async fn same_value_twice_writes_once() {
		let (writer, sync) = setup();
		let schema = schema();
		assert_eq!(sync.sync_schema_status(&schema, true).await, SyncOutcome::Updated);
		assert_eq!(sync.sync_schema_status(&schema, true).await, SyncOutcome::Unchanged);

		let writes = writer.writes();
		assert_eq!(writes.len(), 1);
		assert_eq!(writes[0].0, "to-batch");
		assert_eq!(writes[0].1.reason, "NotFound");
	}

	#[tokio::test]
	async fn flip_back_before_reflection_writes_again() {
		let (writer, sync) = setup();
		let schema = schema();
		sync.sync_schema_status(&schema, true).await;
		assert_eq!(sync.sync_schema_status(&schema, false).await, SyncOutcome::Updated);
		assert_eq!(writer.writes().len(), 2);
	}

	#[tokio::test]
	async fn failed_write_is_retried_next_time() {
		let (writer, sync) = setup();
		let schema = schema();
		writer.set_failing(true);
		assert_eq!(sync.sync_schema_status(&schema, true).await, SyncOutcome::Failed);

		writer.set_failing(false);
		assert_eq!(sync.sync_schema_status(&schema, true).await, SyncOutcome::Updated);
		assert_eq!(writer.writes().len(), 1);
	}

	#[tokio::test]
	async fn observed_change_clears_pending_write() {
		let (writer, sync) = setup();
		let fresh = schema();
		sync.sync_schema_status(&fresh, true).await;

		let reflected = schema().with_condition(SchemaCondition::dangling(true, "batch", SystemTime::UNIX_EPOCH));
		assert_eq!(sync.sync_schema_status(&reflected, true).await, SyncOutcome::Unchanged);

		// Someone else rewrote the condition to false; only a new pass can fix it.
		let overwritten = schema().with_condition(SchemaCondition::dangling(false, "batch", SystemTime::UNIX_EPOCH));
		assert_eq!(sync.sync_schema_status(&overwritten, true).await, SyncOutcome::Updated);
		assert_eq!(writer.writes().len(), 2);
	}

	#[tokio::test]
	async fn retain_drops_deleted_schemas() {
		let (writer, sync) = setup();
		let schema = schema();
		sync.sync_schema_status(&schema, true).await;
		sync.retain(|_| false);
		assert_eq!(sync.sync_schema_status(&schema, true).await, SyncOutcome::Updated);
		assert_eq!(writer.writes().len(), 2);
	}
}
