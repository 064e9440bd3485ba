//! Read side of the configuration store.

use async_trait::async_trait;
use flowgate_worker::{ResyncReason, ResyncTrigger};
use parking_lot::{Mutex, RwLock};

use crate::error::{SourceError, StatusError};
use crate::model::{FlowSchemaConfig, PriorityLevelConfig, SchemaCondition};
use crate::status::StatusWriter;

/// Snapshot reads of declared configuration.
///
/// Implementations usually serve from a local cache kept current by a watch;
/// the cache should call [`ResyncTrigger::trigger`] on every change.
pub trait ConfigSource: Send + Sync {
	fn list_priority_levels(&self) -> Result<Vec<PriorityLevelConfig>, SourceError>;
	fn list_flow_schemas(&self) -> Result<Vec<FlowSchemaConfig>, SourceError>;
}

#[derive(Default)]
struct Objects {
	levels: Vec<PriorityLevelConfig>,
	schemas: Vec<FlowSchemaConfig>,
}

/// In-process store holding declared objects in insertion order.
///
/// Mutations notify every subscribed trigger. Status writes land on the
/// stored schema but do not notify, since they never change declared intent.
#[derive(Default)]
pub struct MemorySource {
	objects: RwLock<Objects>,
	subscribers: Mutex<Vec<ResyncTrigger>>,
}

impl MemorySource {
	pub fn new() -> Self {
		Self::default()
	}

	/// Sends [`ResyncReason::Changed`] to `trigger` on every mutation.
	pub fn subscribe(&self, trigger: ResyncTrigger) {
		self.subscribers.lock().push(trigger);
	}

	/// Replaces a level with the same name, or appends it.
	pub fn apply_priority_level(&self, level: PriorityLevelConfig) {
		upsert(&mut self.objects.write().levels, level, |l| &l.name);
		self.notify();
	}

	pub fn delete_priority_level(&self, name: &str) -> bool {
		let removed = remove(&mut self.objects.write().levels, name, |l| &l.name);
		if removed {
			self.notify();
		}
		removed
	}

	/// Replaces a schema with the same name, or appends it.
	///
	/// The stored status is kept; declared objects do not carry status.
	pub fn apply_flow_schema(&self, mut schema: FlowSchemaConfig) {
		{
			let mut objects = self.objects.write();
			if let Some(existing) = objects.schemas.iter().find(|s| s.name == schema.name) {
				schema.status = existing.status.clone();
			}
			upsert(&mut objects.schemas, schema, |s| &s.name);
		}
		self.notify();
	}

	pub fn delete_flow_schema(&self, name: &str) -> bool {
		let removed = remove(&mut self.objects.write().schemas, name, |s| &s.name);
		if removed {
			self.notify();
		}
		removed
	}

	/// Current stored copy of a schema, status included.
	pub fn flow_schema(&self, name: &str) -> Option<FlowSchemaConfig> {
		self.objects.read().schemas.iter().find(|s| s.name == name).cloned()
	}

	fn notify(&self) {
		for trigger in self.subscribers.lock().iter() {
			trigger.trigger(ResyncReason::Changed);
		}
	}
}

impl ConfigSource for MemorySource {
	fn list_priority_levels(&self) -> Result<Vec<PriorityLevelConfig>, SourceError> {
		Ok(self.objects.read().levels.clone())
	}

	fn list_flow_schemas(&self) -> Result<Vec<FlowSchemaConfig>, SourceError> {
		Ok(self.objects.read().schemas.clone())
	}
}

#[async_trait]
impl StatusWriter for MemorySource {
	async fn update_schema_status(&self, schema: &str, condition: &SchemaCondition) -> Result<(), StatusError> {
		let mut objects = self.objects.write();
		let stored = objects
			.schemas
			.iter_mut()
			.find(|s| s.name == schema)
			.ok_or_else(|| StatusError::NotFound(schema.to_string()))?;
		stored.status.set(condition.clone());
		Ok(())
	}
}

fn upsert<T>(items: &mut Vec<T>, item: T, name: impl Fn(&T) -> &String) {
	match items.iter().position(|existing| name(existing) == name(&item)) {
		Some(idx) => items[idx] = item,
		None => items.push(item),
	}
}

fn remove<T>(items: &mut Vec<T>, target: &str, name: impl Fn(&T) -> &String) -> bool {
	let before = items.len();
	items.retain(|item| name(item) != target);
	items.len() != before
}

#[cfg(test)]
mod tests {
	use std::time::SystemTime;

	use pretty_assertions::assert_eq;

	use super::*;
	use crate::model::{PolicyRules, Subject};

	fn schema(name: &str) -> FlowSchemaConfig {
		FlowSchemaConfig::new(name, "batch", 10).with_rule(PolicyRules::everything_for(vec![Subject::User("alice".into())]))
	}

	#[test]
	fn mutations_keep_order_and_notify() {
		let source = MemorySource::new();
		let (trigger, _rx) = ResyncTrigger::new();
		source.subscribe(trigger.clone());

		source.apply_priority_level(PriorityLevelConfig::limited("a", 1));
		source.apply_priority_level(PriorityLevelConfig::limited("b", 1));
		source.apply_priority_level(PriorityLevelConfig::limited("a", 5));
		assert!(trigger.is_pending());

		let levels = source.list_priority_levels().expect("list");
		let summary: Vec<(&str, u32)> = levels.iter().map(|l| (l.name.as_str(), l.shares())).collect();
		assert_eq!(summary, [("a", 5), ("b", 1)]);

		assert!(source.delete_priority_level("a"));
		assert!(!source.delete_priority_level("a"));
	}

	#[tokio::test]
	async fn status_writes_stick_without_notifying() {
		let source = MemorySource::new();
		source.apply_flow_schema(schema("s"));
		let (trigger, rx) = ResyncTrigger::new();
		source.subscribe(trigger.clone());

		source
			.update_schema_status("s", &SchemaCondition::dangling(true, "batch", SystemTime::UNIX_EPOCH))
			.await
			.expect("stored");
		assert!(!trigger.is_pending());
		assert_eq!(source.flow_schema("s").expect("s").status.dangling(), Some(true));

		source.apply_flow_schema(schema("s"));
		assert_eq!(source.flow_schema("s").expect("s").status.dangling(), Some(true), "apply keeps status");
		assert!(rx.recv().await.is_some());

		let missing = source.update_schema_status("gone", &SchemaCondition::dangling(false, "batch", SystemTime::UNIX_EPOCH)).await;
		assert!(matches!(missing, Err(StatusError::NotFound(name)) if name == "gone"));
	}
}
