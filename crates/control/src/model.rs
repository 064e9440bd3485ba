//! Declared configuration objects and request digests.
//!
//! These mirror what the configuration store holds. They are plain data:
//! the reconciler never mutates them, it only reads them and derives
//! runtime state from them.

use std::time::{Duration, SystemTime};

/// Highest matching precedence a declared flow schema may use.
///
/// The synthesized backstop schemas sit above this range.
pub const MAX_MATCHING_PRECEDENCE: u32 = 10_000;

/// Well-known group holding every authenticated identity.
pub const GROUP_AUTHENTICATED: &str = "system:authenticated";
/// Well-known group holding every unauthenticated identity.
pub const GROUP_UNAUTHENTICATED: &str = "system:unauthenticated";
/// Privileged group routed to the exempt level by the first backstop.
pub const GROUP_MASTERS: &str = "system:masters";

/// Matches any value in a rule field.
pub const WILDCARD: &str = "*";

/// A declared priority level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityLevelConfig {
	pub name: String,
	pub kind: LevelKind,
	/// Requests not matched by any declared schema land here.
	pub global_default: bool,
}

/// Whether a level is exempt from limiting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LevelKind {
	/// Requests proceed immediately; no limit and no queues.
	Exempt,
	Limited(LimitedConfig),
}

/// Limits and queuing parameters of a non-exempt level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitedConfig {
	/// Relative weight in the server-wide concurrency split.
	pub shares: u32,
	/// Number of queues; zero rejects excess requests instead of queuing.
	pub queues: u32,
	pub queue_length_limit: u32,
	/// Shuffle-sharding hand size.
	pub hand_size: u32,
	/// Overrides the server-wide request wait limit.
	pub request_wait_limit: Option<Duration>,
}

impl LimitedConfig {
	/// A queuing configuration with `shares` and common queue defaults.
	pub fn with_shares(shares: u32) -> Self {
		Self {
			shares,
			queues: 64,
			queue_length_limit: 50,
			hand_size: 6,
			request_wait_limit: None,
		}
	}

	/// Returns true when excess requests are rejected rather than queued.
	pub fn rejects_when_saturated(&self) -> bool {
		self.queues == 0
	}
}

impl PriorityLevelConfig {
	/// A limited level with `shares` and default queuing.
	pub fn limited(name: impl Into<String>, shares: u32) -> Self {
		Self {
			name: name.into(),
			kind: LevelKind::Limited(LimitedConfig::with_shares(shares)),
			global_default: false,
		}
	}

	/// An exempt level.
	pub fn exempt(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			kind: LevelKind::Exempt,
			global_default: false,
		}
	}

	/// Marks this level as the global default.
	#[must_use]
	pub fn global_default(mut self) -> Self {
		self.global_default = true;
		self
	}

	pub fn is_exempt(&self) -> bool {
		matches!(self.kind, LevelKind::Exempt)
	}

	/// Limited parameters, or `None` for exempt levels.
	pub fn limited_config(&self) -> Option<&LimitedConfig> {
		match &self.kind {
			LevelKind::Limited(limited) => Some(limited),
			LevelKind::Exempt => None,
		}
	}

	/// Concurrency shares; exempt levels have none.
	pub fn shares(&self) -> u32 {
		self.limited_config().map_or(0, |limited| limited.shares)
	}
}

/// How requests matched by one schema are split into flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowDistinguisher {
	ByUser,
	ByNamespace,
}

/// A declared flow schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowSchemaConfig {
	pub name: String,
	/// Name of the target priority level.
	pub priority_level: String,
	/// Lower values are evaluated first.
	pub matching_precedence: u32,
	pub distinguisher: Option<FlowDistinguisher>,
	/// The schema matches when any rule matches.
	pub rules: Vec<PolicyRules>,
	/// Status as last observed in the store.
	pub status: SchemaStatus,
}

impl FlowSchemaConfig {
	/// A schema with no rules targeting `priority_level`.
	pub fn new(name: impl Into<String>, priority_level: impl Into<String>, matching_precedence: u32) -> Self {
		Self {
			name: name.into(),
			priority_level: priority_level.into(),
			matching_precedence,
			distinguisher: None,
			rules: Vec::new(),
			status: SchemaStatus::default(),
		}
	}

	#[must_use]
	pub fn with_rule(mut self, rule: PolicyRules) -> Self {
		self.rules.push(rule);
		self
	}

	#[must_use]
	pub fn with_distinguisher(mut self, distinguisher: FlowDistinguisher) -> Self {
		self.distinguisher = Some(distinguisher);
		self
	}

	#[must_use]
	pub fn with_condition(mut self, condition: SchemaCondition) -> Self {
		self.status.set(condition);
		self
	}
}

/// Persisted status of a flow schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaStatus {
	pub conditions: Vec<SchemaCondition>,
}

impl SchemaStatus {
	/// The condition of `kind`, if recorded.
	pub fn condition(&self, kind: ConditionKind) -> Option<&SchemaCondition> {
		self.conditions.iter().find(|c| c.kind == kind)
	}

	/// The recorded danglingness, or `None` if unknown.
	pub fn dangling(&self) -> Option<bool> {
		match self.condition(ConditionKind::Dangling)?.status {
			ConditionStatus::True => Some(true),
			ConditionStatus::False => Some(false),
			ConditionStatus::Unknown => None,
		}
	}

	/// Replaces the condition of the same kind, or appends it.
	pub fn set(&mut self, condition: SchemaCondition) {
		match self.conditions.iter_mut().find(|c| c.kind == condition.kind) {
			Some(existing) => *existing = condition,
			None => self.conditions.push(condition),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionKind {
	/// The target priority level does not exist.
	Dangling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionStatus {
	True,
	False,
	Unknown,
}

/// One status condition on a flow schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaCondition {
	pub kind: ConditionKind,
	pub status: ConditionStatus,
	pub reason: String,
	pub message: String,
	pub last_transition: SystemTime,
}

impl SchemaCondition {
	/// Builds the dangling condition for a schema targeting `level`.
	pub fn dangling(dangling: bool, level: &str, now: SystemTime) -> Self {
		let (status, reason, message) = if dangling {
			(
				ConditionStatus::True,
				"NotFound",
				format!("This flow schema references the priority level {level:?} but there is no such level"),
			)
		} else {
			(
				ConditionStatus::False,
				"Found",
				format!("This flow schema references the priority level {level:?} and it exists"),
			)
		};
		Self {
			kind: ConditionKind::Dangling,
			status,
			reason: reason.to_string(),
			message,
			last_transition: now,
		}
	}
}

/// One matching rule: any subject crossed with any resource or
/// non-resource rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyRules {
	pub subjects: Vec<Subject>,
	pub resource_rules: Vec<ResourceRule>,
	pub non_resource_rules: Vec<NonResourceRule>,
}

impl PolicyRules {
	/// Matches every request from `subjects`.
	pub fn everything_for(subjects: Vec<Subject>) -> Self {
		Self {
			subjects,
			resource_rules: vec![ResourceRule {
				verbs: vec![WILDCARD.into()],
				api_groups: vec![WILDCARD.into()],
				resources: vec![WILDCARD.into()],
				namespaces: vec![WILDCARD.into()],
				cluster_scope: true,
			}],
			non_resource_rules: vec![NonResourceRule {
				verbs: vec![WILDCARD.into()],
				paths: vec![WILDCARD.into()],
			}],
		}
	}
}

/// Who a rule applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
	User(String),
	Group(String),
	/// `name` may be `"*"` for every account in the namespace.
	ServiceAccount { namespace: String, name: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceRule {
	pub verbs: Vec<String>,
	pub api_groups: Vec<String>,
	pub resources: Vec<String>,
	/// Namespaces matched; `"*"` matches every namespace but not cluster scope.
	pub namespaces: Vec<String>,
	/// Whether cluster-scoped requests match.
	pub cluster_scope: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NonResourceRule {
	pub verbs: Vec<String>,
	/// Exact paths, `"*"`, or prefixes ending in `"/*"`.
	pub paths: Vec<String>,
}

/// Identity of the requester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
	pub name: String,
	pub groups: Vec<String>,
	pub authenticated: bool,
}

impl UserInfo {
	pub fn authenticated(name: impl Into<String>, groups: Vec<String>) -> Self {
		Self {
			name: name.into(),
			groups,
			authenticated: true,
		}
	}

	pub fn anonymous() -> Self {
		Self {
			name: "system:anonymous".into(),
			groups: Vec::new(),
			authenticated: false,
		}
	}
}

/// What the request addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestTarget {
	Resource {
		api_group: String,
		resource: String,
		/// `None` for cluster-scoped requests.
		namespace: Option<String>,
	},
	NonResource {
		path: String,
	},
}

/// The parts of a request that classification looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDigest {
	pub user: UserInfo,
	pub verb: String,
	pub target: RequestTarget,
}
