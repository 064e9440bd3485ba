//! Synthesized levels and schemas that keep every request classifiable.

use crate::config::BackstopConfig;
use crate::model::{FlowDistinguisher, GROUP_AUTHENTICATED, GROUP_MASTERS, GROUP_UNAUTHENTICATED, LevelKind, LimitedConfig, PolicyRules, PriorityLevelConfig, Subject};
use crate::state::FlowSchema;

/// Precedence of both backstop schemas; above anything a declared schema may use.
pub const BACKSTOP_PRECEDENCE: u32 = u32::MAX;

pub const EXEMPT_BACKSTOP_SCHEMA: &str = "exempt";
pub const CATCH_ALL_BACKSTOP_SCHEMA: &str = "catch-all";

/// Templates for the exempt and global-default levels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackstopTemplates {
	exempt: PriorityLevelConfig,
	global_default: PriorityLevelConfig,
}

impl Default for BackstopTemplates {
	fn default() -> Self {
		Self::from_config(&BackstopConfig::default())
	}
}

impl BackstopTemplates {
	pub fn from_config(config: &BackstopConfig) -> Self {
		Self {
			exempt: PriorityLevelConfig::exempt(config.exempt_level.clone()),
			global_default: PriorityLevelConfig {
				name: config.default_level.clone(),
				kind: LevelKind::Limited(LimitedConfig {
					shares: config.default_shares,
					queues: config.default_queues,
					queue_length_limit: config.default_queue_length_limit,
					hand_size: config.default_hand_size,
					request_wait_limit: None,
				}),
				global_default: true,
			},
		}
	}

	pub fn exempt(&self) -> &PriorityLevelConfig {
		&self.exempt
	}

	pub fn global_default(&self) -> &PriorityLevelConfig {
		&self.global_default
	}

	/// The exempt template renamed to `name`.
	pub(crate) fn exempt_named(&self, name: &str) -> PriorityLevelConfig {
		PriorityLevelConfig {
			name: name.to_string(),
			..self.exempt.clone()
		}
	}

	/// The global-default template renamed to `name`.
	pub(crate) fn global_default_named(&self, name: &str) -> PriorityLevelConfig {
		PriorityLevelConfig {
			name: name.to_string(),
			..self.global_default.clone()
		}
	}
}

/// First of `base`, `base-2`, `base-3`, ... for which `taken` is false.
pub(crate) fn unique_level_name(base: &str, taken: impl Fn(&str) -> bool) -> String {
	if !taken(base) {
		return base.to_string();
	}
	(2u64..)
		.map(|suffix| format!("{base}-{suffix}"))
		.find(|candidate| !taken(candidate))
		.unwrap_or_else(|| unreachable!("level name space exhausted"))
}

/// The two backstop schemas, in evaluation order.
pub(crate) fn backstop_schemas(exempt_level: &str, default_level: &str) -> [FlowSchema; 2] {
	[
		FlowSchema {
			name: EXEMPT_BACKSTOP_SCHEMA.to_string(),
			priority_level: exempt_level.to_string(),
			matching_precedence: BACKSTOP_PRECEDENCE,
			distinguisher: None,
			rules: vec![PolicyRules::everything_for(vec![Subject::Group(GROUP_MASTERS.to_string())])],
			backstop: true,
		},
		FlowSchema {
			name: CATCH_ALL_BACKSTOP_SCHEMA.to_string(),
			priority_level: default_level.to_string(),
			matching_precedence: BACKSTOP_PRECEDENCE,
			distinguisher: Some(FlowDistinguisher::ByUser),
			rules: vec![PolicyRules::everything_for(vec![
				Subject::Group(GROUP_AUTHENTICATED.to_string()),
				Subject::Group(GROUP_UNAUTHENTICATED.to_string()),
			])],
			backstop: true,
		},
	]
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unique_names_skip_the_first_suffix() {
		let taken = ["exempt", "exempt-2"];
		assert_eq!(unique_level_name("exempt", |n| taken.contains(&n)), "exempt-3");
		assert_eq!(unique_level_name("exempt", |n| n == "exempt"), "exempt-2");
		assert_eq!(unique_level_name("global-default", |_| false), "global-default");
	}

	#[test]
	fn templates_follow_config() {
		let templates = BackstopTemplates::from_config(&BackstopConfig {
			default_shares: 3,
			..BackstopConfig::default()
		});
		assert!(templates.exempt().is_exempt());
		assert!(templates.global_default().global_default);
		assert_eq!(templates.global_default_named("global-default-2").shares(), 3);
		assert_eq!(templates.exempt_named("exempt-2").name, "exempt-2");
	}
}
