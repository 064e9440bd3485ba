//! Admission checks for declared objects.
//!
//! Invalid objects are left out of a pass; they never fail it.

use crate::error::ValidationError;
use crate::model::{FlowSchemaConfig, LevelKind, MAX_MATCHING_PRECEDENCE, PriorityLevelConfig};

pub fn validate_level(level: &PriorityLevelConfig) -> Result<(), ValidationError> {
	if level.name.is_empty() {
		return Err(ValidationError::EmptyName);
	}
	let LevelKind::Limited(limited) = &level.kind else {
		return Ok(());
	};
	if limited.shares == 0 {
		return Err(ValidationError::ZeroShares);
	}
	if limited.rejects_when_saturated() {
		return Ok(());
	}
	if limited.queue_length_limit == 0 {
		return Err(ValidationError::ZeroQueueLengthLimit);
	}
	if limited.hand_size == 0 || limited.hand_size > limited.queues {
		return Err(ValidationError::HandSize {
			hand_size: limited.hand_size,
			queues: limited.queues,
		});
	}
	Ok(())
}

pub fn validate_schema(schema: &FlowSchemaConfig) -> Result<(), ValidationError> {
	if schema.name.is_empty() {
		return Err(ValidationError::EmptyName);
	}
	if schema.priority_level.is_empty() {
		return Err(ValidationError::MissingTarget);
	}
	if !(1..=MAX_MATCHING_PRECEDENCE).contains(&schema.matching_precedence) {
		return Err(ValidationError::Precedence(schema.matching_precedence));
	}
	if schema.rules.is_empty() {
		return Err(ValidationError::NoRules);
	}
	for (idx, rule) in schema.rules.iter().enumerate() {
		if rule.subjects.is_empty() {
			return Err(ValidationError::NoSubjects(idx));
		}
		if rule.resource_rules.is_empty() && rule.non_resource_rules.is_empty() {
			return Err(ValidationError::NoTargets(idx));
		}
		for resource in &rule.resource_rules {
			non_empty(idx, "verbs", &resource.verbs)?;
			non_empty(idx, "apiGroups", &resource.api_groups)?;
			non_empty(idx, "resources", &resource.resources)?;
			if resource.namespaces.is_empty() && !resource.cluster_scope {
				return Err(ValidationError::EmptyField { rule: idx, field: "namespaces" });
			}
		}
		for non_resource in &rule.non_resource_rules {
			non_empty(idx, "verbs", &non_resource.verbs)?;
			non_empty(idx, "nonResourceURLs", &non_resource.paths)?;
		}
	}
	Ok(())
}

fn non_empty(rule: usize, field: &'static str, values: &[String]) -> Result<(), ValidationError> {
	if values.is_empty() {
		return Err(ValidationError::EmptyField { rule, field });
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;
	use crate::model::{LimitedConfig, NonResourceRule, PolicyRules, Subject};

	fn rule() -> PolicyRules {
		PolicyRules::everything_for(vec![Subject::User("alice".into())])
	}

	#[rstest]
	#[case::zero_shares(LimitedConfig { shares: 0, ..LimitedConfig::with_shares(1) }, Err(ValidationError::ZeroShares))]
	#[case::reject_mode(LimitedConfig { queues: 0, queue_length_limit: 0, hand_size: 0, ..LimitedConfig::with_shares(5) }, Ok(()))]
	#[case::zero_queue_length(LimitedConfig { queue_length_limit: 0, ..LimitedConfig::with_shares(5) }, Err(ValidationError::ZeroQueueLengthLimit))]
	#[case::hand_too_big(LimitedConfig { queues: 4, hand_size: 8, ..LimitedConfig::with_shares(5) }, Err(ValidationError::HandSize { hand_size: 8, queues: 4 }))]
	#[case::ok(LimitedConfig::with_shares(5), Ok(()))]
	fn limited_levels(#[case] limited: LimitedConfig, #[case] expected: Result<(), ValidationError>) {
		let level = PriorityLevelConfig {
			name: "workload".into(),
			kind: LevelKind::Limited(limited),
			global_default: false,
		};
		assert_eq!(validate_level(&level), expected);
	}

	#[test]
	fn exempt_level_needs_only_a_name() {
		assert_eq!(validate_level(&PriorityLevelConfig::exempt("")), Err(ValidationError::EmptyName));
		assert_eq!(validate_level(&PriorityLevelConfig::exempt("exempt")), Ok(()));
	}

	#[rstest]
	#[case(0, false)]
	#[case(1, true)]
	#[case(MAX_MATCHING_PRECEDENCE, true)]
	#[case(MAX_MATCHING_PRECEDENCE + 1, false)]
	#[case(u32::MAX, false)]
	fn precedence_range(#[case] precedence: u32, #[case] ok: bool) {
		let schema = FlowSchemaConfig::new("s", "workload", precedence).with_rule(rule());
		assert_eq!(validate_schema(&schema).is_ok(), ok);
	}

	#[test]
	fn schema_rules_must_be_complete() {
		let schema = FlowSchemaConfig::new("s", "workload", 10);
		assert_eq!(validate_schema(&schema), Err(ValidationError::NoRules));

		let no_subjects = FlowSchemaConfig::new("s", "workload", 10).with_rule(PolicyRules::everything_for(Vec::new()));
		assert_eq!(validate_schema(&no_subjects), Err(ValidationError::NoSubjects(0)));

		let no_paths = FlowSchemaConfig::new("s", "workload", 10).with_rule(rule()).with_rule(PolicyRules {
			subjects: vec![Subject::Group("ops".into())],
			resource_rules: Vec::new(),
			non_resource_rules: vec![NonResourceRule {
				verbs: vec!["get".into()],
				paths: Vec::new(),
			}],
		});
		assert_eq!(
			validate_schema(&no_paths),
			Err(ValidationError::EmptyField {
				rule: 1,
				field: "nonResourceURLs"
			})
		);

		let untargeted = FlowSchemaConfig::new("s", "", 10).with_rule(rule());
		assert_eq!(validate_schema(&untargeted), Err(ValidationError::MissingTarget));
	}
}
