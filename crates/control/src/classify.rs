//! Request classification against a published snapshot.

use std::sync::Arc;

use crate::model::{
	FlowDistinguisher, GROUP_AUTHENTICATED, GROUP_UNAUTHENTICATED, NonResourceRule, PolicyRules, RequestDigest, RequestTarget, ResourceRule, Subject, UserInfo,
	WILDCARD,
};
use crate::state::{FlowSchema, PriorityLevel, PublishedState};

const SERVICE_ACCOUNT_PREFIX: &str = "system:serviceaccount:";

/// Where one request goes.
#[derive(Debug, Clone)]
pub struct Classification {
	pub schema: Arc<FlowSchema>,
	pub level: Arc<PriorityLevel>,
	/// Flow identifier within the level, derived from the distinguisher.
	pub flow_key: String,
}

impl PublishedState {
	/// Finds the first schema, in published order, matching `request`.
	///
	/// Only a state without backstops (such as [`PublishedState::empty`]) can
	/// return `None`.
	pub fn classify(&self, request: &RequestDigest) -> Option<Classification> {
		let schema = self.schemas.iter().find(|schema| schema.matches(request))?;
		let Some(level) = self.levels.get(&schema.priority_level) else {
			panic!("published schema {:?} targets missing level {:?}", schema.name, schema.priority_level);
		};
		Some(Classification {
			schema: Arc::clone(schema),
			level: Arc::clone(level),
			flow_key: flow_key(schema.distinguisher, request),
		})
	}
}

impl FlowSchema {
	pub fn matches(&self, request: &RequestDigest) -> bool {
		self.rules.iter().any(|rules| rules.matches(request))
	}
}

impl PolicyRules {
	pub fn matches(&self, request: &RequestDigest) -> bool {
		if !self.subjects.iter().any(|subject| subject.matches(&request.user)) {
			return false;
		}
		match &request.target {
			RequestTarget::Resource {
				api_group,
				resource,
				namespace,
			} => self
				.resource_rules
				.iter()
				.any(|rule| rule.matches(&request.verb, api_group, resource, namespace.as_deref())),
			RequestTarget::NonResource { path } => self.non_resource_rules.iter().any(|rule| rule.matches(&request.verb, path)),
		}
	}
}

impl Subject {
	pub fn matches(&self, user: &UserInfo) -> bool {
		match self {
			Self::User(name) => name == WILDCARD || *name == user.name,
			Self::Group(group) => {
				group == WILDCARD
					|| user.groups.iter().any(|g| g == group)
					|| (group == GROUP_AUTHENTICATED && user.authenticated)
					|| (group == GROUP_UNAUTHENTICATED && !user.authenticated)
			}
			Self::ServiceAccount { namespace, name } => {
				let Some(rest) = user.name.strip_prefix(SERVICE_ACCOUNT_PREFIX) else {
					return false;
				};
				let Some((sa_namespace, sa_name)) = rest.split_once(':') else {
					return false;
				};
				sa_namespace == namespace && (name == WILDCARD || sa_name == name)
			}
		}
	}
}

impl ResourceRule {
	fn matches(&self, verb: &str, api_group: &str, resource: &str, namespace: Option<&str>) -> bool {
		if !any_or_wildcard(&self.verbs, verb) || !any_or_wildcard(&self.api_groups, api_group) || !any_or_wildcard(&self.resources, resource) {
			return false;
		}
		match namespace {
			None => self.cluster_scope,
			Some(ns) => any_or_wildcard(&self.namespaces, ns),
		}
	}
}

impl NonResourceRule {
	fn matches(&self, verb: &str, path: &str) -> bool {
		any_or_wildcard(&self.verbs, verb) && self.paths.iter().any(|pattern| path_matches(pattern, path))
	}
}

fn any_or_wildcard(values: &[String], value: &str) -> bool {
	values.iter().any(|v| v == WILDCARD || v == value)
}

fn path_matches(pattern: &str, path: &str) -> bool {
	if pattern == WILDCARD || pattern == path {
		return true;
	}
	// "/apis/*" matches "/apis" and everything below it.
	match pattern.strip_suffix("/*") {
		Some(prefix) => path == prefix || path.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('/')),
		None => false,
	}
}

fn flow_key(distinguisher: Option<FlowDistinguisher>, request: &RequestDigest) -> String {
	match distinguisher {
		Some(FlowDistinguisher::ByUser) => request.user.name.clone(),
		Some(FlowDistinguisher::ByNamespace) => match &request.target {
			RequestTarget::Resource { namespace: Some(ns), .. } => ns.clone(),
			_ => String::new(),
		},
		None => String::new(),
	}
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;

	fn get(path: &str) -> RequestDigest {
		RequestDigest {
			user: UserInfo::anonymous(),
			verb: "get".into(),
			target: RequestTarget::NonResource { path: path.into() },
		}
	}

	#[rstest]
	#[case("*", "/healthz", true)]
	#[case("/healthz", "/healthz", true)]
	#[case("/healthz", "/livez", false)]
	#[case("/apis/*", "/apis", true)]
	#[case("/apis/*", "/apis/apps/v1", true)]
	#[case("/apis/*", "/apisx", false)]
	fn non_resource_paths(#[case] pattern: &str, #[case] path: &str, #[case] expected: bool) {
		let rule = NonResourceRule {
			verbs: vec!["get".into()],
			paths: vec![pattern.into()],
		};
		assert_eq!(rule.matches("get", path), expected);
		assert!(!rule.matches("post", path));
	}

	#[rstest]
	#[case(Subject::User("alice".into()), "alice", true)]
	#[case(Subject::User("*".into()), "bob", true)]
	#[case(Subject::Group("ops".into()), "alice", true)]
	#[case(Subject::Group("dev".into()), "alice", false)]
	#[case(Subject::Group(GROUP_AUTHENTICATED.into()), "alice", true)]
	#[case(Subject::Group(GROUP_UNAUTHENTICATED.into()), "alice", false)]
	#[case(Subject::ServiceAccount { namespace: "kube-system".into(), name: "*".into() }, "system:serviceaccount:kube-system:gc", true)]
	#[case(Subject::ServiceAccount { namespace: "kube-system".into(), name: "gc".into() }, "system:serviceaccount:default:gc", false)]
	fn subjects(#[case] subject: Subject, #[case] user: &str, #[case] expected: bool) {
		let user = UserInfo::authenticated(user, vec!["ops".into()]);
		assert_eq!(subject.matches(&user), expected);
	}

	#[test]
	fn anonymous_users_match_the_unauthenticated_group() {
		let anonymous = UserInfo::anonymous();
		assert!(Subject::Group(GROUP_UNAUTHENTICATED.into()).matches(&anonymous));
		assert!(!Subject::Group(GROUP_AUTHENTICATED.into()).matches(&anonymous));
	}

	#[test]
	fn resource_rules_respect_scope() {
		let rule = ResourceRule {
			verbs: vec!["list".into()],
			api_groups: vec!["apps".into()],
			resources: vec!["deployments".into()],
			namespaces: vec!["*".into()],
			cluster_scope: false,
		};
		assert!(rule.matches("list", "apps", "deployments", Some("default")));
		assert!(!rule.matches("list", "apps", "deployments", None));
		assert!(!rule.matches("list", "", "deployments", Some("default")));
	}

	#[test]
	fn flow_keys_follow_distinguisher() {
		let request = RequestDigest {
			user: UserInfo::authenticated("alice", Vec::new()),
			verb: "get".into(),
			target: RequestTarget::Resource {
				api_group: String::new(),
				resource: "pods".into(),
				namespace: Some("team-a".into()),
			},
		};
		assert_eq!(flow_key(Some(FlowDistinguisher::ByUser), &request), "alice");
		assert_eq!(flow_key(Some(FlowDistinguisher::ByNamespace), &request), "team-a");
		assert_eq!(flow_key(None, &request), "");
	}

	#[test]
	fn empty_state_classifies_nothing() {
		assert!(PublishedState::empty().classify(&get("/healthz")).is_none());
	}
}
