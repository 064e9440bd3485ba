//! Controller configuration.
//!
//! Loaded from TOML; every field has a default so an empty document is valid.
//!
//! ```toml
//! server_concurrency_limit = 600
//! request_wait_limit_ms = 15000
//!
//! [resync_backoff]
//! min_ms = 5
//! max_ms = 1000000
//!
//! [backstop]
//! default_shares = 20
//! ```

use std::time::Duration;

use flowgate_worker::Backoff;
use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerConfig {
	/// Total concurrency split across non-exempt priority levels.
	pub server_concurrency_limit: u32,
	/// Wait limit for levels that do not override it.
	pub request_wait_limit_ms: u64,
	pub resync_backoff: BackoffConfig,
	pub backstop: BackstopConfig,
}

impl Default for ControllerConfig {
	fn default() -> Self {
		Self {
			server_concurrency_limit: 600,
			request_wait_limit_ms: 15_000,
			resync_backoff: BackoffConfig::default(),
			backstop: BackstopConfig::default(),
		}
	}
}

/// Retry delays after failed passes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackoffConfig {
	pub min_ms: u64,
	pub max_ms: u64,
	pub factor: f64,
}

impl Default for BackoffConfig {
	fn default() -> Self {
		Self {
			min_ms: 5,
			max_ms: 1_000_000,
			factor: 2.0,
		}
	}
}

/// Templates for levels synthesized when nothing declared claims a role.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackstopConfig {
	pub exempt_level: String,
	pub default_level: String,
	pub default_shares: u32,
	pub default_queues: u32,
	pub default_queue_length_limit: u32,
	pub default_hand_size: u32,
}

impl Default for BackstopConfig {
	fn default() -> Self {
		Self {
			exempt_level: "exempt".into(),
			default_level: "global-default".into(),
			default_shares: 20,
			default_queues: 128,
			default_queue_length_limit: 50,
			default_hand_size: 6,
		}
	}
}

impl ControllerConfig {
	/// Parses and validates a TOML document.
	pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(input)?;
		config.validate()?;
		Ok(config)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.server_concurrency_limit == 0 {
			return Err(invalid("server_concurrency_limit", "must be at least 1"));
		}
		let backoff = &self.resync_backoff;
		if backoff.min_ms == 0 || backoff.min_ms > backoff.max_ms {
			return Err(invalid("resync_backoff", format!("need 0 < min_ms <= max_ms, got {}..{}", backoff.min_ms, backoff.max_ms)));
		}
		if !backoff.factor.is_finite() || backoff.factor < 1.0 {
			return Err(invalid("resync_backoff.factor", format!("must be a finite value >= 1, got {}", backoff.factor)));
		}
		let backstop = &self.backstop;
		if backstop.exempt_level.is_empty() || backstop.default_level.is_empty() {
			return Err(invalid("backstop", "level names must not be empty"));
		}
		if backstop.default_shares == 0 {
			return Err(invalid("backstop.default_shares", "must be at least 1"));
		}
		if backstop.default_queues > 0 && (backstop.default_hand_size == 0 || backstop.default_hand_size > backstop.default_queues || backstop.default_queue_length_limit == 0) {
			return Err(invalid("backstop", "queuing template needs 1 <= hand size <= queues and a queue length limit"));
		}
		Ok(())
	}

	pub fn request_wait_limit(&self) -> Duration {
		Duration::from_millis(self.request_wait_limit_ms)
	}

	pub fn backoff(&self) -> Backoff {
		Backoff {
			min: Duration::from_millis(self.resync_backoff.min_ms),
			max: Duration::from_millis(self.resync_backoff.max_ms),
			factor: self.resync_backoff.factor,
		}
	}
}

fn invalid(field: &'static str, message: impl Into<String>) -> ConfigError {
	ConfigError::Invalid {
		field,
		message: message.into(),
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	#[test]
	fn empty_document_uses_defaults() {
		assert_eq!(ControllerConfig::from_toml_str("").expect("valid"), ControllerConfig::default());
	}

	#[test]
	fn partial_tables_keep_remaining_defaults() {
		let config = ControllerConfig::from_toml_str(
			r#"
server_concurrency_limit = 42

[backstop]
default_shares = 7
"#,
		)
		.expect("valid");
		assert_eq!(config.server_concurrency_limit, 42);
		assert_eq!(config.backstop.default_shares, 7);
		assert_eq!(config.backstop.default_level, "global-default");
		assert_eq!(config.request_wait_limit(), Duration::from_secs(15));
	}

	#[test]
	fn rejects_unknown_fields() {
		assert!(matches!(ControllerConfig::from_toml_str("concurrency = 1"), Err(ConfigError::Parse(_))));
	}

	#[test]
	fn rejects_unusable_values() {
		let err = ControllerConfig::from_toml_str("server_concurrency_limit = 0").unwrap_err();
		assert!(matches!(err, ConfigError::Invalid { field: "server_concurrency_limit", .. }));

		let err = ControllerConfig::from_toml_str("[resync_backoff]\nmin_ms = 10\nmax_ms = 5").unwrap_err();
		assert!(matches!(err, ConfigError::Invalid { field: "resync_backoff", .. }));

		let err = ControllerConfig::from_toml_str("[backstop]\ndefault_shares = 0").unwrap_err();
		assert!(matches!(err, ConfigError::Invalid { field: "backstop.default_shares", .. }));
	}

	#[test]
	fn backoff_maps_to_worker_policy() {
		let backoff = ControllerConfig::default().backoff();
		assert_eq!(backoff.min, Duration::from_millis(5));
		assert_eq!(backoff.max, Duration::from_secs(1000));
	}
}
