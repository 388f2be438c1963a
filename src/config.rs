//! Messaging configuration.
//!
//! Values come from, in increasing precedence: built-in defaults, an
//! optional TOML file, and `AGENTIC_A2A__*` environment variables (double
//! underscore separates nested keys, e.g.
//! `AGENTIC_A2A__RETRY_POLICY__MAXIMUM_ATTEMPTS=5`).

use crate::envelope::A2A_SCOPE;
use crate::errors::{MessagingError, MessagingResult};
use crate::registry::RegistrationPolicy;
use crate::retry::RetryPolicy;
use crate::types::option_duration_millis;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "AGENTIC_A2A";

/// Configuration for the messaging core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Retry policy for durable paths
    pub retry_policy: RetryPolicy,

    /// Deadline for direct paths (none = wait indefinitely)
    #[serde(
        with = "option_duration_millis",
        rename = "direct_timeout_ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub direct_timeout: Option<Duration>,

    /// Scope applied to requests that leave it empty
    pub default_scope: String,

    /// Behavior on duplicate handler registration
    pub registration_policy: RegistrationPolicy,

    /// Capacity of the event broadcast channel and recent-events buffer
    pub event_buffer: usize,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            direct_timeout: Some(Duration::from_secs(300)),
            default_scope: A2A_SCOPE.to_string(),
            registration_policy: RegistrationPolicy::Overwrite,
            event_buffer: 256,
        }
    }
}

impl MessagingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_direct_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.direct_timeout = timeout;
        self
    }

    pub fn with_default_scope(mut self, scope: impl Into<String>) -> Self {
        self.default_scope = scope.into();
        self
    }

    pub fn with_registration_policy(mut self, policy: RegistrationPolicy) -> Self {
        self.registration_policy = policy;
        self
    }

    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }

    /// Load defaults, then `path` if it exists, then the environment.
    pub fn load(path: Option<&Path>) -> MessagingResult<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(false));
        }

        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> MessagingResult<()> {
        self.retry_policy.validate()?;
        if self.default_scope.trim().is_empty() {
            return Err(MessagingError::validation("default_scope must not be empty")
                .with_context("field", "default_scope"));
        }
        if self.event_buffer == 0 {
            return Err(MessagingError::validation("event_buffer must be at least 1")
                .with_context("field", "event_buffer"));
        }
        if self.direct_timeout.is_some_and(|t| t.is_zero()) {
            return Err(MessagingError::validation("direct_timeout_ms must be positive")
                .with_context("field", "direct_timeout_ms"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = MessagingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_scope, "A2A");
        assert_eq!(config.retry_policy.maximum_attempts, 3);
    }

    #[test]
    fn test_builder_methods() {
        let config = MessagingConfig::new()
            .with_direct_timeout(None)
            .with_registration_policy(RegistrationPolicy::RejectDuplicates)
            .with_event_buffer(16);
        assert!(config.direct_timeout.is_none());
        assert_eq!(config.registration_policy, RegistrationPolicy::RejectDuplicates);
        assert!(config.with_event_buffer(0).validate().is_err());
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
direct_timeout_ms = 1500
registration_policy = "reject_duplicates"

[retry_policy]
maximum_attempts = 7
initial_interval_ms = 250
"#
        )
        .unwrap();

        let config = MessagingConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.direct_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.registration_policy, RegistrationPolicy::RejectDuplicates);
        assert_eq!(config.retry_policy.maximum_attempts, 7);
        assert_eq!(config.retry_policy.initial_interval, Duration::from_millis(250));
        // Untouched keys keep their defaults
        assert_eq!(config.retry_policy.backoff_coefficient, 2.0);
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = MessagingConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.retry_policy, RetryPolicy::default());
    }

    #[test]
    fn test_invalid_file_values_are_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "event_buffer = 0").unwrap();

        let err = MessagingConfig::load(Some(file.path())).unwrap_err();
        assert_eq!(err.code, crate::errors::ErrorCode::InvalidRequest);
    }
}
