//! Error types for the messaging core.
//!
//! Every failure a caller can observe is a [`MessagingError`]. Its
//! [`ErrorCode`] maps onto one of six categories, and the category decides
//! how the error propagates:
//!
//! 1. **Validation / NotFound / Context**: programmer errors. Raised before
//!    dispatch or before the handler runs. Never retried.
//! 2. **ContractViolation**: the handler ran but produced no reply.
//! 3. **TransientInfra**: substrate-level failures. Retried on the durable
//!    path only; wrapped once the retry policy is exhausted.
//! 4. **Permanent**: anything else the handler raised. The original message
//!    is kept as the cause.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use crate::types::HandlerKind;

/// Error for every messaging operation.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("[{code}] {message}")]
pub struct MessagingError {
    /// Error code (machine-readable)
    pub code: ErrorCode,

    /// Severity level
    pub severity: Severity,

    /// Human-readable message
    pub message: String,

    /// Message of the underlying error, when this one wraps another
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,

    /// Additional context (for debugging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<HashMap<String, serde_json::Value>>,

    /// Is this recoverable?
    pub recoverable: bool,

    /// Suggested action for recovery
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<SuggestedAction>,
}

impl MessagingError {
    /// Create a new error
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            severity: code.default_severity(),
            message: message.into(),
            cause: None,
            context: None,
            recoverable: code.is_typically_recoverable(),
            suggested_action: None,
        }
    }

    /// Add context to the error
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        let context = self.context.get_or_insert_with(HashMap::new);
        if let Ok(v) = serde_json::to_value(value) {
            context.insert(key.into(), v);
        }
        self
    }

    /// Record the underlying error this one wraps
    pub fn with_cause(mut self, cause: impl std::fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }

    /// Set recoverable flag
    pub fn recoverable(mut self, recoverable: bool) -> Self {
        self.recoverable = recoverable;
        self
    }

    /// Set suggested action
    pub fn with_suggestion(mut self, action: SuggestedAction) -> Self {
        self.suggested_action = Some(action);
        self
    }

    /// Set severity
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Category this error belongs to.
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// Whether the durable path may retry this error.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    pub fn is_not_found(&self) -> bool {
        self.category() == ErrorCategory::NotFound
    }

    /// Read a context value back out.
    pub fn context_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.context.as_ref().and_then(|c| c.get(key))
    }

    /// Format as a single message for callers that only want a string.
    ///
    /// Includes the cause and what to try instead.
    pub fn to_user_message(&self) -> String {
        let mut msg = format!("{}: {}", self.category(), self.message);
        if let Some(ref cause) = self.cause {
            msg.push_str(&format!(" (caused by: {})", cause));
        }
        if let Some(ref action) = self.suggested_action {
            match action {
                SuggestedAction::Retry { after_ms } => {
                    msg.push_str(&format!(". Retry after {}ms", after_ms));
                }
                SuggestedAction::Alternative { description } => {
                    msg.push_str(&format!(". Try: {}", description));
                }
                SuggestedAction::CheckConfig { key } => {
                    msg.push_str(&format!(". Check config key: {}", key));
                }
                SuggestedAction::ReportBug => {
                    msg.push_str(". This may be a bug, please report it");
                }
            }
        }
        msg
    }

    // ═══════════════════════════════════════════════════════════
    // Common error constructors
    // ═══════════════════════════════════════════════════════════

    /// Malformed or missing request field
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    /// Target type has no registration at all
    pub fn target_not_found(target_type: &str) -> Self {
        Self::new(
            ErrorCode::TargetNotFound,
            format!("No handlers registered for target type '{}'", target_type),
        )
        .with_context("target_type", target_type)
        .with_suggestion(SuggestedAction::Alternative {
            description: "Register the target's handlers during setup, before dispatching to it"
                .into(),
        })
    }

    /// Target type is registered but lacks the requested kind
    pub fn handler_kind_not_found(
        target_type: &str,
        kind: HandlerKind,
        available: &[HandlerKind],
    ) -> Self {
        let available_names: Vec<&str> = available.iter().map(|k| k.as_str()).collect();
        Self::new(
            ErrorCode::HandlerKindNotFound,
            format!(
                "Target type '{}' has no {} handler (registered: [{}])",
                target_type,
                kind,
                available_names.join(", ")
            ),
        )
        .with_context("target_type", target_type)
        .with_context("kind", kind)
        .with_context("available_kinds", available)
        .with_suggestion(SuggestedAction::Alternative {
            description: format!("Register a {} handler on '{}' or send a supported kind", kind, target_type),
        })
    }

    /// Duplicate registration under a reject-duplicates policy
    pub fn already_registered(target_type: &str) -> Self {
        Self::new(
            ErrorCode::AlreadyExists,
            format!("Handlers for target type '{}' are already registered", target_type),
        )
        .with_context("target_type", target_type)
    }

    /// The current execution context cannot perform this operation
    pub fn context_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ContextUnavailable, message)
    }

    /// Handler returned without replying
    pub fn no_response(target_type: &str, kind: HandlerKind) -> Self {
        Self::new(
            ErrorCode::NoResponse,
            format!("{} handler for '{}' produced no response", kind, target_type),
        )
        .with_context("target_type", target_type)
        .with_context("kind", kind)
    }

    /// Substrate-level failure that may succeed on retry
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SubstrateUnavailable, message)
            .with_suggestion(SuggestedAction::Retry { after_ms: 1000 })
    }

    /// Retry policy ran out of attempts
    pub fn retries_exhausted(operation: &str, attempts: u32, last: &MessagingError) -> Self {
        Self::new(
            ErrorCode::RetriesExhausted,
            format!("{} failed after {} attempt(s)", operation, attempts),
        )
        .with_cause(last)
        .with_context("attempts", attempts)
        .with_context("last_error_code", last.code)
    }

    /// Deadline passed before the operation finished
    pub fn timeout(operation: &str, after: Duration) -> Self {
        Self::new(
            ErrorCode::Timeout,
            format!("{} timed out after {}ms", operation, after.as_millis()),
        )
        .with_context("timeout_ms", after.as_millis() as u64)
    }

    /// Caller cancelled the operation
    pub fn cancelled(operation: &str) -> Self {
        Self::new(ErrorCode::Cancelled, format!("{} was cancelled", operation))
    }

    /// Unhandled failure raised by a handler
    pub fn handler_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::HandlerFailed, message)
    }

    /// Internal error (bug)
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
            .with_severity(Severity::Fatal)
            .recoverable(false)
            .with_suggestion(SuggestedAction::ReportBug)
    }
}

impl Default for MessagingError {
    fn default() -> Self {
        Self::new(ErrorCode::Internal, "Unknown error")
    }
}

/// The six error categories callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    Validation,
    NotFound,
    Context,
    ContractViolation,
    TransientInfra,
    Permanent,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Validation => "ValidationError",
            Self::NotFound => "NotFoundError",
            Self::Context => "ContextError",
            Self::ContractViolation => "ContractViolationError",
            Self::TransientInfra => "TransientInfraError",
            Self::Permanent => "PermanentError",
        };
        write!(f, "{}", s)
    }
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation
    /// Request field missing or malformed
    InvalidRequest,

    /// Configuration value missing or malformed
    InvalidConfig,

    /// Registration collides with an existing one
    AlreadyExists,

    // NotFound
    /// Target type is not registered
    TargetNotFound,

    /// Target type registered without the requested handler kind
    HandlerKindNotFound,

    // Context
    /// Operation not allowed from the current execution context
    ContextUnavailable,

    // ContractViolation
    /// Handler returned without writing a reply
    NoResponse,

    /// Handler replied with neither text nor data
    EmptyResponse,

    // TransientInfra
    /// Substrate or client call failed
    SubstrateUnavailable,

    /// Operation timed out
    Timeout,

    /// Retry policy exhausted
    RetriesExhausted,

    // Permanent
    /// Handler raised an error
    HandlerFailed,

    /// Operation cancelled by the caller
    Cancelled,

    /// Payload could not be (de)serialized
    Serialization,

    /// Internal error (bug)
    Internal,
}

impl ErrorCode {
    /// Category this code belongs to
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidRequest | Self::InvalidConfig | Self::AlreadyExists => {
                ErrorCategory::Validation
            }
            Self::TargetNotFound | Self::HandlerKindNotFound => ErrorCategory::NotFound,
            Self::ContextUnavailable => ErrorCategory::Context,
            Self::NoResponse | Self::EmptyResponse => ErrorCategory::ContractViolation,
            Self::SubstrateUnavailable | Self::Timeout | Self::RetriesExhausted => {
                ErrorCategory::TransientInfra
            }
            Self::HandlerFailed | Self::Cancelled | Self::Serialization | Self::Internal => {
                ErrorCategory::Permanent
            }
        }
    }

    /// Whether a retry loop should try again after this error.
    ///
    /// An exhausted retry is terminal even though it is an infra error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::SubstrateUnavailable | Self::Timeout)
    }

    /// Get default severity for this error code
    pub fn default_severity(&self) -> Severity {
        match self {
            Self::Internal => Severity::Fatal,
            Self::SubstrateUnavailable | Self::Timeout => Severity::Warning,
            _ => Severity::Error,
        }
    }

    /// Check if this error is typically recoverable
    pub fn is_typically_recoverable(&self) -> bool {
        match self {
            Self::Internal | Self::Cancelled => false,
            Self::SubstrateUnavailable | Self::Timeout | Self::RetriesExhausted => true,
            Self::InvalidRequest | Self::InvalidConfig => true, // Can fix input
            Self::TargetNotFound | Self::HandlerKindNotFound => true, // Can register
            _ => true,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::InvalidConfig => "INVALID_CONFIG",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::TargetNotFound => "TARGET_NOT_FOUND",
            Self::HandlerKindNotFound => "HANDLER_KIND_NOT_FOUND",
            Self::ContextUnavailable => "CONTEXT_UNAVAILABLE",
            Self::NoResponse => "NO_RESPONSE",
            Self::EmptyResponse => "EMPTY_RESPONSE",
            Self::SubstrateUnavailable => "SUBSTRATE_UNAVAILABLE",
            Self::Timeout => "TIMEOUT",
            Self::RetriesExhausted => "RETRIES_EXHAUSTED",
            Self::HandlerFailed => "HANDLER_FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Serialization => "SERIALIZATION",
            Self::Internal => "INTERNAL",
        };
        write!(f, "{}", s)
    }
}

/// Severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational, not really an error
    Info,

    /// Warning, likely to clear on its own
    Warning,

    /// Error, operation failed
    Error,

    /// Fatal, internal invariant broken
    Fatal,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// Suggested actions for error recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SuggestedAction {
    /// Retry the operation
    Retry {
        /// Milliseconds to wait before retry
        after_ms: u64,
    },

    /// Use a different approach
    Alternative {
        /// Description of the alternative
        description: String,
    },

    /// Check configuration
    CheckConfig {
        /// Configuration key to check
        key: String,
    },

    /// Contact support / report bug
    ReportBug,
}

impl From<serde_json::Error> for MessagingError {
    fn from(e: serde_json::Error) -> Self {
        MessagingError::new(ErrorCode::Serialization, format!("JSON error: {}", e))
    }
}

impl From<::config::ConfigError> for MessagingError {
    fn from(e: ::config::ConfigError) -> Self {
        MessagingError::new(ErrorCode::InvalidConfig, format!("Configuration error: {}", e))
            .with_suggestion(SuggestedAction::CheckConfig {
                key: "AGENTIC_A2A".into(),
            })
    }
}

/// Result type alias for messaging operations
pub type MessagingResult<T> = Result<T, MessagingError>;
