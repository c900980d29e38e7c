//! Error types for reflex-core.
//!
//! Configuration problems (bad regex, malformed rules, unreadable files) are
//! reported when rules or config are loaded. Actuator failures are reported
//! per action and never abort an evaluation pass.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Rule validation or compilation failed.
    #[error(transparent)]
    Rule(#[from] RuleError),

    /// Configuration could not be read or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The actuator could not perform an action.
    #[error(transparent)]
    Actuator(#[from] ActuatorError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Runtime error (task wiring, channel closed, ...).
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl Error {
    /// Whether this error means a session no longer exists.
    #[must_use]
    pub fn is_session_gone(&self) -> bool {
        matches!(self, Self::Actuator(err) if err.is_session_gone())
    }
}

/// Errors raised while validating or compiling a rule set.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    /// Structural problem with a rule.
    #[error("invalid rule: {0}")]
    InvalidRule(String),

    /// A regex pattern failed to compile.
    #[error("rule '{rule_id}' has invalid regex '{pattern}': {message}")]
    InvalidRegex {
        rule_id: String,
        pattern: String,
        message: String,
    },

    /// Two rules share the same id.
    #[error("duplicate rule id '{0}'")]
    DuplicateId(String),

    /// An action payload is malformed.
    #[error("rule '{rule_id}' has invalid action: {message}")]
    InvalidAction { rule_id: String, message: String },
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(String, String),

    #[error("failed to parse config: {0}")]
    ParseFailed(String),

    #[error("failed to serialize config: {0}")]
    SerializeFailed(String),

    #[error("invalid config: {0}")]
    ValidationError(String),

    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),
}

/// Errors reported by an [`Actuator`](crate::actuator::Actuator).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActuatorError {
    /// The target session no longer exists.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The underlying command ran but reported failure.
    #[error("command `{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// The call did not complete in time.
    #[error("actuator call timed out after {0}ms")]
    Timeout(u64),

    /// The capability is not available on this actuator.
    #[error("actuator unavailable: {0}")]
    Unavailable(String),

    /// The command could not be started.
    #[error("failed to spawn command: {0}")]
    Spawn(String),
}

impl ActuatorError {
    /// Whether this error means the target session is gone.
    #[must_use]
    pub fn is_session_gone(&self) -> bool {
        matches!(self, Self::SessionNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_error_converts_into_error() {
        let err: Error = RuleError::DuplicateId("a.b".to_string()).into();
        assert!(matches!(err, Error::Rule(RuleError::DuplicateId(_))));
        assert_eq!(err.to_string(), "duplicate rule id 'a.b'");
    }

    #[test]
    fn invalid_regex_message_names_rule_and_pattern() {
        let err = RuleError::InvalidRegex {
            rule_id: "r1".to_string(),
            pattern: "(".to_string(),
            message: "unclosed group".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("r1"));
        assert!(msg.contains("'('"));
    }

    #[test]
    fn session_gone_detection() {
        assert!(ActuatorError::SessionNotFound("s".into()).is_session_gone());
        assert!(!ActuatorError::Timeout(10).is_session_gone());
    }
}
