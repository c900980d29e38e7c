//! reflex-core: rule engine for reflex
//!
//! reflex watches the output of long-running interactive agent sessions and
//! reacts to configured patterns (rate limits, confirmation prompts, stalls)
//! by sending keys, running session commands, emitting signals or notifying.
//!
//! # Architecture
//!
//! ```text
//! SessionSource → WatchRuntime → RuleEngine ─┬─► matcher
//!                                            ├─► rate_limit
//!                                            ├─► template
//!                                            ├─► dispatch → Actuator
//!                                            └─► activity
//! ```
//!
//! # Modules
//!
//! - `rules`: Rule data model, validation, compilation, rule documents
//! - `matcher`: Pattern evaluation
//! - `template`: `{var}` / `{$N}` substitution in action payloads
//! - `rate_limit`: Per-rule and global trigger limits
//! - `dispatch`: Background action delivery
//! - `actuator`: Side-effect interface and in-memory mock
//! - `engine`: Evaluation pass orchestration and hot-swappable rule snapshot
//! - `activity`: Bounded audit log of trigger decisions
//! - `presets`: Built-in rules
//! - `tmux`: tmux-backed actuator and session source
//! - `runtime`: Per-session polling and rules-file hot reload
//! - `config`: Configuration management
//! - `logging`: Tracing subscriber setup
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod activity;
pub mod actuator;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod logging;
pub mod matcher;
pub mod presets;
pub mod rate_limit;
pub mod rules;
pub mod runtime;
pub mod template;
pub mod tmux;

pub use error::{ActuatorError, ConfigError, Error, Result, RuleError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
