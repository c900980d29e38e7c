//! Configuration loading.
//!
//! Resolution order: explicit path, `$REFLEX_CONFIG`, `./reflex.toml`,
//! then `<config dir>/reflex/reflex.toml`. A missing file yields defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::engine::EngineConfig;
use crate::error::{ConfigError, Result};
use crate::logging::{LogFormat, is_valid_level};
use crate::rate_limit::GlobalLimits;

/// Environment variable naming a config file.
pub const CONFIG_ENV_VAR: &str = "REFLEX_CONFIG";
const CONFIG_FILE_NAME: &str = "reflex.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub engine: EngineSection,
    pub rules: RulesConfig,
    pub watch: WatchConfig,
    pub tmux: TmuxConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: String,
    pub log_format: LogFormat,
    pub log_file: Option<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            log_file: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub global_cooldown_seconds: u64,
    /// 0 = unlimited
    pub max_actions_per_minute: u32,
    pub activity_log_capacity: usize,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            global_cooldown_seconds: 0,
            max_actions_per_minute: 30,
            activity_log_capacity: crate::activity::DEFAULT_ACTIVITY_CAPACITY,
        }
    }
}

impl EngineSection {
    #[must_use]
    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            global_limits: GlobalLimits {
                cooldown_seconds: self.global_cooldown_seconds,
                max_actions_per_minute: self.max_actions_per_minute,
            },
            activity_capacity: self.activity_log_capacity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Rule document (`.json`, `.yaml` or `.toml`)
    pub path: Option<String>,
    pub include_presets: bool,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            path: None,
            include_presets: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub poll_interval_ms: u64,
    /// Scrollback lines captured per poll
    pub capture_lines: usize,
    /// Trailing lines of the capture fed to the matcher
    pub match_window_lines: usize,
    /// Only watch sessions whose id contains this substring
    pub session_filter: Option<String>,
    /// Rules-file mtime check interval; 0 disables hot reload
    pub reload_interval_secs: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            capture_lines: 200,
            match_window_lines: 40,
            session_filter: None,
            reload_interval_secs: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TmuxConfig {
    pub binary: String,
    pub command_timeout_ms: u64,
    /// Program run as `<cmd> <session> <kind> <json>` for signal actions
    pub signal_command: Option<String>,
    /// Program run as `<cmd> <message>` for notifications
    pub notify_command: Option<String>,
}

impl Default for TmuxConfig {
    fn default() -> Self {
        Self {
            binary: "tmux".to_string(),
            command_timeout_ms: 5000,
            signal_command: None,
            notify_command: None,
        }
    }
}

/// CLI-level overrides applied after loading.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub rules_path: Option<String>,
    pub poll_interval_ms: Option<u64>,
}

/// Find the config file to load, if any.
#[must_use]
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(path) = std::env::var_os(CONFIG_ENV_VAR).filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(path));
    }
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.is_file() {
        return Some(local);
    }
    dirs::config_dir()
        .map(|dir| dir.join("reflex").join(CONFIG_FILE_NAME))
        .filter(|path| path.is_file())
}

impl Config {
    /// Parse and validate a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeFailed(e.to_string()))?)
    }

    /// Load from `path`. With `strict`, a missing file is an error.
    pub fn load_with_overrides(
        path: Option<&Path>,
        strict: bool,
        overrides: &ConfigOverrides,
    ) -> Result<Self> {
        let mut config = match resolve_config_path(path) {
            Some(resolved) if resolved.is_file() => {
                let content = std::fs::read_to_string(&resolved).map_err(|e| {
                    ConfigError::ReadFailed(resolved.display().to_string(), e.to_string())
                })?;
                let config = Self::from_toml_str(&content)?;
                tracing::debug!(path = %resolved.display(), "Loaded config");
                config
            }
            Some(resolved) if strict => {
                return Err(ConfigError::ReadFailed(
                    resolved.display().to_string(),
                    "file not found".to_string(),
                )
                .into());
            }
            _ => Self::default(),
        };

        config.apply_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(level) = &overrides.log_level {
            self.general.log_level.clone_from(level);
        }
        if let Some(path) = &overrides.rules_path {
            self.rules.path = Some(path.clone());
        }
        if let Some(ms) = overrides.poll_interval_ms {
            self.watch.poll_interval_ms = ms;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !is_valid_level(&self.general.log_level) {
            return Err(ConfigError::ValidationError(format!(
                "general.log_level '{}' is not one of trace, debug, info, warn, error",
                self.general.log_level
            ))
            .into());
        }
        if self.watch.poll_interval_ms == 0 {
            return Err(
                ConfigError::ValidationError("watch.poll_interval_ms must be > 0".into()).into(),
            );
        }
        if self.engine.activity_log_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "engine.activity_log_capacity must be > 0".into(),
            )
            .into());
        }
        if self.tmux.command_timeout_ms == 0 {
            return Err(
                ConfigError::ValidationError("tmux.command_timeout_ms must be > 0".into()).into(),
            );
        }
        Ok(())
    }

    /// Rules file path, resolved relative to `base` when not absolute.
    #[must_use]
    pub fn rules_path(&self, base: Option<&Path>) -> Option<PathBuf> {
        let path = PathBuf::from(self.rules.path.as_ref()?);
        match base {
            Some(dir) if path.is_relative() => Some(dir.join(path)),
            _ => Some(path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.engine.max_actions_per_minute, 30);
        assert_eq!(config.watch.match_window_lines, 40);
        assert!(config.rules.include_presets);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config = Config::from_toml_str(
            r#"
[engine]
max_actions_per_minute = 5

[tmux]
notify_command = "notify-send"
"#,
        )
        .unwrap();
        assert_eq!(config.engine.max_actions_per_minute, 5);
        assert_eq!(config.engine.activity_log_capacity, 1000);
        assert_eq!(config.tmux.binary, "tmux");
        assert_eq!(config.tmux.notify_command.as_deref(), Some("notify-send"));
    }

    #[test]
    fn rejects_zero_poll_interval() {
        let err = Config::from_toml_str("[watch]\npoll_interval_ms = 0\n").unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::ValidationError(_))));
    }

    #[test]
    fn rejects_unknown_log_level() {
        let err = Config::from_toml_str("[general]\nlog_level = \"loud\"\n").unwrap_err();
        assert!(err.to_string().contains("loud"));
    }

    #[test]
    fn rejects_bad_toml() {
        let err = Config::from_toml_str("[engine\n").unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::ParseFailed(_))));
    }

    #[test]
    fn load_from_explicit_path_with_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reflex.toml");
        std::fs::write(&path, "[general]\nlog_format = \"json\"\n").unwrap();

        let overrides = ConfigOverrides {
            log_level: Some("debug".to_string()),
            ..ConfigOverrides::default()
        };
        let config = Config::load_with_overrides(Some(&path), true, &overrides).unwrap();
        assert_eq!(config.general.log_format, LogFormat::Json);
        assert_eq!(config.general.log_level, "debug");
    }

    #[test]
    fn strict_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let err =
            Config::load_with_overrides(Some(&missing), true, &ConfigOverrides::default()).unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::ReadFailed(_, _))));

        let config =
            Config::load_with_overrides(Some(&missing), false, &ConfigOverrides::default()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn round_trips_through_toml() {
        let mut config = Config::default();
        config.rules.path = Some("rules.yaml".to_string());
        let text = config.to_toml().unwrap();
        assert_eq!(Config::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn relative_rules_path_resolves_against_base() {
        let mut config = Config::default();
        assert!(config.rules_path(None).is_none());
        config.rules.path = Some("rules.json".to_string());
        assert_eq!(
            config.rules_path(Some(Path::new("/etc/reflex"))),
            Some(PathBuf::from("/etc/reflex/rules.json"))
        );
    }
}
