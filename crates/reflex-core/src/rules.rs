//! Rule definitions, validation, and rule documents.
//!
//! A [`Rule`] pairs an AND-combined list of [`Pattern`]s with an ordered list
//! of [`Action`]s. Rules arrive from an external store as a [`RuleDocument`]
//! (JSON, YAML or TOML) and are validated and compiled in one step by
//! [`compile_rules`]; nothing reaches the engine unless every rule in the
//! set compiles.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, RuleError};
use crate::matcher::CompiledPattern;

/// Current rule document schema version.
pub const RULE_DOCUMENT_VERSION: u32 = 1;

/// Rule category (informational; used for grouping in dashboards).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    /// Recover from transient failures (rate limits, network errors)
    Recovery,
    /// Answer routine confirmation prompts
    Prompt,
    /// React to stalled sessions
    Stall,
    /// Only notify an operator
    Notification,
    /// Anything else
    #[default]
    Custom,
}

impl RuleCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Recovery => "recovery",
            Self::Prompt => "prompt",
            Self::Stall => "stall",
            Self::Notification => "notification",
            Self::Custom => "custom",
        }
    }
}

impl std::fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a pattern's `value` is compared against session text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchMode {
    /// Regex search (not anchored)
    Regex,
    /// Substring search
    Contains,
    /// Whole-text equality
    Exact,
    /// Prefix test
    StartsWith,
    /// Suffix test
    EndsWith,
}

impl MatchMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Regex => "regex",
            Self::Contains => "contains",
            Self::Exact => "exact",
            Self::StartsWith => "startsWith",
            Self::EndsWith => "endsWith",
        }
    }
}

impl std::fmt::Display for MatchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single text predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pattern {
    pub mode: MatchMode,
    /// Regex source or literal, depending on `mode`
    pub value: String,
    #[serde(default)]
    pub case_sensitive: bool,
    /// Invert the base match result
    #[serde(default)]
    pub negate: bool,
}

impl Pattern {
    #[must_use]
    pub fn new(mode: MatchMode, value: impl Into<String>) -> Self {
        Self {
            mode,
            value: value.into(),
            case_sensitive: false,
            negate: false,
        }
    }

    #[must_use]
    pub fn regex(value: impl Into<String>) -> Self {
        Self::new(MatchMode::Regex, value)
    }

    #[must_use]
    pub fn contains(value: impl Into<String>) -> Self {
        Self::new(MatchMode::Contains, value)
    }

    #[must_use]
    pub fn exact(value: impl Into<String>) -> Self {
        Self::new(MatchMode::Exact, value)
    }

    #[must_use]
    pub fn starts_with(value: impl Into<String>) -> Self {
        Self::new(MatchMode::StartsWith, value)
    }

    #[must_use]
    pub fn ends_with(value: impl Into<String>) -> Self {
        Self::new(MatchMode::EndsWith, value)
    }

    #[must_use]
    pub fn case_sensitive(mut self) -> Self {
        self.case_sensitive = true;
        self
    }

    #[must_use]
    pub fn negated(mut self) -> Self {
        self.negate = true;
        self
    }
}

/// The closed set of side effects a rule can trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Type text into the session, then confirm it
    SendText,
    /// Send a raw key-sequence token
    SendKeys,
    /// Run a session-manager command
    TmuxCommand,
    /// Emit a `<kind> <json>` signal
    Signal,
    /// Notify the operator only
    NotifyOnly,
}

impl ActionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SendText => "send_text",
            Self::SendKeys => "send_keys",
            Self::TmuxCommand => "tmux_command",
            Self::Signal => "signal",
            Self::NotifyOnly => "notify_only",
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed, templated side effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: ActionType,
    /// Payload template (may contain `{var}` / `{$N}` placeholders)
    pub value: String,
    /// Deferral before the actuator call, in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
}

impl Action {
    #[must_use]
    pub fn new(kind: ActionType, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
            delay_ms: None,
        }
    }

    #[must_use]
    pub fn send_text(value: impl Into<String>) -> Self {
        Self::new(ActionType::SendText, value)
    }

    #[must_use]
    pub fn send_keys(value: impl Into<String>) -> Self {
        Self::new(ActionType::SendKeys, value)
    }

    #[must_use]
    pub fn tmux_command(value: impl Into<String>) -> Self {
        Self::new(ActionType::TmuxCommand, value)
    }

    #[must_use]
    pub fn signal(value: impl Into<String>) -> Self {
        Self::new(ActionType::Signal, value)
    }

    #[must_use]
    pub fn notify(value: impl Into<String>) -> Self {
        Self::new(ActionType::NotifyOnly, value)
    }

    #[must_use]
    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = Some(delay_ms);
        self
    }

    /// Effective delay (zero when unset).
    #[must_use]
    pub fn delay_ms(&self) -> u64 {
        self.delay_ms.unwrap_or(0)
    }
}

const fn default_enabled() -> bool {
    true
}

/// A named, orderable combination of patterns and actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// Stable identifier
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: RuleCategory,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// All must match
    #[serde(default)]
    pub patterns: Vec<Pattern>,
    /// Executed in order when the rule fires
    #[serde(default)]
    pub actions: Vec<Action>,
    /// Allowed lifecycle phases (empty = all)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub session_states: Vec<String>,
    #[serde(default)]
    pub cooldown_seconds: u64,
    /// 0 = unlimited
    #[serde(default)]
    pub max_triggers_per_hour: u32,
    /// Lower is evaluated first
    #[serde(default)]
    pub order: i32,
}

impl Rule {
    /// Create an enabled rule with no patterns, actions, or limits.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            category: RuleCategory::Custom,
            enabled: true,
            patterns: Vec::new(),
            actions: Vec::new(),
            session_states: Vec::new(),
            cooldown_seconds: 0,
            max_triggers_per_hour: 0,
            order: 0,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: RuleCategory) -> Self {
        self.category = category;
        self
    }

    #[must_use]
    pub fn with_pattern(mut self, pattern: Pattern) -> Self {
        self.patterns.push(pattern);
        self
    }

    #[must_use]
    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    #[must_use]
    pub fn with_session_states<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.session_states = states.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_cooldown(mut self, seconds: u64) -> Self {
        self.cooldown_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_max_triggers_per_hour(mut self, max: u32) -> Self {
        self.max_triggers_per_hour = max;
        self
    }

    #[must_use]
    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Whether the rule may fire in the given lifecycle phase.
    #[must_use]
    pub fn allows_state(&self, state: &str) -> bool {
        self.session_states.is_empty() || self.session_states.iter().any(|s| s == state)
    }

    fn validate(&self) -> Result<(), RuleError> {
        if self.id.trim().is_empty() {
            return Err(RuleError::InvalidRule("rule id cannot be empty".to_string()));
        }
        if self.name.trim().is_empty() {
            return Err(RuleError::InvalidRule(format!(
                "rule '{}' must have a name",
                self.id
            )));
        }

        for (idx, pattern) in self.patterns.iter().enumerate() {
            if pattern.value.is_empty() {
                return Err(RuleError::InvalidRule(format!(
                    "rule '{}' pattern #{idx} has an empty value",
                    self.id
                )));
            }
        }

        if self.session_states.iter().any(|s| s.trim().is_empty()) {
            return Err(RuleError::InvalidRule(format!(
                "rule '{}' lists an empty session state",
                self.id
            )));
        }

        for action in &self.actions {
            validate_action(&self.id, action)?;
        }

        Ok(())
    }
}

fn validate_action(rule_id: &str, action: &Action) -> Result<(), RuleError> {
    if action.value.trim().is_empty() {
        return Err(RuleError::InvalidAction {
            rule_id: rule_id.to_string(),
            message: format!("{} action has an empty value", action.kind),
        });
    }

    if action.kind == ActionType::Signal {
        let has_payload = action
            .value
            .trim()
            .split_once(char::is_whitespace)
            .is_some_and(|(_, payload)| !payload.trim().is_empty());
        if !has_payload {
            return Err(RuleError::InvalidAction {
                rule_id: rule_id.to_string(),
                message: format!(
                    "signal value must be '<kind> <json>', got '{}'",
                    action.value
                ),
            });
        }
    }

    Ok(())
}

/// A validated rule with its patterns compiled.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule: Rule,
    pub patterns: Vec<CompiledPattern>,
}

impl CompiledRule {
    fn compile(rule: Rule) -> Result<Self, RuleError> {
        rule.validate()?;
        let patterns = rule
            .patterns
            .iter()
            .map(|pattern| CompiledPattern::compile(&rule.id, pattern))
            .collect::<Result<Vec<_>, _>>()?;
        if patterns.is_empty() {
            tracing::warn!(rule_id = %rule.id, "Rule has no patterns and will never match");
        }
        Ok(Self { rule, patterns })
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.rule.id
    }
}

/// Validate and compile a full rule set.
///
/// Returns the first error encountered; the result is sorted by ascending
/// `order` (ties keep their input order).
pub fn compile_rules(rules: Vec<Rule>) -> Result<Vec<CompiledRule>, RuleError> {
    let mut seen = HashSet::new();
    for rule in &rules {
        if !seen.insert(rule.id.as_str()) {
            return Err(RuleError::DuplicateId(rule.id.clone()));
        }
    }

    let mut compiled = rules
        .into_iter()
        .map(CompiledRule::compile)
        .collect::<Result<Vec<_>, _>>()?;
    compiled.sort_by_key(|c| c.rule.order);
    Ok(compiled)
}

/// Outcome of an import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub total: usize,
}

/// Combine an existing rule set with imported rules.
///
/// With `merge`, existing rules absent from `incoming` are kept and rules
/// sharing an id are overwritten in place. Without it, `incoming` replaces
/// the set.
#[must_use]
pub fn merge_rule_sets(
    existing: &[Rule],
    incoming: Vec<Rule>,
    merge: bool,
) -> (Vec<Rule>, ImportSummary) {
    let existing_ids: HashSet<&str> = existing.iter().map(|r| r.id.as_str()).collect();
    let incoming_ids: HashSet<String> = incoming.iter().map(|r| r.id.clone()).collect();

    let updated = incoming
        .iter()
        .filter(|r| existing_ids.contains(r.id.as_str()))
        .count();
    let added = incoming.len() - updated;

    if !merge {
        let removed = existing
            .iter()
            .filter(|r| !incoming_ids.contains(&r.id))
            .count();
        let total = incoming.len();
        return (
            incoming,
            ImportSummary {
                added,
                updated,
                removed,
                total,
            },
        );
    }

    let mut replacements: HashMap<String, Rule> =
        incoming.iter().map(|r| (r.id.clone(), r.clone())).collect();
    let mut merged: Vec<Rule> = existing
        .iter()
        .map(|rule| replacements.remove(&rule.id).unwrap_or_else(|| rule.clone()))
        .collect();
    // New rules go after the existing ones, in document order.
    merged.extend(
        incoming
            .into_iter()
            .filter(|r| !existing_ids.contains(r.id.as_str())),
    );

    let total = merged.len();
    (
        merged,
        ImportSummary {
            added,
            updated,
            removed: 0,
            total,
        },
    )
}

/// Serialization format of a rule document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
    Toml,
}

impl DocumentFormat {
    /// Infer the format from a file extension.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(Self::Json),
            Some("yaml" | "yml") => Ok(Self::Yaml),
            Some("toml") => Ok(Self::Toml),
            other => Err(ConfigError::UnsupportedFormat(format!(
                "{} (extension {:?})",
                path.display(),
                other.unwrap_or("")
            ))),
        }
    }
}

fn default_document_version() -> u32 {
    RULE_DOCUMENT_VERSION
}

/// Serializable rule set exchanged with the external config store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDocument {
    #[serde(default = "default_document_version")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exported_at: Option<String>,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl Default for RuleDocument {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl RuleDocument {
    #[must_use]
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            version: RULE_DOCUMENT_VERSION,
            exported_at: None,
            rules,
        }
    }

    /// Parse a document from a string.
    pub fn parse(content: &str, format: DocumentFormat) -> Result<Self, ConfigError> {
        let doc: Self = match format {
            DocumentFormat::Json => serde_json::from_str(content)
                .map_err(|e| ConfigError::ParseFailed(e.to_string()))?,
            DocumentFormat::Yaml => serde_yaml::from_str(content)
                .map_err(|e| ConfigError::ParseFailed(e.to_string()))?,
            DocumentFormat::Toml => {
                toml::from_str(content).map_err(|e| ConfigError::ParseFailed(e.to_string()))?
            }
        };

        if doc.version > RULE_DOCUMENT_VERSION {
            return Err(ConfigError::ValidationError(format!(
                "rule document version {} is newer than supported version {}",
                doc.version, RULE_DOCUMENT_VERSION
            )));
        }
        Ok(doc)
    }

    /// Render the document.
    pub fn render(&self, format: DocumentFormat) -> Result<String, ConfigError> {
        match format {
            DocumentFormat::Json => serde_json::to_string_pretty(self)
                .map_err(|e| ConfigError::SerializeFailed(e.to_string())),
            DocumentFormat::Yaml => {
                serde_yaml::to_string(self).map_err(|e| ConfigError::SerializeFailed(e.to_string()))
            }
            DocumentFormat::Toml => toml::to_string_pretty(self)
                .map_err(|e| ConfigError::SerializeFailed(e.to_string())),
        }
    }

    /// Load a document from disk, inferring the format from the extension.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let format = DocumentFormat::from_path(path)?;
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.display().to_string(), e.to_string()))?;
        Self::parse(&content, format)
    }

    /// Write the document to disk atomically (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let format = DocumentFormat::from_path(path)?;
        let content = self.render(format)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                ConfigError::ReadFailed(parent.display().to_string(), e.to_string())
            })?;
        }

        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, content)
            .map_err(|e| ConfigError::ReadFailed(tmp_path.display().to_string(), e.to_string()))?;
        std::fs::rename(&tmp_path, path)
            .map_err(|e| ConfigError::ReadFailed(path.display().to_string(), e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt_rule(id: &str) -> Rule {
        Rule::new(id, "Continue prompt")
            .with_pattern(Pattern::exact("Continue? [y/n]"))
            .with_action(Action::send_text("y"))
    }

    #[test]
    fn compile_sorts_by_order_and_keeps_ties_stable() {
        let rules = vec![
            prompt_rule("c").with_order(5),
            prompt_rule("a").with_order(1),
            prompt_rule("b").with_order(5),
        ];
        let compiled = compile_rules(rules).unwrap();
        let ids: Vec<&str> = compiled.iter().map(CompiledRule::id).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
    }

    #[test]
    fn duplicate_ids_rejected() {
        let err = compile_rules(vec![prompt_rule("dup"), prompt_rule("dup")]).unwrap_err();
        assert_eq!(err, RuleError::DuplicateId("dup".to_string()));
    }

    #[test]
    fn invalid_regex_rejected_at_load() {
        let rule = Rule::new("bad", "Bad regex").with_pattern(Pattern::regex("(unclosed"));
        let err = compile_rules(vec![rule]).unwrap_err();
        assert!(matches!(err, RuleError::InvalidRegex { ref rule_id, .. } if rule_id == "bad"));
    }

    #[test]
    fn empty_id_and_name_rejected() {
        assert!(compile_rules(vec![Rule::new("  ", "x")]).is_err());
        assert!(compile_rules(vec![Rule::new("x", "")]).is_err());
    }

    #[test]
    fn empty_pattern_value_rejected() {
        let rule = Rule::new("r", "r").with_pattern(Pattern::contains(""));
        assert!(matches!(
            compile_rules(vec![rule]),
            Err(RuleError::InvalidRule(_))
        ));
    }

    #[test]
    fn signal_action_requires_kind_and_payload() {
        let ok = Rule::new("s", "s").with_action(Action::signal(r#"working {"taskId":"{$1}"}"#));
        assert!(compile_rules(vec![ok]).is_ok());

        let bad = Rule::new("s", "s").with_action(Action::signal("working"));
        assert!(matches!(
            compile_rules(vec![bad]),
            Err(RuleError::InvalidAction { .. })
        ));
    }

    #[test]
    fn rule_without_patterns_is_accepted() {
        let compiled = compile_rules(vec![Rule::new("empty", "Empty")]).unwrap();
        assert!(compiled[0].patterns.is_empty());
    }

    #[test]
    fn allows_state_empty_means_all() {
        let rule = prompt_rule("r");
        assert!(rule.allows_state("anything"));
        let rule = rule.with_session_states(["working"]);
        assert!(rule.allows_state("working"));
        assert!(!rule.allows_state("completed"));
    }

    #[test]
    fn json_uses_camel_case_and_defaults() {
        let json = r#"{
            "rules": [{
                "id": "r1",
                "name": "Rate limited",
                "patterns": [{"mode": "startsWith", "value": "Error"}],
                "actions": [{"type": "send_keys", "value": "Enter", "delayMs": 500}],
                "cooldownSeconds": 30,
                "sessionStates": ["working"]
            }]
        }"#;
        let doc = RuleDocument::parse(json, DocumentFormat::Json).unwrap();
        assert_eq!(doc.version, RULE_DOCUMENT_VERSION);
        let rule = &doc.rules[0];
        assert!(rule.enabled);
        assert_eq!(rule.category, RuleCategory::Custom);
        assert_eq!(rule.patterns[0].mode, MatchMode::StartsWith);
        assert!(!rule.patterns[0].case_sensitive);
        assert_eq!(rule.actions[0].kind, ActionType::SendKeys);
        assert_eq!(rule.actions[0].delay_ms(), 500);
        assert_eq!(rule.cooldown_seconds, 30);
        assert_eq!(rule.max_triggers_per_hour, 0);

        let rendered = doc.render(DocumentFormat::Json).unwrap();
        assert!(rendered.contains("\"cooldownSeconds\": 30"));
        assert!(rendered.contains("\"type\": \"send_keys\""));
    }

    #[test]
    fn yaml_and_toml_documents_parse() {
        let yaml = r"
rules:
  - id: yaml.rule
    name: From yaml
    category: prompt
    patterns:
      - mode: contains
        value: proceed?
    actions:
      - type: send_text
        value: 'yes'
";
        let doc = RuleDocument::parse(yaml, DocumentFormat::Yaml).unwrap();
        assert_eq!(doc.rules[0].category, RuleCategory::Prompt);

        let toml_src = r#"
[[rules]]
id = "toml.rule"
name = "From toml"
maxTriggersPerHour = 4

[[rules.patterns]]
mode = "regex"
value = "rate limit(ed)?"

[[rules.actions]]
type = "notify_only"
value = "rate limited in {session}"
"#;
        let doc = RuleDocument::parse(toml_src, DocumentFormat::Toml).unwrap();
        assert_eq!(doc.rules[0].max_triggers_per_hour, 4);
        assert_eq!(doc.rules[0].actions[0].kind, ActionType::NotifyOnly);
    }

    #[test]
    fn newer_document_version_rejected() {
        let json = r#"{"version": 99, "rules": []}"#;
        assert!(matches!(
            RuleDocument::parse(json, DocumentFormat::Json),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn unknown_extension_rejected() {
        assert!(DocumentFormat::from_path(Path::new("rules.ini")).is_err());
        assert_eq!(
            DocumentFormat::from_path(Path::new("rules.yml")).unwrap(),
            DocumentFormat::Yaml
        );
    }

    #[test]
    fn save_and_load_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("rules.json");
        let doc = RuleDocument::new(vec![prompt_rule("disk")]);
        doc.save(&path).unwrap();
        let loaded = RuleDocument::load(&path).unwrap();
        assert_eq!(loaded.rules, doc.rules);
    }

    #[test]
    fn merge_keeps_existing_and_overwrites_by_id() {
        let existing = vec![prompt_rule("a"), prompt_rule("b")];
        let mut replacement = prompt_rule("b");
        replacement.name = "Replaced".to_string();
        let incoming = vec![replacement, prompt_rule("c")];

        let (merged, summary) = merge_rule_sets(&existing, incoming, true);
        let ids: Vec<&str> = merged.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(merged[1].name, "Replaced");
        assert_eq!(
            summary,
            ImportSummary {
                added: 1,
                updated: 1,
                removed: 0,
                total: 3
            }
        );
    }

    #[test]
    fn replace_drops_rules_missing_from_import() {
        let existing = vec![prompt_rule("a"), prompt_rule("b")];
        let (merged, summary) = merge_rule_sets(&existing, vec![prompt_rule("b")], false);
        assert_eq!(merged.len(), 1);
        assert_eq!(summary.removed, 1);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.added, 0);
    }
}
