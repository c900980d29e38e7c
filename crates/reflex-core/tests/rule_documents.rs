//! Rule document exchange and rules-file hot reload.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use reflex_core::actuator::MockActuator;
use reflex_core::ConfigError;
use reflex_core::engine::{EngineConfig, RuleEngine};
use reflex_core::error::Error;
use reflex_core::rules::{
    Action, ActionType, DocumentFormat, MatchMode, Pattern, Rule, RuleCategory, RuleDocument,
};
use reflex_core::runtime::{MockSessionSource, RuntimeConfig, WatchRuntime, load_rule_set};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn engine() -> RuleEngine {
    RuleEngine::new(Arc::new(MockActuator::new()), EngineConfig::default())
}

fn contains_rule(id: &str, needle: &str) -> Rule {
    Rule::new(id, id)
        .with_pattern(Pattern::contains(needle))
        .with_action(Action::notify(needle))
}

/// Rewrite `path` and push its mtime forward so reload sees a change even
/// on filesystems with coarse timestamps.
fn rewrite(path: &Path, content: &str, bump_secs: u64) {
    std::fs::write(path, content).unwrap();
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(bump_secs))
        .unwrap();
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[test]
fn json_document_uses_camel_case_and_defaults() {
    let json = r#"{
        "version": 1,
        "rules": [{
            "id": "prompt",
            "name": "Prompt",
            "category": "prompt",
            "patterns": [{ "mode": "startsWith", "value": "Continue?", "caseSensitive": true }],
            "actions": [{ "type": "send_text", "value": "y", "delayMs": 250 }],
            "sessionStates": ["needs_input"],
            "cooldownSeconds": 10,
            "maxTriggersPerHour": 4
        }]
    }"#;
    let doc = RuleDocument::parse(json, DocumentFormat::Json).unwrap();
    let rule = &doc.rules[0];

    assert!(rule.enabled);
    assert_eq!(rule.category, RuleCategory::Prompt);
    assert_eq!(rule.patterns[0].mode, MatchMode::StartsWith);
    assert!(rule.patterns[0].case_sensitive);
    assert!(!rule.patterns[0].negate);
    assert_eq!(rule.actions[0].kind, ActionType::SendText);
    assert_eq!(rule.actions[0].delay_ms(), 250);
    assert_eq!(rule.cooldown_seconds, 10);
    assert_eq!(rule.max_triggers_per_hour, 4);
    assert_eq!(rule.order, 0);
}

#[test]
fn yaml_and_toml_documents_load_from_disk() {
    let dir = tempfile::tempdir().unwrap();

    let yaml = dir.path().join("rules.yaml");
    std::fs::write(
        &yaml,
        "rules:\n  - id: a\n    name: A\n    patterns:\n      - mode: contains\n        value: alpha\n",
    )
    .unwrap();
    assert_eq!(RuleDocument::load(&yaml).unwrap().rules[0].id, "a");

    let toml_path = dir.path().join("rules.toml");
    std::fs::write(
        &toml_path,
        "[[rules]]\nid = \"b\"\nname = \"B\"\n\n[[rules.patterns]]\nmode = \"regex\"\nvalue = \"beta\"\n",
    )
    .unwrap();
    let doc = RuleDocument::load(&toml_path).unwrap();
    assert_eq!(doc.rules[0].patterns[0].mode, MatchMode::Regex);
}

#[test]
fn unknown_extension_is_rejected() {
    let err = RuleDocument::load(Path::new("rules.txt")).unwrap_err();
    assert!(matches!(err, ConfigError::UnsupportedFormat(_)));
}

#[test]
fn export_save_and_reimport() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("export.json");

    let source = engine();
    source
        .load_rules(vec![contains_rule("a", "alpha"), contains_rule("b", "beta")])
        .unwrap();
    source.export_rules().save(&path).unwrap();

    let target = engine();
    let summary = target
        .import_rules(RuleDocument::load(&path).unwrap(), false)
        .unwrap();
    assert_eq!(summary.added, 2);
    assert_eq!(summary.total, 2);
    assert_eq!(
        target.snapshot().source_rules(),
        source.snapshot().source_rules()
    );
}

#[test]
fn merge_import_preserves_unlisted_rules() {
    let engine = engine();
    engine
        .load_rules(vec![contains_rule("keep", "k"), contains_rule("swap", "old")])
        .unwrap();

    let summary = engine
        .import_rules(
            RuleDocument::new(vec![contains_rule("swap", "new"), contains_rule("add", "n")]),
            true,
        )
        .unwrap();
    assert_eq!((summary.added, summary.updated, summary.removed), (1, 1, 0));

    let rules = engine.snapshot().source_rules();
    let ids: Vec<&str> = rules.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["keep", "swap", "add"]);
    assert_eq!(rules[1].patterns[0].value, "new");
}

#[test]
fn invalid_import_changes_nothing() {
    let engine = engine();
    engine.load_rules(vec![contains_rule("a", "alpha")]).unwrap();

    let err = engine
        .import_rules(
            RuleDocument::new(vec![Rule::new("bad", "Bad").with_pattern(Pattern::regex("(?<"))]),
            true,
        )
        .unwrap_err();
    assert!(matches!(err, Error::Rule(_)));
    assert_eq!(engine.snapshot().generation, 1);
    assert_eq!(engine.snapshot().len(), 1);
}

// ---------------------------------------------------------------------------
// Hot reload
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn runtime_reloads_rules_file_and_keeps_last_good_set() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rules.json");
    RuleDocument::new(vec![contains_rule("a", "alpha")])
        .save(&path)
        .unwrap();

    let engine = Arc::new(engine());
    engine
        .load_rules(load_rule_set(Some(&path), false).unwrap())
        .unwrap();

    let config = RuntimeConfig {
        poll_interval: Duration::from_millis(100),
        rules_path: Some(path.clone()),
        include_presets: false,
        reload_interval: Some(Duration::from_secs(1)),
        ..RuntimeConfig::default()
    };
    let handle = WatchRuntime::new(
        config,
        Arc::clone(&engine),
        Arc::new(MockSessionSource::new()),
    )
    .start();

    let updated = RuleDocument::new(vec![contains_rule("b", "beta")])
        .render(DocumentFormat::Json)
        .unwrap();
    rewrite(&path, &updated, 10);
    tokio::time::sleep(Duration::from_millis(1_500)).await;

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.rules[0].id(), "b");
    let generation = snapshot.generation;

    rewrite(&path, "{ not json", 20);
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(engine.snapshot().generation, generation);
    assert_eq!(engine.snapshot().rules[0].id(), "b");

    handle.shutdown().await;
}
