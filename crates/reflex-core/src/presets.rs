//! Built-in rule presets.
//!
//! Preset ids use the `builtin.` prefix. User rules sharing an id replace
//! the preset when the two sets are merged with [`with_presets`].

use crate::rules::{Action, Pattern, Rule, RuleCategory, merge_rule_sets};

/// Prefix shared by every preset id.
pub const PRESET_PREFIX: &str = "builtin.";

/// Whether `rule_id` names a preset.
#[must_use]
pub fn is_preset_id(rule_id: &str) -> bool {
    rule_id.starts_with(PRESET_PREFIX)
}

/// The built-in rule set, in evaluation order.
#[must_use]
pub fn builtin_rules() -> Vec<Rule> {
    vec![
        // Provider throttling: wait, then nudge the agent to resume.
        Rule::new("builtin.rate_limit_recovery", "Rate limit recovery")
            .with_description("Resume after the provider reports a rate limit")
            .with_category(RuleCategory::Recovery)
            .with_pattern(Pattern::regex(
                r"rate[ _-]?limit(?:ed)?|too many requests|\b429\b",
            ))
            .with_action(Action::notify("{session}: rate limited ({match})"))
            .with_action(Action::send_text("continue").with_delay_ms(60_000))
            .with_cooldown(300)
            .with_max_triggers_per_hour(6)
            .with_order(10),
        Rule::new("builtin.connection_refused_retry", "Connection refused retry")
            .with_description("Ask the agent to retry after a transient network failure")
            .with_category(RuleCategory::Recovery)
            .with_pattern(Pattern::regex(r"connection (?:refused|reset)|ECONNREFUSED|ECONNRESET"))
            .with_action(Action::send_text("retry").with_delay_ms(5_000))
            .with_cooldown(60)
            .with_max_triggers_per_hour(10)
            .with_order(20),
        Rule::new("builtin.yes_no_prompt", "Yes/no confirmation")
            .with_description("Answer routine [y/n] confirmation prompts")
            .with_category(RuleCategory::Prompt)
            .with_pattern(Pattern::regex(r"\[(?:y/n|Y/n|y/N)\]\s*\??\s*$"))
            .with_action(Action::send_text("y"))
            .with_session_states(["needs_input", "running"])
            .with_cooldown(10)
            .with_order(30),
        Rule::new("builtin.press_enter", "Press Enter prompt")
            .with_description("Dismiss 'press Enter to continue' pauses")
            .with_category(RuleCategory::Prompt)
            .with_pattern(Pattern::regex(r"press (?:enter|return) to continue"))
            .with_action(Action::send_keys("Enter"))
            .with_cooldown(10)
            .with_order(40),
        Rule::new("builtin.task_started_signal", "Task started signal")
            .with_description("Report the task id an agent starts working on")
            .with_category(RuleCategory::Notification)
            .with_pattern(Pattern::regex(r"Working on task ([A-Za-z0-9][A-Za-z0-9_-]*)").case_sensitive())
            .with_action(Action::signal(r#"working {"taskId":"{$1}","agentName":"{agent}"}"#))
            .with_cooldown(30)
            .with_order(50),
    ]
}

/// Presets followed by `user_rules`; user rules override presets by id.
#[must_use]
pub fn with_presets(user_rules: Vec<Rule>) -> Vec<Rule> {
    merge_rule_sets(&builtin_rules(), user_rules, true).0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::evaluate_rule;
    use crate::rules::{CompiledRule, compile_rules};

    fn compiled_presets() -> Vec<CompiledRule> {
        compile_rules(builtin_rules()).expect("presets must compile")
    }

    fn matching(text: &str) -> Vec<String> {
        compiled_presets()
            .iter()
            .filter(|r| evaluate_rule(r, text).is_some())
            .map(|r| r.id().to_string())
            .collect()
    }

    #[test]
    fn presets_compile_with_prefixed_ids() {
        let compiled = compiled_presets();
        assert_eq!(compiled.len(), 5);
        assert!(compiled.iter().all(|r| is_preset_id(r.id())));
    }

    #[test]
    fn rate_limit_preset_matches_common_messages() {
        assert_eq!(matching("Error: Rate limited, retrying later"), vec!["builtin.rate_limit_recovery"]);
        assert_eq!(matching("HTTP 429 Too Many Requests"), vec!["builtin.rate_limit_recovery"]);
    }

    #[test]
    fn prompt_presets() {
        assert_eq!(matching("Overwrite file? [y/N]"), vec!["builtin.yes_no_prompt"]);
        assert_eq!(matching("Press Enter to continue..."), vec!["builtin.press_enter"]);
        assert!(matching("all good").is_empty());
    }

    #[test]
    fn task_signal_captures_task_id() {
        let compiled = compiled_presets();
        let rule = compiled
            .iter()
            .find(|r| r.id() == "builtin.task_started_signal")
            .unwrap();
        let m = evaluate_rule(rule, "Working on task squad-xyz").unwrap();
        assert_eq!(m.captured_groups, vec!["squad-xyz".to_string()]);
    }

    #[test]
    fn user_rules_override_presets() {
        let custom = Rule::new("builtin.press_enter", "Mine")
            .with_pattern(Pattern::contains("hit enter"))
            .with_action(Action::send_keys("Enter"));
        let rules = with_presets(vec![custom]);
        assert_eq!(rules.len(), 5);
        let replaced = rules.iter().find(|r| r.id == "builtin.press_enter").unwrap();
        assert_eq!(replaced.name, "Mine");
    }
}
