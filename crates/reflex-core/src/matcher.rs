//! Pattern matching against session text.
//!
//! Matching is pure: a [`CompiledPattern`] is built once when rules are
//! loaded (so regex errors surface at load time) and then evaluated against
//! each text chunk without touching any shared state.

use fancy_regex::Regex;
use memchr::memmem;
use serde::Serialize;

use crate::error::RuleError;
use crate::rules::{CompiledRule, MatchMode, Pattern};

/// Result of evaluating one pattern.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MatchResult {
    pub matched: bool,
    /// Numbered capture groups `$1..$N` (empty string for groups that did not participate)
    pub captured_groups: Vec<String>,
    /// Group 0 for regexes, the matched slice for literal modes
    pub full_match: String,
}

impl MatchResult {
    fn miss() -> Self {
        Self::default()
    }

    fn hit(full_match: impl Into<String>) -> Self {
        Self {
            matched: true,
            captured_groups: Vec::new(),
            full_match: full_match.into(),
        }
    }
}

/// Result of a full rule match (all patterns matched).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuleMatch {
    pub full_match: String,
    pub captured_groups: Vec<String>,
}

/// A pattern ready for evaluation.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pattern: Pattern,
    regex: Option<Regex>,
    /// Literal value, lowercased unless case-sensitive
    needle: String,
}

impl CompiledPattern {
    /// Compile a pattern, reporting regex errors against `rule_id`.
    pub fn compile(rule_id: &str, pattern: &Pattern) -> Result<Self, RuleError> {
        let regex = if pattern.mode == MatchMode::Regex {
            let source = if pattern.case_sensitive {
                pattern.value.clone()
            } else {
                format!("(?i){}", pattern.value)
            };
            Some(Regex::new(&source).map_err(|e| RuleError::InvalidRegex {
                rule_id: rule_id.to_string(),
                pattern: pattern.value.clone(),
                message: e.to_string(),
            })?)
        } else {
            None
        };

        let needle = if pattern.case_sensitive {
            pattern.value.clone()
        } else {
            pattern.value.to_lowercase()
        };

        Ok(Self {
            pattern: pattern.clone(),
            regex,
            needle,
        })
    }

    #[must_use]
    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    #[must_use]
    pub fn is_regex(&self) -> bool {
        self.regex.is_some()
    }

    #[must_use]
    pub fn is_negated(&self) -> bool {
        self.pattern.negate
    }

    /// Number of numbered capture groups (excluding group 0).
    #[must_use]
    pub fn capture_count(&self) -> usize {
        self.regex
            .as_ref()
            .map_or(0, |re| re.captures_len().saturating_sub(1))
    }

    /// Evaluate this pattern against `text`.
    ///
    /// Negation flips `matched` only; a negated pattern never reports captures.
    #[must_use]
    pub fn matches(&self, text: &str) -> MatchResult {
        let base = self.base_match(text);
        if !self.pattern.negate {
            return base;
        }
        if base.matched {
            MatchResult::miss()
        } else {
            MatchResult {
                matched: true,
                ..MatchResult::default()
            }
        }
    }

    fn base_match(&self, text: &str) -> MatchResult {
        if let Some(regex) = self.regex.as_ref() {
            return match regex.captures(text) {
                Ok(Some(captures)) => {
                    let full_match = captures
                        .get(0)
                        .map(|m| m.as_str().to_string())
                        .unwrap_or_default();
                    let captured_groups = (1..captures.len())
                        .map(|i| {
                            captures
                                .get(i)
                                .map(|m| m.as_str().to_string())
                                .unwrap_or_default()
                        })
                        .collect();
                    MatchResult {
                        matched: true,
                        captured_groups,
                        full_match,
                    }
                }
                Ok(None) => MatchResult::miss(),
                Err(err) => {
                    tracing::warn!(
                        pattern = %self.pattern.value,
                        error = %err,
                        "Regex evaluation failed; treating as no match"
                    );
                    MatchResult::miss()
                }
            };
        }

        let folded;
        let haystack = if self.pattern.case_sensitive {
            text
        } else {
            folded = text.to_lowercase();
            folded.as_str()
        };
        let needle = self.needle.as_str();

        let span = match self.pattern.mode {
            MatchMode::Contains => memmem::find(haystack.as_bytes(), needle.as_bytes())
                .map(|start| (start, start + needle.len())),
            MatchMode::Exact => (haystack == needle).then_some((0, haystack.len())),
            MatchMode::StartsWith => haystack.starts_with(needle).then_some((0, needle.len())),
            MatchMode::EndsWith => haystack
                .ends_with(needle)
                .then(|| (haystack.len() - needle.len(), haystack.len())),
            MatchMode::Regex => None,
        };

        match span {
            Some((start, end)) => MatchResult::hit(original_slice(text, haystack, start, end)),
            None => MatchResult::miss(),
        }
    }
}

/// Map a span found in the (possibly case-folded) haystack back to the
/// original text. Offsets only line up when folding preserved byte lengths.
fn original_slice(text: &str, haystack: &str, start: usize, end: usize) -> String {
    if text.len() == haystack.len() {
        if let Some(slice) = text.get(start..end) {
            return slice.to_string();
        }
    }
    haystack.get(start..end).unwrap_or_default().to_string()
}

/// Evaluate every pattern of a rule (logical AND).
///
/// A rule with no patterns never matches. `full_match`/`captured_groups`
/// come from the last non-negated regex pattern that has capture groups,
/// else the last non-negated regex, else the first non-negated literal
/// pattern.
#[must_use]
pub fn evaluate_rule(rule: &CompiledRule, text: &str) -> Option<RuleMatch> {
    if rule.patterns.is_empty() {
        return None;
    }

    let mut first_literal: Option<String> = None;
    let mut last_regex: Option<MatchResult> = None;
    let mut last_capturing: Option<MatchResult> = None;

    for pattern in &rule.patterns {
        let result = pattern.matches(text);
        if !result.matched {
            return None;
        }
        if pattern.is_negated() {
            continue;
        }
        if pattern.is_regex() {
            if pattern.capture_count() > 0 {
                last_capturing = Some(result.clone());
            }
            last_regex = Some(result);
        } else if first_literal.is_none() {
            first_literal = Some(result.full_match);
        }
    }

    let rule_match = match last_capturing.or(last_regex) {
        Some(source) => RuleMatch {
            full_match: source.full_match,
            captured_groups: source.captured_groups,
        },
        None => RuleMatch {
            full_match: first_literal.unwrap_or_default(),
            captured_groups: Vec::new(),
        },
    };
    Some(rule_match)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{Rule, compile_rules};
    use proptest::prelude::*;

    fn compiled(pattern: Pattern) -> CompiledPattern {
        CompiledPattern::compile("test", &pattern).unwrap()
    }

    fn compiled_rule(rule: Rule) -> CompiledRule {
        compile_rules(vec![rule]).unwrap().remove(0)
    }

    #[test]
    fn contains_is_case_folded_by_default() {
        let p = compiled(Pattern::contains("rate limited"));
        let result = p.matches("Error: Rate Limited, retrying");
        assert!(result.matched);
        assert_eq!(result.full_match, "Rate Limited");
        assert!(result.captured_groups.is_empty());
    }

    #[test]
    fn contains_case_sensitive() {
        let p = compiled(Pattern::contains("Rate").case_sensitive());
        assert!(p.matches("Rate limited").matched);
        assert!(!p.matches("rate limited").matched);
    }

    #[test]
    fn exact_requires_whole_text() {
        let p = compiled(Pattern::exact("Continue? [y/n]"));
        assert!(p.matches("continue? [Y/N]").matched);
        assert!(!p.matches("Continue? [y/n] ").matched);
        assert!(!p.matches("> Continue? [y/n]").matched);
    }

    #[test]
    fn starts_and_ends_with() {
        let starts = compiled(Pattern::starts_with("error:"));
        assert!(starts.matches("ERROR: boom").matched);
        assert_eq!(starts.matches("ERROR: boom").full_match, "ERROR:");
        assert!(!starts.matches("an error: boom").matched);

        let ends = compiled(Pattern::ends_with("$ "));
        assert!(ends.matches("user@host $ ").matched);
        assert!(!ends.matches("$ ls").matched);
    }

    #[test]
    fn regex_search_is_unanchored_with_groups() {
        let p = compiled(Pattern::regex(r"Working on task (squad-[a-z0-9]+)"));
        let result = p.matches("log line\nWorking on task squad-xyz\nmore");
        assert!(result.matched);
        assert_eq!(result.full_match, "Working on task squad-xyz");
        assert_eq!(result.captured_groups, vec!["squad-xyz".to_string()]);
    }

    #[test]
    fn regex_case_insensitive_unless_requested() {
        assert!(compiled(Pattern::regex("ECONNREFUSED")).matches("econnrefused").matched);
        assert!(
            !compiled(Pattern::regex("ECONNREFUSED").case_sensitive())
                .matches("econnrefused")
                .matched
        );
    }

    #[test]
    fn optional_group_yields_empty_string() {
        let p = compiled(Pattern::regex(r"retry in (\d+)s( \(attempt (\d+)\))?"));
        let result = p.matches("retry in 30s");
        assert_eq!(
            result.captured_groups,
            vec!["30".to_string(), String::new(), String::new()]
        );
    }

    #[test]
    fn negated_match_has_no_captures() {
        let p = compiled(Pattern::regex(r"(done)").negated());
        let absent = p.matches("still working");
        assert!(absent.matched);
        assert!(absent.captured_groups.is_empty());
        assert!(absent.full_match.is_empty());
        assert!(!p.matches("all done").matched);
    }

    #[test]
    fn rule_requires_every_pattern() {
        let rule = compiled_rule(
            Rule::new("r", "r")
                .with_pattern(Pattern::contains("rate limit"))
                .with_pattern(Pattern::contains("retry")),
        );
        assert!(evaluate_rule(&rule, "rate limit hit").is_none());
        assert!(evaluate_rule(&rule, "rate limit hit, retry later").is_some());
    }

    #[test]
    fn rule_without_patterns_never_matches() {
        let rule = compiled_rule(Rule::new("empty", "Empty"));
        assert!(evaluate_rule(&rule, "").is_none());
        assert!(evaluate_rule(&rule, "anything").is_none());
    }

    #[test]
    fn last_capturing_regex_wins() {
        let rule = compiled_rule(
            Rule::new("r", "r")
                .with_pattern(Pattern::regex(r"task (\w+)"))
                .with_pattern(Pattern::contains("agent"))
                .with_pattern(Pattern::regex(r"agent (\w+)")),
        );
        let m = evaluate_rule(&rule, "task alpha by agent Bay").unwrap();
        assert_eq!(m.full_match, "agent Bay");
        assert_eq!(m.captured_groups, vec!["Bay".to_string()]);
    }

    #[test]
    fn capturing_regex_preferred_over_later_plain_regex() {
        let rule = compiled_rule(
            Rule::new("r", "r")
                .with_pattern(Pattern::regex(r"task (\w+)"))
                .with_pattern(Pattern::regex(r"done")),
        );
        let m = evaluate_rule(&rule, "task alpha done").unwrap();
        assert_eq!(m.captured_groups, vec!["alpha".to_string()]);
        assert_eq!(m.full_match, "task alpha");
    }

    #[test]
    fn literal_rule_reports_first_literal_match() {
        let rule = compiled_rule(
            Rule::new("r", "r")
                .with_pattern(Pattern::contains("connection refused"))
                .with_pattern(Pattern::contains("fatal").negated()),
        );
        let m = evaluate_rule(&rule, "Error: Connection refused").unwrap();
        assert_eq!(m.full_match, "Connection refused");
        assert!(m.captured_groups.is_empty());
        assert!(evaluate_rule(&rule, "fatal: connection refused").is_none());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            .. ProptestConfig::default()
        })]

        #[test]
        fn prop_empty_rule_never_matches(text in ".{0,200}") {
            let rule = compiled_rule(Rule::new("empty", "Empty"));
            prop_assert!(evaluate_rule(&rule, &text).is_none());
        }

        #[test]
        fn prop_negated_contains_inverts_base(
            text in "[a-z ]{0,60}",
            needle in "[a-z]{1,4}",
        ) {
            let plain = compiled(Pattern::contains(needle.clone()));
            let negated = compiled(Pattern::contains(needle.clone()).negated());
            prop_assert_eq!(plain.matches(&text).matched, text.contains(&needle));
            prop_assert_eq!(negated.matches(&text).matched, !text.contains(&needle));
        }
    }
}
