//! Template variable substitution for action payloads.
//!
//! Supported variables:
//! - `{session}`: session id the rule fired on
//! - `{agent}`: agent name reported for the session (empty if unknown)
//! - `{state}`: lifecycle phase at evaluation time
//! - `{rule}`: id of the rule that fired
//! - `{timestamp}`: RFC 3339 time of resolution
//! - `{match}` / `{$0}`: full matched text
//! - `{$1}`..`{$N}`: regex capture groups (empty past the last group)
//!
//! Anything else in braces is left untouched, so JSON bodies in payloads
//! survive resolution.

use chrono::{SecondsFormat, Utc};

/// Values available to a template.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext<'a> {
    pub session: &'a str,
    pub agent: &'a str,
    pub state: &'a str,
    pub rule: &'a str,
    pub full_match: &'a str,
    pub captured_groups: &'a [String],
}

impl TemplateContext<'_> {
    fn lookup(&self, name: &str) -> Option<String> {
        let value = match name {
            "session" => self.session.to_string(),
            "agent" => self.agent.to_string(),
            "state" => self.state.to_string(),
            "rule" => self.rule.to_string(),
            "timestamp" => Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            "match" => self.full_match.to_string(),
            _ => {
                let digits = name.strip_prefix('$')?;
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                // Out-of-range or overflowing indexes resolve to empty.
                return Some(match digits.parse::<usize>() {
                    Ok(0) => self.full_match.to_string(),
                    Ok(idx) => self
                        .captured_groups
                        .get(idx - 1)
                        .cloned()
                        .unwrap_or_default(),
                    Err(_) => String::new(),
                });
            }
        };
        Some(value)
    }
}

/// Resolve `{var}` placeholders in a single left-to-right pass.
///
/// Substituted values are never rescanned.
#[must_use]
pub fn resolve(template: &str, context: &TemplateContext<'_>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 1..];

        let resolved = after_open.find('}').and_then(|close| {
            let name = &after_open[..close];
            if name.contains('{') {
                return None;
            }
            context.lookup(name).map(|value| (value, close))
        });

        match resolved {
            Some((value, close)) => {
                out.push_str(&value);
                rest = &after_open[close + 1..];
            }
            None => {
                out.push('{');
                rest = after_open;
            }
        }
    }

    out.push_str(rest);
    out
}
