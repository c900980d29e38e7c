//! Per-rule and global trigger rate limiting.
//!
//! All state lives behind one mutex and [`RateLimiter::check_and_reserve`]
//! decides and records in a single critical section, so two sessions
//! matching the same rule at the same instant cannot both pass.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

const HOUR_MS: i64 = 3_600_000;
const MINUTE_MS: i64 = 60_000;

/// Why a matched rule did not fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionReason {
    /// Rule triggered less than `cooldownSeconds` ago
    Cooldown,
    /// Rule reached `maxTriggersPerHour`
    RuleRateLimit,
    /// Global cooldown or per-minute cap
    GlobalRateLimit,
    /// Session phase not in the rule's allow-list
    StateFiltered,
}

impl SuppressionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cooldown => "cooldown",
            Self::RuleRateLimit => "rule_rate_limit",
            Self::GlobalRateLimit => "global_rate_limit",
            Self::StateFiltered => "state_filtered",
        }
    }

    /// Cooldowns and caps expire with time; a state filter does not.
    pub fn is_rate_limit(self) -> bool {
        !matches!(self, Self::StateFiltered)
    }
}

impl std::fmt::Display for SuppressionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Denied(SuppressionReason),
}

impl RateDecision {
    #[must_use]
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Per-rule limits, taken from the rule definition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuleLimits {
    pub cooldown_seconds: u64,
    /// 0 = unlimited
    pub max_triggers_per_hour: u32,
}

/// Engine-wide limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalLimits {
    pub cooldown_seconds: u64,
    /// 0 = unlimited
    pub max_actions_per_minute: u32,
}

#[derive(Debug, Default)]
struct WindowState {
    last_trigger_at: Option<i64>,
    trigger_timestamps: VecDeque<i64>,
}

impl WindowState {
    fn prune(&mut self, now_ms: i64, window_ms: i64) {
        let cutoff = now_ms - window_ms;
        while self
            .trigger_timestamps
            .front()
            .is_some_and(|&ts| ts < cutoff)
        {
            self.trigger_timestamps.pop_front();
        }
    }

    fn within_cooldown(&self, now_ms: i64, cooldown_seconds: u64) -> bool {
        if cooldown_seconds == 0 {
            return false;
        }
        let cooldown_ms = i64::try_from(cooldown_seconds.saturating_mul(1000)).unwrap_or(i64::MAX);
        self.last_trigger_at
            .is_some_and(|last| now_ms.saturating_sub(last) < cooldown_ms)
    }

    fn record(&mut self, now_ms: i64) {
        self.last_trigger_at = Some(now_ms);
        self.trigger_timestamps.push_back(now_ms);
    }
}

#[derive(Debug, Default)]
struct LimiterState {
    rules: HashMap<String, WindowState>,
    global: WindowState,
}

/// Point-in-time view of one rule's limiter state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    pub rule_id: String,
    pub last_trigger_at: Option<i64>,
    pub triggers_last_hour: usize,
}

/// Rate limiter shared by every session's evaluation task.
#[derive(Debug)]
pub struct RateLimiter {
    global: Mutex<GlobalLimits>,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(global: GlobalLimits) -> Self {
        Self {
            global: Mutex::new(global),
            state: Mutex::new(LimiterState::default()),
        }
    }

    /// Replace the global limits (existing windows are kept).
    pub fn set_global_limits(&self, limits: GlobalLimits) {
        *self.global.lock().unwrap_or_else(PoisonError::into_inner) = limits;
    }

    #[must_use]
    pub fn global_limits(&self) -> GlobalLimits {
        *self.global.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decide whether `rule_id` may fire at `now_ms` and, if so, record it.
    ///
    /// Checks run in order: rule cooldown, rule hourly cap, global cooldown,
    /// global per-minute cap. Denials record nothing.
    pub fn check_and_reserve(&self, rule_id: &str, limits: RuleLimits, now_ms: i64) -> RateDecision {
        let global = self.global_limits();
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let state = &mut *guard;

        let rule = state.rules.entry(rule_id.to_string()).or_default();
        rule.prune(now_ms, HOUR_MS);

        if rule.within_cooldown(now_ms, limits.cooldown_seconds) {
            return RateDecision::Denied(SuppressionReason::Cooldown);
        }
        if limits.max_triggers_per_hour > 0
            && rule.trigger_timestamps.len() >= limits.max_triggers_per_hour as usize
        {
            return RateDecision::Denied(SuppressionReason::RuleRateLimit);
        }

        state.global.prune(now_ms, MINUTE_MS);
        if state.global.within_cooldown(now_ms, global.cooldown_seconds) {
            return RateDecision::Denied(SuppressionReason::GlobalRateLimit);
        }
        if global.max_actions_per_minute > 0
            && state.global.trigger_timestamps.len() >= global.max_actions_per_minute as usize
        {
            return RateDecision::Denied(SuppressionReason::GlobalRateLimit);
        }

        rule.record(now_ms);
        state.global.record(now_ms);
        RateDecision::Allowed
    }

    /// Current state of one rule.
    #[must_use]
    pub fn status(&self, rule_id: &str, now_ms: i64) -> RateLimitStatus {
        let guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let (last_trigger_at, triggers_last_hour) =
            guard.rules.get(rule_id).map_or((None, 0), |rule| {
                let cutoff = now_ms - HOUR_MS;
                (
                    rule.last_trigger_at,
                    rule.trigger_timestamps
                        .iter()
                        .filter(|&&ts| ts >= cutoff)
                        .count(),
                )
            });
        RateLimitStatus {
            rule_id: rule_id.to_string(),
            last_trigger_at,
            triggers_last_hour,
        }
    }

    /// Forget all trigger history.
    pub fn reset(&self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = LimiterState::default();
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(GlobalLimits::default())
    }
}
