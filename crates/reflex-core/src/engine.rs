//! Rule engine: evaluates output events against the active rule snapshot.
//!
//! The rule set is an immutable [`RuleSnapshot`] published through a
//! `tokio::sync::watch` channel. Evaluation clones the current `Arc` once
//! per pass, so a reload never blocks or mutates an in-flight pass.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{SecondsFormat, Utc};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::activity::{ActionRecord, ActionStatus, ActivityEntry, ActivityLog};
use crate::actuator::ActuatorHandle;
use crate::dispatch::{ActionDispatcher, DispatchRequest};
use crate::error::Result;
use crate::matcher::evaluate_rule;
use crate::rate_limit::{GlobalLimits, RateDecision, RateLimiter, RuleLimits, SuppressionReason};
use crate::rules::{CompiledRule, ImportSummary, Rule, RuleDocument, compile_rules, merge_rule_sets};
use crate::template::{TemplateContext, resolve};

/// Engine-level settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub global_limits: GlobalLimits,
    pub activity_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            global_limits: GlobalLimits {
                cooldown_seconds: 0,
                max_actions_per_minute: 30,
            },
            activity_capacity: crate::activity::DEFAULT_ACTIVITY_CAPACITY,
        }
    }
}

/// An immutable, validated rule set in evaluation order.
#[derive(Debug, Default)]
pub struct RuleSnapshot {
    /// Incremented on every successful load
    pub generation: u64,
    pub rules: Vec<CompiledRule>,
}

impl RuleSnapshot {
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Source rules, in evaluation order.
    #[must_use]
    pub fn source_rules(&self) -> Vec<Rule> {
        self.rules.iter().map(|c| c.rule.clone()).collect()
    }
}

/// One polling tick's worth of session output.
#[derive(Debug, Clone)]
pub struct OutputEvent {
    pub session_id: String,
    pub text: String,
    /// Lifecycle phase reported for the session
    pub session_state: String,
    pub agent: Option<String>,
    /// Evaluation time, epoch milliseconds
    pub now_ms: i64,
}

impl OutputEvent {
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        text: impl Into<String>,
        session_state: impl Into<String>,
        now_ms: i64,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            text: text.into(),
            session_state: session_state.into(),
            agent: None,
            now_ms,
        }
    }

    #[must_use]
    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }
}

/// Orchestrates matching, rate limiting, templating and dispatch.
pub struct RuleEngine {
    snapshot_tx: watch::Sender<Arc<RuleSnapshot>>,
    /// Serializes snapshot writers (load/import read-modify-write)
    write_lock: Mutex<()>,
    rate_limiter: RateLimiter,
    activity: Arc<ActivityLog>,
    dispatcher: ActionDispatcher,
}

impl RuleEngine {
    #[must_use]
    pub fn new(actuator: ActuatorHandle, config: EngineConfig) -> Self {
        let activity = Arc::new(ActivityLog::new(config.activity_capacity));
        let (snapshot_tx, _) = watch::channel(Arc::new(RuleSnapshot::default()));
        Self {
            snapshot_tx,
            write_lock: Mutex::new(()),
            rate_limiter: RateLimiter::new(config.global_limits),
            dispatcher: ActionDispatcher::new(actuator, Arc::clone(&activity)),
            activity,
        }
    }

    /// Validate and atomically install a new rule set.
    ///
    /// On error the active snapshot is left untouched.
    pub fn load_rules(&self, rules: Vec<Rule>) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.install(rules)
    }

    fn install(&self, rules: Vec<Rule>) -> Result<()> {
        let compiled = compile_rules(rules)?;
        let generation = self.snapshot_tx.borrow().generation + 1;
        let count = compiled.len();
        self.snapshot_tx.send_replace(Arc::new(RuleSnapshot {
            generation,
            rules: compiled,
        }));
        info!(generation, rules = count, "Rule set loaded");
        Ok(())
    }

    /// Current rule snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<RuleSnapshot> {
        Arc::clone(&self.snapshot_tx.borrow())
    }

    /// Receive a notification whenever a new snapshot is installed.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<RuleSnapshot>> {
        self.snapshot_tx.subscribe()
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    #[must_use]
    pub fn activity(&self) -> &Arc<ActivityLog> {
        &self.activity
    }

    #[must_use]
    pub fn dispatcher(&self) -> &ActionDispatcher {
        &self.dispatcher
    }

    /// Most recent activity, newest first.
    #[must_use]
    pub fn recent_activity(&self, limit: usize) -> Vec<ActivityEntry> {
        self.activity.recent(limit)
    }

    /// Run one evaluation pass over `event`.
    ///
    /// Every enabled rule is evaluated, in order. Returns the activity
    /// entries recorded by this pass. Dispatch happens in the background;
    /// returned action statuses reflect the state at return time.
    pub fn process_output(&self, event: &OutputEvent) -> Vec<ActivityEntry> {
        let snapshot = self.snapshot();
        let mut entries = Vec::new();
        let mut fired: Vec<&str> = Vec::new();

        for compiled in snapshot.rules.iter().filter(|c| c.rule.enabled) {
            let rule = &compiled.rule;

            // The state gate runs before any pattern is evaluated.
            if !rule.allows_state(&event.session_state) {
                entries.push(self.activity.append(ActivityEntry::suppressed(
                    &rule.id,
                    &rule.name,
                    &event.session_id,
                    "",
                    SuppressionReason::StateFiltered,
                    event.now_ms,
                )));
                continue;
            }

            let Some(rule_match) = evaluate_rule(compiled, &event.text) else {
                continue;
            };

            let limits = RuleLimits {
                cooldown_seconds: rule.cooldown_seconds,
                max_triggers_per_hour: rule.max_triggers_per_hour,
            };
            if let RateDecision::Denied(reason) =
                self.rate_limiter
                    .check_and_reserve(&rule.id, limits, event.now_ms)
            {
                entries.push(self.activity.append(ActivityEntry::suppressed(
                    &rule.id,
                    &rule.name,
                    &event.session_id,
                    &rule_match.full_match,
                    reason,
                    event.now_ms,
                )));
                continue;
            }

            let context = TemplateContext {
                session: &event.session_id,
                agent: event.agent.as_deref().unwrap_or_default(),
                state: &event.session_state,
                rule: &rule.id,
                full_match: &rule_match.full_match,
                captured_groups: &rule_match.captured_groups,
            };
            let actions: Vec<ActionRecord> = rule
                .actions
                .iter()
                .map(|action| ActionRecord {
                    action_type: action.kind,
                    value: resolve(&action.value, &context),
                    delay_ms: action.delay_ms(),
                    status: ActionStatus::Dispatched,
                })
                .collect();

            let entry = self.activity.append(ActivityEntry::triggered(
                &rule.id,
                &rule.name,
                &event.session_id,
                &rule_match.full_match,
                actions.clone(),
                event.now_ms,
            ));
            let dispatched = self.dispatcher.dispatch(DispatchRequest {
                entry_id: entry.id,
                rule_id: rule.id.clone(),
                session_id: event.session_id.clone(),
                actions,
            });
            // A dispatch that could not start has already updated the entry.
            let entry = match dispatched {
                Some(_) => entry,
                None => self.activity.get(entry.id).unwrap_or(entry),
            };
            entries.push(entry);
            fired.push(&rule.id);
        }

        if fired.len() > 1 {
            debug!(
                session_id = %event.session_id,
                primary = fired[0],
                also_fired = ?&fired[1..],
                "Multiple rules fired on one event"
            );
        }

        entries
    }

    /// Export the active rule set.
    #[must_use]
    pub fn export_rules(&self) -> RuleDocument {
        let mut doc = RuleDocument::new(self.snapshot().source_rules());
        doc.exported_at = Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
        doc
    }

    /// Import a rule document, merging with or replacing the active set.
    ///
    /// Validation is identical to [`Self::load_rules`]; on error nothing
    /// changes.
    pub fn import_rules(&self, doc: RuleDocument, merge: bool) -> Result<ImportSummary> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let existing = self.snapshot().source_rules();
        let (rules, summary) = merge_rule_sets(&existing, doc.rules, merge);
        self.install(rules)?;
        info!(
            added = summary.added,
            updated = summary.updated,
            removed = summary.removed,
            total = summary.total,
            merge,
            "Rules imported"
        );
        Ok(summary)
    }
}

impl std::fmt::Debug for RuleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("RuleEngine")
            .field("generation", &snapshot.generation)
            .field("rules", &snapshot.len())
            .field("activity", &self.activity.len())
            .finish_non_exhaustive()
    }
}
