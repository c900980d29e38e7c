//! Activity log: bounded audit trail of trigger and suppression decisions.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;

use crate::rate_limit::SuppressionReason;
use crate::rules::ActionType;

/// Default number of retained entries.
pub const DEFAULT_ACTIVITY_CAPACITY: usize = 1000;

/// Delivery state of one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ActionStatus {
    /// Handed to the dispatcher; delivery not yet known
    Dispatched,
    Delivered,
    Failed { error: String },
    /// Target session was gone at delivery time
    Skipped,
    /// Dispatch was cancelled before this action ran
    Cancelled,
}

impl ActionStatus {
    #[must_use]
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Dispatched)
    }
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dispatched => f.write_str("dispatched"),
            Self::Delivered => f.write_str("delivered"),
            Self::Failed { error } => write!(f, "failed: {error}"),
            Self::Skipped => f.write_str("skipped"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// A resolved action as fired by a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    pub action_type: ActionType,
    /// Payload after template resolution
    pub value: String,
    pub delay_ms: u64,
    pub status: ActionStatus,
}

/// One trigger or suppression decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    /// Assigned on append; monotonically increasing
    pub id: u64,
    /// Epoch milliseconds
    #[serde(rename = "timestamp")]
    pub timestamp_ms: i64,
    pub rule_id: String,
    pub rule_name: String,
    pub session_id: String,
    pub matched_text: String,
    #[serde(rename = "actionsFired")]
    pub actions: Vec<ActionRecord>,
    pub suppressed_reason: Option<SuppressionReason>,
}

impl ActivityEntry {
    #[must_use]
    pub fn triggered(
        rule_id: &str,
        rule_name: &str,
        session_id: &str,
        matched_text: &str,
        actions: Vec<ActionRecord>,
        timestamp_ms: i64,
    ) -> Self {
        Self {
            id: 0,
            timestamp_ms,
            rule_id: rule_id.to_string(),
            rule_name: rule_name.to_string(),
            session_id: session_id.to_string(),
            matched_text: matched_text.to_string(),
            actions,
            suppressed_reason: None,
        }
    }

    #[must_use]
    pub fn suppressed(
        rule_id: &str,
        rule_name: &str,
        session_id: &str,
        matched_text: &str,
        reason: SuppressionReason,
        timestamp_ms: i64,
    ) -> Self {
        Self {
            suppressed_reason: Some(reason),
            ..Self::triggered(rule_id, rule_name, session_id, matched_text, Vec::new(), timestamp_ms)
        }
    }

    #[must_use]
    pub fn is_trigger(&self) -> bool {
        self.suppressed_reason.is_none()
    }
}

/// Aggregate counters over the retained entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActivityStats {
    pub entries: usize,
    pub triggers: usize,
    pub suppressed: BTreeMap<String, usize>,
    pub delivered_actions: usize,
    pub failed_actions: usize,
    pub skipped_actions: usize,
}

#[derive(Debug)]
struct LogState {
    entries: VecDeque<ActivityEntry>,
    next_id: u64,
}

/// Thread-safe ring buffer of [`ActivityEntry`] values.
#[derive(Debug)]
pub struct ActivityLog {
    capacity: usize,
    state: Mutex<LogState>,
}

impl ActivityLog {
    /// Create a log keeping at most `capacity` entries (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(LogState {
                entries: VecDeque::with_capacity(capacity.min(1024)),
                next_id: 1,
            }),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append an entry, assigning its id. Evicts the oldest entry when full.
    pub fn append(&self, mut entry: ActivityEntry) -> ActivityEntry {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        entry.id = state.next_id;
        state.next_id += 1;

        match entry.suppressed_reason {
            None => tracing::info!(
                entry_id = entry.id,
                rule_id = %entry.rule_id,
                session_id = %entry.session_id,
                actions = entry.actions.len(),
                "Rule triggered"
            ),
            Some(reason) => tracing::debug!(
                entry_id = entry.id,
                rule_id = %entry.rule_id,
                session_id = %entry.session_id,
                reason = %reason,
                "Rule suppressed"
            ),
        }

        if state.entries.len() == self.capacity {
            state.entries.pop_front();
        }
        state.entries.push_back(entry.clone());
        entry
    }

    /// Record the final status of one action of an entry.
    ///
    /// Returns `false` if the entry has been evicted or the index is out of
    /// range.
    pub fn update_action(&self, entry_id: u64, action_index: usize, status: ActionStatus) -> bool {
        if let ActionStatus::Failed { error } = &status {
            tracing::warn!(entry_id, action_index, error = %error, "Action dispatch failed");
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        // Ids are contiguous, so the position is computable from the front.
        let Some(front_id) = state.entries.front().map(|e| e.id) else {
            return false;
        };
        let Some(pos) = entry_id
            .checked_sub(front_id)
            .and_then(|offset| usize::try_from(offset).ok())
        else {
            return false;
        };
        match state
            .entries
            .get_mut(pos)
            .and_then(|entry| entry.actions.get_mut(action_index))
        {
            Some(action) => {
                action.status = status;
                true
            }
            None => false,
        }
    }

    /// Look up one entry by id.
    #[must_use]
    pub fn get(&self, entry_id: u64) -> Option<ActivityEntry> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.entries.iter().find(|e| e.id == entry_id).cloned()
    }

    /// Most recent entries, newest first.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<ActivityEntry> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.entries.iter().rev().take(limit).cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all entries. Ids keep increasing.
    pub fn clear(&self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .clear();
    }

    #[must_use]
    pub fn stats(&self) -> ActivityStats {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stats = ActivityStats {
            entries: state.entries.len(),
            ..ActivityStats::default()
        };
        for entry in &state.entries {
            match entry.suppressed_reason {
                None => stats.triggers += 1,
                Some(reason) => {
                    *stats.suppressed.entry(reason.to_string()).or_default() += 1;
                }
            }
            for action in &entry.actions {
                match action.status {
                    ActionStatus::Delivered => stats.delivered_actions += 1,
                    ActionStatus::Failed { .. } => stats.failed_actions += 1,
                    ActionStatus::Skipped | ActionStatus::Cancelled => stats.skipped_actions += 1,
                    ActionStatus::Dispatched => {}
                }
            }
        }
        stats
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new(DEFAULT_ACTIVITY_CAPACITY)
    }
}
