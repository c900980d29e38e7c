//! Action dispatch.
//!
//! A fired rule's actions are handed over as one [`DispatchRequest`] and run
//! in order on a single spawned task, so the evaluation pass never waits on
//! the actuator or on `delayMs`. Each action's outcome is written back into
//! the rule's activity entry when it completes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::activity::{ActionRecord, ActionStatus, ActivityLog};
use crate::actuator::ActuatorHandle;

/// Identifier of one in-flight dispatch (one fired rule).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DispatchId(pub u64);

impl std::fmt::Display for DispatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "d-{}", self.0)
    }
}

/// Resolved actions of one fired rule.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    /// Activity entry to update with outcomes
    pub entry_id: u64,
    pub rule_id: String,
    pub session_id: String,
    pub actions: Vec<ActionRecord>,
}

/// Observability view of an in-flight dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingDispatch {
    pub id: DispatchId,
    pub entry_id: u64,
    pub rule_id: String,
    pub session_id: String,
}

struct Tracked {
    info: PendingDispatch,
    handle: JoinHandle<()>,
}

type TaskMap = Arc<Mutex<HashMap<DispatchId, Tracked>>>;

/// Runs resolved actions against the actuator.
pub struct ActionDispatcher {
    actuator: ActuatorHandle,
    activity: Arc<ActivityLog>,
    next_id: AtomicU64,
    tasks: TaskMap,
    idle: Arc<Notify>,
}

impl ActionDispatcher {
    #[must_use]
    pub fn new(actuator: ActuatorHandle, activity: Arc<ActivityLog>) -> Self {
        Self {
            actuator,
            activity,
            next_id: AtomicU64::new(1),
            tasks: Arc::new(Mutex::new(HashMap::new())),
            idle: Arc::new(Notify::new()),
        }
    }

    #[must_use]
    pub fn actuator(&self) -> &ActuatorHandle {
        &self.actuator
    }

    /// Start delivering `request` in the background.
    ///
    /// Returns `None` when there is nothing to run or no tokio runtime is
    /// available; in the latter case every action is marked failed.
    pub fn dispatch(&self, request: DispatchRequest) -> Option<DispatchId> {
        if request.actions.is_empty() {
            return None;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(
                rule_id = %request.rule_id,
                session_id = %request.session_id,
                "No async runtime available; actions not dispatched"
            );
            for idx in 0..request.actions.len() {
                self.activity.update_action(
                    request.entry_id,
                    idx,
                    ActionStatus::Failed {
                        error: "no async runtime available".to_string(),
                    },
                );
            }
            return None;
        };

        let id = DispatchId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let info = PendingDispatch {
            id,
            entry_id: request.entry_id,
            rule_id: request.rule_id.clone(),
            session_id: request.session_id.clone(),
        };

        let actuator = Arc::clone(&self.actuator);
        let activity = Arc::clone(&self.activity);
        let tasks = Arc::clone(&self.tasks);
        let idle = Arc::clone(&self.idle);

        // The map stays locked until the handle is inserted, so a task that
        // finishes immediately still finds its own entry to remove.
        let mut guard = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        let handle = runtime.spawn(async move {
            run_actions(id, &actuator, &activity, &request).await;
            tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
            idle.notify_waiters();
        });
        guard.insert(id, Tracked { info, handle });
        drop(guard);

        debug!(dispatch_id = %id, "Dispatch scheduled");
        Some(id)
    }

    /// Abort a dispatch. Actions that had not run are marked cancelled.
    pub fn cancel(&self, id: DispatchId) -> bool {
        let tracked = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        let Some(tracked) = tracked else {
            return false;
        };
        tracked.handle.abort();
        self.mark_cancelled(tracked.info.entry_id);
        self.idle.notify_waiters();
        debug!(dispatch_id = %id, "Dispatch cancelled");
        true
    }

    /// Abort every dispatch targeting `session_id`. Returns how many were cancelled.
    pub fn cancel_session(&self, session_id: &str) -> usize {
        let ids: Vec<DispatchId> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|t| t.info.session_id == session_id)
            .map(|t| t.info.id)
            .collect();
        ids.into_iter().filter(|id| self.cancel(*id)).count()
    }

    /// In-flight dispatches, oldest first.
    #[must_use]
    pub fn pending(&self) -> Vec<PendingDispatch> {
        let mut pending: Vec<PendingDispatch> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|t| t.info.clone())
            .collect();
        pending.sort_by_key(|p| p.id);
        pending
    }

    /// Wait until no dispatch is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.pending().is_empty() {
                return;
            }
            notified.await;
        }
    }

    fn mark_cancelled(&self, entry_id: u64) {
        let Some(entry) = self.activity.get(entry_id) else {
            return;
        };
        for (idx, action) in entry.actions.iter().enumerate() {
            if !action.status.is_final() {
                self.activity
                    .update_action(entry_id, idx, ActionStatus::Cancelled);
            }
        }
    }
}

impl std::fmt::Debug for ActionDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionDispatcher")
            .field("pending", &self.pending().len())
            .finish_non_exhaustive()
    }
}

async fn run_actions(
    id: DispatchId,
    actuator: &ActuatorHandle,
    activity: &ActivityLog,
    request: &DispatchRequest,
) {
    for (idx, action) in request.actions.iter().enumerate() {
        if action.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(action.delay_ms)).await;
        }

        let status = match actuator
            .perform(action.action_type, &request.session_id, &action.value)
            .await
        {
            Ok(()) => {
                debug!(
                    dispatch_id = %id,
                    session_id = %request.session_id,
                    action = %action.action_type,
                    "Action delivered"
                );
                ActionStatus::Delivered
            }
            Err(err) if err.is_session_gone() => {
                debug!(
                    dispatch_id = %id,
                    session_id = %request.session_id,
                    action = %action.action_type,
                    "Session gone; action skipped"
                );
                ActionStatus::Skipped
            }
            Err(err) => ActionStatus::Failed {
                error: err.to_string(),
            },
        };
        activity.update_action(request.entry_id, idx, status);
    }
}
