//! Actuator abstraction: the side-effect boundary of the engine.
//!
//! The engine never talks to a terminal multiplexer directly. Every action
//! is routed through an [`Actuator`], so the tmux client can be swapped for
//! [`MockActuator`] in tests, dry runs and the `reflex test` command.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;

use crate::error::ActuatorError;
use crate::rules::ActionType;

/// Boxed future for actuator operations.
pub type ActuatorFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ActuatorError>> + Send + 'a>>;

/// Shared handle to an actuator implementation.
pub type ActuatorHandle = Arc<dyn Actuator>;

/// Capabilities the engine needs from the outside world.
pub trait Actuator: Send + Sync {
    /// Type text into the session and confirm it (text, then Enter).
    fn send_text(&self, session_id: &str, text: &str) -> ActuatorFuture<'_>;
    /// Send one raw key token (`C-c`, `Escape`, `Enter`, ...).
    fn send_keys(&self, session_id: &str, keys: &str) -> ActuatorFuture<'_>;
    /// Run a session-manager command targeting the session.
    fn run_session_command(&self, session_id: &str, command: &str) -> ActuatorFuture<'_>;
    /// Forward a `<kind> <json>` signal payload.
    fn emit_signal(&self, session_id: &str, payload: &str) -> ActuatorFuture<'_>;
    /// Raise a notification. No effect on any session.
    fn notify(&self, message: &str) -> ActuatorFuture<'_>;

    /// Route a resolved action to the matching capability.
    fn perform(&self, kind: ActionType, session_id: &str, value: &str) -> ActuatorFuture<'_> {
        match kind {
            ActionType::SendText => self.send_text(session_id, value),
            ActionType::SendKeys => self.send_keys(session_id, value),
            ActionType::TmuxCommand => self.run_session_command(session_id, value),
            ActionType::Signal => self.emit_signal(session_id, value),
            ActionType::NotifyOnly => self.notify(value),
        }
    }
}

impl Actuator for Arc<dyn Actuator> {
    fn send_text(&self, session_id: &str, text: &str) -> ActuatorFuture<'_> {
        self.as_ref().send_text(session_id, text)
    }

    fn send_keys(&self, session_id: &str, keys: &str) -> ActuatorFuture<'_> {
        self.as_ref().send_keys(session_id, keys)
    }

    fn run_session_command(&self, session_id: &str, command: &str) -> ActuatorFuture<'_> {
        self.as_ref().run_session_command(session_id, command)
    }

    fn emit_signal(&self, session_id: &str, payload: &str) -> ActuatorFuture<'_> {
        self.as_ref().emit_signal(session_id, payload)
    }

    fn notify(&self, message: &str) -> ActuatorFuture<'_> {
        self.as_ref().notify(message)
    }
}

// ---------------------------------------------------------------------------
// MockActuator: records calls instead of performing them
// ---------------------------------------------------------------------------

/// One recorded actuator call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum ActuatorCall {
    SendText { session_id: String, text: String },
    SendKeys { session_id: String, keys: String },
    RunSessionCommand { session_id: String, command: String },
    EmitSignal { session_id: String, payload: String },
    Notify { message: String },
}

impl ActuatorCall {
    /// Target session, if the call has one.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::SendText { session_id, .. }
            | Self::SendKeys { session_id, .. }
            | Self::RunSessionCommand { session_id, .. }
            | Self::EmitSignal { session_id, .. } => Some(session_id),
            Self::Notify { .. } => None,
        }
    }

    fn kind(&self) -> ActionType {
        match self {
            Self::SendText { .. } => ActionType::SendText,
            Self::SendKeys { .. } => ActionType::SendKeys,
            Self::RunSessionCommand { .. } => ActionType::TmuxCommand,
            Self::EmitSignal { .. } => ActionType::Signal,
            Self::Notify { .. } => ActionType::NotifyOnly,
        }
    }
}

impl std::fmt::Display for ActuatorCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SendText { session_id, text } => write!(f, "send_text({session_id}, {text:?})"),
            Self::SendKeys { session_id, keys } => write!(f, "send_keys({session_id}, {keys:?})"),
            Self::RunSessionCommand {
                session_id,
                command,
            } => write!(f, "run_session_command({session_id}, {command:?})"),
            Self::EmitSignal {
                session_id,
                payload,
            } => write!(f, "emit_signal({session_id}, {payload:?})"),
            Self::Notify { message } => write!(f, "notify({message:?})"),
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<ActuatorCall>,
    gone_sessions: HashSet<String>,
    failures: HashMap<ActionType, ActuatorError>,
}

/// In-memory actuator for tests and dry runs.
///
/// Every call is recorded. Sessions can be marked gone (calls then fail
/// with [`ActuatorError::SessionNotFound`] and are not recorded) and
/// failures can be injected per action type.
#[derive(Debug, Default)]
pub struct MockActuator {
    state: tokio::sync::RwLock<MockState>,
}

impl MockActuator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls recorded so far, in order.
    pub async fn calls(&self) -> Vec<ActuatorCall> {
        self.state.read().await.calls.clone()
    }

    /// Number of recorded calls.
    pub async fn call_count(&self) -> usize {
        self.state.read().await.calls.len()
    }

    pub async fn clear_calls(&self) {
        self.state.write().await.calls.clear();
    }

    /// Make every later call targeting `session_id` fail as "not found".
    pub async fn remove_session(&self, session_id: &str) {
        self.state
            .write()
            .await
            .gone_sessions
            .insert(session_id.to_string());
    }

    /// Make every later call of `kind` fail with `error`.
    pub async fn fail_with(&self, kind: ActionType, error: ActuatorError) {
        self.state.write().await.failures.insert(kind, error);
    }

    fn record(&self, call: ActuatorCall) -> ActuatorFuture<'_> {
        Box::pin(async move {
            let mut state = self.state.write().await;
            if let Some(session_id) = call.session_id() {
                if state.gone_sessions.contains(session_id) {
                    return Err(ActuatorError::SessionNotFound(session_id.to_string()));
                }
            }
            if let Some(error) = state.failures.get(&call.kind()) {
                return Err(error.clone());
            }
            tracing::info!(call = %call, "Recorded actuator call");
            state.calls.push(call);
            Ok(())
        })
    }
}

impl Actuator for MockActuator {
    fn send_text(&self, session_id: &str, text: &str) -> ActuatorFuture<'_> {
        self.record(ActuatorCall::SendText {
            session_id: session_id.to_string(),
            text: text.to_string(),
        })
    }

    fn send_keys(&self, session_id: &str, keys: &str) -> ActuatorFuture<'_> {
        self.record(ActuatorCall::SendKeys {
            session_id: session_id.to_string(),
            keys: keys.to_string(),
        })
    }

    fn run_session_command(&self, session_id: &str, command: &str) -> ActuatorFuture<'_> {
        self.record(ActuatorCall::RunSessionCommand {
            session_id: session_id.to_string(),
            command: command.to_string(),
        })
    }

    fn emit_signal(&self, session_id: &str, payload: &str) -> ActuatorFuture<'_> {
        self.record(ActuatorCall::EmitSignal {
            session_id: session_id.to_string(),
            payload: payload.to_string(),
        })
    }

    fn notify(&self, message: &str) -> ActuatorFuture<'_> {
        self.record(ActuatorCall::Notify {
            message: message.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_records_calls_in_order() {
        let mock = MockActuator::new();
        mock.send_text("s1", "y").await.unwrap();
        mock.notify("done").await.unwrap();

        let calls = mock.calls().await;
        assert_eq!(
            calls,
            vec![
                ActuatorCall::SendText {
                    session_id: "s1".into(),
                    text: "y".into()
                },
                ActuatorCall::Notify {
                    message: "done".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn perform_routes_by_action_type() {
        let mock = MockActuator::new();
        mock.perform(ActionType::SendKeys, "s1", "C-c").await.unwrap();
        mock.perform(ActionType::TmuxCommand, "s1", "clear-history")
            .await
            .unwrap();
        mock.perform(ActionType::Signal, "s1", "working {}").await.unwrap();

        let calls = mock.calls().await;
        assert!(matches!(calls[0], ActuatorCall::SendKeys { ref keys, .. } if keys == "C-c"));
        assert!(matches!(calls[1], ActuatorCall::RunSessionCommand { .. }));
        assert!(matches!(calls[2], ActuatorCall::EmitSignal { ref payload, .. } if payload == "working {}"));
    }

    #[tokio::test]
    async fn removed_session_reports_not_found() {
        let mock = MockActuator::new();
        mock.remove_session("gone").await;

        let err = mock.send_text("gone", "y").await.unwrap_err();
        assert!(err.is_session_gone());
        // Notifications have no session and still succeed.
        mock.notify("hello").await.unwrap();
        assert_eq!(mock.call_count().await, 1);
    }

    #[tokio::test]
    async fn injected_failure_applies_to_one_kind() {
        let mock = MockActuator::new();
        mock.fail_with(ActionType::SendKeys, ActuatorError::Timeout(50))
            .await;

        assert_eq!(
            mock.send_keys("s1", "Enter").await,
            Err(ActuatorError::Timeout(50))
        );
        assert!(mock.send_text("s1", "ok").await.is_ok());
    }

    #[tokio::test]
    async fn shared_handle_delegates() {
        let handle: ActuatorHandle = Arc::new(MockActuator::new());
        handle.send_text("s1", "hi").await.unwrap();
    }
}
