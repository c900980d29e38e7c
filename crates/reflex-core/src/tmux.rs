//! tmux client: the production [`Actuator`] and [`SessionSource`].
//!
//! Every call shells out to the tmux binary with a timeout. tmux reports a
//! missing target on stderr ("can't find session: x"), which is mapped to
//! [`ActuatorError::SessionNotFound`] so the dispatcher can mark the action
//! skipped instead of failed.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::info;

use crate::actuator::{Actuator, ActuatorFuture};
use crate::config::TmuxConfig;
use crate::error::ActuatorError;
use crate::runtime::{SessionCapture, SessionSource, SourceFuture};

/// Lifecycle phase reported for a live pane.
pub const STATE_RUNNING: &str = "running";
/// Lifecycle phase reported for a pane whose process exited.
pub const STATE_EXITED: &str = "exited";

/// Thin async wrapper over the tmux CLI.
#[derive(Debug, Clone, Default)]
pub struct TmuxClient {
    config: TmuxConfig,
}

impl TmuxClient {
    #[must_use]
    pub fn new(config: TmuxConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &TmuxConfig {
        &self.config
    }

    /// Run tmux with `args` and return stdout.
    async fn tmux(&self, args: &[&str]) -> Result<String, ActuatorError> {
        run_command(&self.config.binary, args, self.config.command_timeout_ms)
            .await
            .map_err(classify_tmux_error)
    }

    /// Ids of all sessions on the default server.
    pub async fn list_sessions(&self) -> Result<Vec<String>, ActuatorError> {
        match self.tmux(&["list-sessions", "-F", "#{session_name}"]).await {
            Ok(stdout) => Ok(stdout
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect()),
            // No server simply means no sessions.
            Err(ActuatorError::CommandFailed { stderr, .. }) if is_no_server(&stderr) => {
                Ok(Vec::new())
            }
            Err(err) => Err(err),
        }
    }

    /// Capture the last `lines` lines of the session's active pane.
    pub async fn capture(&self, session_id: &str, lines: usize) -> Result<SessionCapture, ActuatorError> {
        let start = format!("-{lines}");
        let text = self
            .tmux(&["capture-pane", "-p", "-J", "-t", session_id, "-S", &start])
            .await?;
        let meta = self
            .tmux(&[
                "display-message",
                "-p",
                "-t",
                session_id,
                "#{pane_dead}\t#{pane_current_command}",
            ])
            .await?;
        let (state, agent) = parse_pane_meta(&meta);
        Ok(SessionCapture { text, state, agent })
    }

    pub async fn send_text(&self, session_id: &str, text: &str) -> Result<(), ActuatorError> {
        self.tmux(&["send-keys", "-t", session_id, "-l", text]).await?;
        self.tmux(&["send-keys", "-t", session_id, "Enter"]).await?;
        Ok(())
    }

    pub async fn send_keys(&self, session_id: &str, keys: &str) -> Result<(), ActuatorError> {
        self.tmux(&["send-keys", "-t", session_id, keys]).await?;
        Ok(())
    }

    /// Run an arbitrary tmux command, targeting the session unless the
    /// command names its own `-t`.
    pub async fn run_session_command(&self, session_id: &str, command: &str) -> Result<(), ActuatorError> {
        let args = session_command_args(session_id, command)?;
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.tmux(&args).await?;
        Ok(())
    }

    /// Forward `<kind> <json>` to the configured signal command.
    pub async fn emit_signal(&self, session_id: &str, payload: &str) -> Result<(), ActuatorError> {
        let (kind, body) = payload
            .trim()
            .split_once(char::is_whitespace)
            .map_or((payload.trim(), ""), |(kind, body)| (kind, body.trim()));

        let Some(command) = self.config.signal_command.as_deref() else {
            info!(session_id, kind, payload = body, "Signal (no signal_command configured)");
            return Ok(());
        };
        run_external(command, &[session_id, kind, body], self.config.command_timeout_ms).await
    }

    pub async fn notify(&self, message: &str) -> Result<(), ActuatorError> {
        let Some(command) = self.config.notify_command.as_deref() else {
            info!(message, "Notification");
            return Ok(());
        };
        run_external(command, &[message], self.config.command_timeout_ms).await
    }
}

/// Run `program args...` with a timeout and return stdout.
///
/// A non-zero exit maps to [`ActuatorError::CommandFailed`].
async fn run_command(program: &str, args: &[&str], timeout_ms: u64) -> Result<String, ActuatorError> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match timeout(Duration::from_millis(timeout_ms), cmd.output()).await {
        Ok(result) => result.map_err(|e| ActuatorError::Spawn(format!("{program}: {e}")))?,
        Err(_) => return Err(ActuatorError::Timeout(timeout_ms)),
    };

    if !output.status.success() {
        return Err(ActuatorError::CommandFailed {
            command: format!("{program} {}", args.join(" ")),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Run a user-configured command line (program plus fixed args) with extra args.
async fn run_external(command: &str, extra: &[&str], timeout_ms: u64) -> Result<(), ActuatorError> {
    let mut parts = command.split_whitespace();
    let Some(program) = parts.next() else {
        return Err(ActuatorError::Unavailable("empty command".to_string()));
    };
    let args: Vec<&str> = parts.chain(extra.iter().copied()).collect();
    run_command(program, &args, timeout_ms).await?;
    Ok(())
}

fn classify_tmux_error(err: ActuatorError) -> ActuatorError {
    match err {
        ActuatorError::CommandFailed { ref stderr, .. } if is_missing_target(stderr) => {
            ActuatorError::SessionNotFound(stderr.clone())
        }
        other => other,
    }
}

fn is_missing_target(stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    stderr.contains("can't find session")
        || stderr.contains("can't find pane")
        || stderr.contains("can't find window")
        || stderr.contains("session not found")
}

fn is_no_server(stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    stderr.contains("no server running") || stderr.contains("error connecting to")
}

/// Split a tmux command line and insert `-t <session>` after the command
/// name when no target is given.
fn session_command_args(session_id: &str, command: &str) -> Result<Vec<String>, ActuatorError> {
    let mut args: Vec<String> = command.split_whitespace().map(str::to_string).collect();
    if args.is_empty() {
        return Err(ActuatorError::Unavailable("empty tmux command".to_string()));
    }
    if !args.iter().any(|a| a == "-t") {
        args.insert(1, "-t".to_string());
        args.insert(2, session_id.to_string());
    }
    Ok(args)
}

/// Parse `#{pane_dead}\t#{pane_current_command}`.
fn parse_pane_meta(meta: &str) -> (String, Option<String>) {
    let line = meta.lines().next().unwrap_or_default();
    let (dead, command) = line.split_once('\t').unwrap_or((line, ""));
    let state = if dead.trim() == "1" {
        STATE_EXITED
    } else {
        STATE_RUNNING
    };
    let command = command.trim();
    let agent = (!command.is_empty()).then(|| command.to_string());
    (state.to_string(), agent)
}

impl Actuator for TmuxClient {
    fn send_text(&self, session_id: &str, text: &str) -> ActuatorFuture<'_> {
        let (session_id, text) = (session_id.to_string(), text.to_string());
        Box::pin(async move { Self::send_text(self, &session_id, &text).await })
    }

    fn send_keys(&self, session_id: &str, keys: &str) -> ActuatorFuture<'_> {
        let (session_id, keys) = (session_id.to_string(), keys.to_string());
        Box::pin(async move { Self::send_keys(self, &session_id, &keys).await })
    }

    fn run_session_command(&self, session_id: &str, command: &str) -> ActuatorFuture<'_> {
        let (session_id, command) = (session_id.to_string(), command.to_string());
        Box::pin(async move { Self::run_session_command(self, &session_id, &command).await })
    }

    fn emit_signal(&self, session_id: &str, payload: &str) -> ActuatorFuture<'_> {
        let (session_id, payload) = (session_id.to_string(), payload.to_string());
        Box::pin(async move { Self::emit_signal(self, &session_id, &payload).await })
    }

    fn notify(&self, message: &str) -> ActuatorFuture<'_> {
        let message = message.to_string();
        Box::pin(async move { Self::notify(self, &message).await })
    }
}

impl SessionSource for TmuxClient {
    fn list_sessions(&self) -> SourceFuture<'_, Vec<String>> {
        Box::pin(async move { Ok(Self::list_sessions(self).await?) })
    }

    fn capture(&self, session_id: &str, lines: usize) -> SourceFuture<'_, SessionCapture> {
        let session_id = session_id.to_string();
        Box::pin(async move { Ok(Self::capture(self, &session_id, lines).await?) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_target_maps_to_session_not_found() {
        let err = classify_tmux_error(ActuatorError::CommandFailed {
            command: "tmux send-keys".into(),
            stderr: "can't find session: agent-3".into(),
        });
        assert!(err.is_session_gone());

        let other = classify_tmux_error(ActuatorError::CommandFailed {
            command: "tmux send-keys".into(),
            stderr: "unknown key: Foo".into(),
        });
        assert!(!other.is_session_gone());
    }

    #[test]
    fn session_command_gets_target_inserted() {
        assert_eq!(
            session_command_args("s1", "clear-history").unwrap(),
            vec!["clear-history", "-t", "s1"]
        );
        assert_eq!(
            session_command_args("s1", "send-keys C-c").unwrap(),
            vec!["send-keys", "-t", "s1", "C-c"]
        );
        assert_eq!(
            session_command_args("s1", "kill-session -t other").unwrap(),
            vec!["kill-session", "-t", "other"]
        );
        assert!(session_command_args("s1", "   ").is_err());
    }

    #[test]
    fn pane_meta_parsing() {
        assert_eq!(
            parse_pane_meta("0\tclaude\n"),
            ("running".to_string(), Some("claude".to_string()))
        );
        assert_eq!(parse_pane_meta("1\t"), ("exited".to_string(), None));
        assert_eq!(parse_pane_meta(""), ("running".to_string(), None));
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let client = TmuxClient::new(TmuxConfig {
            binary: "/nonexistent/reflex-tmux".to_string(),
            ..TmuxConfig::default()
        });
        let err = client.send_keys("s1", "Enter").await.unwrap_err();
        assert!(matches!(err, ActuatorError::Spawn(_)));
    }

    #[tokio::test]
    async fn signal_and_notify_without_commands_only_log() {
        let client = TmuxClient::default();
        client
            .emit_signal("s1", r#"working {"taskId":"t1"}"#)
            .await
            .unwrap();
        client.notify("hello").await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_external_command_reports_command_failed() {
        let client = TmuxClient::new(TmuxConfig {
            notify_command: Some("false".to_string()),
            ..TmuxConfig::default()
        });
        let err = client.notify("hello").await.unwrap_err();
        assert!(matches!(err, ActuatorError::CommandFailed { .. }));
    }
}
