//! Watch runtime: polls sessions and feeds their output to the engine.
//!
//! ```text
//! SessionSource ──► supervisor (discovery + rules reload)
//!                      │
//!                      └──► one poll task per session ──► RuleEngine::process_output
//! ```
//!
//! A session task re-evaluates when its trailing match window, its
//! lifecycle phase or the rule generation changed, and keeps evaluating
//! every tick while the last pass was rate limited.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::engine::{OutputEvent, RuleEngine};
use crate::error::{ActuatorError, Result};
use crate::presets::with_presets;
use crate::rate_limit::SuppressionReason;
use crate::rules::{Rule, RuleDocument};

/// Boxed future for session source operations.
pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Shared handle to a session source.
pub type SessionSourceHandle = Arc<dyn SessionSource>;

/// One capture of a session's visible output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionCapture {
    pub text: String,
    /// Lifecycle phase of the session
    pub state: String,
    pub agent: Option<String>,
}

/// Where session output comes from.
pub trait SessionSource: Send + Sync {
    /// Ids of the sessions currently alive.
    fn list_sessions(&self) -> SourceFuture<'_, Vec<String>>;
    /// Capture the last `lines` lines of a session.
    fn capture(&self, session_id: &str, lines: usize) -> SourceFuture<'_, SessionCapture>;
}

/// Settings for [`WatchRuntime`].
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub poll_interval: Duration,
    pub capture_lines: usize,
    pub match_window_lines: usize,
    pub session_filter: Option<String>,
    /// Rules file to hot reload (None disables reload)
    pub rules_path: Option<PathBuf>,
    pub include_presets: bool,
    pub reload_interval: Option<Duration>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            capture_lines: 200,
            match_window_lines: 40,
            session_filter: None,
            rules_path: None,
            include_presets: true,
            reload_interval: Some(Duration::from_secs(5)),
        }
    }
}

impl RuntimeConfig {
    #[must_use]
    pub fn from_config(config: &Config, rules_path: Option<PathBuf>) -> Self {
        let reload_interval = (config.watch.reload_interval_secs > 0)
            .then(|| Duration::from_secs(config.watch.reload_interval_secs));
        Self {
            poll_interval: Duration::from_millis(config.watch.poll_interval_ms),
            capture_lines: config.watch.capture_lines,
            match_window_lines: config.watch.match_window_lines,
            session_filter: config.watch.session_filter.clone(),
            rules_path,
            include_presets: config.rules.include_presets,
            reload_interval,
        }
    }

    fn watches(&self, session_id: &str) -> bool {
        self.session_filter
            .as_deref()
            .is_none_or(|filter| session_id.contains(filter))
    }
}

/// Load the active rule set: the rules file (if any), merged over the
/// presets when `include_presets` is set.
pub fn load_rule_set(path: Option<&Path>, include_presets: bool) -> Result<Vec<Rule>> {
    let user_rules = match path {
        Some(path) => RuleDocument::load(path)?.rules,
        None => Vec::new(),
    };
    Ok(if include_presets {
        with_presets(user_rules)
    } else {
        user_rules
    })
}

/// Last `lines` lines of `text`, with trailing blank space removed.
#[must_use]
pub fn tail_lines(text: &str, lines: usize) -> String {
    let trimmed = text.trim_end();
    if lines == 0 || trimmed.is_empty() {
        return String::new();
    }
    let all: Vec<&str> = trimmed.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

/// Wall-clock epoch milliseconds advanced by the tokio clock, so rate
/// limits follow paused time in tests.
#[derive(Debug, Clone, Copy)]
struct RuntimeClock {
    base_ms: i64,
    start: Instant,
}

impl RuntimeClock {
    fn start() -> Self {
        Self {
            base_ms: Utc::now().timestamp_millis(),
            start: Instant::now(),
        }
    }

    fn now_ms(self) -> i64 {
        let elapsed = i64::try_from(self.start.elapsed().as_millis()).unwrap_or(i64::MAX);
        self.base_ms.saturating_add(elapsed)
    }
}

fn file_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Hot reload state for the rules file.
struct RulesReloader {
    path: PathBuf,
    include_presets: bool,
    last_modified: Option<SystemTime>,
}

impl RulesReloader {
    fn new(path: PathBuf, include_presets: bool) -> Self {
        let last_modified = file_mtime(&path);
        Self {
            path,
            include_presets,
            last_modified,
        }
    }

    /// Reload if the file changed. An invalid file leaves the engine as is.
    fn check(&mut self, engine: &RuleEngine) -> bool {
        let modified = file_mtime(&self.path);
        if modified == self.last_modified {
            return false;
        }
        self.last_modified = modified;
        if modified.is_none() {
            warn!(path = %self.path.display(), "Rules file disappeared; keeping current rules");
            return false;
        }

        match load_rule_set(Some(&self.path), self.include_presets)
            .and_then(|rules| engine.load_rules(rules))
        {
            Ok(()) => {
                info!(path = %self.path.display(), "Rules reloaded");
                true
            }
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "Rules reload failed; keeping current rules"
                );
                false
            }
        }
    }
}

/// Polls every session of a [`SessionSource`] and evaluates its output.
pub struct WatchRuntime {
    config: RuntimeConfig,
    engine: Arc<RuleEngine>,
    source: SessionSourceHandle,
}

impl WatchRuntime {
    #[must_use]
    pub fn new(config: RuntimeConfig, engine: Arc<RuleEngine>, source: SessionSourceHandle) -> Self {
        Self {
            config,
            engine,
            source,
        }
    }

    /// Spawn the supervisor task. Must be called inside a tokio runtime.
    #[must_use]
    pub fn start(self) -> RuntimeHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(supervise(self, shutdown_rx));
        RuntimeHandle { shutdown_tx, task }
    }
}

/// Handle to a running [`WatchRuntime`].
pub struct RuntimeHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RuntimeHandle {
    /// Stop polling and wait for the supervisor to exit.
    ///
    /// Dispatches already in flight are left to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(err) = self.task.await {
            warn!(error = %err, "Watch supervisor ended abnormally");
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

async fn supervise(runtime: WatchRuntime, mut shutdown_rx: watch::Receiver<bool>) {
    let WatchRuntime {
        config,
        engine,
        source,
    } = runtime;

    let mut reloader = config
        .rules_path
        .clone()
        .filter(|_| config.reload_interval.is_some())
        .map(|path| RulesReloader::new(path, config.include_presets));
    let mut reload_tick = config.reload_interval.map(|period| {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    let mut discovery = tokio::time::interval(config.poll_interval);
    discovery.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sessions: HashMap<String, JoinHandle<()>> = HashMap::new();
    let clock = RuntimeClock::start();

    info!(
        poll_ms = u64::try_from(config.poll_interval.as_millis()).unwrap_or(u64::MAX),
        "Watch runtime started"
    );

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            _ = discovery.tick() => {
                discover(&config, clock, &engine, &source, &shutdown_rx, &mut sessions).await;
            }
            () = async {
                match reload_tick.as_mut() {
                    Some(interval) => { interval.tick().await; }
                    None => std::future::pending::<()>().await,
                }
            } => {
                if let Some(reloader) = reloader.as_mut() {
                    reloader.check(&engine);
                }
            }
        }
    }

    for (_, handle) in sessions.drain() {
        handle.abort();
    }
    info!("Watch runtime stopped");
}

async fn discover(
    config: &RuntimeConfig,
    clock: RuntimeClock,
    engine: &Arc<RuleEngine>,
    source: &SessionSourceHandle,
    shutdown_rx: &watch::Receiver<bool>,
    sessions: &mut HashMap<String, JoinHandle<()>>,
) {
    let live = match source.list_sessions().await {
        Ok(ids) => ids,
        Err(err) => {
            warn!(error = %err, "Session discovery failed");
            return;
        }
    };

    sessions.retain(|id, handle| {
        let keep = live.contains(id) && !handle.is_finished();
        if !keep {
            debug!(session_id = %id, "Stopped watching session");
            handle.abort();
        }
        keep
    });

    for id in live.into_iter().filter(|id| config.watches(id)) {
        if sessions.contains_key(&id) {
            continue;
        }
        debug!(session_id = %id, "Watching session");
        let handle = tokio::spawn(watch_session(
            id.clone(),
            config.clone(),
            clock,
            Arc::clone(engine),
            Arc::clone(source),
            shutdown_rx.clone(),
        ));
        sessions.insert(id, handle);
    }
}

async fn watch_session(
    session_id: String,
    config: RuntimeConfig,
    clock: RuntimeClock,
    engine: Arc<RuleEngine>,
    source: SessionSourceHandle,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // (window, state, rule generation) of the last pass. An unchanged key is
    // skipped unless that pass was rate limited.
    let mut last_key: Option<(String, String, u64)> = None;

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            _ = ticker.tick() => {}
        }

        let capture = match source.capture(&session_id, config.capture_lines).await {
            Ok(capture) => capture,
            Err(err) if err.is_session_gone() => {
                debug!(session_id = %session_id, "Session gone");
                break;
            }
            Err(err) => {
                warn!(session_id = %session_id, error = %err, "Capture failed");
                continue;
            }
        };

        let key = (
            tail_lines(&capture.text, config.match_window_lines),
            capture.state,
            engine.snapshot().generation,
        );
        if last_key.as_ref() == Some(&key) {
            continue;
        }

        let event = OutputEvent {
            session_id: session_id.clone(),
            text: key.0.clone(),
            session_state: key.1.clone(),
            agent: capture.agent,
            now_ms: clock.now_ms(),
        };
        let rate_limited = engine
            .process_output(&event)
            .iter()
            .any(|e| e.suppressed_reason.is_some_and(SuppressionReason::is_rate_limit));
        last_key = (!rate_limited).then_some(key);
    }
}

// ---------------------------------------------------------------------------
// MockSessionSource: scripted sessions for tests and demos
// ---------------------------------------------------------------------------

/// In-memory session source.
#[derive(Debug, Default)]
pub struct MockSessionSource {
    sessions: tokio::sync::RwLock<HashMap<String, SessionCapture>>,
}

impl MockSessionSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a session.
    pub async fn set_session(&self, session_id: &str, capture: SessionCapture) {
        self.sessions
            .write()
            .await
            .insert(session_id.to_string(), capture);
    }

    /// Append output to an existing session.
    pub async fn append_output(&self, session_id: &str, text: &str) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| ActuatorError::SessionNotFound(session_id.to_string()))?;
        session.text.push_str(text);
        Ok(())
    }

    pub async fn remove_session(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
    }
}

impl SessionSource for MockSessionSource {
    fn list_sessions(&self) -> SourceFuture<'_, Vec<String>> {
        Box::pin(async move {
            let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
            ids.sort();
            Ok(ids)
        })
    }

    fn capture(&self, session_id: &str, lines: usize) -> SourceFuture<'_, SessionCapture> {
        let session_id = session_id.to_string();
        Box::pin(async move {
            let sessions = self.sessions.read().await;
            let session = sessions
                .get(&session_id)
                .ok_or(ActuatorError::SessionNotFound(session_id.clone()))?;
            Ok(SessionCapture {
                text: tail_lines(&session.text, lines),
                ..session.clone()
            })
        })
    }
}
