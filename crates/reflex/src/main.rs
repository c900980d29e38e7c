//! reflex CLI
//!
//! Pattern-triggered automation for interactive agent sessions running in tmux.

#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use reflex_core::activity::ActivityEntry;
use reflex_core::actuator::{ActuatorCall, ActuatorHandle, MockActuator};
use reflex_core::config::{Config, ConfigOverrides, resolve_config_path};
use reflex_core::engine::{OutputEvent, RuleEngine};
use reflex_core::logging::{LogConfig, LogError, init_logging};
use reflex_core::presets::{builtin_rules, is_preset_id};
use reflex_core::rules::{DocumentFormat, Rule, RuleDocument, compile_rules, merge_rule_sets};
use reflex_core::runtime::{RuntimeConfig, WatchRuntime, load_rule_set};
use reflex_core::tmux::{STATE_RUNNING, TmuxClient};
use serde::Serialize;

/// How long `watch` lets in-flight actions finish after shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// reflex - react to agent session output
#[derive(Parser)]
#[command(name = "reflex")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true, env = "REFLEX_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch tmux sessions and run matching rules
    Watch {
        /// Record actions instead of sending them to tmux
        #[arg(long)]
        dry_run: bool,

        /// Discovery poll interval in milliseconds
        #[arg(long)]
        poll_interval: Option<u64>,

        /// Rules file (overrides rules.path)
        #[arg(long)]
        rules: Option<String>,
    },

    /// Validate a rule document and summarize its rules
    Check {
        /// Rule document; defaults to rules.path from the config
        file: Option<PathBuf>,
    },

    /// Run one evaluation pass against sample text
    ///
    /// Uses a recording actuator; action delays are skipped.
    Test {
        /// Session output to evaluate
        #[arg(long)]
        text: String,

        /// Session lifecycle phase
        #[arg(long, default_value = STATE_RUNNING)]
        state: String,

        /// Session id used for templates and rate limiting
        #[arg(long, default_value = "test")]
        session: String,

        /// Agent name used for templates
        #[arg(long)]
        agent: Option<String>,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Manage the rules file
    Rules {
        #[command(subcommand)]
        command: RulesCommands,
    },

    /// Print the built-in rule document
    Presets {
        /// Output format (json, yaml, toml)
        #[arg(long, default_value = "json")]
        format: String,
    },
}

#[derive(Subcommand)]
enum RulesCommands {
    /// List the active rule set in evaluation order
    List,

    /// Export the active rule set
    Export {
        /// Output file; format follows its extension. Defaults to JSON on stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Import a rule document into the rules file
    Import {
        /// Document to import
        file: PathBuf,

        /// Keep rules not present in the imported document
        #[arg(long)]
        merge: bool,

        /// Target rules file; defaults to rules.path from the config
        #[arg(long)]
        into: Option<PathBuf>,
    },
}

fn init_logging_from_config(config: &Config) -> anyhow::Result<()> {
    let log_config = LogConfig {
        level: config.general.log_level.clone(),
        format: config.general.log_format,
        file: config.general.log_file.as_ref().map(PathBuf::from),
    };

    match init_logging(&log_config) {
        Ok(()) | Err(LogError::AlreadyInitialized) => {}
        Err(err) => return Err(err.into()),
    }
    Ok(())
}

/// Directory relative rule paths resolve against.
fn config_base_dir(config_path: Option<&Path>) -> Option<PathBuf> {
    resolve_config_path(config_path)
        .filter(|path| path.is_file())
        .and_then(|path| path.parent().map(Path::to_path_buf))
}

fn parse_format(format: &str) -> anyhow::Result<DocumentFormat> {
    match format.to_ascii_lowercase().as_str() {
        "json" => Ok(DocumentFormat::Json),
        "yaml" | "yml" => Ok(DocumentFormat::Yaml),
        "toml" => Ok(DocumentFormat::Toml),
        other => anyhow::bail!("unknown format '{other}' (expected json, yaml or toml)"),
    }
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let Cli {
        verbose,
        config,
        command,
    } = Cli::parse();

    let mut overrides = ConfigOverrides::default();
    if verbose {
        overrides.log_level = Some("debug".to_string());
    }
    if let Commands::Watch {
        poll_interval,
        rules,
        ..
    } = &command
    {
        overrides.poll_interval_ms = *poll_interval;
        overrides.rules_path.clone_from(rules);
    }

    let config_path = config.as_deref().map(Path::new);
    let config = Config::load_with_overrides(config_path, config_path.is_some(), &overrides)?;
    init_logging_from_config(&config)?;

    let base_dir = config_base_dir(config_path);
    let rules_path = config.rules_path(base_dir.as_deref());

    match command {
        Commands::Watch { dry_run, .. } => run_watch(&config, rules_path, dry_run).await,
        Commands::Check { file } => {
            let file = file.or(rules_path).context("no rule document given and rules.path is not set")?;
            run_check(&file)
        }
        Commands::Test {
            text,
            state,
            session,
            agent,
            json,
        } => {
            let event = OutputEvent::new(session, text, state, chrono::Utc::now().timestamp_millis());
            let event = match agent {
                Some(agent) => event.with_agent(agent),
                None => event,
            };
            run_test(&config, rules_path.as_deref(), &event, json).await
        }
        Commands::Rules { command } => match command {
            RulesCommands::List => {
                let rules = active_rules(&config, rules_path.as_deref())?;
                print_rule_table(&rules);
                Ok(())
            }
            RulesCommands::Export { out } => {
                let rules = active_rules(&config, rules_path.as_deref())?;
                run_export(rules, out.as_deref())
            }
            RulesCommands::Import { file, merge, into } => {
                let target = into
                    .or(rules_path)
                    .context("no target given (--into) and rules.path is not set")?;
                run_import(&file, &target, merge)
            }
        },
        Commands::Presets { format } => {
            let doc = RuleDocument::new(builtin_rules());
            println!("{}", doc.render(parse_format(&format)?)?);
            Ok(())
        }
    }
}

/// Rules file merged over the presets (when enabled), compiled and ordered.
fn active_rules(config: &Config, rules_path: Option<&Path>) -> anyhow::Result<Vec<Rule>> {
    let rules = load_rule_set(rules_path, config.rules.include_presets)?;
    let compiled = compile_rules(rules)?;
    Ok(compiled.into_iter().map(|c| c.rule).collect())
}

async fn run_watch(config: &Config, rules_path: Option<PathBuf>, dry_run: bool) -> anyhow::Result<()> {
    let tmux = Arc::new(TmuxClient::new(config.tmux.clone()));
    let recorder = Arc::new(MockActuator::new());
    let actuator: ActuatorHandle = if dry_run {
        tracing::warn!("Dry run: actions are recorded, not sent");
        recorder.clone()
    } else {
        tmux.clone()
    };

    let engine = Arc::new(RuleEngine::new(actuator, config.engine.to_engine_config()));
    engine.load_rules(load_rule_set(rules_path.as_deref(), config.rules.include_presets)?)?;

    let runtime_config = RuntimeConfig::from_config(config, rules_path);
    tracing::info!(
        rules = engine.snapshot().len(),
        rules_path = ?runtime_config.rules_path,
        dry_run,
        "Starting watcher"
    );
    let handle = WatchRuntime::new(runtime_config, Arc::clone(&engine), tmux).start();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = sigint.recv() => tracing::info!("Received SIGINT, initiating graceful shutdown"),
            _ = sigterm.recv() => tracing::info!("Received SIGTERM, initiating graceful shutdown"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        tracing::info!("Received Ctrl+C, initiating graceful shutdown");
    }

    handle.shutdown().await;
    if tokio::time::timeout(SHUTDOWN_GRACE, engine.dispatcher().wait_idle())
        .await
        .is_err()
    {
        tracing::warn!(
            pending = engine.dispatcher().pending().len(),
            "Dispatches still running after grace period; cancelling"
        );
    }
    let cancelled: usize = engine
        .dispatcher()
        .pending()
        .iter()
        .map(|pending| usize::from(engine.dispatcher().cancel(pending.id)))
        .sum();

    let stats = engine.activity().stats();
    tracing::info!(
        entries = stats.entries,
        triggers = stats.triggers,
        delivered = stats.delivered_actions,
        failed = stats.failed_actions,
        cancelled,
        "Watcher shutdown complete"
    );
    if dry_run {
        for call in recorder.calls().await {
            println!("{call}");
        }
    }
    Ok(())
}

fn run_check(file: &Path) -> anyhow::Result<()> {
    let doc = RuleDocument::load(file).with_context(|| format!("loading {}", file.display()))?;
    let compiled = compile_rules(doc.rules).with_context(|| format!("validating {}", file.display()))?;
    let rules: Vec<Rule> = compiled.into_iter().map(|c| c.rule).collect();

    println!(
        "{}: {} rule(s) valid (schema version {})",
        file.display(),
        rules.len(),
        doc.version
    );
    print_rule_table(&rules);
    Ok(())
}

#[derive(Serialize)]
struct TestReport {
    entries: Vec<ActivityEntry>,
    calls: Vec<ActuatorCall>,
}

async fn run_test(
    config: &Config,
    rules_path: Option<&Path>,
    event: &OutputEvent,
    json: bool,
) -> anyhow::Result<()> {
    let mut rules = load_rule_set(rules_path, config.rules.include_presets)?;
    for action in rules.iter_mut().flat_map(|r| r.actions.iter_mut()) {
        action.delay_ms = None;
    }

    let mock = Arc::new(MockActuator::new());
    let engine = RuleEngine::new(mock.clone(), config.engine.to_engine_config());
    engine.load_rules(rules)?;

    engine.process_output(event);
    engine.dispatcher().wait_idle().await;

    // Re-read entries so action outcomes reflect delivery.
    let mut entries = engine.recent_activity(usize::MAX);
    entries.reverse();
    let report = TestReport {
        entries,
        calls: mock.calls().await,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if report.entries.is_empty() {
        println!("No rules matched.");
        return Ok(());
    }
    for entry in &report.entries {
        match &entry.suppressed_reason {
            Some(reason) => println!("  suppressed  {} ({reason})", entry.rule_id),
            None => {
                println!("  fired       {}  matched {:?}", entry.rule_id, entry.matched_text);
                for action in &entry.actions {
                    println!(
                        "    {:<13} {:<30} {}",
                        action.action_type.as_str(),
                        action.value,
                        action.status
                    );
                }
            }
        }
    }
    if !report.calls.is_empty() {
        println!("Actuator calls:");
        for call in &report.calls {
            println!("  {call}");
        }
    }
    Ok(())
}

fn run_export(rules: Vec<Rule>, out: Option<&Path>) -> anyhow::Result<()> {
    let mut doc = RuleDocument::new(rules);
    doc.exported_at = Some(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true));
    match out {
        Some(path) => {
            doc.save(path)?;
            println!("Exported {} rule(s) to {}", doc.rules.len(), path.display());
        }
        None => println!("{}", doc.render(DocumentFormat::Json)?),
    }
    Ok(())
}

fn run_import(file: &Path, target: &Path, merge: bool) -> anyhow::Result<()> {
    let incoming = RuleDocument::load(file).with_context(|| format!("loading {}", file.display()))?;
    let existing = if target.is_file() {
        RuleDocument::load(target)
            .with_context(|| format!("loading {}", target.display()))?
            .rules
    } else {
        Vec::new()
    };

    let (rules, summary) = merge_rule_sets(&existing, incoming.rules, merge);
    compile_rules(rules.clone()).context("imported rule set is invalid; target left unchanged")?;
    RuleDocument::new(rules).save(target)?;

    println!(
        "Imported into {}: {} added, {} updated, {} removed, {} total",
        target.display(),
        summary.added,
        summary.updated,
        summary.removed,
        summary.total
    );
    Ok(())
}

fn print_rule_table(rules: &[Rule]) {
    if rules.is_empty() {
        println!("No rules.");
        return;
    }
    println!(
        "{:<36} {:<8} {:<12} {:>5} {:>8} {:>6}  {}",
        "ID", "ENABLED", "CATEGORY", "ORDER", "COOLDOWN", "MAX/H", "ACTIONS"
    );
    for rule in rules {
        let actions: Vec<&str> = rule.actions.iter().map(|a| a.kind.as_str()).collect();
        let source = if is_preset_id(&rule.id) { " (preset)" } else { "" };
        println!(
            "{:<36} {:<8} {:<12} {:>5} {:>7}s {:>6}  {}{source}",
            rule.id,
            if rule.enabled { "yes" } else { "no" },
            rule.category.as_str(),
            rule.order,
            rule.cooldown_seconds,
            rule.max_triggers_per_hour,
            actions.join(",")
        );
    }
}
