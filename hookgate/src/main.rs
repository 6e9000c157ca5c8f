//! Tool-call gate for coding agents.
//!
//! The host pipes one JSON invocation per hook event on stdin and reads the
//! verdict from stdout. Management subcommands inspect and seed the
//! project's `.claude/` state.

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;

use hookgate::core::rules::RuleEntry;
use hookgate::hook::{HookEvent, HookOutput, handle};
use hookgate::io::config::{GateConfig, write_config};
use hookgate::io::context_budget::estimate_usage;
use hookgate::io::env::HostEnv;
use hookgate::io::locks::LockStore;
use hookgate::io::paths::ProjectPaths;
use hookgate::logging;
use hookgate::settings::Settings;

#[derive(Parser)]
#[command(name = "hookgate", version, about = "Policy gate for agent tool calls")]
struct Cli {
    /// Project root (defaults to $CLAUDE_PROJECT_DIR, then the current directory).
    #[arg(long, global = true)]
    project_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Evaluate a tool call before it runs (stdin JSON -> stdout verdict).
    PreToolUse,
    /// Record bookkeeping after a tool call (stdin JSON -> stdout verdict).
    PostToolUse,
    /// Run session-end finalizers (stdin JSON -> stdout verdict).
    SessionEnd,
    /// Write a default `.claude/hookgate.toml`.
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
        /// Also create the coordination store, enabling multi-instance locks.
        #[arg(long)]
        coordination: bool,
    },
    /// Print the current context budget report.
    ContextBudget,
    /// Inspect or release coordination locks.
    Locks {
        #[command(subcommand)]
        command: LocksCommand,
    },
    /// Print the compiled rule registry.
    Rules,
}

#[derive(Subcommand)]
enum LocksCommand {
    /// List live locks.
    List,
    /// Release every lock held by an instance.
    Release {
        #[arg(long)]
        owner: String,
    },
}

fn main() {
    logging::init();
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let env = HostEnv::from_process();
    match cli.command {
        Command::PreToolUse => cmd_hook(HookEvent::PreToolUse, &env, cli.project_dir),
        Command::PostToolUse => cmd_hook(HookEvent::PostToolUse, &env, cli.project_dir),
        Command::SessionEnd => cmd_hook(HookEvent::SessionEnd, &env, cli.project_dir),
        Command::Init {
            force,
            coordination,
        } => cmd_init(&project_paths(&env, cli.project_dir), force, coordination),
        Command::ContextBudget => cmd_context_budget(env, cli.project_dir),
        Command::Locks { command } => cmd_locks(&project_paths(&env, cli.project_dir), command),
        Command::Rules => cmd_rules(env, cli.project_dir),
    }
}

fn project_paths(env: &HostEnv, project_dir: Option<PathBuf>) -> ProjectPaths {
    let from_flag = project_dir.map(|dir| dir.to_string_lossy().to_string());
    ProjectPaths::new(env.resolve_project_dir(from_flag.as_deref()))
}

/// Hook events always exit 0; failures degrade to a silent allow.
fn cmd_hook(event: HookEvent, env: &HostEnv, project_dir: Option<PathBuf>) -> Result<()> {
    let mut raw = String::new();
    let output = match std::io::stdin().read_to_string(&mut raw) {
        Ok(_) => {
            let env = match project_dir {
                Some(dir) => HostEnv {
                    project_dir: Some(dir),
                    ..env.clone()
                },
                None => env.clone(),
            };
            handle(event, &raw, &env, Utc::now())
        }
        Err(err) => {
            tracing::warn!(err = %err, "read stdin failed, allowing");
            HookOutput::silent_allow()
        }
    };
    print_json(&output)
}

fn cmd_init(paths: &ProjectPaths, force: bool, coordination: bool) -> Result<()> {
    let config_path = paths.config();
    if force || !config_path.exists() {
        write_config(&config_path, &GateConfig::default())?;
        println!("wrote {}", config_path.display());
    }
    if coordination && LockStore::new(paths.locks()).init(force)? {
        println!("wrote {}", paths.locks().display());
    }
    Ok(())
}

fn cmd_context_budget(env: HostEnv, project_dir: Option<PathBuf>) -> Result<()> {
    let paths = project_paths(&env, project_dir);
    let settings = Settings::load(env, &paths)?;
    let budget = settings.config.context_budget(&settings.env);
    print_json(&budget.report(estimate_usage(&paths.context_files())))
}

fn cmd_locks(paths: &ProjectPaths, command: LocksCommand) -> Result<()> {
    let store = LockStore::new(paths.locks());
    match command {
        LocksCommand::List => {
            let now = Utc::now();
            let live: Vec<_> = store
                .load()?
                .map(|coordination| {
                    coordination
                        .locks
                        .into_iter()
                        .filter(|lock| lock.is_live(now))
                        .collect()
                })
                .unwrap_or_default();
            print_json(&json!({ "enabled": store.is_enabled(), "locks": live }))
        }
        LocksCommand::Release { owner } => {
            let released = store.release_owned(&owner)?;
            println!("released {released} lock(s) held by {owner}");
            Ok(())
        }
    }
}

fn cmd_rules(env: HostEnv, project_dir: Option<PathBuf>) -> Result<()> {
    let paths = project_paths(&env, project_dir);
    let settings = Settings::load(env, &paths)?;
    let tables: serde_json::Map<String, serde_json::Value> = settings
        .rules
        .tables()
        .into_iter()
        .map(|(name, entries)| {
            let rules: Vec<_> = entries.iter().map(describe_rule).collect();
            (name.to_string(), json!(rules))
        })
        .collect();
    print_json(&json!({ "version": settings.rules.version, "tables": tables }))
}

fn describe_rule(rule: &RuleEntry) -> serde_json::Value {
    json!({
        "id": rule.id,
        "severity": rule.severity,
        "category": rule.category,
        "pattern": rule.source(),
        "message": rule.message,
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string(value).context("serialize output")?;
    println!("{payload}");
    Ok(())
}
