//! polylog - one view over AI coding assistant sessions
//!
//! Discovers projects and sessions from every configured source and prints
//! them as JSON.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Config: $XDG_CONFIG_HOME/polylog/config.toml (~/.config/polylog/config.toml)
//! - Logs: $XDG_STATE_HOME/polylog/polylog.log (~/.local/state/polylog/polylog.log)

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use polylog_core::ingest::parsers::{create_all_plugins, ClaudeCodePlugin};
use polylog_core::{
    group_content_blocks, Config, ContentBlock, PluginRegistry, Session, SessionBadge,
    SessionSummary, Turn,
};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Parser)]
#[command(name = "polylog")]
#[command(about = "Browse AI coding assistant sessions across tools")]
#[command(version)]
struct Args {
    /// Pretty-print JSON output
    #[arg(short, long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List projects merged across every source
    Projects,

    /// List sessions of one project, newest first
    Sessions {
        /// Encoded project path as printed by `projects`
        #[arg(allow_hyphen_values = true)]
        project: String,
    },

    /// Print one session's turns
    Show {
        /// Encoded project path as printed by `projects`
        #[arg(allow_hyphen_values = true)]
        project: String,

        /// Session id in `<plugin>::<id>` form
        session_id: String,

        /// Add presentation steps for each assistant turn
        #[arg(short, long)]
        grouped: bool,
    },

    /// Print a Claude Code sub-agent transcript
    Subagent {
        /// Claude Code project directory name
        #[arg(allow_hyphen_values = true)]
        native_id: String,

        /// Parent session id
        session_id: String,

        /// Sub-agent id
        agent_id: String,
    },
}

/// Listing row with the source's display extras.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionRow {
    #[serde(flatten)]
    summary: SessionSummary,
    badges: Vec<SessionBadge>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resume_command: Option<String>,
}

#[derive(Serialize)]
struct GroupedSession {
    session: Session,
    /// Assistant turn uuid -> presentation steps
    steps: BTreeMap<String, Vec<Vec<ContentBlock>>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load().context("failed to load configuration")?;
    let _log_guard =
        polylog_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("polylog starting up");

    let registry = PluginRegistry::with_plugins(create_all_plugins(&config));

    match args.command {
        Command::Projects => {
            let projects = registry.discover_all_projects().await;
            print_json(&projects, args.pretty)?;
        }
        Command::Sessions { project } => {
            let project = registry
                .find_project(&project)
                .await
                .with_context(|| format!("project not found: {}", project))?;
            let rows: Vec<SessionRow> = registry
                .list_all_sessions(&project)
                .await
                .into_iter()
                .map(|summary| session_row(&registry, summary))
                .collect();
            print_json(&rows, args.pretty)?;
        }
        Command::Show {
            project,
            session_id,
            grouped,
        } => {
            let project = registry
                .find_project(&project)
                .await
                .with_context(|| format!("project not found: {}", project))?;
            let session = registry
                .load_session(&project, &session_id)
                .await
                .with_context(|| format!("failed to load session {}", session_id))?;

            if grouped {
                let steps = session
                    .turns
                    .iter()
                    .filter_map(Turn::as_assistant)
                    .map(|turn| (turn.uuid.clone(), group_content_blocks(&turn.content_blocks)))
                    .collect();
                print_json(&GroupedSession { session, steps }, args.pretty)?;
            } else {
                print_json(&session, args.pretty)?;
            }
        }
        Command::Subagent {
            native_id,
            session_id,
            agent_id,
        } => {
            let plugin = match &config.sources.claude_code_path {
                Some(root) => ClaudeCodePlugin::with_root(root.clone()),
                None => ClaudeCodePlugin::new(),
            };
            let session = plugin
                .load_subagent(&native_id, &session_id, &agent_id)
                .await
                .with_context(|| format!("failed to load sub-agent {}", agent_id))?;
            print_json(&session, args.pretty)?;
        }
    }

    tracing::info!("polylog shutting down");
    Ok(())
}

fn session_row(registry: &PluginRegistry, summary: SessionSummary) -> SessionRow {
    let plugin = summary
        .plugin_id
        .as_deref()
        .and_then(|id| registry.get_plugin(id).ok());
    let native_id = summary
        .session_id
        .split_once(polylog_core::ingest::SESSION_ID_SEPARATOR)
        .map(|(_, id)| id)
        .unwrap_or(&summary.session_id);

    // Plugins see their own session ids, not the composite form
    let (badges, resume_command) = match &plugin {
        Some(plugin) => {
            let native = SessionSummary {
                session_id: native_id.to_string(),
                ..summary.clone()
            };
            (
                plugin.session_badges(&native),
                plugin.resume_command(native_id),
            )
        }
        None => (Vec::new(), None),
    };
    SessionRow {
        summary,
        badges,
        resume_command,
    }
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let text = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .context("failed to serialize output")?;
    println!("{}", text);
    Ok(())
}
