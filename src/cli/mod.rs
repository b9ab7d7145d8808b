//! CLI subcommand definitions and handlers.
//!
//! Uses clap derive to define the subcommand hierarchy:
//! - `validate <file>` -- check a flow definition file
//! - `simulate <file>` -- chat with the flows on stdin/stdout
//! - `config show|path` -- inspect configuration
//! - `version` -- print build/version info

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Conversational flow engine for messaging channels.
#[derive(Parser, Debug)]
#[command(
    name = "chatflow",
    version = env!("CARGO_PKG_VERSION"),
    about = "Run multi-step conversational flows over a messaging channel"
)]
pub struct Cli {
    /// Config file (default: $CHATFLOW_CONFIG_PATH or the user config dir).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate a flow definition file and report every problem.
    Validate {
        /// JSON5 definition file.
        path: PathBuf,
    },

    /// Feed stdin lines to the engine as inbound messages.
    ///
    /// Lines starting with `/` are commands: `/handoff`, `/resume`,
    /// `/abandon`, `/status`, `/template <ref> <text>`.
    Simulate {
        /// JSON5 definition file.
        path: PathBuf,

        /// Contact id used for the simulated conversation.
        #[arg(long, default_value = "simulator")]
        contact: String,

        /// Channel id used for the simulated conversation.
        #[arg(long, default_value = "console")]
        channel: String,
    },

    /// Inspect configuration.
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Print version, build date, and git commit information.
    Version,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration as JSON.
    Show,

    /// Print the resolved configuration file path.
    Path,
}

// ---------------------------------------------------------------------------
// Subcommand handlers
// ---------------------------------------------------------------------------

use crate::config::{self, EngineConfig};
use crate::engine::{FlowEngine, InboundOutcome};
use crate::flows::{FlowGraph, TriggerMode};
use crate::messages::{ConsoleTransport, InboundEvent};
use crate::sessions::{AdvanceResult, ChatSession};
use crate::store::definitions::parse_definitions;
use crate::store::{InMemoryDefinitionStore, InMemorySessionStore, SessionStore};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Run the `validate` subcommand. Returns whether every flow is valid.
pub async fn handle_validate(path: &Path) -> CliResult<bool> {
    let raw = tokio::fs::read_to_string(path).await?;
    let file = parse_definitions(&raw).map_err(|e| format!("{}: {}", path.display(), e))?;

    let mut clean = true;
    for definition in &file.flows {
        let errors = FlowGraph::validate(definition);
        if errors.is_empty() {
            let mode = match definition.trigger_mode {
                TriggerMode::Any => "any",
                TriggerMode::All => "all",
            };
            println!(
                "ok     {} ({} steps, {} transitions, {} triggers [{}]{}{})",
                definition.id,
                definition.steps.len(),
                definition.transitions.len(),
                definition.triggers.len(),
                mode,
                if definition.is_default { ", default" } else { "" },
                if definition.is_active { "" } else { ", inactive" },
            );
        } else {
            clean = false;
            println!("error  {}", definition.id);
            for error in errors {
                println!("         - {}", error);
            }
        }
    }

    if file.flows.is_empty() {
        println!("no flows defined in {}", path.display());
    }
    Ok(clean)
}

/// A parsed simulator input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimInput {
    Message(String),
    Template { reference: String, text: String },
    Handoff,
    Resume,
    Abandon,
    Status,
    Unknown(String),
}

/// Parse one simulator line.
pub fn parse_sim_line(line: &str) -> SimInput {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some(command) = line.strip_prefix('/') else {
        return SimInput::Message(line.to_string());
    };

    let mut parts = command.splitn(2, ' ');
    let name = parts.next().unwrap_or_default();
    let rest = parts.next().unwrap_or_default().trim();
    match name {
        "handoff" => SimInput::Handoff,
        "resume" => SimInput::Resume,
        "abandon" => SimInput::Abandon,
        "status" => SimInput::Status,
        "template" if !rest.is_empty() => {
            let mut parts = rest.splitn(2, ' ');
            let reference = parts.next().unwrap_or_default().to_string();
            let text = parts.next().unwrap_or_default().trim().to_string();
            SimInput::Template { reference, text }
        }
        _ => SimInput::Unknown(line.to_string()),
    }
}

/// Run the `simulate` subcommand.
pub async fn handle_simulate(
    path: &Path,
    contact: &str,
    channel: &str,
    config: EngineConfig,
) -> CliResult<()> {
    let (definitions, report) = InMemoryDefinitionStore::from_file(path).await?;
    for (flow, errors) in &report.rejected {
        eprintln!("skipping flow {} ({} problem(s))", flow, errors.len());
    }
    if report.loaded.is_empty() {
        return Err(format!("no valid flows in {}", path.display()).into());
    }

    let sessions = Arc::new(InMemorySessionStore::new());
    let engine = FlowEngine::new(
        config,
        Arc::new(definitions),
        sessions.clone(),
        Arc::new(ConsoleTransport::new()),
    );

    eprintln!(
        "simulating {} flow(s) as {}@{}; type messages, /status, /handoff, /resume, /abandon, /template <ref> <text>",
        report.loaded.len(),
        contact,
        channel
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let current = sessions.find_open(contact, channel).await?;
        let session_id = current.as_ref().map(|s| s.id.clone());

        let applied = match (parse_sim_line(&line), session_id.as_deref()) {
            (SimInput::Message(text), _) => {
                let event = InboundEvent::new(contact, channel, text);
                engine.handle_inbound(&event).await.map(|o| describe_inbound(&o))
            }
            (SimInput::Template { reference, text }, _) => {
                let event = InboundEvent::new(contact, channel, text).with_correlation(reference);
                engine.handle_inbound(&event).await.map(|o| describe_inbound(&o))
            }
            (SimInput::Handoff, Some(id)) => engine
                .handoff(id, Some("console-agent".to_string()))
                .await
                .map(|r| describe_result(&r)),
            (SimInput::Resume, Some(id)) => engine.resume(id).await.map(|r| describe_result(&r)),
            (SimInput::Abandon, Some(id)) => engine.abandon(id).await.map(|r| describe_result(&r)),
            (SimInput::Status, _) => Ok(describe_status(current.as_ref())),
            (SimInput::Unknown(line), _) => Ok(format!("unknown command: {}", line)),
            (_, None) => Ok("no open session".to_string()),
        };

        engine.deliver_all().await?;
        match applied {
            Ok(summary) => eprintln!("-- {}", summary),
            Err(e) => eprintln!("-- error: {}", e),
        }
    }

    let stats = serde_json::to_string_pretty(&engine.stats())?;
    eprintln!("{}", stats);
    Ok(())
}

fn describe_result(result: &AdvanceResult) -> String {
    let command = result.command();
    format!(
        "{:?} (status {}, step {}, {} fragment(s) for {}@{})",
        result.outcome,
        result.status,
        result.step_id,
        command.fragments.len(),
        command.target.contact_id,
        command.target.channel_id,
    )
}

fn describe_inbound(outcome: &InboundOutcome) -> String {
    match outcome {
        InboundOutcome::Started {
            flow_id,
            reason,
            result,
            ..
        } => format!("started flow {} via {:?}: {}", flow_id, reason, describe_result(result)),
        InboundOutcome::Advanced { result, .. } => describe_result(result),
        InboundOutcome::Ignored { reason, .. } => format!("ignored ({:?})", reason),
        InboundOutcome::NoFlowMatched => "no flow matched".to_string(),
    }
}

fn describe_status(session: Option<&ChatSession>) -> String {
    let Some(session) = session else {
        return "no open session".to_string();
    };
    format!(
        "session {} flow {} step {} status {} ({:?}), attempts {}, variables {}",
        session.id,
        session.flow_id,
        session.current_step_id,
        session.status,
        session.flow_status,
        session.attempt_count,
        serde_json::to_string(&session.collected_variables).unwrap_or_default(),
    )
}

/// Run the `config show` subcommand.
pub async fn handle_config_show(explicit: Option<&Path>) -> CliResult<()> {
    let path = config::get_config_path(explicit);
    let cfg = config::load_config(&path).await?;
    println!("{}", serde_json::to_string_pretty(&cfg)?);
    Ok(())
}

/// Run the `config path` subcommand.
pub fn handle_config_path(explicit: Option<&Path>) {
    println!("{}", config::get_config_path(explicit).display());
}

/// Run the `version` subcommand.
pub fn handle_version() {
    println!("chatflow {}", env!("CARGO_PKG_VERSION"));
    println!("  Build date: {}", env!("CHATFLOW_BUILD_DATE"));
    println!("  Git commit: {}", env!("CHATFLOW_GIT_HASH"));
    println!(
        "  Platform:   {} ({})",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["chatflow"]).is_err());
    }

    #[test]
    fn test_cli_version_subcommand() {
        let cli = Cli::try_parse_from(["chatflow", "version"]).unwrap();
        assert!(matches!(cli.command, Command::Version));
    }

    #[test]
    fn test_cli_config_show_with_global_path() {
        let cli =
            Cli::try_parse_from(["chatflow", "config", "show", "--config", "/tmp/c.json5"]).unwrap();
        assert!(matches!(cli.command, Command::Config(ConfigCommand::Show)));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.json5")));
    }

    #[test]
    fn test_cli_simulate_defaults() {
        let cli = Cli::try_parse_from(["chatflow", "simulate", "flows.json5"]).unwrap();
        match cli.command {
            Command::Simulate {
                path,
                contact,
                channel,
            } => {
                assert_eq!(path, PathBuf::from("flows.json5"));
                assert_eq!(contact, "simulator");
                assert_eq!(channel, "console");
            }
            other => panic!("Expected Simulate, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_sim_line() {
        assert_eq!(parse_sim_line("hola"), SimInput::Message("hola".into()));
        assert_eq!(parse_sim_line("/handoff"), SimInput::Handoff);
        assert_eq!(
            parse_sim_line("/template promo_march yes please"),
            SimInput::Template {
                reference: "promo_march".into(),
                text: "yes please".into()
            }
        );
        assert_eq!(
            parse_sim_line("/template"),
            SimInput::Unknown("/template".into())
        );
        assert_eq!(parse_sim_line("/nope"), SimInput::Unknown("/nope".into()));
    }

    #[tokio::test]
    async fn test_handle_validate_reports_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ flows: [
                {{ id: "good", name: "Good", entry_step: "end",
                   steps: [{{ id: "end", kind: "terminal" }}] }},
                {{ id: "bad", name: "Bad", steps: [] }},
            ] }}"#
        )
        .unwrap();
        assert!(!handle_validate(file.path()).await.unwrap());
    }
}
