use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use ocdesk_lib::commands;
use ocdesk_lib::{AppState, EventSink, JsonLinesSink, SettingsStore};
use ocdesk_observability::{
    default_logs_dir, emit_event, init_process_logging, ObservabilityEvent, ProcessKind,
};
use ocdesk_types::PolishTextRequest;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "ocdesk")]
#[command(about = "Command-line front-end for a local OpenCode server")]
struct Cli {
    /// Settings file (defaults to <config_dir>/ocdesk/config.json)
    #[arg(long, global = true, env = "OCDESK_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print server events as JSON lines until interrupted
    Watch {
        /// Follow one session's transcript instead of the raw event stream
        #[arg(long)]
        session: Option<String>,
    },
    Sessions,
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
    Messages {
        session_id: String,
    },
    Send {
        session_id: String,
        text: String,
        /// provider/model
        #[arg(long)]
        model: Option<String>,
    },
    Agents,
    Providers,
    ServerConfig,
    /// Search file contents
    Find {
        pattern: String,
    },
    FindFile {
        query: String,
    },
    Symbols {
        query: String,
    },
    Read {
        path: String,
    },
    /// Polish text with the configured LLM
    Polish {
        text: String,
        #[arg(long)]
        prompt: Option<String>,
        #[arg(long)]
        model: Option<String>,
    },
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand, Debug)]
enum SessionAction {
    Create {
        #[arg(default_value = "")]
        title: String,
    },
    Rename {
        session_id: String,
        title: String,
    },
    Delete {
        session_id: String,
    },
    Show {
        session_id: String,
    },
}

#[derive(Subcommand, Debug)]
enum SettingsAction {
    Show,
    SetServer { url: String },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings_path = cli.config.unwrap_or_else(SettingsStore::default_path);
    let logs_dir = default_logs_dir(settings_path.parent());
    let (_log_guard, log_info) = init_process_logging(ProcessKind::Cli, &logs_dir, 14)?;
    emit_event(
        tracing::Level::INFO,
        ProcessKind::Cli,
        ObservabilityEvent::new("cli.main", "logging.initialized")
            .status("ok")
            .detail("cli jsonl logging initialized"),
    );
    info!("cli logging initialized: {:?}", log_info);

    let settings = SettingsStore::load(&settings_path)
        .await
        .with_context(|| format!("failed to load settings from {}", settings_path.display()))?;
    let state = AppState::new(settings, ProcessKind::Cli)
        .await
        .context("failed to initialize clients")?;

    match cli.command {
        Command::Watch { session } => watch(&state, session).await?,
        Command::Sessions => print_json(&commands::list_sessions(&state).await?)?,
        Command::Session { action } => match action {
            SessionAction::Create { title } => {
                print_json(&commands::create_session(&state, &title).await?)?
            }
            SessionAction::Rename { session_id, title } => {
                print_json(&commands::rename_session(&state, &session_id, &title).await?)?
            }
            SessionAction::Delete { session_id } => {
                commands::delete_session(&state, &session_id).await?;
                info!("Deleted session {}", session_id);
            }
            SessionAction::Show { session_id } => {
                print_json(&commands::get_session(&state, &session_id).await?)?
            }
        },
        Command::Messages { session_id } => {
            print_json(&commands::get_messages(&state, &session_id).await?)?
        }
        Command::Send {
            session_id,
            text,
            model,
        } => {
            let reply = commands::send_message(&state, &session_id, &text, model.as_deref())
                .await
                .with_context(|| format!("failed to send message to session {}", session_id))?;
            print_json(&reply)?
        }
        Command::Agents => print_json(&commands::list_agents(&state).await?)?,
        Command::Providers => print_json(&commands::get_providers(&state).await?)?,
        Command::ServerConfig => print_json(&commands::get_server_config(&state).await?)?,
        Command::Find { pattern } => print_json(&commands::find_in_files(&state, &pattern).await?)?,
        Command::FindFile { query } => print_json(&commands::find_files(&state, &query).await?)?,
        Command::Symbols { query } => print_json(&commands::find_symbols(&state, &query).await?)?,
        Command::Read { path } => print_json(&commands::read_file(&state, &path).await?)?,
        Command::Polish {
            text,
            prompt,
            model,
        } => {
            let req = PolishTextRequest {
                text,
                prompt: prompt.unwrap_or_default(),
                model: model.unwrap_or_default(),
            };
            print_json(&commands::polish_text(&state, req).await?)?
        }
        Command::Settings { action } => match action {
            SettingsAction::Show => print_json(&commands::get_settings(&state).await.redacted())?,
            SettingsAction::SetServer { url } => {
                state.settings.set_server_url(&url).await?;
                info!("Server URL saved; it applies from the next run");
            }
        },
    }

    Ok(())
}

async fn watch(state: &AppState, session: Option<String>) -> anyhow::Result<()> {
    let ctx = CancellationToken::new();
    tokio::spawn(commands::cancel_on_signal(tokio::signal::ctrl_c(), ctx.clone()));

    let sink: Arc<dyn EventSink> = Arc::new(JsonLinesSink::new(std::io::stdout()));
    match session {
        Some(session_id) => {
            commands::follow_session(state, &session_id, sink.as_ref(), ctx)
                .await
                .with_context(|| format!("failed to follow session {}", session_id))?;
        }
        None => {
            let forwarder = commands::start_event_forwarding(state, sink, ctx).await?;
            let stats = forwarder.await.context("event forwarder panicked")?;
            info!(
                "Forwarded {} events ({} state changes)",
                stats.forwarded, stats.state_changes
            );
        }
    }
    state.stream.shutdown().await;
    Ok(())
}
