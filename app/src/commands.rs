// ocdesk commands
// The operations a UI front end binds to. Each takes the shared state by reference.

use std::sync::Arc;

use ocdesk_observability::{emit_event, ObservabilityEvent};
use ocdesk_types::{
    Agent, ChatInput, FileContent, MessageWithParts, ModelSelection, PolishTextRequest,
    PolishTextResponse, ProvidersResponse, SearchResult, ServerConfig, ServerEvent, Session,
    Symbol, Transcript, TranscriptChange,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Level;

use crate::error::{AppError, Result};
use crate::forwarder::{run_forwarder, EventSink, ForwardStats};
use crate::settings::AppSettings;
use crate::state::AppState;

/// Notification name used by [`follow_session`], payload is one message with its parts.
pub const TRANSCRIPT_MESSAGE_EVENT: &str = "transcript-message";

// ============================================================================
// Settings
// ============================================================================

pub async fn get_settings(state: &AppState) -> AppSettings {
    state.settings.get().await
}

pub async fn update_settings(state: &AppState, settings: AppSettings) -> Result<()> {
    state.settings.update(settings).await?;
    tracing::info!(
        "Settings saved to {}; server changes apply on restart",
        state.settings.path().display()
    );
    Ok(())
}

// ============================================================================
// Server metadata
// ============================================================================

pub async fn get_server_config(state: &AppState) -> Result<ServerConfig> {
    Ok(state.api.get_config().await?)
}

pub async fn get_providers(state: &AppState) -> Result<ProvidersResponse> {
    Ok(state.api.get_providers().await?)
}

pub async fn list_agents(state: &AppState) -> Result<Vec<Agent>> {
    Ok(state.api.list_agents().await?)
}

// ============================================================================
// Sessions
// ============================================================================

pub async fn list_sessions(state: &AppState) -> Result<Vec<Session>> {
    Ok(state.api.list_sessions().await?)
}

pub async fn get_session(state: &AppState, session_id: &str) -> Result<Session> {
    Ok(state.api.get_session(session_id).await?)
}

/// Blank titles become "New Session".
pub async fn create_session(state: &AppState, title: &str) -> Result<Session> {
    Ok(state.api.create_session(title).await?)
}

pub async fn rename_session(state: &AppState, session_id: &str, title: &str) -> Result<Session> {
    Ok(state.api.update_session(session_id, title).await?)
}

pub async fn delete_session(state: &AppState, session_id: &str) -> Result<()> {
    Ok(state.api.delete_session(session_id).await?)
}

// ============================================================================
// Messages
// ============================================================================

pub async fn get_messages(state: &AppState, session_id: &str) -> Result<Vec<MessageWithParts>> {
    Ok(state.api.list_messages(session_id).await?)
}

/// Sends `text` as a single text part. `model` is `provider/model`; when
/// absent the server picks its default.
pub async fn send_message(
    state: &AppState,
    session_id: &str,
    text: &str,
    model: Option<&str>,
) -> Result<MessageWithParts> {
    let model = match model.map(str::trim).filter(|m| !m.is_empty()) {
        Some(raw) => Some(ModelSelection::parse(raw).ok_or_else(|| {
            AppError::InvalidConfig(format!("model must be provider/model, got {:?}", raw))
        })?),
        None => None,
    };
    let input = ChatInput::text(text, model);
    Ok(state.api.send_message(session_id, &input).await?)
}

// ============================================================================
// Files
// ============================================================================

pub async fn find_in_files(state: &AppState, pattern: &str) -> Result<Vec<SearchResult>> {
    Ok(state.api.find_in_files(pattern).await?)
}

pub async fn find_files(state: &AppState, query: &str) -> Result<Vec<String>> {
    Ok(state.api.find_files(query).await?)
}

pub async fn find_symbols(state: &AppState, query: &str) -> Result<Vec<Symbol>> {
    Ok(state.api.find_symbols(query).await?)
}

pub async fn read_file(state: &AppState, path: &str) -> Result<FileContent> {
    Ok(state.api.read_file(path).await?)
}

// ============================================================================
// LLM
// ============================================================================

/// Fills an empty prompt or model from the settings file before calling the
/// completion endpoint.
pub async fn polish_text(state: &AppState, mut req: PolishTextRequest) -> Result<PolishTextResponse> {
    let llm = state.llm()?;
    let settings = state.settings.get().await;
    if req.prompt.trim().is_empty() {
        req.prompt = settings.llm.prompt;
    }
    if req.model.trim().is_empty() {
        req.model = settings.llm.model;
    }
    Ok(llm.polish_text(&req).await?)
}

// ============================================================================
// Event stream
// ============================================================================

/// Cancels `ctx` once `signal` fires. A signal listener that fails to
/// install leaves `ctx` alone, so the caller keeps running until stopped some
/// other way.
pub async fn cancel_on_signal<F>(signal: F, ctx: CancellationToken)
where
    F: std::future::Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => {
            tracing::info!("Interrupted, stopping event stream");
            ctx.cancel();
        }
        Err(e) => tracing::error!("Failed to listen for interrupt signal: {}", e),
    }
}

/// Subscribes to the server stream and republishes it to `sink` on a
/// background task. Only one subscription per process.
pub async fn start_event_forwarding(
    state: &AppState,
    sink: Arc<dyn EventSink>,
    ctx: CancellationToken,
) -> Result<JoinHandle<ForwardStats>> {
    let subscription = state.stream.subscribe(ctx.clone()).await?;
    Ok(tokio::spawn(async move {
        run_forwarder(subscription, sink.as_ref(), ctx).await
    }))
}

/// Keeps a live transcript of one session and publishes every message that
/// changes. Returns when the stream closes or `ctx` is cancelled.
pub async fn follow_session(
    state: &AppState,
    session_id: &str,
    sink: &dyn EventSink,
    ctx: CancellationToken,
) -> Result<()> {
    let mode = state.api.part_mode();
    let mut transcript = Transcript::new(session_id);
    transcript.sync(state.api.list_messages(session_id).await?);

    let mut subscription = state.stream.subscribe(ctx).await?;
    while let Some(envelope) = subscription.recv().await {
        let event = match envelope.to_server_event(mode) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Skipping {} event: {}", envelope.event_type, e);
                continue;
            }
        };

        let message_id = match &event {
            ServerEvent::MessageUpdated(info) => Some(info.id().to_string()),
            ServerEvent::MessagePartUpdated { part, .. } => {
                part.message_id().map(str::to_string)
            }
            _ => None,
        };

        match transcript.apply(&event) {
            TranscriptChange::Ignored => continue,
            TranscriptChange::Changed => {}
            TranscriptChange::Completed => match state.api.list_messages(session_id).await {
                Ok(messages) => {
                    transcript.sync(messages);
                    emit_event(
                        Level::INFO,
                        state.stream.config().process,
                        ObservabilityEvent::new("commands", "transcript.resynced")
                            .session_id(session_id),
                    );
                }
                Err(e) => tracing::warn!("Failed to refresh session {}: {}", session_id, e),
            },
        }

        let Some(message) = message_id.as_deref().and_then(|id| transcript.message(id)) else {
            continue;
        };
        let payload = serde_json::to_value(message)?;
        if let Err(e) = sink.emit(TRANSCRIPT_MESSAGE_EVENT, &payload) {
            tracing::warn!("Failed to publish transcript update: {}", e);
        }
    }
    Ok(())
}
