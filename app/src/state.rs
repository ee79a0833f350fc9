// ocdesk application state
use ocdesk_client::{ApiClient, LlmClient, StreamClient, StreamConfig};
use ocdesk_observability::ProcessKind;

use crate::error::{AppError, Result};
use crate::settings::{AppSettings, SettingsStore};

/// Everything a command needs, built once at startup from the settings file.
///
/// Clients are not rebuilt when settings change; a new server URL takes
/// effect on the next start.
pub struct AppState {
    pub settings: SettingsStore,
    pub api: ApiClient,
    pub llm: Option<LlmClient>,
    pub stream: StreamClient,
}

impl AppState {
    pub async fn new(settings: SettingsStore, process: ProcessKind) -> Result<Self> {
        let current = settings.get().await;
        let (api, llm, stream) = build_clients(&current, process)?;
        tracing::info!(
            "ocdesk state initialized (server: {}, llm: {})",
            current.server_url,
            if llm.is_some() { "configured" } else { "off" }
        );
        Ok(Self {
            settings,
            api,
            llm,
            stream,
        })
    }

    pub fn llm(&self) -> Result<&LlmClient> {
        self.llm.as_ref().ok_or(AppError::LlmNotConfigured)
    }
}

fn build_clients(
    settings: &AppSettings,
    process: ProcessKind,
) -> Result<(ApiClient, Option<LlmClient>, StreamClient)> {
    let api = ApiClient::new(&settings.server_url, settings.stream.part_decode_mode)?;

    let llm = if settings.llm.is_configured() {
        Some(LlmClient::new(&settings.llm.base_url, &settings.llm.api_key)?)
    } else {
        None
    };

    let stream = StreamClient::new(StreamConfig {
        backoff: settings.stream.backoff(),
        channel_capacity: settings.stream.channel_capacity,
        process,
        ..StreamConfig::new(&settings.server_url)
    })?;

    Ok((api, llm, stream))
}
