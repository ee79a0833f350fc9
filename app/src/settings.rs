//! Local settings file, `<config_dir>/ocdesk/config.json`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ocdesk_client::BackoffPolicy;
use ocdesk_types::PartDecodeMode;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;

use crate::error::{AppError, Result};

pub const DEFAULT_SERVER_URL: &str = "http://localhost:23450";
pub const SERVER_URL_ENV: &str = "OCDESK_SERVER_URL";
const APP_DIR: &str = "ocdesk";
const FILE_NAME: &str = "config.json";

fn default_server_url() -> String {
    DEFAULT_SERVER_URL.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(rename = "serverURL", default = "default_server_url")]
    pub server_url: String,
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub stream: StreamSettings,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            llm: LlmSettings::default(),
            stream: StreamSettings::default(),
        }
    }
}

impl AppSettings {
    /// Copy safe to print or log.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.llm.api_key.is_empty() {
            copy.llm.api_key = ocdesk_observability::redact_text(&copy.llm.api_key);
        }
        copy
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmSettings {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub provider: String,
    #[serde(rename = "baseURL", default, skip_serializing_if = "String::is_empty")]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prompt: String,
}

impl LlmSettings {
    pub fn is_configured(&self) -> bool {
        !self.base_url.trim().is_empty() && !self.api_key.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamSettings {
    pub reconnect_delay_ms: u64,
    /// When set above `reconnect_delay_ms`, reconnects back off exponentially up to this cap.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_reconnect_delay_ms: Option<u64>,
    pub jitter: bool,
    pub channel_capacity: usize,
    pub part_decode_mode: PartDecodeMode,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 5_000,
            max_reconnect_delay_ms: None,
            jitter: false,
            channel_capacity: ocdesk_client::stream::DEFAULT_CHANNEL_CAPACITY,
            part_decode_mode: PartDecodeMode::default(),
        }
    }
}

impl StreamSettings {
    pub fn backoff(&self) -> BackoffPolicy {
        let initial = Duration::from_millis(self.reconnect_delay_ms);
        match self.max_reconnect_delay_ms {
            Some(max) if max > self.reconnect_delay_ms => BackoffPolicy::Exponential {
                initial,
                max: Duration::from_millis(max),
                jitter: self.jitter,
            },
            _ => BackoffPolicy::Fixed(initial),
        }
    }
}

/// Loads, caches and persists [`AppSettings`].
///
/// `OCDESK_SERVER_URL` overrides the stored server URL for this process only;
/// it is never written back to disk.
pub struct SettingsStore {
    path: PathBuf,
    stored: RwLock<AppSettings>,
    server_url_override: Option<String>,
}

impl SettingsStore {
    pub fn default_path() -> PathBuf {
        match dirs::config_dir() {
            Some(dir) => dir.join(APP_DIR).join(FILE_NAME),
            None => PathBuf::from(format!(".{}", APP_DIR)).join(FILE_NAME),
        }
    }

    pub async fn load_default() -> Result<Self> {
        Self::load(Self::default_path()).await
    }

    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let override_url = std::env::var(SERVER_URL_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty());
        Self::load_with_override(path, override_url).await
    }

    /// Reads the file, creating it with defaults when missing. A file that
    /// exists but does not parse is an error; it is never overwritten.
    pub async fn load_with_override(
        path: impl Into<PathBuf>,
        server_url_override: Option<String>,
    ) -> Result<Self> {
        let path = path.into();
        let stored = if fs::try_exists(&path).await? {
            let raw = fs::read_to_string(&path).await?;
            serde_json::from_str::<AppSettings>(&raw).map_err(|e| {
                AppError::InvalidConfig(format!("failed to parse {}: {}", path.display(), e))
            })?
        } else {
            let defaults = AppSettings::default();
            write_settings(&path, &defaults).await?;
            tracing::info!("Created default settings at {}", path.display());
            defaults
        };

        if let Some(url) = &server_url_override {
            tracing::info!("Server URL overridden by {}: {}", SERVER_URL_ENV, url);
        }

        Ok(Self {
            path,
            stored: RwLock::new(stored),
            server_url_override,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Effective settings, with the environment override applied.
    pub async fn get(&self) -> AppSettings {
        let mut settings = self.stored.read().await.clone();
        if let Some(url) = &self.server_url_override {
            settings.server_url = url.clone();
        }
        settings
    }

    pub async fn update(&self, settings: AppSettings) -> Result<()> {
        if settings.server_url.trim().is_empty() {
            return Err(AppError::InvalidConfig("serverURL must not be empty".to_string()));
        }
        write_settings(&self.path, &settings).await?;
        *self.stored.write().await = settings;
        Ok(())
    }

    pub async fn set_server_url(&self, url: &str) -> Result<()> {
        let mut settings = self.stored.read().await.clone();
        settings.server_url = url.trim().trim_end_matches('/').to_string();
        self.update(settings).await
    }
}

async fn write_settings(path: &Path, settings: &AppSettings) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let raw = serde_json::to_string_pretty(settings)?;
    fs::write(path, raw).await?;
    Ok(())
}
