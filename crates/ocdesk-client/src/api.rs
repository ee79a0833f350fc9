use std::time::Duration;

use ocdesk_types::{
    Agent, ChatInput, CreateSessionRequest, FileContent, MessageWithParts, PartDecodeMode,
    ProvidersResponse, SearchResult, ServerConfig, Session, Symbol, UpdateSessionRequest,
};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ClientError, Result};

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const LOGGED_BODY_CHARS: usize = 500;

/// Request/response client for the server's REST endpoints.
///
/// Errors are returned as-is; nothing here retries.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    part_mode: PartDecodeMode,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, part_mode: PartDecodeMode) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        reqwest::Url::parse(&base_url).map_err(|e| {
            ClientError::InvalidConfig(format!("invalid server URL {:?}: {}", base_url, e))
        })?;
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url,
            part_mode,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn part_mode(&self) -> PartDecodeMode {
        self.part_mode
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("{} {}", method, url);
        self.http.request(method, url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let url = response.url().to_string();
        let body = response.text().await.unwrap_or_default();
        tracing::error!("Request to {} failed ({}): {}", url, status, body);
        Err(ClientError::Api {
            status: status.as_u16(),
            body,
        })
    }

    async fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let body = self.send(request).await?.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            tracing::error!(
                "Failed to parse response: {} - body: {}",
                e,
                body.chars().take(LOGGED_BODY_CHARS).collect::<String>()
            );
            ClientError::Serialization(e)
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let mut request = self.request(Method::GET, path);
        if !query.is_empty() {
            request = request.query(query);
        }
        self.json(request).await
    }

    async fn send_json<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.json(self.request(method, path).json(body)).await
    }

    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        self.get("/session", &[]).await
    }

    pub async fn get_session(&self, id: &str) -> Result<Session> {
        self.get(&format!("/session/{}", id), &[]).await
    }

    /// Blank titles become "New Session".
    pub async fn create_session(&self, title: &str) -> Result<Session> {
        self.send_json(Method::POST, "/session", &CreateSessionRequest::new(title))
            .await
    }

    pub async fn update_session(&self, id: &str, title: &str) -> Result<Session> {
        let body = UpdateSessionRequest {
            title: title.to_string(),
        };
        self.send_json(Method::PATCH, &format!("/session/{}", id), &body)
            .await
    }

    pub async fn delete_session(&self, id: &str) -> Result<()> {
        self.send(self.request(Method::DELETE, &format!("/session/{}", id)))
            .await?;
        Ok(())
    }

    pub async fn list_messages(&self, session_id: &str) -> Result<Vec<MessageWithParts>> {
        let path = format!("/session/{}/message", session_id);
        let body = self.send(self.request(Method::GET, &path)).await?.text().await?;
        Ok(MessageWithParts::decode_list(&body, self.part_mode)?)
    }

    pub async fn send_message(&self, session_id: &str, input: &ChatInput) -> Result<MessageWithParts> {
        let path = format!("/session/{}/message", session_id);
        let body = self
            .send(self.request(Method::POST, &path).json(input))
            .await?
            .text()
            .await?;
        Ok(MessageWithParts::decode_with(&body, self.part_mode)?)
    }

    pub async fn list_agents(&self) -> Result<Vec<Agent>> {
        self.get("/agent", &[]).await
    }

    pub async fn get_config(&self) -> Result<ServerConfig> {
        self.get("/config", &[]).await
    }

    pub async fn get_providers(&self) -> Result<ProvidersResponse> {
        self.get("/config/providers", &[]).await
    }

    pub async fn find_in_files(&self, pattern: &str) -> Result<Vec<SearchResult>> {
        self.get("/find", &[("pattern", pattern)]).await
    }

    pub async fn find_files(&self, query: &str) -> Result<Vec<String>> {
        self.get("/find/file", &[("query", query)]).await
    }

    pub async fn find_symbols(&self, query: &str) -> Result<Vec<Symbol>> {
        self.get("/find/symbol", &[("query", query)]).await
    }

    pub async fn read_file(&self, path: &str) -> Result<FileContent> {
        self.get("/file/content", &[("path", path)]).await
    }
}
