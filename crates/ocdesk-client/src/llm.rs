use std::time::Duration;

use ocdesk_types::{PolishTextRequest, PolishTextResponse};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};

pub const TEXT_PLACEHOLDER: &str = "{text}";

pub const DEFAULT_POLISH_PROMPT: &str = "Rewrite the following text so it reads naturally and clearly, in a polite tone.\nFix any typos and grammatical mistakes.\n\n---\n{text}";

const LLM_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

/// Builds the prompt sent to the model. `{text}` is substituted everywhere it
/// appears; a prompt without it gets the text appended.
pub fn render_prompt(prompt: &str, text: &str) -> String {
    let prompt = if prompt.trim().is_empty() {
        DEFAULT_POLISH_PROMPT
    } else {
        prompt
    };
    if prompt.contains(TEXT_PLACEHOLDER) {
        prompt.replace(TEXT_PLACEHOLDER, text)
    } else {
        format!("{}\n\n{}", prompt, text)
    }
}

/// Client for an OpenAI-compatible chat completions endpoint.
#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("base_url", &self.base_url)
            .field("api_key", &ocdesk_observability::redact_text(&self.api_key))
            .finish()
    }
}

impl LlmClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let api_key = api_key.into();
        if base_url.is_empty() || api_key.trim().is_empty() {
            return Err(ClientError::InvalidConfig(
                "LLM base URL and API key are both required".to_string(),
            ));
        }
        reqwest::Url::parse(&base_url).map_err(|e| {
            ClientError::InvalidConfig(format!("invalid LLM base URL {:?}: {}", base_url, e))
        })?;
        let http = Client::builder().timeout(LLM_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }

    pub async fn polish_text(&self, req: &PolishTextRequest) -> Result<PolishTextResponse> {
        let body = ChatRequest {
            model: &req.model,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: render_prompt(&req.prompt, &req.text),
            }],
        };
        let url = format!("{}/chat/completions", self.base_url);
        tracing::debug!(
            "Polishing {} chars with model {:?} via {} (key {})",
            req.text.chars().count(),
            req.model,
            url,
            ocdesk_observability::redact_text(&self.api_key)
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ClientError::Llm(format!(
                "API request failed with status {}: {}",
                status.as_u16(),
                text
            )));
        }

        let parsed: ChatResponse = serde_json::from_str(&text)?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::Llm("no choices in response".to_string()))?;

        Ok(PolishTextResponse {
            polished_text: choice.message.content,
        })
    }
}
