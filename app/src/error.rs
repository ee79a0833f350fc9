// ocdesk application errors
use ocdesk_client::ClientError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("LLM client not initialized: set llm.baseURL and llm.apiKey in the settings file")]
    LlmNotConfigured,

    #[error("Event sink error: {0}")]
    Sink(String),
}

// UI consumers receive errors as their display string
impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_display_string() {
        let err = AppError::Client(ClientError::Api {
            status: 500,
            body: "boom".into(),
        });
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            serde_json::json!("unexpected status code: 500, response body: boom")
        );
    }
}
