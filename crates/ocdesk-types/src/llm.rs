use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolishTextRequest {
    pub text: String,
    /// Overrides the configured prompt when non-empty.
    #[serde(default)]
    pub prompt: String,
    /// Overrides the configured model when non-empty.
    #[serde(default)]
    pub model: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolishTextResponse {
    pub polished_text: String,
}
