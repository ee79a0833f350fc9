use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::value::RawValue;
use serde_json::Value;

use crate::decode::{DecodeError, PartDecodeMode, PayloadSource};

const FAMILY: &str = "part";

/// Rendered when a structured tool state cannot be serialized.
pub const UNKNOWN_TOOL_STATE: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextPart {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "sessionID", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(rename = "messageID", default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default)]
    pub text: String,
}

/// Model reasoning output. Same shape as a text part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningPart {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "sessionID", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(rename = "messageID", default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default)]
    pub text: String,
}

/// Tool call state: the server sends either a bare status string
/// (`"running"`, `"completed"`, `"error"`) or a structured object with
/// `status`, `input`, `output` and friends. Both shapes are kept as received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ToolState {
    Status(String),
    Structured(Value),
}

impl Default for ToolState {
    fn default() -> Self {
        ToolState::Structured(Value::Null)
    }
}

impl ToolState {
    /// String view of the state. Never fails.
    pub fn to_status_string(&self) -> String {
        match self {
            ToolState::Status(s) => s.clone(),
            ToolState::Structured(value) => {
                serde_json::to_string(value).unwrap_or_else(|_| UNKNOWN_TOOL_STATE.to_string())
            }
        }
    }

    /// The status keyword, read from either shape.
    pub fn status(&self) -> Option<&str> {
        match self {
            ToolState::Status(s) => Some(s),
            ToolState::Structured(value) => value.get("status").and_then(Value::as_str),
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, ToolState::Structured(_))
    }
}

impl<'de> Deserialize<'de> for ToolState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::String(status) => ToolState::Status(status),
            other => ToolState::Structured(other),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPart {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "sessionID", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(rename = "messageID", default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(rename = "callID", default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(default)]
    pub tool: String,
    #[serde(default)]
    pub state: ToolState,
}

/// A part whose `type` has no dedicated variant. The raw JSON is kept so it
/// can be re-decoded once the kind is understood.
#[derive(Debug, Clone)]
pub struct OpaquePart {
    pub kind: String,
    pub id: Option<String>,
    pub session_id: Option<String>,
    pub message_id: Option<String>,
    pub raw: Box<RawValue>,
}

impl OpaquePart {
    pub fn raw_json(&self) -> &str {
        self.raw.get()
    }

    pub fn redecode<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(self.raw.get())
    }
}

impl PartialEq for OpaquePart {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.raw.get() == other.raw.get()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(TextPart),
    Reasoning(ReasoningPart),
    Tool(ToolPart),
    Opaque(OpaquePart),
}

#[derive(Deserialize)]
struct PartIds {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "sessionID", default)]
    session_id: Option<String>,
    #[serde(rename = "messageID", default)]
    message_id: Option<String>,
}

impl Part {
    pub fn decode(raw: &str, mode: PartDecodeMode) -> Result<Self, DecodeError> {
        Self::decode_from(raw, mode)
    }

    pub fn from_value(value: &Value, mode: PartDecodeMode) -> Result<Self, DecodeError> {
        Self::decode_from(value, mode)
    }

    fn decode_from<S: PayloadSource>(source: S, mode: PartDecodeMode) -> Result<Self, DecodeError> {
        let kind = source.discriminator(FAMILY, "type")?;
        match kind.as_str() {
            "text" => source.decode(FAMILY).map(Part::Text),
            "reasoning" => source.decode(FAMILY).map(Part::Reasoning),
            "tool" => source.decode(FAMILY).map(Part::Tool),
            _ if mode == PartDecodeMode::Strict => Err(DecodeError::UnknownDiscriminator {
                family: FAMILY,
                field: "type",
                value: kind,
            }),
            _ => {
                let ids: PartIds = source.decode(FAMILY)?;
                Ok(Part::Opaque(OpaquePart {
                    kind,
                    id: ids.id,
                    session_id: ids.session_id,
                    message_id: ids.message_id,
                    raw: source.to_raw(FAMILY)?,
                }))
            }
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            Part::Text(_) => "text",
            Part::Reasoning(_) => "reasoning",
            Part::Tool(_) => "tool",
            Part::Opaque(p) => &p.kind,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Part::Text(p) => &p.id,
            Part::Reasoning(p) => &p.id,
            Part::Tool(p) => &p.id,
            Part::Opaque(p) => p.id.as_deref().unwrap_or(""),
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            Part::Text(p) => p.session_id.as_deref(),
            Part::Reasoning(p) => p.session_id.as_deref(),
            Part::Tool(p) => p.session_id.as_deref(),
            Part::Opaque(p) => p.session_id.as_deref(),
        }
    }

    pub fn message_id(&self) -> Option<&str> {
        match self {
            Part::Text(p) => p.message_id.as_deref(),
            Part::Reasoning(p) => p.message_id.as_deref(),
            Part::Tool(p) => p.message_id.as_deref(),
            Part::Opaque(p) => p.message_id.as_deref(),
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum KnownPartRef<'a> {
    Text(&'a TextPart),
    Reasoning(&'a ReasoningPart),
    Tool(&'a ToolPart),
}

impl Serialize for Part {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Part::Text(p) => KnownPartRef::Text(p).serialize(serializer),
            Part::Reasoning(p) => KnownPartRef::Reasoning(p).serialize(serializer),
            Part::Tool(p) => KnownPartRef::Tool(p).serialize(serializer),
            Part::Opaque(p) => p.raw.serialize(serializer),
        }
    }
}

/// Always decodes leniently; use [`Part::decode`] for strict decoding.
impl<'de> Deserialize<'de> for Part {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Part::from_value(&value, PartDecodeMode::Lenient).map_err(serde::de::Error::custom)
    }
}
