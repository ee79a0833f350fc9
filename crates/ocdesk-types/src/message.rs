use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;

use crate::decode::{DecodeError, PartDecodeMode, PayloadSource};
use crate::part::Part;

const FAMILY: &str = "message";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTime {
    #[serde(default)]
    pub created: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMessage {
    pub id: String,
    #[serde(rename = "sessionID")]
    pub session_id: String,
    #[serde(default)]
    pub time: UserTime,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantTime {
    #[serde(default)]
    pub created: i64,
    /// Absent while the assistant is still generating.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub id: String,
    #[serde(rename = "sessionID")]
    pub session_id: String,
    #[serde(rename = "modelID", default)]
    pub model_id: String,
    #[serde(rename = "providerID", default)]
    pub provider_id: String,
    #[serde(default)]
    pub time: AssistantTime,
}

impl AssistantMessage {
    pub fn is_complete(&self) -> bool {
        self.time.completed.is_some()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_millis(self.time.created)
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.time.completed.and_then(DateTime::<Utc>::from_timestamp_millis)
    }
}

/// A chat message, routed on its `role` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    User(UserMessage),
    Assistant(AssistantMessage),
}

impl Message {
    /// Decodes a message from raw JSON. Roles other than `user` and
    /// `assistant` are rejected with [`DecodeError::UnknownDiscriminator`].
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        Self::decode_from(raw)
    }

    pub fn from_value(value: &Value) -> Result<Self, DecodeError> {
        Self::decode_from(value)
    }

    fn decode_from<S: PayloadSource>(source: S) -> Result<Self, DecodeError> {
        let role = source.discriminator(FAMILY, "role")?;
        match role.as_str() {
            "user" => source.decode(FAMILY).map(Message::User),
            "assistant" => source.decode(FAMILY).map(Message::Assistant),
            _ => Err(DecodeError::UnknownDiscriminator {
                family: FAMILY,
                field: "role",
                value: role,
            }),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Message::User(m) => &m.id,
            Message::Assistant(m) => &m.id,
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            Message::User(m) => &m.session_id,
            Message::Assistant(m) => &m.session_id,
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Message::User(_) => Role::User,
            Message::Assistant(_) => Role::Assistant,
        }
    }

    pub fn created_ms(&self) -> i64 {
        match self {
            Message::User(m) => m.time.created,
            Message::Assistant(m) => m.time.created,
        }
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Message::from_value(&value).map_err(serde::de::Error::custom)
    }
}

/// One message and its parts, in display order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageWithParts {
    pub info: Message,
    pub parts: Vec<Part>,
}

#[derive(Deserialize)]
struct MessageWithPartsWire<'a> {
    #[serde(borrow)]
    info: Option<&'a RawValue>,
    #[serde(borrow, default)]
    parts: Vec<&'a RawValue>,
}

impl MessageWithParts {
    pub fn new(info: Message) -> Self {
        Self {
            info,
            parts: Vec::new(),
        }
    }

    pub fn decode_with(raw: &str, mode: PartDecodeMode) -> Result<Self, DecodeError> {
        let wire: MessageWithPartsWire<'_> =
            serde_json::from_str(raw).map_err(|source| DecodeError::Malformed {
                family: FAMILY,
                source,
            })?;
        let info = wire.info.ok_or(DecodeError::MissingField {
            family: FAMILY,
            field: "info",
        })?;
        let info = Message::decode(info.get())?;
        let parts = wire
            .parts
            .into_iter()
            .map(|part| Part::decode(part.get(), mode))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { info, parts })
    }

    /// Decodes a JSON array of messages, as returned by the session message listing.
    pub fn decode_list(raw: &str, mode: PartDecodeMode) -> Result<Vec<Self>, DecodeError> {
        let items: Vec<&RawValue> =
            serde_json::from_str(raw).map_err(|source| DecodeError::Malformed {
                family: FAMILY,
                source,
            })?;
        items
            .into_iter()
            .map(|item| Self::decode_with(item.get(), mode))
            .collect()
    }

    pub fn part(&self, part_id: &str) -> Option<&Part> {
        self.parts.iter().find(|p| p.id() == part_id)
    }

    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text(t) => Some(t.text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

impl<'de> Deserialize<'de> for MessageWithParts {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Owned {
            info: Message,
            #[serde(default)]
            parts: Vec<Part>,
        }
        let owned = Owned::deserialize(deserializer)?;
        Ok(Self {
            info: owned.info,
            parts: owned.parts,
        })
    }
}
