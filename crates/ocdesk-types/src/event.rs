use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::decode::{DecodeError, PartDecodeMode, PayloadSource};
use crate::message::Message;
use crate::part::Part;
use crate::session::Session;

const FAMILY: &str = "envelope";

pub const MESSAGE_UPDATED: &str = "message.updated";
pub const MESSAGE_PART_UPDATED: &str = "message.part.updated";
pub const MESSAGE_REMOVED: &str = "message.removed";
pub const SESSION_UPDATED: &str = "session.updated";
pub const SESSION_DELETED: &str = "session.deleted";
pub const SESSION_IDLE: &str = "session.idle";
pub const SESSION_ERROR: &str = "session.error";

/// Outer payload of one SSE `data:` line: a type tag plus an open property bag.
///
/// The stream layer never looks inside `properties`; [`Envelope::to_server_event`]
/// is the consumer-side view for the event types the application understands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub properties: Map<String, Value>,
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Map<String, Value>, D::Error> {
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Envelope {
    pub fn new(event_type: impl Into<String>, properties: Map<String, Value>) -> Self {
        Self {
            event_type: event_type.into(),
            properties,
        }
    }

    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        raw.discriminator(FAMILY, "type")?;
        raw.decode(FAMILY)
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    fn required(&self, key: &'static str) -> Result<&Value, DecodeError> {
        self.properties
            .get(key)
            .filter(|v| !v.is_null())
            .ok_or(DecodeError::MissingField {
                family: FAMILY,
                field: key,
            })
    }

    fn string_property(&self, key: &str) -> Option<String> {
        self.properties
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Decodes the property bag for the event types the UI consumes.
    /// Unrecognized types come back as [`ServerEvent::Other`].
    pub fn to_server_event(&self, mode: PartDecodeMode) -> Result<ServerEvent, DecodeError> {
        match self.event_type.as_str() {
            MESSAGE_UPDATED => Message::from_value(self.required("info")?).map(ServerEvent::MessageUpdated),
            MESSAGE_PART_UPDATED => Ok(ServerEvent::MessagePartUpdated {
                part: Part::from_value(self.required("part")?, mode)?,
                delta: self.string_property("delta"),
            }),
            MESSAGE_REMOVED => Ok(ServerEvent::MessageRemoved {
                session_id: self.string_property("sessionID").unwrap_or_default(),
                message_id: self.string_property("messageID").ok_or(DecodeError::MissingField {
                    family: FAMILY,
                    field: "messageID",
                })?,
            }),
            SESSION_UPDATED => self.required("info")?.decode(FAMILY).map(ServerEvent::SessionUpdated),
            SESSION_DELETED => self.required("info")?.decode(FAMILY).map(ServerEvent::SessionDeleted),
            SESSION_IDLE => Ok(ServerEvent::SessionIdle {
                session_id: self.string_property("sessionID").unwrap_or_default(),
            }),
            SESSION_ERROR => Ok(ServerEvent::SessionError {
                session_id: self.string_property("sessionID"),
                error: self.properties.get("error").cloned(),
            }),
            _ => Ok(ServerEvent::Other(self.clone())),
        }
    }
}

/// Typed view over an [`Envelope`].
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    MessageUpdated(Message),
    MessagePartUpdated { part: Part, delta: Option<String> },
    MessageRemoved { session_id: String, message_id: String },
    SessionUpdated(Session),
    SessionDeleted(Session),
    SessionIdle { session_id: String },
    SessionError { session_id: Option<String>, error: Option<Value> },
    Other(Envelope),
}

impl ServerEvent {
    pub fn session_id(&self) -> Option<&str> {
        match self {
            ServerEvent::MessageUpdated(m) => Some(m.session_id()),
            ServerEvent::MessagePartUpdated { part, .. } => part.session_id(),
            ServerEvent::MessageRemoved { session_id, .. }
            | ServerEvent::SessionIdle { session_id } => Some(session_id),
            ServerEvent::SessionUpdated(s) | ServerEvent::SessionDeleted(s) => Some(&s.id),
            ServerEvent::SessionError { session_id, .. } => session_id.as_deref(),
            ServerEvent::Other(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use serde_json::json;

    #[test]
    fn decode_requires_a_type() {
        let err = Envelope::decode(r#"{"properties":{}}"#).unwrap_err();
        assert!(matches!(err, DecodeError::MissingDiscriminator { field: "type", .. }));
        assert!(Envelope::decode("{bad json}").is_err());
    }

    #[test]
    fn missing_or_null_properties_become_empty() {
        let a = Envelope::decode(r#"{"type":"server.connected"}"#).unwrap();
        let b = Envelope::decode(r#"{"type":"server.connected","properties":null}"#).unwrap();
        assert!(a.properties.is_empty());
        assert_eq!(a, b);
    }

    #[test]
    fn reencoding_keeps_type_and_properties() {
        let raw = json!({
            "type": "message.part.updated",
            "properties": {
                "part": {"id": "p", "type": "text", "text": "hi"},
                "delta": "hi",
                "nested": {"a": [1, 2, {"b": null}]}
            }
        });
        let env = Envelope::decode(&raw.to_string()).unwrap();
        assert_eq!(env.property("delta"), Some(&json!("hi")));
        assert_eq!(serde_json::to_value(&env).unwrap(), raw);
    }

    #[test]
    fn message_updated_view() {
        let env = Envelope::decode(
            r#"{"type":"message.updated","properties":{"info":{"id":"m1","sessionID":"s","role":"assistant","modelID":"x","providerID":"y","time":{"created":1}}}}"#,
        )
        .unwrap();
        let ServerEvent::MessageUpdated(msg) = env.to_server_event(PartDecodeMode::Lenient).unwrap() else {
            panic!("expected message.updated");
        };
        assert_eq!(msg.id(), "m1");
        assert_eq!(msg.role(), Role::Assistant);
    }

    #[test]
    fn part_updated_view_carries_delta() {
        let env = Envelope::decode(
            r#"{"type":"message.part.updated","properties":{"part":{"id":"p","sessionID":"s","messageID":"m","type":"text","text":"Hel"},"delta":"l"}}"#,
        )
        .unwrap();
        match env.to_server_event(PartDecodeMode::Strict).unwrap() {
            ServerEvent::MessagePartUpdated { part, delta } => {
                assert_eq!(part.id(), "p");
                assert_eq!(delta.as_deref(), Some("l"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn view_rejects_unknown_role() {
        let env = Envelope::new(
            MESSAGE_UPDATED,
            json!({"info": {"id":"m","sessionID":"s","role":"moderator"}})
                .as_object()
                .cloned()
                .unwrap(),
        );
        let err = env.to_server_event(PartDecodeMode::Lenient).unwrap_err();
        assert_eq!(err.unknown_value(), Some("moderator"));
    }

    #[test]
    fn unknown_types_pass_through() {
        let env = Envelope::decode(r#"{"type":"lsp.client.diagnostics","properties":{"path":"a.rs"}}"#).unwrap();
        assert_eq!(
            env.to_server_event(PartDecodeMode::Strict).unwrap(),
            ServerEvent::Other(env.clone())
        );
    }

    #[test]
    fn session_updated_view() {
        let env = Envelope::decode(
            r#"{"type":"session.updated","properties":{"info":{"id":"ses_1","projectID":"p","title":"Hello","time":{"created":1,"updated":2}}}}"#,
        )
        .unwrap();
        let event = env.to_server_event(PartDecodeMode::Lenient).unwrap();
        assert_eq!(event.session_id(), Some("ses_1"));
        let ServerEvent::SessionUpdated(session) = event else {
            panic!("expected session.updated");
        };
        assert_eq!(session.title, "Hello");
    }
}
