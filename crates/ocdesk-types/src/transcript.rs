//! Live view of one session's messages, folded from stream events.

use serde::Serialize;

use crate::event::ServerEvent;
use crate::message::{Message, MessageWithParts};
use crate::part::Part;

/// What [`Transcript::apply`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptChange {
    Ignored,
    Changed,
    /// An assistant message reported completion. Callers typically refetch
    /// the message list and [`Transcript::sync`] to pick up the final state.
    Completed,
}

#[derive(Debug, Clone, Serialize)]
pub struct Transcript {
    session_id: String,
    messages: Vec<MessageWithParts>,
}

impl Transcript {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            messages: Vec::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn messages(&self) -> &[MessageWithParts] {
        &self.messages
    }

    pub fn message(&self, id: &str) -> Option<&MessageWithParts> {
        self.messages.iter().find(|m| m.info.id() == id)
    }

    /// Replaces the transcript with a freshly fetched message list.
    pub fn sync(&mut self, messages: Vec<MessageWithParts>) {
        self.messages = messages;
    }

    pub fn apply(&mut self, event: &ServerEvent) -> TranscriptChange {
        match event {
            ServerEvent::MessageUpdated(info) => self.upsert_message(info),
            ServerEvent::MessagePartUpdated { part, delta } => {
                self.update_part(part, delta.as_deref())
            }
            ServerEvent::MessageRemoved {
                session_id,
                message_id,
            } if *session_id == self.session_id => {
                let before = self.messages.len();
                self.messages.retain(|m| m.info.id() != message_id);
                if self.messages.len() == before {
                    TranscriptChange::Ignored
                } else {
                    TranscriptChange::Changed
                }
            }
            _ => TranscriptChange::Ignored,
        }
    }

    fn upsert_message(&mut self, info: &Message) -> TranscriptChange {
        if info.session_id() != self.session_id {
            return TranscriptChange::Ignored;
        }
        match self.messages.iter_mut().find(|m| m.info.id() == info.id()) {
            Some(existing) => existing.info = info.clone(),
            None => self.messages.push(MessageWithParts::new(info.clone())),
        }
        match info {
            Message::Assistant(a) if a.is_complete() => TranscriptChange::Completed,
            _ => TranscriptChange::Changed,
        }
    }

    fn update_part(&mut self, part: &Part, delta: Option<&str>) -> TranscriptChange {
        if part.session_id() != Some(self.session_id.as_str()) {
            return TranscriptChange::Ignored;
        }
        let Some(message_id) = part.message_id() else {
            return TranscriptChange::Ignored;
        };
        // Parts never create messages; message.updated does.
        let Some(message) = self.messages.iter_mut().find(|m| m.info.id() == message_id) else {
            tracing::debug!(message_id, part_id = part.id(), "part update for unknown message");
            return TranscriptChange::Ignored;
        };
        if matches!(message.info, Message::User(_)) {
            return TranscriptChange::Ignored;
        }

        let Some(existing) = message.parts.iter_mut().find(|p| p.id() == part.id()) else {
            message.parts.push(part.clone());
            return TranscriptChange::Changed;
        };
        match (existing, part) {
            (Part::Text(current), Part::Text(incoming)) => match delta {
                Some(delta) if !delta.is_empty() => current.text.push_str(delta),
                _ => current.text = incoming.text.clone(),
            },
            (Part::Reasoning(current), Part::Reasoning(incoming)) => {
                current.text = incoming.text.clone();
            }
            (slot, incoming)
                if matches!(
                    (&*slot, incoming),
                    (Part::Tool(_), Part::Tool(_)) | (Part::Opaque(_), Part::Opaque(_))
                ) =>
            {
                *slot = incoming.clone();
            }
            _ => return TranscriptChange::Ignored,
        }
        TranscriptChange::Changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::PartDecodeMode;
    use crate::event::Envelope;

    fn event(raw: &str) -> ServerEvent {
        Envelope::decode(raw)
            .unwrap()
            .to_server_event(PartDecodeMode::Lenient)
            .unwrap()
    }

    fn assistant(id: &str, completed: bool) -> ServerEvent {
        let time = if completed {
            r#"{"created":1,"completed":2}"#
        } else {
            r#"{"created":1}"#
        };
        event(&format!(
            r#"{{"type":"message.updated","properties":{{"info":{{"id":"{id}","sessionID":"s1","role":"assistant","modelID":"m","providerID":"p","time":{time}}}}}}}"#
        ))
    }

    fn text_part(id: &str, message: &str, text: &str, delta: Option<&str>) -> ServerEvent {
        let delta = delta
            .map(|d| format!(r#","delta":"{d}""#))
            .unwrap_or_default();
        event(&format!(
            r#"{{"type":"message.part.updated","properties":{{"part":{{"id":"{id}","sessionID":"s1","messageID":"{message}","type":"text","text":"{text}"}}{delta}}}}}"#
        ))
    }

    #[test]
    fn deltas_accumulate_into_text() {
        let mut t = Transcript::new("s1");
        assert_eq!(t.apply(&assistant("a1", false)), TranscriptChange::Changed);
        t.apply(&text_part("p1", "a1", "He", Some("He")));
        t.apply(&text_part("p1", "a1", "Hel", Some("l")));
        t.apply(&text_part("p1", "a1", "Hello", Some("lo")));
        assert_eq!(t.message("a1").unwrap().text(), "Hello");

        t.apply(&text_part("p1", "a1", "Hello!", None));
        assert_eq!(t.message("a1").unwrap().text(), "Hello!");
    }

    #[test]
    fn parts_for_unknown_messages_are_dropped() {
        let mut t = Transcript::new("s1");
        assert_eq!(
            t.apply(&text_part("p1", "nope", "x", None)),
            TranscriptChange::Ignored
        );
        assert!(t.messages().is_empty());
    }

    #[test]
    fn user_messages_ignore_part_updates() {
        let mut t = Transcript::new("s1");
        t.apply(&event(
            r#"{"type":"message.updated","properties":{"info":{"id":"u1","sessionID":"s1","role":"user","time":{"created":1}}}}"#,
        ));
        assert_eq!(
            t.apply(&text_part("p1", "u1", "hi", None)),
            TranscriptChange::Ignored
        );
        assert!(t.message("u1").unwrap().parts.is_empty());
    }

    #[test]
    fn other_sessions_are_ignored() {
        let mut t = Transcript::new("other");
        assert_eq!(t.apply(&assistant("a1", false)), TranscriptChange::Ignored);
    }

    #[test]
    fn tool_state_is_replaced_and_order_kept() {
        let mut t = Transcript::new("s1");
        t.apply(&assistant("a1", false));
        t.apply(&text_part("p1", "a1", "Running ls", None));
        let tool = |state: &str| {
            event(&format!(
                r#"{{"type":"message.part.updated","properties":{{"part":{{"id":"t1","sessionID":"s1","messageID":"a1","type":"tool","tool":"bash","state":{state}}}}}}}"#
            ))
        };
        t.apply(&tool(r#""running""#));
        t.apply(&tool(r#"{"status":"completed","output":"ok"}"#));

        let msg = t.message("a1").unwrap();
        let ids: Vec<_> = msg.parts.iter().map(|p| p.id()).collect();
        assert_eq!(ids, vec!["p1", "t1"]);
        let Part::Tool(tool) = &msg.parts[1] else {
            panic!("expected tool");
        };
        assert_eq!(tool.state.status(), Some("completed"));
    }

    #[test]
    fn completion_is_reported_and_sync_replaces() {
        let mut t = Transcript::new("s1");
        t.apply(&assistant("a1", false));
        assert_eq!(t.apply(&assistant("a1", true)), TranscriptChange::Completed);
        assert_eq!(t.messages().len(), 1);

        t.sync(Vec::new());
        assert!(t.messages().is_empty());
    }

    #[test]
    fn removal_drops_the_message() {
        let mut t = Transcript::new("s1");
        t.apply(&assistant("a1", false));
        let removed = event(
            r#"{"type":"message.removed","properties":{"sessionID":"s1","messageID":"a1"}}"#,
        );
        assert_eq!(t.apply(&removed), TranscriptChange::Changed);
        assert_eq!(t.apply(&removed), TranscriptChange::Ignored);
    }
}
