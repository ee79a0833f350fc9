use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Title used when a session is created without one.
pub const DEFAULT_SESSION_TITLE: &str = "New Session";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTime {
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub updated: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(rename = "projectID", default)]
    pub project_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "parentID", default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub time: SessionTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share: Option<Share>,
}

impl Session {
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_millis(self.time.updated)
    }

    pub fn is_child(&self) -> bool {
        self.parent_id.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub title: String,
}

impl CreateSessionRequest {
    /// Blank titles are replaced with [`DEFAULT_SESSION_TITLE`].
    pub fn new(title: impl Into<String>) -> Self {
        let title = title.into();
        let title = if title.trim().is_empty() {
            DEFAULT_SESSION_TITLE.to_string()
        } else {
            title
        };
        Self { title }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSessionRequest {
    pub title: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_session_with_optional_fields_absent() {
        let session: Session = serde_json::from_str(
            r#"{"id":"ses_1","projectID":"prj","title":"Refactor","time":{"created":1,"updated":1700000000000}}"#,
        )
        .unwrap();
        assert_eq!(session.title, "Refactor");
        assert!(!session.is_child());
        assert!(session.share.is_none());
        assert_eq!(session.updated_at().unwrap().timestamp(), 1_700_000_000);
        let value = serde_json::to_value(&session).unwrap();
        assert!(value.get("share").is_none());
        assert!(value.get("parentID").is_none());
    }

    #[test]
    fn blank_titles_get_the_default() {
        assert_eq!(CreateSessionRequest::new("").title, DEFAULT_SESSION_TITLE);
        assert_eq!(CreateSessionRequest::new("   ").title, DEFAULT_SESSION_TITLE);
        assert_eq!(CreateSessionRequest::new("Bug hunt").title, "Bug hunt");
    }
}
