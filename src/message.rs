use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "ai", alias = "assistant")]
    Assistant,
}

impl Role {
    /// Server history uses free-form type names; anything but "user" came from the model.
    pub fn from_history_type(kind: &str) -> Self {
        if kind.eq_ignore_ascii_case("user") {
            Role::User
        } else {
            Role::Assistant
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "You",
            Role::Assistant => "Assistant",
        }
    }
}

/// One entry of the conversation thread, in the same shape it is stored on disk:
/// `{type, content, time, timestamp}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Message {
    #[serde(rename = "type")]
    pub role: Role,
    pub content: String,
    #[serde(rename = "time", default)]
    pub display_time: String,
    #[serde(rename = "timestamp", default)]
    pub created_at: i64, // Milliseconds since the Unix epoch
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            role,
            content: content.into(),
            display_time: display_time(now),
            created_at: now.timestamp_millis(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Builds a message whose times were fixed elsewhere (stream start, server history).
    pub fn with_time(role: Role, content: impl Into<String>, display_time: String, created_at: i64) -> Self {
        Self {
            role,
            content: content.into(),
            display_time,
            created_at,
        }
    }
}

/// Wall-clock "HH:MM" in the local zone.
pub fn display_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_stored_field_names() {
        let message = Message::with_time(Role::Assistant, "hola", "10:42".to_string(), 1_700_000_000_000);
        let json = serde_json::to_value(&message).unwrap();

        assert_eq!(json["type"], "ai");
        assert_eq!(json["content"], "hola");
        assert_eq!(json["time"], "10:42");
        assert_eq!(json["timestamp"], 1_700_000_000_000i64);
    }

    #[test]
    fn accepts_minimal_and_assistant_spelling() {
        let user: Message = serde_json::from_str(r#"{"type":"user","content":"hi"}"#).unwrap();
        assert_eq!(user.role, Role::User);
        assert_eq!(user.display_time, "");
        assert_eq!(user.created_at, 0);

        let reply: Message = serde_json::from_str(r#"{"type":"assistant","content":"hey"}"#).unwrap();
        assert_eq!(reply.role, Role::Assistant);
    }

    #[test]
    fn history_types_map_to_roles() {
        assert_eq!(Role::from_history_type("user"), Role::User);
        assert_eq!(Role::from_history_type("assistant"), Role::Assistant);
        assert_eq!(Role::from_history_type("conversation"), Role::Assistant);
    }
}
