//! History export and import files.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::info;

use crate::config::Settings;
use crate::error::{AppError, Result};
use crate::message::Message;
use crate::persistence::Snapshot;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExportFile {
    pub timestamp: String,
    pub conversation_id: String,
    pub messages: Vec<Message>,
    pub settings: Settings,
}

impl ExportFile {
    pub fn new(snapshot: &Snapshot, at: DateTime<Utc>) -> Self {
        Self {
            timestamp: at.to_rfc3339(),
            conversation_id: snapshot.conversation_id.clone(),
            messages: snapshot.messages.clone(),
            settings: snapshot.settings.clone(),
        }
    }
}

/// `chat-history-YYYY-MM-DD.json`
pub fn default_export_name(at: DateTime<Utc>) -> String {
    format!("chat-history-{}.json", at.format("%Y-%m-%d"))
}

/// Writes the export to `target`; a directory gets the default file name.
pub fn write_export(target: &Path, snapshot: &Snapshot) -> Result<PathBuf> {
    let now = Utc::now();
    let path = if target.is_dir() { target.join(default_export_name(now)) } else { target.to_path_buf() };
    let content = serde_json::to_string_pretty(&ExportFile::new(snapshot, now))?;
    fs::write(&path, content)?;
    info!(path = %path.display(), messages = snapshot.messages.len(), "history exported");
    Ok(path)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportedHistory {
    pub messages: Vec<Message>,
    pub conversation_id: Option<String>,
}

/// Only `messages` is required; `conversationId` is adopted when present.
pub fn parse_import(content: &str) -> Result<ImportedHistory> {
    let value: Value = serde_json::from_str(content).map_err(|err| AppError::InvalidFormat(err.to_string()))?;

    let entries = value
        .get("messages")
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::InvalidFormat("`messages` must be an array".to_string()))?;

    let messages = entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            serde_json::from_value::<Message>(entry.clone())
                .map_err(|err| AppError::InvalidFormat(format!("message {}: {}", index, err)))
        })
        .collect::<Result<Vec<_>>>()?;

    let conversation_id = value
        .get("conversationId")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string);

    Ok(ImportedHistory {
        messages,
        conversation_id,
    })
}

pub fn read_import(path: &Path) -> Result<ImportedHistory> {
    let content = fs::read_to_string(path)?;
    parse_import(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;

    #[test]
    fn minimal_import() {
        let imported = parse_import(r#"{"messages":[{"type":"user","content":"hi"}],"conversationId":"abc"}"#).unwrap();
        assert_eq!(imported.messages.len(), 1);
        assert_eq!(imported.messages[0].content, "hi");
        assert_eq!(imported.messages[0].role, Role::User);
        assert_eq!(imported.conversation_id.as_deref(), Some("abc"));
    }

    #[test]
    fn messages_must_be_an_array() {
        for bad in [r#"{}"#, r#"{"messages":"hi"}"#, r#"{"messages":{"0":1}}"#, "not json"] {
            assert!(matches!(parse_import(bad), Err(AppError::InvalidFormat(_))), "{}", bad);
        }
    }

    #[test]
    fn malformed_entry_is_rejected() {
        let result = parse_import(r#"{"messages":[{"type":"robot","content":"beep"}]}"#);
        assert!(matches!(result, Err(AppError::InvalidFormat(_))));
    }

    #[test]
    fn export_file_can_be_imported_again() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = Snapshot {
            messages: vec![Message::user("one"), Message::assistant("two")],
            conversation_id: "conv-7".to_string(),
            settings: Settings::default(),
        };

        let path = write_export(dir.path(), &snapshot).unwrap();
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("chat-history-"));

        let raw: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["settings"]["useStreaming"], true);

        let imported = read_import(&path).unwrap();
        assert_eq!(imported.messages, snapshot.messages);
        assert_eq!(imported.conversation_id.as_deref(), Some("conv-7"));
    }
}
