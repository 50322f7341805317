//! Durable local storage for the conversation.
//!
//! Data lives in a flat string key/value store (the same keys a browser client
//! keeps in local storage). Reads never fail: missing or corrupt values fall
//! back to defaults. Write failures are reported but never fatal; the
//! in-memory state stays authoritative.

use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

use crate::config::{
    Settings, KEY_CHAT_HISTORY, KEY_CONVERSATION_ID, KEY_SERVER_URL, KEY_TEMPERATURE, KEY_USE_STREAMING,
};
use crate::error::{AppError, Result};
use crate::message::Message;
use crate::state::ConversationState;

pub trait KeyValueStore: Send {
    fn get_item(&self, key: &str) -> Option<String>;
    fn set_item(&mut self, key: &str, value: &str) -> Result<()>;
    fn remove_item(&mut self, key: &str) -> Result<()>;
}

// --- File Store ---

/// All keys in one JSON object file. Every write replaces the file atomically.
pub struct FileStore {
    path: PathBuf,
    items: BTreeMap<String, String>,
}

impl FileStore {
    /// Opens the store, starting empty when the file is missing or unreadable.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let items = match fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => BTreeMap::new(),
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|err| {
                warn!(path = %path.display(), error = %err, "storage file is corrupt, starting empty");
                BTreeMap::new()
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no storage file yet");
                BTreeMap::new()
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "storage file unreadable, starting empty");
                BTreeMap::new()
            }
        };
        Self { path, items }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&self.items)?;
        let tmp_path = self.path.with_extension("json.tmp");
        let mut tmp_file = File::create(&tmp_path)?;
        tmp_file.write_all(content.as_bytes())?;
        tmp_file.sync_all()?;
        drop(tmp_file);
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get_item(&self, key: &str) -> Option<String> {
        self.items.get(key).cloned()
    }

    fn set_item(&mut self, key: &str, value: &str) -> Result<()> {
        self.items.insert(key.to_string(), value.to_string());
        self.flush()
    }

    fn remove_item(&mut self, key: &str) -> Result<()> {
        if self.items.remove(key).is_some() {
            self.flush()?;
        }
        Ok(())
    }
}

// --- Memory Store ---

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    items: BTreeMap<String, String>,
    read_only: bool,
}

impl MemoryStore {
    /// A store whose writes all fail, like a full quota.
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Self::default()
        }
    }

    pub fn items(&self) -> &BTreeMap<String, String> {
        &self.items
    }
}

impl KeyValueStore for MemoryStore {
    fn get_item(&self, key: &str) -> Option<String> {
        self.items.get(key).cloned()
    }

    fn set_item(&mut self, key: &str, value: &str) -> Result<()> {
        if self.read_only {
            return Err(AppError::Persistence("storage quota exceeded".to_string()));
        }
        self.items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&mut self, key: &str) -> Result<()> {
        if self.read_only {
            return Err(AppError::Persistence("storage is read-only".to_string()));
        }
        self.items.remove(key);
        Ok(())
    }
}

// --- Bridge ---

/// Everything that survives a restart.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    pub messages: Vec<Message>,
    pub conversation_id: String,
    pub settings: Settings,
}

impl Snapshot {
    /// Completed messages only: a live stream is never part of a snapshot.
    pub fn of(state: &ConversationState) -> Self {
        Self {
            messages: state.messages().to_vec(),
            conversation_id: state.conversation_id().to_string(),
            settings: state.settings().clone(),
        }
    }
}

pub struct Persistence {
    store: Box<dyn KeyValueStore>,
}

impl Persistence {
    pub fn new(store: Box<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryStore::default()))
    }

    pub fn load(&self) -> Snapshot {
        let defaults = Settings::default();

        let server_url = self
            .store
            .get_item(KEY_SERVER_URL)
            .filter(|url| !url.is_empty())
            .unwrap_or(defaults.server_url);

        let temperature = match self.store.get_item(KEY_TEMPERATURE) {
            Some(raw) => raw.parse::<f64>().unwrap_or_else(|err| {
                warn!(value = %raw, error = %err, "stored temperature is not a number, using default");
                defaults.temperature
            }),
            None => defaults.temperature,
        };

        let use_streaming = self
            .store
            .get_item(KEY_USE_STREAMING)
            .map(|raw| raw == "true")
            .unwrap_or(defaults.use_streaming);

        let messages = match self.store.get_item(KEY_CHAT_HISTORY) {
            Some(raw) => serde_json::from_str::<Vec<Message>>(&raw).unwrap_or_else(|err| {
                warn!(error = %err, "stored chat history is corrupt, starting with an empty thread");
                Vec::new()
            }),
            None => Vec::new(),
        };

        let conversation_id = self.store.get_item(KEY_CONVERSATION_ID).unwrap_or_default();
        debug!(messages = messages.len(), conversation = %conversation_id, "state loaded");

        Snapshot {
            messages,
            conversation_id,
            settings: Settings {
                server_url,
                temperature,
                use_streaming,
            },
        }
    }

    pub fn save(&mut self, snapshot: &Snapshot) -> Result<()> {
        self.save_settings(&snapshot.settings)?;
        self.save_conversation_id(&snapshot.conversation_id)?;
        self.save_history(&snapshot.messages)
    }

    pub fn save_history(&mut self, messages: &[Message]) -> Result<()> {
        let raw = serde_json::to_string(messages)?;
        self.write(KEY_CHAT_HISTORY, &raw)
    }

    pub fn save_conversation_id(&mut self, conversation_id: &str) -> Result<()> {
        if conversation_id.is_empty() {
            return self.store.remove_item(KEY_CONVERSATION_ID).map_err(|err| persistence_error(KEY_CONVERSATION_ID, err));
        }
        self.write(KEY_CONVERSATION_ID, conversation_id)
    }

    pub fn save_settings(&mut self, settings: &Settings) -> Result<()> {
        self.write(KEY_SERVER_URL, &settings.server_url)?;
        self.write(KEY_TEMPERATURE, &settings.temperature.to_string())?;
        self.write(KEY_USE_STREAMING, if settings.use_streaming { "true" } else { "false" })
    }

    fn write(&mut self, key: &str, value: &str) -> Result<()> {
        self.store.set_item(key, value).map_err(|err| persistence_error(key, err))
    }
}

fn persistence_error(key: &str, err: AppError) -> AppError {
    warn!(key, error = %err, "failed to write storage");
    match err {
        AppError::Persistence(_) => err,
        other => AppError::Persistence(format!("{}: {}", key, other)),
    }
}
