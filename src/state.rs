use chrono::{DateTime, Utc};
use std::fmt;
use tracing::{debug, info};

use crate::config::Settings;
use crate::error::{AppError, Result};
use crate::message::{display_time, Message, Role};

/// Identifies one streamed reply. Chunks always name the stream they belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(u64);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

/// The in-flight assistant reply.
#[derive(Debug, Clone)]
pub struct StreamAccumulator {
    id: StreamId,
    content: String,
    started_at: DateTime<Utc>,
    display_time: String,
}

impl StreamAccumulator {
    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn display_time(&self) -> &str {
        &self.display_time
    }
}

/// Conversation thread plus the session around it.
///
/// Fields are private: every change goes through a method so the
/// single-live-stream rule and the "history holds only finished messages"
/// rule cannot be bypassed.
#[derive(Debug, Default)]
pub struct ConversationState {
    settings: Settings,
    conversation_id: String,
    is_connected: bool,
    messages: Vec<Message>,
    pending: Option<StreamAccumulator>,
    next_stream_id: u64,
}

impl ConversationState {
    pub fn new(settings: Settings, conversation_id: String, messages: Vec<Message>) -> Self {
        Self {
            settings,
            conversation_id,
            messages,
            ..Self::default()
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Empty until the server has assigned one.
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn is_connected(&self) -> bool {
        self.is_connected
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn pending(&self) -> Option<&StreamAccumulator> {
        self.pending.as_ref()
    }

    pub fn is_streaming(&self) -> bool {
        self.pending.is_some()
    }

    /// Returns true when the flag flipped.
    pub fn set_connected(&mut self, connected: bool) -> bool {
        let changed = self.is_connected != connected;
        self.is_connected = connected;
        changed
    }

    // --- Settings ---

    pub fn set_server_url(&mut self, server_url: &str) -> bool {
        let server_url = server_url.trim().trim_end_matches('/');
        if self.settings.server_url == server_url {
            return false;
        }
        self.settings.server_url = server_url.to_string();
        true
    }

    pub fn set_temperature(&mut self, temperature: f64) {
        self.settings.temperature = temperature;
    }

    pub fn set_use_streaming(&mut self, use_streaming: bool) {
        self.settings.use_streaming = use_streaming;
    }

    // --- Thread ---

    pub fn append_user_message(&mut self, text: &str) -> Result<&Message> {
        if !self.is_connected {
            return Err(AppError::NotConnected);
        }
        self.messages.push(Message::user(text));
        Ok(self.last_message())
    }

    pub fn begin_stream(&mut self) -> Result<StreamId> {
        if let Some(live) = &self.pending {
            debug!(live = %live.id, "refusing to start a second stream");
            return Err(AppError::ConcurrentStream);
        }
        self.next_stream_id += 1;
        let id = StreamId(self.next_stream_id);
        let started_at = Utc::now();
        self.pending = Some(StreamAccumulator {
            id,
            content: String::new(),
            started_at,
            display_time: display_time(started_at),
        });
        debug!(%id, "stream started");
        Ok(id)
    }

    pub fn append_stream_chunk(&mut self, id: StreamId, text: &str) -> Result<()> {
        let accumulator = self.live_stream(id)?;
        accumulator.content.push_str(text);
        Ok(())
    }

    /// Commits the accumulated reply as an assistant message.
    pub fn finalize_stream(&mut self, id: StreamId) -> Result<&Message> {
        self.live_stream(id)?;
        let accumulator = self.pending.take().ok_or(AppError::NoActiveStream)?;
        info!(%id, chars = accumulator.content.chars().count(), "stream finished");
        self.messages.push(Message::with_time(
            Role::Assistant,
            accumulator.content,
            accumulator.display_time,
            Utc::now().timestamp_millis(),
        ));
        Ok(self.last_message())
    }

    /// Drops the accumulated reply without committing it. Stale ids are ignored.
    pub fn rollback_stream(&mut self, id: StreamId) -> bool {
        match &self.pending {
            Some(live) if live.id == id => {
                debug!(%id, discarded = live.content.len(), "stream rolled back");
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    /// Rolls back whatever stream is live.
    pub fn cancel_stream(&mut self) -> Option<StreamId> {
        let id = self.pending.as_ref()?.id;
        self.rollback_stream(id);
        Some(id)
    }

    /// Appends a non-streamed reply. Returns true when the server moved us to a new conversation id.
    pub fn commit_regular_reply(&mut self, text: &str, new_conversation_id: Option<&str>) -> bool {
        self.messages.push(Message::assistant(text));
        match new_conversation_id {
            Some(id) => self.set_conversation_id(id),
            None => false,
        }
    }

    /// Adopts a server-issued id. Returns true when it changed.
    pub fn set_conversation_id(&mut self, id: &str) -> bool {
        if id.is_empty() || id == self.conversation_id {
            return false;
        }
        info!(conversation = %id, "conversation id updated");
        self.conversation_id = id.to_string();
        true
    }

    /// Replaces the thread with messages from the server or an imported file.
    pub fn replace_history(&mut self, messages: Vec<Message>) {
        self.pending = None;
        self.messages = messages;
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.conversation_id.clear();
        self.pending = None;
    }

    fn live_stream(&mut self, id: StreamId) -> Result<&mut StreamAccumulator> {
        match self.pending.as_mut() {
            None => Err(AppError::NoActiveStream),
            Some(live) if live.id != id => Err(AppError::ConcurrentStream),
            Some(live) => Ok(live),
        }
    }

    fn last_message(&self) -> &Message {
        // Only called right after a push
        &self.messages[self.messages.len() - 1]
    }
}
