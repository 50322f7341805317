//! The conversation controller: the single owner of [`ConversationState`].
//!
//! User actions go in through [`ChatClient::submit`] and friends, which
//! validate and return a [`Job`] for the network. Jobs run as background tasks
//! ([`run_job`]) and report back with [`AppEvent`]s, which the owner feeds to
//! [`ChatClient::apply`]. Persistence is written through after every change to
//! completed history.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::archive::{self, ImportedHistory};
use crate::assembler::StreamAssembler;
use crate::error::{AppError, Result};
use crate::event::AppEvent;
use crate::message::Message;
use crate::persistence::{Persistence, Snapshot};
use crate::state::{ConversationState, StreamId};
use crate::transport::{ChatRequest, ChatTransport, HistoryEntry};

pub const EVENT_BUFFER: usize = 100;

/// Network work requested by the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    Chat { request: ChatRequest },
    Stream { id: StreamId, request: ChatRequest },
    History { conversation_id: String },
}

/// What an applied event changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    Nothing,
    StreamProgress,
    ReplyCommitted,
    HistoryReplaced(usize),
    Connection(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppInfo {
    pub version: &'static str,
    pub messages: usize,
    pub connected: bool,
    pub server_url: String,
    pub conversation_id: String,
    pub uptime: Duration,
}

pub struct ChatClient {
    state: ConversationState,
    persistence: Persistence,
    awaiting_reply: bool,
    loading_history: bool,
    storage_warning: Option<String>,
    started: Instant,
}

impl ChatClient {
    /// Restores the last saved session.
    pub fn new(persistence: Persistence) -> Self {
        let snapshot = persistence.load();
        info!(
            messages = snapshot.messages.len(),
            server = %snapshot.settings.server_url,
            "session restored"
        );
        Self {
            state: ConversationState::new(snapshot.settings, snapshot.conversation_id, snapshot.messages),
            persistence,
            awaiting_reply: false,
            loading_history: false,
            storage_warning: None,
            started: Instant::now(),
        }
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot::of(&self.state)
    }

    /// True while any request is outstanding: a reply (streamed or not) or a history load.
    /// Only one job runs at a time.
    pub fn is_busy(&self) -> bool {
        self.awaiting_reply || self.loading_history || self.state.is_streaming()
    }

    pub fn is_loading_history(&self) -> bool {
        self.loading_history
    }

    /// Last storage failure, if any; reading it clears it.
    pub fn take_storage_warning(&mut self) -> Option<String> {
        self.storage_warning.take()
    }

    /// Records the user's message and returns the request to run.
    /// Blank input is ignored with `Ok(None)`.
    pub fn submit(&mut self, input: &str) -> Result<Option<Job>> {
        let text = input.trim();
        if text.is_empty() {
            return Ok(None);
        }
        self.ensure_idle()?;

        self.state.append_user_message(text)?;
        self.persist_history();

        let settings = self.state.settings();
        let request = ChatRequest::new(text, settings.temperature, self.state.conversation_id());
        if settings.use_streaming {
            let id = self.state.begin_stream()?;
            Ok(Some(Job::Stream { id, request }))
        } else {
            self.awaiting_reply = true;
            Ok(Some(Job::Chat { request }))
        }
    }

    /// Applies one background report. An `Err` is a failure the user should
    /// see; the state has already been put back in order when it is returned.
    pub fn apply(&mut self, event: AppEvent) -> Result<Update> {
        match event {
            AppEvent::StreamChunk { id, text } => match self.state.append_stream_chunk(id, &text) {
                Ok(()) => Ok(Update::StreamProgress),
                Err(err) => {
                    debug!(%id, error = %err, "dropping chunk for a stream that is no longer live");
                    Ok(Update::Nothing)
                }
            },
            AppEvent::StreamDone { id } => match self.state.finalize_stream(id) {
                Ok(_) => {
                    self.persist_history();
                    Ok(Update::ReplyCommitted)
                }
                Err(err) => {
                    debug!(%id, error = %err, "completion for a stream that is no longer live");
                    Ok(Update::Nothing)
                }
            },
            AppEvent::StreamFailed { id, error } => {
                if self.state.rollback_stream(id) {
                    warn!(%id, %error, "streamed reply failed");
                    Err(error)
                } else {
                    debug!(%id, %error, "failure for a stream that is no longer live");
                    Ok(Update::Nothing)
                }
            }
            AppEvent::ReplyReceived(reply) => {
                if !self.awaiting_reply {
                    debug!("dropping reply nobody is waiting for");
                    return Ok(Update::Nothing);
                }
                self.awaiting_reply = false;
                let changed = self.state.commit_regular_reply(&reply.response, reply.conversation_id.as_deref());
                self.persist_history();
                if changed {
                    self.persist_conversation_id();
                }
                Ok(Update::ReplyCommitted)
            }
            AppEvent::ReplyFailed(error) => {
                self.awaiting_reply = false;
                warn!(%error, "chat request failed");
                Err(error)
            }
            AppEvent::HistoryLoaded {
                conversation_id,
                messages,
            } => {
                if !self.loading_history {
                    debug!(conversation = %conversation_id, "dropping history nobody is waiting for");
                    return Ok(Update::Nothing);
                }
                self.loading_history = false;
                let count = messages.len();
                self.state.replace_history(messages);
                self.state.set_conversation_id(&conversation_id);
                self.persist_history();
                self.persist_conversation_id();
                Ok(Update::HistoryReplaced(count))
            }
            AppEvent::HistoryFailed(error) => {
                if !self.loading_history {
                    debug!(%error, "dropping history failure nobody is waiting for");
                    return Ok(Update::Nothing);
                }
                self.loading_history = false;
                warn!(%error, "loading history failed");
                Err(error)
            }
            AppEvent::Health(healthy) => {
                if self.state.set_connected(healthy) {
                    Ok(Update::Connection(healthy))
                } else {
                    Ok(Update::Nothing)
                }
            }
        }
    }

    /// Abandons the live stream through the rollback path.
    pub fn cancel_stream(&mut self) -> Option<StreamId> {
        let id = self.state.cancel_stream()?;
        info!(%id, "stream cancelled");
        Some(id)
    }

    pub fn clear(&mut self) {
        self.state.clear();
        self.awaiting_reply = false;
        self.loading_history = false;
        self.persist_history();
        self.persist_conversation_id();
        info!("chat cleared");
    }

    pub fn set_connected(&mut self, connected: bool) -> bool {
        self.state.set_connected(connected)
    }

    // --- Settings ---

    /// Returns true when the URL changed; the caller re-points the transport.
    pub fn set_server_url(&mut self, server_url: &str) -> bool {
        let changed = self.state.set_server_url(server_url);
        if changed {
            self.persist_settings();
        }
        changed
    }

    pub fn set_temperature(&mut self, temperature: f64) {
        self.state.set_temperature(temperature);
        self.persist_settings();
    }

    pub fn set_use_streaming(&mut self, use_streaming: bool) {
        self.state.set_use_streaming(use_streaming);
        self.persist_settings();
    }

    /// Writes every stored key from the current state.
    pub fn save_all(&mut self) {
        if let Err(err) = self.persistence.save(&Snapshot::of(&self.state)) {
            self.storage_warning = Some(err.to_string());
        }
    }

    // --- History ---

    /// Fetches the current conversation from the server.
    pub fn history_job(&mut self) -> Result<Job> {
        self.ensure_idle()?;
        let conversation_id = match self.state.conversation_id() {
            "" => return Err(AppError::Command("No conversation yet".to_string())),
            id => id.to_string(),
        };
        self.loading_history = true;
        Ok(Job::History { conversation_id })
    }

    /// Switches to an existing server conversation by its id.
    pub fn resume_job(&mut self, conversation_id: &str) -> Result<Job> {
        let conversation_id = conversation_id.trim();
        if conversation_id.is_empty() {
            return Err(AppError::Command("Usage: /resume <conversation id>".to_string()));
        }
        self.ensure_idle()?;
        self.loading_history = true;
        Ok(Job::History {
            conversation_id: conversation_id.to_string(),
        })
    }

    pub fn import_history(&mut self, imported: ImportedHistory) -> Result<usize> {
        self.ensure_idle()?;
        let count = imported.messages.len();
        self.state.replace_history(imported.messages);
        if let Some(id) = imported.conversation_id {
            self.state.set_conversation_id(&id);
            self.persist_conversation_id();
        }
        self.persist_history();
        info!(messages = count, "history imported");
        Ok(count)
    }

    pub fn import_file(&mut self, path: &Path) -> Result<usize> {
        let imported = archive::read_import(path)?;
        self.import_history(imported)
    }

    pub fn export_file(&self, target: &Path) -> Result<PathBuf> {
        archive::write_export(target, &Snapshot::of(&self.state))
    }

    pub fn info(&self) -> AppInfo {
        AppInfo {
            version: env!("CARGO_PKG_VERSION"),
            messages: self.state.messages().len(),
            connected: self.state.is_connected(),
            server_url: self.state.settings().server_url.clone(),
            conversation_id: self.state.conversation_id().to_string(),
            uptime: self.started.elapsed(),
        }
    }

    /// Submits `input` and drives the request to completion on the current task.
    pub async fn send_message(&mut self, transport: Arc<dyn ChatTransport>, input: &str) -> Result<()> {
        let Some(job) = self.submit(input)? else {
            return Ok(());
        };

        let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
        let mut outcome = Ok(());
        let worker = run_job(transport, job, tx);
        let apply = async {
            while let Some(event) = rx.recv().await {
                if let Err(err) = self.apply(event) {
                    outcome = Err(err);
                }
            }
        };
        tokio::join!(worker, apply);
        outcome
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.loading_history {
            return Err(AppError::HistoryLoading);
        }
        if self.is_busy() {
            return Err(AppError::ConcurrentStream);
        }
        Ok(())
    }

    fn persist_history(&mut self) {
        if let Err(err) = self.persistence.save_history(self.state.messages()) {
            self.storage_warning = Some(err.to_string());
        }
    }

    fn persist_conversation_id(&mut self) {
        if let Err(err) = self.persistence.save_conversation_id(self.state.conversation_id()) {
            self.storage_warning = Some(err.to_string());
        }
    }

    fn persist_settings(&mut self) {
        if let Err(err) = self.persistence.save_settings(self.state.settings()) {
            self.storage_warning = Some(err.to_string());
        }
    }
}

/// Runs one job against the server, reporting through `events`.
/// Stops quietly if the receiving side has gone away.
pub async fn run_job(transport: Arc<dyn ChatTransport>, job: Job, events: mpsc::Sender<AppEvent>) {
    match job {
        Job::Chat { request } => {
            let event = match transport.send_chat(&request).await {
                Ok(reply) => AppEvent::ReplyReceived(reply),
                Err(err) => AppEvent::ReplyFailed(err),
            };
            let _ = events.send(event).await;
        }
        Job::Stream { id, request } => {
            let body = match transport.open_stream(&request).await {
                Ok(body) => body,
                Err(error) => {
                    let _ = events.send(AppEvent::StreamFailed { id, error }).await;
                    return;
                }
            };

            let mut assembler = StreamAssembler::new(body);
            loop {
                let event = match assembler.next_increment().await {
                    Ok(Some(text)) => AppEvent::StreamChunk { id, text },
                    Ok(None) => AppEvent::StreamDone { id },
                    Err(error) => AppEvent::StreamFailed { id, error },
                };
                let finished = !matches!(event, AppEvent::StreamChunk { .. });
                if events.send(event).await.is_err() {
                    debug!(%id, "event receiver gone, abandoning stream");
                    return;
                }
                if finished {
                    return;
                }
            }
        }
        Job::History { conversation_id } => {
            let event = match transport.fetch_history(&conversation_id).await {
                Ok(entries) => AppEvent::HistoryLoaded {
                    conversation_id,
                    messages: entries.into_iter().map(HistoryEntry::into_message).collect::<Vec<Message>>(),
                },
                Err(err) => AppEvent::HistoryFailed(err),
            };
            let _ = events.send(event).await;
        }
    }
}
