use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use std::{cell::Cell, path::PathBuf, sync::Arc};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, warn};

use crate::chat::{run_job, ChatClient, Job, Update};
use crate::command::{parse_input, Command, Input, HELP_TEXT};
use crate::error::AppError;
use crate::event::AppEvent;
use crate::health::HealthTrigger;
use crate::transport::ChatTransport;

// --- Application State ---
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

pub struct App {
    pub input_mode: InputMode,
    pub input_buffer: String,
    pub status_message: String,
    pub last_error: Option<String>,
    pub follow_tail: bool,
    pub scroll_offset: u16,
    pub max_scroll: Cell<u16>, // Written by the renderer each frame
    pub should_quit: bool,
    pub client: ChatClient,
    transport: Arc<dyn ChatTransport>,
    event_sender: mpsc::Sender<AppEvent>,
    health_triggers: mpsc::Sender<HealthTrigger>,
    job: Option<JoinHandle<()>>,
    export_dir: PathBuf,
}

impl App {
    pub fn new(
        client: ChatClient,
        transport: Arc<dyn ChatTransport>,
        event_sender: mpsc::Sender<AppEvent>,
        health_triggers: mpsc::Sender<HealthTrigger>,
        export_dir: PathBuf,
    ) -> Self {
        App {
            input_mode: InputMode::Normal,
            input_buffer: String::new(),
            status_message: "Checking server...".to_string(),
            last_error: None,
            follow_tail: true,
            scroll_offset: 0,
            max_scroll: Cell::new(0),
            should_quit: false,
            client,
            transport,
            event_sender,
            health_triggers,
            job: None,
            export_dir,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.client.is_busy()
    }

    pub fn submit_input(&mut self) {
        let input = self.input_buffer.clone();
        if input.trim().is_empty() {
            self.status_message = "Cannot send an empty prompt.".to_string();
            return;
        }

        match parse_input(&input) {
            Ok(Input::Message(text)) => self.send_message(&text),
            Ok(Input::Command(command)) => {
                self.input_buffer.clear();
                self.run_command(command);
            }
            Err(err) => self.show_error(err),
        }
    }

    fn send_message(&mut self, text: &str) {
        self.last_error = None;
        match self.client.submit(text) {
            Ok(Some(job)) => {
                // Input stays put on rejection so nothing the user typed is lost
                self.input_buffer.clear();
                self.input_mode = InputMode::Normal;
                self.follow_tail = true;
                self.status_message = "Waiting for the assistant...".to_string();
                self.spawn_job(job);
            }
            Ok(None) => self.status_message = "Cannot send an empty prompt.".to_string(),
            Err(err) => self.show_error(err),
        }
        self.surface_storage_warning();
    }

    fn spawn_job(&mut self, job: Job) {
        let transport = self.transport.clone();
        let event_sender = self.event_sender.clone();
        // Results come back through the event channel
        self.job = Some(tokio::spawn(run_job(transport, job, event_sender)));
    }

    pub fn run_command(&mut self, command: Command) {
        debug!(?command, "running command");
        match command {
            Command::Clear => {
                self.abort_job();
                self.client.clear();
                self.last_error = None;
                self.status_message = "Chat cleared.".to_string();
            }
            Command::Export(target) => {
                let target = target.unwrap_or_else(|| self.export_dir.clone());
                match self.client.export_file(&target) {
                    Ok(path) => self.status_message = format!("History exported to {}", path.display()),
                    Err(err) => self.show_error(err),
                }
            }
            Command::Import(path) => match self.client.import_file(&path) {
                Ok(count) => {
                    self.follow_tail = true;
                    self.status_message = format!("Imported {} messages.", count);
                }
                Err(err) => self.show_error(err),
            },
            Command::Server(url) => {
                if self.client.set_server_url(&url) {
                    self.transport.set_server_url(&self.client.state().settings().server_url);
                    self.status_message = format!("Server set to {}. Checking...", url);
                    self.request_health_check(HealthTrigger::ServerChanged);
                }
            }
            Command::Temperature(value) => {
                self.client.set_temperature(value);
                self.status_message = format!("Temperature set to {}", value);
            }
            Command::Streaming(enabled) => {
                self.client.set_use_streaming(enabled);
                self.status_message = format!("Streaming {}", if enabled { "on" } else { "off" });
            }
            Command::History => match self.client.history_job() {
                Ok(job) => {
                    self.status_message = "Loading history from server...".to_string();
                    self.spawn_job(job);
                }
                Err(err) => self.show_error(err),
            },
            Command::Resume(id) => match self.client.resume_job(&id) {
                Ok(job) => {
                    self.status_message = format!("Loading conversation {}...", id);
                    self.spawn_job(job);
                }
                Err(err) => self.show_error(err),
            },
            Command::Cancel => self.cancel_stream(),
            Command::Info => {
                let info = self.client.info();
                self.status_message = format!(
                    "v{} | {} messages | {} | {} | conversation '{}' | up {}s",
                    info.version,
                    info.messages,
                    if info.connected { "connected" } else { "disconnected" },
                    info.server_url,
                    info.conversation_id,
                    info.uptime.as_secs()
                );
            }
            Command::Help => self.status_message = HELP_TEXT.to_string(),
        }
        self.surface_storage_warning();
    }

    pub fn cancel_stream(&mut self) {
        if self.client.cancel_stream().is_some() {
            self.abort_job();
            self.status_message = "Response cancelled.".to_string();
        } else {
            self.status_message = "Nothing to cancel.".to_string();
        }
    }

    fn abort_job(&mut self) {
        if let Some(job) = self.job.take() {
            job.abort();
        }
    }

    /// Applies a background report to the conversation.
    pub fn handle_event(&mut self, event: AppEvent) {
        match self.client.apply(event) {
            Ok(Update::StreamProgress) => self.status_message = "Receiving response...".to_string(),
            Ok(Update::ReplyCommitted) => {
                self.job = None;
                self.status_message = "Response received. Press 'Enter' to type (Ctrl+S to send).".to_string();
            }
            Ok(Update::HistoryReplaced(count)) => {
                self.job = None;
                self.follow_tail = true;
                self.status_message = format!("Loaded {} messages from the server.", count);
            }
            Ok(Update::Connection(true)) => {
                self.status_message = format!("Connected to {}", self.client.state().settings().server_url);
            }
            Ok(Update::Connection(false)) => {
                self.status_message = "Server unreachable. Retrying...".to_string();
            }
            Ok(Update::Nothing) => {}
            Err(err) => {
                self.job = None;
                self.show_error(err);
            }
        }
        self.surface_storage_warning();
    }

    pub fn request_health_check(&self, trigger: HealthTrigger) {
        if let Err(err) = self.health_triggers.try_send(trigger) {
            debug!(?trigger, error = %err, "health check already queued");
        }
    }

    fn show_error(&mut self, err: AppError) {
        let text = format!("Error: {}", err);
        if err.is_request_failure() {
            warn!(error = %err, "request failed");
            self.last_error = Some(text.clone());
        }
        self.status_message = text;
    }

    fn surface_storage_warning(&mut self) {
        if let Some(warning) = self.client.take_storage_warning() {
            self.status_message = format!("Error: could not save history ({})", warning);
        }
    }

    pub fn scroll_down(&mut self, amount: u16) {
        let max = self.max_scroll.get();
        let current = if self.follow_tail { max } else { self.scroll_offset };
        self.scroll_offset = current.saturating_add(amount).min(max);
        self.follow_tail = self.scroll_offset >= max;
    }

    pub fn scroll_up(&mut self, amount: u16) {
        let current = if self.follow_tail { self.max_scroll.get() } else { self.scroll_offset };
        self.scroll_offset = current.saturating_sub(amount);
        self.follow_tail = false;
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }
        match self.input_mode {
            InputMode::Normal => match key.code {
                KeyCode::Char('q') => self.should_quit = true,
                KeyCode::Char('j') | KeyCode::Down => self.scroll_down(1),
                KeyCode::Char('k') | KeyCode::Up => self.scroll_up(1),
                KeyCode::PageDown => self.scroll_down(10),
                KeyCode::PageUp => self.scroll_up(10),
                KeyCode::End => self.follow_tail = true,
                KeyCode::Char('r') => {
                    self.status_message = "Checking server...".to_string();
                    self.request_health_check(HealthTrigger::Recheck);
                }
                KeyCode::Char('c') | KeyCode::Esc => self.cancel_stream(),
                KeyCode::Enter | KeyCode::Char('i') => {
                    self.input_mode = InputMode::Editing;
                    self.status_message = "Editing... Enter: Newline, Ctrl+S: Send, Esc: Stop editing. /help for commands.".to_string();
                }
                _ => {}
            },
            InputMode::Editing => match (key.code, key.modifiers) {
                (KeyCode::Char('s'), KeyModifiers::CONTROL) => self.submit_input(),
                (KeyCode::Enter, _) => self.input_buffer.push('\n'),
                (KeyCode::Char(c), modifier) if modifier == KeyModifiers::NONE || modifier == KeyModifiers::SHIFT => {
                    self.input_buffer.push(c);
                }
                (KeyCode::Backspace, _) => {
                    self.input_buffer.pop();
                }
                (KeyCode::Esc, _) => {
                    self.input_mode = InputMode::Normal;
                    self.status_message = "Press 'Enter' to type, 'q' to quit.".to_string();
                }
                _ => {}
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::message::Message;
    use crate::persistence::Persistence;
    use crate::transport::{ByteStream, ChatReply, ChatRequest, HistoryEntry, HttpTransport};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn app_with(
        transport: Arc<dyn ChatTransport>,
    ) -> (App, mpsc::Receiver<AppEvent>, mpsc::Receiver<HealthTrigger>) {
        let (event_tx, event_rx) = mpsc::channel(8);
        let (trigger_tx, trigger_rx) = mpsc::channel(8);
        let client = ChatClient::new(Persistence::in_memory());
        let app = App::new(client, transport, event_tx, trigger_tx, PathBuf::from("."));
        (app, event_rx, trigger_rx)
    }

    fn app() -> (App, mpsc::Receiver<AppEvent>, mpsc::Receiver<HealthTrigger>) {
        app_with(Arc::new(HttpTransport::new("http://127.0.0.1:9")))
    }

    /// A server that accepts requests and never answers.
    #[derive(Default)]
    struct SilentServer {
        stream_opened: Arc<AtomicBool>,
        stream_dropped: Arc<AtomicBool>,
    }

    struct SetOnDrop(Arc<AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ChatTransport for SilentServer {
        async fn check_health(&self) -> bool {
            true
        }

        async fn send_chat(&self, _request: &ChatRequest) -> Result<ChatReply> {
            std::future::pending().await
        }

        async fn open_stream(&self, _request: &ChatRequest) -> Result<ByteStream> {
            let _guard = SetOnDrop(self.stream_dropped.clone());
            self.stream_opened.store(true, Ordering::SeqCst);
            std::future::pending().await
        }

        async fn fetch_history(&self, _conversation_id: &str) -> Result<Vec<HistoryEntry>> {
            std::future::pending().await
        }

        fn set_server_url(&self, _server_url: &str) {}
    }

    async fn wait_for(flag: &AtomicBool) -> bool {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !flag.load(Ordering::SeqCst) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .is_ok()
    }

    fn type_and_submit(app: &mut App, text: &str) {
        app.input_buffer = text.to_string();
        app.submit_input();
    }

    fn press(app: &mut App, code: KeyCode, modifiers: KeyModifiers) {
        app.handle_key(KeyEvent::new(code, modifiers));
    }

    #[tokio::test]
    async fn sending_while_disconnected_keeps_the_input() {
        let (mut app, _events, _triggers) = app();
        press(&mut app, KeyCode::Enter, KeyModifiers::NONE);
        for c in "hello".chars() {
            press(&mut app, KeyCode::Char(c), KeyModifiers::NONE);
        }
        press(&mut app, KeyCode::Char('s'), KeyModifiers::CONTROL);

        assert_eq!(app.input_buffer, "hello");
        assert!(app.status_message.contains("No connection"));
        assert!(app.client.state().messages().is_empty());
        assert!(app.job.is_none());
    }

    #[tokio::test]
    async fn commands_run_without_a_connection() {
        let (mut app, _events, mut triggers) = app();
        app.input_buffer = "/server http://10.1.1.1:8000".to_string();
        app.submit_input();

        assert!(app.input_buffer.is_empty());
        assert_eq!(app.client.state().settings().server_url, "http://10.1.1.1:8000");
        assert_eq!(triggers.try_recv().unwrap(), HealthTrigger::ServerChanged);
    }

    #[tokio::test]
    async fn history_is_refused_while_streaming_and_cancel_stops_the_stream() {
        let server = Arc::new(SilentServer::default());
        let (opened, dropped) = (server.stream_opened.clone(), server.stream_dropped.clone());
        let (mut app, _events, _triggers) = app_with(server);
        app.client.set_connected(true);

        type_and_submit(&mut app, "hello");
        assert!(wait_for(&opened).await);

        type_and_submit(&mut app, "/history");
        assert!(app.status_message.starts_with("Error"));
        assert!(app.client.state().is_streaming());

        type_and_submit(&mut app, "/cancel");
        assert!(!app.client.state().is_streaming());
        assert!(app.job.is_none());
        assert!(wait_for(&dropped).await);
    }

    #[tokio::test]
    async fn messages_wait_for_a_resumed_conversation() {
        let (mut app, _events, _triggers) = app_with(Arc::new(SilentServer::default()));
        app.client.set_connected(true);

        type_and_submit(&mut app, "/resume abc");
        assert!(app.client.is_loading_history());

        type_and_submit(&mut app, "hello");
        assert_eq!(app.input_buffer, "hello");
        assert!(app.status_message.contains("still loading"));
        assert!(app.client.state().messages().is_empty());

        app.handle_event(AppEvent::HistoryLoaded {
            conversation_id: "abc".to_string(),
            messages: vec![Message::user("earlier"), Message::assistant("reply")],
        });
        assert!(!app.client.is_loading_history());
        assert_eq!(app.client.state().conversation_id(), "abc");
        assert_eq!(app.client.state().messages().len(), 2);

        app.submit_input();
        assert!(app.input_buffer.is_empty());
        assert_eq!(app.client.state().messages().len(), 3);
        assert!(app.client.state().is_streaming());
    }

    #[tokio::test]
    async fn scrolling_up_stops_following() {
        let (mut app, _events, _triggers) = app();
        app.max_scroll.set(20);
        app.scroll_up(5);
        assert_eq!(app.scroll_offset, 15);
        assert!(!app.follow_tail);

        app.scroll_down(50);
        assert_eq!(app.scroll_offset, 20);
        assert!(app.follow_tail);
    }
}
