use clap::Parser;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

pub const DEFAULT_SERVER_URL: &str = "http://localhost:8000";
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_USE_STREAMING: bool = true;

// --- Endpoints ---
pub const HEALTH_ENDPOINT: &str = "/health";
pub const CHAT_ENDPOINT: &str = "/chat/";
pub const CHAT_STREAM_ENDPOINT: &str = "/chat/stream";
pub const CHAT_HISTORY_ENDPOINT: &str = "/chat/history";

// --- Timing ---
pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);
pub const CHAT_TIMEOUT: Duration = Duration::from_secs(60);
pub const STREAM_TIMEOUT: Duration = Duration::from_secs(300); // Long timeout for generation

// --- Storage Keys ---
pub const KEY_SERVER_URL: &str = "aiChatServerUrl";
pub const KEY_CONVERSATION_ID: &str = "aiChatConversationId";
pub const KEY_TEMPERATURE: &str = "aiChatTemperature";
pub const KEY_USE_STREAMING: &str = "aiChatUseStreaming";
pub const KEY_CHAT_HISTORY: &str = "aiChatHistory";

pub const STORE_FILE_NAME: &str = "storage.json";
pub const LOG_FILE_NAME: &str = "streamchat.log";
pub const APP_DIR_NAME: &str = "streamchat";

pub const WELCOME_MESSAGE: &str = "Hello! I'm your AI assistant. How can I help you today?";

/// User-adjustable settings that survive restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub server_url: String,
    pub temperature: f64,
    pub use_streaming: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            use_streaming: DEFAULT_USE_STREAMING,
        }
    }
}

#[derive(Parser, Debug, Default)]
#[command(name = "streamchat", version, about = "Terminal chat client for streaming chat servers")]
pub struct Cli {
    /// Base URL of the chat server (saved for later runs)
    #[arg(long)]
    pub server_url: Option<String>,

    /// Sampling temperature sent with every message
    #[arg(long)]
    pub temperature: Option<f64>,

    /// Use the plain request/response endpoint instead of streaming
    #[arg(long)]
    pub no_stream: bool,

    /// Directory for stored history, settings and the log file
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Keep everything in memory; nothing is written to disk (logs go to stderr with --ask, nowhere otherwise)
    #[arg(long)]
    pub ephemeral: bool,

    /// Import a previously exported history file on startup
    #[arg(long, value_name = "FILE")]
    pub import: Option<PathBuf>,

    /// Send one message, print the reply and exit
    #[arg(long, value_name = "MESSAGE")]
    pub ask: Option<String>,
}

impl Cli {
    /// Applies command line overrides on top of stored settings.
    /// Returns true when anything changed.
    pub fn apply_to(&self, settings: &mut Settings) -> bool {
        let before = settings.clone();
        if let Some(url) = &self.server_url {
            settings.server_url = url.trim_end_matches('/').to_string();
        }
        if let Some(temperature) = self.temperature {
            settings.temperature = temperature;
        }
        if self.no_stream {
            settings.use_streaming = false;
        }
        *settings != before
    }

    pub fn resolve_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }
}

pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(format!(".{}", APP_DIR_NAME)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_stored_settings() {
        let cli = Cli::parse_from(["streamchat", "--server-url", "http://chat.local:9000/", "--no-stream"]);
        let mut settings = Settings::default();

        assert!(cli.apply_to(&mut settings));
        assert_eq!(settings.server_url, "http://chat.local:9000");
        assert!(!settings.use_streaming);
        assert_eq!(settings.temperature, DEFAULT_TEMPERATURE);
    }

    #[test]
    fn cli_without_flags_changes_nothing() {
        let cli = Cli::parse_from(["streamchat"]);
        let mut settings = Settings::default();
        assert!(!cli.apply_to(&mut settings));
    }
}
