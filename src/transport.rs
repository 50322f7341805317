use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use futures::{stream::BoxStream, StreamExt, TryStreamExt};
use reqwest::{Client, Response, Url};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::{
    CHAT_ENDPOINT, CHAT_HISTORY_ENDPOINT, CHAT_STREAM_ENDPOINT, CHAT_TIMEOUT, HEALTH_ENDPOINT, HEALTH_TIMEOUT,
    STREAM_TIMEOUT,
};
use crate::error::{AppError, Result};
use crate::message::{display_time, Message, Role};

/// Raw response body of a streaming chat. Read failures after the response
/// started arrive as `Err` items.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

// --- Chat API Structures ---
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub message: String,
    pub temperature: f64,
    pub use_context: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>, temperature: f64, conversation_id: &str) -> Self {
        Self {
            message: message.into(),
            temperature,
            use_context: true,
            conversation_id: (!conversation_id.is_empty()).then(|| conversation_id.to_string()),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ChatReply {
    pub response: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[derive(Deserialize, Debug)]
struct HistoryResponse {
    #[serde(default)]
    messages: Vec<HistoryEntry>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    #[serde(rename = "type", default)]
    pub kind: String,
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<serde_json::Value>,
}

impl HistoryEntry {
    pub fn into_message(self) -> Message {
        let role = Role::from_history_type(&self.kind);
        let (time_label, created_at) = match self.timestamp.as_ref().and_then(parse_timestamp) {
            Some(at) => (display_time(at), at.timestamp_millis()),
            None => {
                // Keep whatever the server sent as the label, ordering comes from position anyway
                let label = match &self.timestamp {
                    Some(serde_json::Value::String(raw)) => raw.clone(),
                    _ => String::new(),
                };
                (label, Utc::now().timestamp_millis())
            }
        };
        Message::with_time(role, self.content, time_label, created_at)
    }
}

fn parse_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|at| at.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| Utc.from_utc_datetime(&naive))
            }),
        serde_json::Value::Number(number) => {
            let raw = number.as_f64()?;
            // Seconds and milliseconds both show up in the wild
            let millis = if raw > 1e11 { raw } else { raw * 1000.0 };
            Utc.timestamp_millis_opt(millis as i64).single()
        }
        _ => None,
    }
}

/// Everything the client needs from the chat server.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Network failures and non-2xx answers both count as unhealthy.
    async fn check_health(&self) -> bool;
    async fn send_chat(&self, request: &ChatRequest) -> Result<ChatReply>;
    /// Fails like `send_chat` until the response head arrives; later failures come through the stream.
    async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream>;
    async fn fetch_history(&self, conversation_id: &str) -> Result<Vec<HistoryEntry>>;
    fn set_server_url(&self, server_url: &str);
}

pub struct HttpTransport {
    client: Client,
    server_url: RwLock<String>,
}

impl HttpTransport {
    pub fn new(server_url: &str) -> Self {
        Self {
            client: Client::new(),
            server_url: RwLock::new(normalize_url(server_url)),
        }
    }

    pub fn server_url(&self) -> String {
        self.server_url.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.server_url(), path)
    }

    /// The id is one escaped path segment, whatever characters it holds.
    fn history_url(&self, conversation_id: &str) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint(CHAT_HISTORY_ENDPOINT))
            .map_err(|err| AppError::Network(format!("Invalid server URL: {}", err)))?;
        url.path_segments_mut()
            .map_err(|_| AppError::Network(format!("Invalid server URL: {}", self.server_url())))?
            .pop_if_empty()
            .push(conversation_id);
        Ok(url)
    }
}

fn normalize_url(server_url: &str) -> String {
    server_url.trim().trim_end_matches('/').to_string()
}

fn network_error(err: reqwest::Error) -> AppError {
    AppError::Network(format!("Request Error: {}", err))
}

// Handle API-level errors (non-2xx status codes)
async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let err_text = response.text().await.unwrap_or_else(|_| "Failed to read error body".to_string());
    warn!(status = status.as_u16(), body = %err_text, "server answered with an error status");
    Err(AppError::Http {
        status: status.as_u16(),
        reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
    })
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn check_health(&self) -> bool {
        let url = self.endpoint(HEALTH_ENDPOINT);
        match self.client.get(&url).timeout(HEALTH_TIMEOUT).send().await {
            Ok(response) => {
                let healthy = response.status().is_success();
                debug!(%url, status = response.status().as_u16(), healthy, "health check");
                healthy
            }
            Err(err) => {
                debug!(%url, error = %err, "health check failed");
                false
            }
        }
    }

    async fn send_chat(&self, request: &ChatRequest) -> Result<ChatReply> {
        let url = self.endpoint(CHAT_ENDPOINT);
        info!(%url, conversation = ?request.conversation_id, "sending chat message");
        let response = self
            .client
            .post(&url)
            .json(request)
            .timeout(CHAT_TIMEOUT)
            .send()
            .await
            .map_err(network_error)?;
        let body = ensure_success(response).await?.text().await.map_err(network_error)?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream> {
        let url = self.endpoint(CHAT_STREAM_ENDPOINT);
        info!(%url, conversation = ?request.conversation_id, "opening chat stream");
        let response = self
            .client
            .post(&url)
            .json(request)
            .timeout(STREAM_TIMEOUT)
            .send()
            .await
            .map_err(network_error)?;
        let response = ensure_success(response).await?;
        Ok(response
            .bytes_stream()
            .map_err(|err| AppError::Network(format!("Stream Read Error: {}", err)))
            .boxed())
    }

    async fn fetch_history(&self, conversation_id: &str) -> Result<Vec<HistoryEntry>> {
        let url = self.history_url(conversation_id)?;
        info!(%url, "fetching conversation history");
        let response = self.client.get(url).timeout(CHAT_TIMEOUT).send().await.map_err(network_error)?;
        let body = ensure_success(response).await?.text().await.map_err(network_error)?;
        let history: HistoryResponse = serde_json::from_str(&body)?;
        Ok(history.messages)
    }

    fn set_server_url(&self, server_url: &str) {
        let mut current = self.server_url.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *current = normalize_url(server_url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_omits_empty_conversation_id() {
        let fresh = serde_json::to_value(ChatRequest::new("hello", 0.7, "")).unwrap();
        assert_eq!(fresh["message"], "hello");
        assert_eq!(fresh["use_context"], true);
        assert!(fresh.get("conversation_id").is_none());

        let resumed = serde_json::to_value(ChatRequest::new("hello", 0.7, "abc")).unwrap();
        assert_eq!(resumed["conversation_id"], "abc");
    }

    #[test]
    fn history_url_escapes_the_conversation_id() {
        let transport = HttpTransport::new("http://localhost:8000/");
        assert_eq!(
            transport.history_url("abc-123").unwrap().as_str(),
            "http://localhost:8000/chat/history/abc-123"
        );
        assert_eq!(
            transport.history_url("a/b c?d#e").unwrap().as_str(),
            "http://localhost:8000/chat/history/a%2Fb%20c%3Fd%23e"
        );

        transport.set_server_url("not a url");
        assert!(matches!(transport.history_url("abc"), Err(AppError::Network(_))));
    }

    #[test]
    fn reply_without_conversation_id() {
        let reply: ChatReply = serde_json::from_str(r#"{"response":"hi"}"#).unwrap();
        assert_eq!(reply.response, "hi");
        assert_eq!(reply.conversation_id, None);
    }

    #[test]
    fn history_entries_become_messages() {
        let entries: HistoryResponse = serde_json::from_str(
            r#"{"messages":[
                {"type":"user","content":"hi","timestamp":"2024-05-01T10:00:00Z"},
                {"type":"assistant","content":"hello","timestamp":1714557600},
                {"type":"ai","content":"again","timestamp":"yesterday"}
            ]}"#,
        )
        .unwrap();
        let messages: Vec<Message> = entries.messages.into_iter().map(HistoryEntry::into_message).collect();

        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].created_at, 1_714_557_600_000);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].created_at, 1_714_557_600_000);
        assert_eq!(messages[2].display_time, "yesterday");
    }

    #[test]
    fn server_url_is_normalized() {
        let transport = HttpTransport::new("http://localhost:8000/");
        assert_eq!(transport.endpoint(CHAT_STREAM_ENDPOINT), "http://localhost:8000/chat/stream");

        transport.set_server_url(" http://chat.local ");
        assert_eq!(transport.endpoint(HEALTH_ENDPOINT), "http://chat.local/health");
    }
}
