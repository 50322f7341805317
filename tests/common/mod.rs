#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use streamchat::error::{AppError, Result};
use streamchat::transport::{ByteStream, ChatReply, ChatRequest, ChatTransport, HistoryEntry};

/// In-process stand-in for the chat server. Each call pops the next scripted answer.
#[derive(Default)]
pub struct ScriptedTransport {
    health: Mutex<VecDeque<bool>>,
    replies: Mutex<VecDeque<Result<ChatReply>>>,
    bodies: Mutex<VecDeque<Result<Vec<Vec<u8>>>>>,
    histories: Mutex<VecDeque<Result<Vec<HistoryEntry>>>>,
    requests: Mutex<Vec<ChatRequest>>,
    health_checks: AtomicUsize,
    network_calls: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_health(self, results: impl IntoIterator<Item = bool>) -> Self {
        self.health.lock().unwrap().extend(results);
        self
    }

    pub fn with_reply(self, reply: Result<ChatReply>) -> Self {
        self.replies.lock().unwrap().push_back(reply);
        self
    }

    /// A streamed body delivered as the given network reads.
    pub fn with_body(self, chunks: &[&[u8]]) -> Self {
        let chunks = chunks.iter().map(|chunk| chunk.to_vec()).collect();
        self.bodies.lock().unwrap().push_back(Ok(chunks));
        self
    }

    pub fn with_open_error(self, error: AppError) -> Self {
        self.bodies.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn with_history(self, history: Result<Vec<HistoryEntry>>) -> Self {
        self.histories.lock().unwrap().push_back(history);
        self
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn health_checks(&self) -> usize {
        self.health_checks.load(Ordering::SeqCst)
    }

    /// Calls other than health checks.
    pub fn network_calls(&self) -> usize {
        self.network_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    async fn check_health(&self) -> bool {
        self.health_checks.fetch_add(1, Ordering::SeqCst);
        self.health.lock().unwrap().pop_front().unwrap_or(true)
    }

    async fn send_chat(&self, request: &ChatRequest) -> Result<ChatReply> {
        self.network_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AppError::Network("no scripted reply".into())))
    }

    async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream> {
        self.network_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let chunks = self
            .bodies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AppError::Network("no scripted body".into())))?;
        Ok(stream::iter(chunks.into_iter().map(|chunk| Ok(Bytes::from(chunk)))).boxed())
    }

    async fn fetch_history(&self, _conversation_id: &str) -> Result<Vec<HistoryEntry>> {
        self.network_calls.fetch_add(1, Ordering::SeqCst);
        self.histories
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AppError::Network("no scripted history".into())))
    }

    fn set_server_url(&self, _server_url: &str) {}
}
