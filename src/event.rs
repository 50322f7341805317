use crate::error::AppError;
use crate::message::Message;
use crate::state::StreamId;
use crate::transport::ChatReply;

// --- Events for Async Communication ---
// Background tasks never touch the conversation; they report here and the owner applies.
#[derive(Debug)]
pub enum AppEvent {
    StreamChunk { id: StreamId, text: String },
    StreamDone { id: StreamId },
    StreamFailed { id: StreamId, error: AppError },
    ReplyReceived(ChatReply),
    ReplyFailed(AppError),
    HistoryLoaded { conversation_id: String, messages: Vec<Message> },
    HistoryFailed(AppError),
    Health(bool),
}
