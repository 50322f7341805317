//! Terminal client for chat servers that answer over plain HTTP or with
//! `data: `-line streaming.
//!
//! The core is UI-independent: [`transport`] talks to the server,
//! [`assembler`] turns a streamed body into content increments,
//! [`state`] holds the conversation, [`persistence`] keeps it across runs,
//! [`health`] tracks reachability and [`chat`] ties them together.

pub mod app;
pub mod archive;
pub mod assembler;
pub mod chat;
pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod health;
pub mod logging;
pub mod markdown;
pub mod message;
pub mod persistence;
pub mod state;
pub mod transport;
pub mod ui;

pub use chat::{ChatClient, Job, Update};
pub use error::{AppError, Result};
pub use event::AppEvent;
pub use message::{Message, Role};
pub use state::{ConversationState, StreamId};
pub use transport::{ChatTransport, HttpTransport};
