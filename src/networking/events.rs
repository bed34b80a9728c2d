//! Events raised to the presentation layer.
//!
//! Everything asynchronous that happens inside the networking core funnels
//! through one [`EventCallback`]; the embedding layer is a pure consumer of
//! this stream and never polls.

use log::error;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use super::protocol::ServerResponse;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Incoming,
    Outgoing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    Info,
    Error,
}

/// An asynchronous occurrence surfaced to the presentation layer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A chat message was received or sent. `text` is always plaintext.
    ChatMessage {
        sender: String,
        recipient: String,
        text: String,
        direction: Direction,
    },
    Status {
        level: StatusLevel,
        message: String,
    },
    RegistrationResult {
        result: ServerResponse,
    },
    PeerListResult {
        result: ServerResponse,
    },
    FileStart {
        filename: String,
        total: u64,
        sender: String,
        save_path: PathBuf,
    },
    FileProgress {
        filename: String,
        transferred: u64,
        total: u64,
        direction: Direction,
    },
    FileComplete {
        filename: String,
        save_path: PathBuf,
        sender: String,
    },
}

/// Type of callback receiving the event stream.
pub type EventCallback = Arc<dyn Fn(Event) + Send + Sync>;

/// Cheap handle for emitting events from any task.
#[derive(Clone, Default)]
pub struct EventSink {
    callback: Option<EventCallback>,
}

impl EventSink {
    pub fn new(callback: EventCallback) -> Self {
        Self {
            callback: Some(callback),
        }
    }

    /// A sink that drops every event.
    pub fn none() -> Self {
        Self { callback: None }
    }

    pub fn emit(&self, event: Event) {
        if let Some(callback) = &self.callback {
            callback(event);
        }
    }

    pub fn status_info(&self, message: impl Into<String>) {
        self.emit(Event::Status {
            level: StatusLevel::Info,
            message: message.into(),
        });
    }

    pub fn status_error(&self, message: impl Into<String>) {
        let message = message.into();
        error!("{}", message);
        self.emit(Event::Status {
            level: StatusLevel::Error,
            message,
        });
    }
}
