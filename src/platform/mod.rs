pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;
use teloxide::types::ChatId;

/// Who an inbound event came from
#[derive(Debug, Clone, PartialEq)]
pub struct Origin {
    pub chat_id: ChatId,
    /// Missing for channel posts and some service messages
    pub user_id: Option<i64>,
    pub first_name: Option<String>,
}

/// Document attached to a message
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    /// Opaque handle used to download the file
    pub file_id: String,
    pub mime_type: Option<String>,
    pub declared_size: u64,
    pub file_name: String,
}

/// An event received from the event source. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Command {
        origin: Origin,
        name: String,
        args: String,
    },
    Payload {
        origin: Origin,
        payload: Payload,
    },
    Unrecognized {
        origin: Origin,
    },
}

impl InboundEvent {
    pub fn origin(&self) -> &Origin {
        match self {
            InboundEvent::Command { origin, .. }
            | InboundEvent::Payload { origin, .. }
            | InboundEvent::Unrecognized { origin } => origin,
        }
    }
}

/// Long-polled stream of inbound events.
#[async_trait]
pub trait EventSource: Send {
    /// Wait for the next event. `Ok(None)` means the source is closed for good;
    /// an error is a failed poll and the caller may keep polling.
    async fn next_event(&mut self) -> Result<Option<InboundEvent>>;

    /// Acknowledge everything handed out so far. Called once, after the last
    /// `next_event`.
    async fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

/// User-facing notices. Sends are fire-and-forget: implementations log
/// failures and never report them to the caller.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, chat_id: ChatId, text: &str);
}

/// Downloads payload bytes by file handle.
#[async_trait]
pub trait FileFetcher: Send + Sync {
    /// Never returns more than `cap` bytes, whatever the file's real size.
    async fn fetch(&self, file_id: &str, cap: u64) -> Result<Vec<u8>>;
}
