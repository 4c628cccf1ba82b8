use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{BotCommand, FileId, UpdateKind};
use tracing::{debug, error, info, warn};

use crate::commands::COMMAND_LIST;
use crate::config::Config;
use crate::platform::{EventSource, FileFetcher, InboundEvent, Notifier, Origin, Payload};

/// Pause after a failed getUpdates call before reporting it
const POLL_ERROR_DELAY: Duration = Duration::from_secs(5);

/// Build the Bot API client. Its request timeout must outlast the long poll.
pub fn build_bot(config: &Config) -> Result<Bot> {
    let poll_timeout = Duration::from_secs(u64::from(config.telegram.poll_timeout_secs));
    let client = teloxide::net::default_reqwest_settings()
        .timeout(poll_timeout + config.delivery.network_timeout())
        .build()
        .context("Failed to build Telegram HTTP client")?;
    Ok(Bot::with_client(&config.telegram.bot_token, client))
}

/// Publish the command menu shown by Telegram clients. Failure is not fatal.
pub async fn register_commands(bot: &Bot) {
    let commands: Vec<BotCommand> = COMMAND_LIST
        .iter()
        .map(|command| BotCommand::new(command.name, command.description))
        .collect();

    if let Err(e) = bot.set_my_commands(commands).await {
        warn!("Failed to register bot commands: {}", e);
    }
}

/// Long-polling event source over getUpdates
pub struct TelegramSource {
    bot: Bot,
    poll_timeout: u32,
    error_delay: Duration,
    /// Acknowledges every update handed out or skipped so far
    offset: i32,
    /// Fetched updates not handed out yet, each with the offset that
    /// acknowledges it. `None` for updates the bot ignores.
    pending: VecDeque<(i32, Option<InboundEvent>)>,
}

impl TelegramSource {
    pub fn new(bot: Bot, poll_timeout: u32) -> Self {
        Self {
            bot,
            poll_timeout,
            error_delay: POLL_ERROR_DELAY,
            offset: 0,
            pending: VecDeque::new(),
        }
    }
}

#[async_trait]
impl EventSource for TelegramSource {
    async fn next_event(&mut self) -> Result<Option<InboundEvent>> {
        loop {
            while let Some((offset, event)) = self.pending.pop_front() {
                self.offset = offset;
                if let Some(event) = event {
                    return Ok(Some(event));
                }
            }

            let updates = match self
                .bot
                .get_updates()
                .offset(self.offset)
                .timeout(self.poll_timeout)
                .await
            {
                Ok(updates) => updates,
                Err(e) => {
                    tokio::time::sleep(self.error_delay).await;
                    return Err(e).context("Failed to poll Telegram updates");
                }
            };

            if !updates.is_empty() {
                debug!("Received {} update(s)", updates.len());
            }

            for update in updates {
                let offset = update.id.as_offset();
                let event = match update.kind {
                    UpdateKind::Message(msg) => Some(event_from_message(&msg)),
                    _ => None,
                };
                self.pending.push_back((offset, event));
            }
        }
    }

    /// Telegram drops updates below the offset of the next getUpdates call,
    /// so make one last call or the handed-out batch is replayed on restart.
    async fn shutdown(&mut self) -> Result<()> {
        if self.offset == 0 {
            return Ok(());
        }

        self.bot
            .get_updates()
            .offset(self.offset)
            .timeout(0)
            .limit(1)
            .await
            .context("Failed to acknowledge Telegram updates")?;

        info!(
            offset = self.offset,
            unhandled = self.pending.len(),
            "Acknowledged handed-out updates"
        );
        Ok(())
    }
}

/// Map a Telegram message onto the bot's event model
pub fn event_from_message(msg: &Message) -> InboundEvent {
    let origin = Origin {
        chat_id: msg.chat.id,
        user_id: msg.from.as_ref().map(|user| user.id.0 as i64),
        first_name: msg.from.as_ref().map(|user| user.first_name.clone()),
    };

    if let Some(doc) = msg.document() {
        return InboundEvent::Payload {
            origin,
            payload: Payload {
                file_id: doc.file.id.0.clone(),
                mime_type: doc.mime_type.as_ref().map(|m| m.essence_str().to_string()),
                declared_size: u64::from(doc.file.size),
                file_name: doc.file_name.clone().unwrap_or_default(),
            },
        };
    }

    if let Some((name, args)) = msg.text().and_then(parse_command) {
        return InboundEvent::Command { origin, name, args };
    }

    InboundEvent::Unrecognized { origin }
}

/// Split "/name@bot rest of line" into ("name", "rest of line")
pub fn parse_command(text: &str) -> Option<(String, String)> {
    let rest = text.strip_prefix('/')?;
    let (head, args) = match rest.split_once(char::is_whitespace) {
        Some((head, args)) => (head, args.trim()),
        None => (rest, ""),
    };
    let name = head.split('@').next().unwrap_or_default();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), args.to_string()))
}

/// Sends notices as plain chat messages
pub struct TelegramNotifier {
    bot: Bot,
}

impl TelegramNotifier {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, chat_id: ChatId, text: &str) {
        if let Err(e) = self.bot.send_message(chat_id, text).await {
            error!(chat_id = chat_id.0, "Failed to send message: {}", e);
        }
    }
}

/// Downloads documents through the Bot API file endpoint
pub struct TelegramFetcher {
    bot: Bot,
    /// Bounds the whole download; the bot client's own timeout is sized for long polls
    download_timeout: Duration,
}

impl TelegramFetcher {
    pub fn new(bot: Bot, download_timeout: Duration) -> Self {
        Self {
            bot,
            download_timeout,
        }
    }
}

#[async_trait]
impl FileFetcher for TelegramFetcher {
    async fn fetch(&self, file_id: &str, cap: u64) -> Result<Vec<u8>> {
        let file = self
            .bot
            .get_file(FileId(file_id.to_string()))
            .await
            .context("Failed to get file info")?;

        let stream = self.bot.download_file_stream(&file.path);
        let bytes = tokio::time::timeout(self.download_timeout, read_capped(stream, cap))
            .await
            .map_err(|_| {
                anyhow::anyhow!("File download timed out after {:?}", self.download_timeout)
            })??;

        info!(file_id, bytes = bytes.len(), "Downloaded file");
        Ok(bytes)
    }
}

/// Read a byte stream, stopping at exactly `cap` bytes.
pub async fn read_capped<S, B, E>(stream: S, cap: u64) -> Result<Vec<u8>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::error::Error + Send + Sync + 'static,
{
    let cap = usize::try_from(cap).unwrap_or(usize::MAX);
    let mut body = Vec::new();
    let mut stream = std::pin::pin!(stream);

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Failed to read file body")?;
        let chunk = chunk.as_ref();
        let remaining = cap - body.len();
        if chunk.len() >= remaining {
            body.extend_from_slice(&chunk[..remaining]);
            break;
        }
        body.extend_from_slice(chunk);
    }

    Ok(body)
}
