use std::sync::Arc;

use teloxide::types::ChatId;
use tracing::{error, info};

use crate::delivery::validate::parse_kindle_address;
use crate::platform::Notifier;
use crate::store::RecordStore;

pub struct CommandInfo {
    pub name: &'static str,
    /// Argument placeholder shown in /help only
    pub usage: Option<&'static str>,
    pub description: &'static str,
}

/// Commands shown in the Telegram menu and in /help
pub const COMMAND_LIST: &[CommandInfo] = &[
    CommandInfo {
        name: "start",
        usage: None,
        description: "show the welcome message",
    },
    CommandInfo {
        name: "help",
        usage: None,
        description: "show this help message",
    },
    CommandInfo {
        name: "set_kindle_email",
        usage: Some("<kindle_email_address>"),
        description: "set your Kindle email address",
    },
];

/// Routes slash commands to their handlers.
pub struct CommandRouter {
    store: RecordStore,
    notifier: Arc<dyn Notifier>,
    /// Address users whitelist in their Kindle settings
    sender_address: String,
}

impl CommandRouter {
    pub fn new(store: RecordStore, notifier: Arc<dyn Notifier>, sender_address: String) -> Self {
        Self {
            store,
            notifier,
            sender_address,
        }
    }

    pub async fn handle(
        &self,
        chat_id: ChatId,
        user_id: i64,
        first_name: Option<&str>,
        name: &str,
        args: &str,
    ) {
        info!(user_id, command = name, "Command received");

        match name {
            "start" => self.start(chat_id, first_name).await,
            "help" => self.help(chat_id).await,
            "set_kindle_email" => self.set_kindle_email(chat_id, user_id, args).await,
            unknown => {
                let text = format!(
                    "Unknown command: {}, use /help for available commands",
                    unknown
                );
                self.notifier.notify(chat_id, &text).await;
            }
        }
    }

    async fn start(&self, chat_id: ChatId, first_name: Option<&str>) {
        let text = format!(
            "Hello {}! Send me a PDF, EPUB, or MOBI file and I'll send it to your Kindle.\n\n\
             Use /set_kindle_email to set your Kindle email address and don't forget to \
             whitelist {} in your Kindle settings.",
            first_name.unwrap_or("there"),
            self.sender_address
        );
        self.notifier.notify(chat_id, &text).await;
    }

    async fn help(&self, chat_id: ChatId) {
        let mut text = String::from("Available commands:\n");
        for command in COMMAND_LIST {
            match command.usage {
                Some(usage) => text.push_str(&format!(
                    "/{} {} - {}\n",
                    command.name, usage, command.description
                )),
                None => text.push_str(&format!("/{} - {}\n", command.name, command.description)),
            }
        }
        self.notifier.notify(chat_id, &text).await;
    }

    async fn set_kindle_email(&self, chat_id: ChatId, user_id: i64, args: &str) {
        if args.trim().is_empty() {
            self.notifier
                .notify(chat_id, "Please provide your Kindle email address")
                .await;
            return;
        }

        let address = match parse_kindle_address(args) {
            Ok(address) => address,
            Err(e) => {
                self.notifier.notify(chat_id, &e.to_string()).await;
                return;
            }
        };

        if let Err(e) = self.store.set_destination(user_id, &address).await {
            error!(user_id, destination = %address, "Failed to set Kindle email: {:#}", e);
            self.notifier
                .notify(
                    chat_id,
                    "Error setting Kindle email address, please try again later",
                )
                .await;
            return;
        }

        self.notifier
            .notify(
                chat_id,
                &format!("Kindle email address set to {} successfully", address),
            )
            .await;
    }
}
