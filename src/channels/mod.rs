//! Messaging boundary: outbound notifications and the inbound command stream.

pub mod telegram;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::ChannelError;
use crate::feed::Entry;
use crate::rules::RuleMatch;
use crate::store::TenantId;

pub use telegram::TelegramChannel;

/// A chat command addressed to the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingCommand {
    pub tenant: TenantId,
    /// Lowercased command name without the leading `/` or `@botname`.
    pub name: String,
    pub args: Vec<String>,
    pub message_id: Option<i64>,
}

impl IncomingCommand {
    /// Split chat text into a command. Returns `None` for non-command text.
    pub fn parse(tenant: TenantId, text: &str, message_id: Option<i64>) -> Option<Self> {
        let mut tokens = text.split_whitespace();
        let head = tokens.next()?.strip_prefix('/')?;
        let name = head.split('@').next().unwrap_or_default().to_lowercase();
        if name.is_empty() {
            return None;
        }
        Some(Self {
            tenant,
            name,
            args: tokens.map(str::to_string).collect(),
            message_id,
        })
    }
}

pub type CommandStream = Pin<Box<dyn Stream<Item = IncomingCommand> + Send>>;

/// A matched entry ready to be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub link: String,
    pub author: String,
    pub rule: String,
    pub matched_include: Option<String>,
}

impl Notification {
    pub fn new(entry: &Entry, hit: &RuleMatch<'_>) -> Self {
        Self {
            title: entry.title.clone(),
            link: entry.link.clone(),
            author: entry.author.clone(),
            rule: hit.rule.word().to_string(),
            matched_include: hit.matched_include.map(str::to_string),
        }
    }

    /// Telegram HTML rendering.
    pub fn to_html(&self) -> String {
        let rule = match &self.matched_include {
            Some(term) => format!("{} + {}", escape_html(&self.rule), escape_html(term)),
            None => escape_html(&self.rule),
        };
        format!(
            "<b>🎯 New matching post</b>\n\
             • <b>Title</b>: {}\n\
             • <b>Rule</b>: {}\n\
             • <b>Author</b>: {}\n\
             • <b>Link</b>: {}",
            escape_html(&self.title),
            rule,
            escape_html(&self.author),
            escape_html(&self.link),
        )
    }
}

/// Outbound side of a messaging channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    /// Send an HTML-formatted message to a chat.
    async fn send_message(&self, chat: &TenantId, text: &str) -> Result<(), ChannelError>;

    async fn send_notification(
        &self,
        tenant: &TenantId,
        notification: &Notification,
    ) -> Result<(), ChannelError> {
        self.send_message(tenant, &notification.to_html()).await
    }
}

/// Inbound side of a messaging channel.
#[async_trait]
pub trait CommandSource: Send + Sync {
    /// Start receiving commands. The stream ends when the channel shuts down.
    async fn start(&self) -> Result<CommandStream, ChannelError>;

    /// Answer a command in the chat it came from.
    async fn reply(&self, command: &IncomingCommand, text: &str) -> Result<(), ChannelError>;
}

/// Escape text for Telegram's HTML parse mode.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}
