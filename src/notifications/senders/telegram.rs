use async_trait::async_trait;
use std::sync::Arc;

use super::{NotificationSender, SenderError};
use crate::bot::api::BotApi;
use crate::config::ConfigStore;

/// A sender for pushing notifications to the admin chat via the Telegram Bot API.
///
/// The chat is looked up in the configuration on every send, so it always
/// matches the identity the bot dispatcher authorizes.
pub struct TelegramSender {
    api: BotApi,
    config: Arc<ConfigStore>,
}

impl TelegramSender {
    pub fn new(api: BotApi, config: Arc<ConfigStore>) -> Self {
        Self { api, config }
    }

    /// Escapes text for Telegram MarkdownV2.
    /// Characters to escape: _ * [ ] ( ) ~ ` > # + - = | { } . !
    fn escape_markdown_v2(text: &str) -> String {
        let mut escaped_text = String::with_capacity(text.len());
        for char_to_escape in text.chars() {
            match char_to_escape {
                '_' | '*' | '[' | ']' | '(' | ')' | '~' | '`' | '>' | '#' | '+' | '-' | '='
                | '|' | '{' | '}' | '.' | '!' | '\\' => {
                    escaped_text.push('\\');
                    escaped_text.push(char_to_escape);
                }
                _ => escaped_text.push(char_to_escape),
            }
        }
        escaped_text
    }
}

#[async_trait]
impl NotificationSender for TelegramSender {
    async fn send(&self, message: &str) -> Result<(), SenderError> {
        let chat_id = self.config.snapshot().admin_id;
        if chat_id == 0 {
            return Err(SenderError::SendFailed(
                "admin chat id is not configured".to_string(),
            ));
        }
        let escaped_message = Self::escape_markdown_v2(message);
        self.api
            .send_message(chat_id, &escaped_message, Some("MarkdownV2"), None)
            .await?;
        Ok(())
    }
}
