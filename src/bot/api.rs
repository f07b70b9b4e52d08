//! A small client for the parts of the Telegram Bot API the bot uses.
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";
/// Seconds a `getUpdates` call may be held open by Telegram.
pub const LONG_POLL_TIMEOUT_SECS: u64 = 30;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Telegram API rejected {method} ({status}): {description}")]
    Rejected {
        method: &'static str,
        status: u16,
        description: String,
    },
}

#[derive(Deserialize, Debug)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Chat {
    pub id: i64,
}

#[derive(Deserialize, Debug, Clone)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub message: Option<Message>,
    pub data: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct InlineKeyboardButton {
    pub text: String,
    pub callback_data: String,
}

impl InlineKeyboardButton {
    pub fn new(text: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: callback_data.into(),
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Default)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

#[derive(Serialize)]
struct GetUpdates {
    offset: i64,
    timeout: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<u32>,
    allowed_updates: [&'static str; 2],
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<&'a InlineKeyboardMarkup>,
}

#[derive(Serialize)]
struct EditMessageText<'a> {
    chat_id: i64,
    message_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<&'a InlineKeyboardMarkup>,
}

#[derive(Serialize)]
struct AnswerCallbackQuery<'a> {
    callback_query_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    show_alert: bool,
}

#[derive(Serialize)]
struct DeleteMessage {
    chat_id: i64,
    message_id: i64,
}

#[derive(Clone)]
pub struct BotApi {
    client: Client,
    base_url: String,
}

impl BotApi {
    pub fn new(bot_token: &str) -> Result<Self, ApiError> {
        Self::with_api_base(DEFAULT_API_BASE, bot_token)
    }

    pub fn with_api_base(api_base: &str, bot_token: &str) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(LONG_POLL_TIMEOUT_SECS + 15))
            .build()?;
        Ok(Self {
            client,
            base_url: format!("{}/bot{bot_token}", api_base.trim_end_matches('/')),
        })
    }

    async fn call<P, R>(&self, method: &'static str, payload: &P) -> Result<R, ApiError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned + Default,
    {
        let url = format!("{}/{method}", self.base_url);
        let response = self.client.post(&url).json(payload).send().await?;
        let status = response.status();
        let body: ApiResponse<R> = response.json().await?;

        if !body.ok {
            return Err(ApiError::Rejected {
                method,
                status: status.as_u16(),
                description: body.description.unwrap_or_default(),
            });
        }
        debug!(method, "Telegram API call succeeded.");
        Ok(body.result.unwrap_or_default())
    }

    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, ApiError> {
        let payload = GetUpdates {
            offset,
            timeout: LONG_POLL_TIMEOUT_SECS,
            limit: None,
            allowed_updates: ["message", "callback_query"],
        };
        self.call("getUpdates", &payload).await
    }

    /// Confirms every update below `offset` without waiting for new ones.
    /// Telegram forgets confirmed updates, so they are never redelivered.
    pub async fn get_updates_ack(&self, offset: i64) -> Result<(), ApiError> {
        let payload = GetUpdates {
            offset,
            timeout: 0,
            limit: Some(1),
            allowed_updates: ["message", "callback_query"],
        };
        self.call::<_, Vec<serde_json::Value>>("getUpdates", &payload)
            .await
            .map(|_| ())
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        parse_mode: Option<&str>,
        reply_markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<(), ApiError> {
        let payload = SendMessage {
            chat_id,
            text,
            parse_mode,
            reply_markup,
        };
        self.call::<_, serde_json::Value>("sendMessage", &payload)
            .await
            .map(|_| ())
    }

    pub async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        reply_markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<(), ApiError> {
        let payload = EditMessageText {
            chat_id,
            message_id,
            text,
            reply_markup,
        };
        self.call::<_, serde_json::Value>("editMessageText", &payload)
            .await
            .map(|_| ())
    }

    pub async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<(), ApiError> {
        let payload = AnswerCallbackQuery {
            callback_query_id,
            text,
            show_alert,
        };
        self.call::<_, serde_json::Value>("answerCallbackQuery", &payload)
            .await
            .map(|_| ())
    }

    pub async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), ApiError> {
        let payload = DeleteMessage {
            chat_id,
            message_id,
        };
        self.call::<_, serde_json::Value>("deleteMessage", &payload)
            .await
            .map(|_| ())
    }
}
