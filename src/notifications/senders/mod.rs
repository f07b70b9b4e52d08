use async_trait::async_trait;
use thiserror::Error;

use crate::bot::api::ApiError;

pub mod telegram;

#[derive(Error, Debug)]
pub enum SenderError {
    #[error("Failed to send notification: {0}")]
    SendFailed(String),
    #[error("Telegram API error: {0}")]
    Api(#[from] ApiError),
}

/// Delivers a text message to the single registered operator.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, message: &str) -> Result<(), SenderError>;
}
