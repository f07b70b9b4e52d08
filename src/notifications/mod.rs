pub mod senders;

pub use senders::{NotificationSender, SenderError, telegram::TelegramSender};
