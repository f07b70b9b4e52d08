pub mod api;
pub mod auth;
pub mod dispatcher;
pub mod keyboard;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use api::{BotApi, CallbackQuery, Message, Update};
use dispatcher::{BotAction, Dispatcher, Reply, ReplyBody};

const DEFAULT_RETRY_DELAY_SECONDS: u64 = 5;
const MAX_RETRY_DELAY_SECONDS: u64 = 60 * 5;

/// Next retry delay after a failed poll, doubling up to the cap.
pub fn next_retry_delay(current_secs: u64) -> u64 {
    (current_secs * 2).min(MAX_RETRY_DELAY_SECONDS)
}

/// Long-polls Telegram and feeds every update through the dispatcher until
/// `shutdown_rx` fires.
pub async fn bot_polling_loop(
    api: BotApi,
    dispatcher: Arc<Dispatcher>,
    mut shutdown_rx: watch::Receiver<()>,
) {
    let mut offset: i64 = 0;
    let mut retry_delay_seconds = DEFAULT_RETRY_DELAY_SECONDS;
    info!("Bot polling loop started.");

    loop {
        let polled = tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                info!("Shutdown signal received, terminating bot polling loop.");
                break;
            }

            polled = api.get_updates(offset) => polled,
        };

        let updates = match polled {
            Ok(updates) => {
                retry_delay_seconds = DEFAULT_RETRY_DELAY_SECONDS;
                updates
            }
            Err(e) => {
                error!(error = %e, delay_seconds = retry_delay_seconds, "Polling Telegram failed, backing off.");
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        info!("Shutdown signal received, terminating bot polling loop.");
                        break;
                    }
                    _ = tokio::time::sleep(Duration::from_secs(retry_delay_seconds)) => {}
                }
                retry_delay_seconds = next_retry_delay(retry_delay_seconds);
                continue;
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);
            handle_update(&api, &dispatcher, update).await;
        }
    }
}

async fn handle_update(api: &BotApi, dispatcher: &Dispatcher, update: Update) {
    if let Some(query) = update.callback_query {
        handle_callback(api, dispatcher, update.update_id, query).await;
    } else if let Some(message) = update.message {
        handle_message(api, dispatcher, message).await;
    }
}

async fn handle_message(api: &BotApi, dispatcher: &Dispatcher, message: Message) {
    let (Some(sender), Some(text)) = (message.from.as_ref(), message.text.as_deref()) else {
        return;
    };
    let Some(reply) = dispatcher.handle_command(sender.id, text) else {
        debug!(sender_id = sender.id, "Ignoring message.");
        return;
    };
    if let ReplyBody::Show { text, keyboard } = &reply.body {
        if let Err(e) = api
            .send_message(message.chat.id, text, None, Some(keyboard))
            .await
        {
            warn!(error = %e, "Failed to send menu.");
        }
    }
}

async fn handle_callback(
    api: &BotApi,
    dispatcher: &Dispatcher,
    update_id: i64,
    query: CallbackQuery,
) {
    let Some(action) = query.data.as_deref().and_then(BotAction::parse) else {
        debug!(data = ?query.data, "Ignoring unknown callback data.");
        return;
    };
    // Unauthorized presses get no answer at all.
    let Some(reply) = dispatcher.handle(query.from.id, action).await else {
        warn!(sender_id = query.from.id, "Ignoring callback from unauthorized user.");
        return;
    };

    // A reboot or shutdown ends the process before the next poll would confirm
    // this update, so confirm it first or it is replayed on the next start.
    if reply.after.is_some() {
        if let Err(e) = api.get_updates_ack(update_id + 1).await {
            error!(update_id, error = %e, "Failed to confirm update, power action not performed.");
            let toast = Some("Telegram is unreachable, nothing was done.");
            if let Err(e) = api.answer_callback_query(&query.id, toast, true).await {
                warn!(error = %e, "Failed to answer callback query.");
            }
            return;
        }
    }

    if let Err(e) = api
        .answer_callback_query(&query.id, reply.toast.as_deref(), false)
        .await
    {
        warn!(error = %e, "Failed to answer callback query.");
    }
    if let Some(message) = query.message.as_ref() {
        apply_reply(api, message, &reply).await;
    }
    if let Some(power) = reply.after {
        dispatcher.perform(power).await;
    }
}

async fn apply_reply(api: &BotApi, message: &Message, reply: &Reply) {
    let chat_id = message.chat.id;
    let result = match &reply.body {
        ReplyBody::Show { text, keyboard } => {
            let markup = (!keyboard.inline_keyboard.is_empty()).then_some(keyboard);
            api.edit_message_text(chat_id, message.message_id, text, markup)
                .await
        }
        ReplyBody::Delete => api.delete_message(chat_id, message.message_id).await,
    };
    if let Err(e) = result {
        warn!(error = %e, "Failed to update bot message.");
    }
}
