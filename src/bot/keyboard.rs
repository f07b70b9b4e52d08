use super::api::{InlineKeyboardButton, InlineKeyboardMarkup};
use super::dispatcher::BotAction;

/// Threshold presets offered by the limit menu, in GB.
pub const LIMIT_PRESETS: [u64; 3] = [500, 1024, 2048];

fn button(text: impl Into<String>, action: BotAction) -> InlineKeyboardButton {
    InlineKeyboardButton::new(text, action.callback_data())
}

pub fn main_menu() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup {
        inline_keyboard: vec![
            vec![
                button("📊 Status", BotAction::Status),
                button("📡 Traffic", BotAction::Traffic),
            ],
            vec![
                button("👥 Logins", BotAction::Logins),
                button("🚷 Failed logins", BotAction::FailedLogins),
                button("🛡 fail2ban", BotAction::Bans),
            ],
            vec![button("⚙️ Traffic limit", BotAction::SetupLimit)],
            vec![
                button("🔄 Reboot", BotAction::Reboot),
                button("🛑 Shutdown", BotAction::Shutdown),
            ],
            vec![button("❌ Close", BotAction::Close)],
        ],
    }
}

pub fn back_to_menu() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup {
        inline_keyboard: vec![vec![button("🔙 Back", BotAction::Menu)]],
    }
}

pub fn confirm(action: BotAction, label: &str) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup {
        inline_keyboard: vec![
            vec![button(format!("✅ Confirm {label}"), action)],
            vec![button("❌ Cancel", BotAction::Menu)],
        ],
    }
}

pub fn limit_menu(auto_shutdown: bool) -> InlineKeyboardMarkup {
    let presets = LIMIT_PRESETS
        .iter()
        .map(|gb| button(format!("{gb}GB"), BotAction::SetLimit(*gb)))
        .collect();
    let toggle_label = if auto_shutdown {
        "⏸ Disable auto-shutdown"
    } else {
        "▶️ Enable auto-shutdown"
    };
    InlineKeyboardMarkup {
        inline_keyboard: vec![
            presets,
            vec![
                button("🚫 No limit", BotAction::LimitOff),
                button(toggle_label, BotAction::ToggleAuto),
            ],
            vec![button("🔙 Back", BotAction::Menu)],
        ],
    }
}
