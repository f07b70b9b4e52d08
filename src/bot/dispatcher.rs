//! Maps operator actions to replies. Transport-agnostic: the polling loop
//! applies the returned [`Reply`] to Telegram.
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::api::InlineKeyboardMarkup;
use super::auth::{Authorization, authorize};
use super::keyboard;
use crate::config::ConfigStore;
use crate::power::PowerControl;
use crate::probes::traffic::{render_traffic, render_traffic_error};
use crate::probes::{TrafficProbe, system_status};
use crate::reports::{self, DEFAULT_JAIL, DEFAULT_REPORT_LINES};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotAction {
    Menu,
    Status,
    Traffic,
    Logins,
    FailedLogins,
    Bans,
    SetupLimit,
    SetLimit(u64),
    LimitOff,
    ToggleAuto,
    Reboot,
    Shutdown,
    ConfirmReboot,
    ConfirmShutdown,
    Close,
}

impl BotAction {
    pub fn parse(data: &str) -> Option<Self> {
        let action = match data {
            "menu" => BotAction::Menu,
            "status" => BotAction::Status,
            "traffic" => BotAction::Traffic,
            "logins" => BotAction::Logins,
            "failed_logins" => BotAction::FailedLogins,
            "bans" => BotAction::Bans,
            "setup_limit" => BotAction::SetupLimit,
            "set_off" => BotAction::LimitOff,
            "toggle_auto" => BotAction::ToggleAuto,
            "reboot" => BotAction::Reboot,
            "shutdown" => BotAction::Shutdown,
            "confirm_reboot" => BotAction::ConfirmReboot,
            "confirm_shutdown" => BotAction::ConfirmShutdown,
            "close" => BotAction::Close,
            other => {
                let gb = other.strip_prefix("set_")?.parse::<u64>().ok()?;
                if gb == 0 {
                    BotAction::LimitOff
                } else {
                    BotAction::SetLimit(gb)
                }
            }
        };
        Some(action)
    }

    pub fn callback_data(&self) -> String {
        match self {
            BotAction::Menu => "menu".into(),
            BotAction::Status => "status".into(),
            BotAction::Traffic => "traffic".into(),
            BotAction::Logins => "logins".into(),
            BotAction::FailedLogins => "failed_logins".into(),
            BotAction::Bans => "bans".into(),
            BotAction::SetupLimit => "setup_limit".into(),
            BotAction::SetLimit(gb) => format!("set_{gb}"),
            BotAction::LimitOff => "set_off".into(),
            BotAction::ToggleAuto => "toggle_auto".into(),
            BotAction::Reboot => "reboot".into(),
            BotAction::Shutdown => "shutdown".into(),
            BotAction::ConfirmReboot => "confirm_reboot".into(),
            BotAction::ConfirmShutdown => "confirm_shutdown".into(),
            BotAction::Close => "close".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    Reboot,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplyBody {
    Show {
        text: String,
        keyboard: InlineKeyboardMarkup,
    },
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Popup shown on the operator's client before the body is applied.
    pub toast: Option<String>,
    pub body: ReplyBody,
    /// Runs once the reply has been delivered.
    pub after: Option<PowerAction>,
}

impl Reply {
    fn show(text: impl Into<String>, keyboard: InlineKeyboardMarkup) -> Self {
        Self {
            toast: None,
            body: ReplyBody::Show {
                text: text.into(),
                keyboard,
            },
            after: None,
        }
    }

    fn with_toast(mut self, toast: impl Into<String>) -> Self {
        self.toast = Some(toast.into());
        self
    }
}

pub const MENU_TEXT: &str = "🤖 VPS control panel\nChoose an action:";

pub struct Dispatcher {
    config: Arc<ConfigStore>,
    probe: Arc<dyn TrafficProbe>,
    power: Arc<dyn PowerControl>,
    auth_log: Option<PathBuf>,
}

impl Dispatcher {
    pub fn new(
        config: Arc<ConfigStore>,
        probe: Arc<dyn TrafficProbe>,
        power: Arc<dyn PowerControl>,
        auth_log: Option<PathBuf>,
    ) -> Self {
        Self {
            config,
            probe,
            power,
            auth_log,
        }
    }

    fn is_authorized(&self, sender_id: i64) -> bool {
        authorize(self.config.snapshot().admin_id, sender_id) == Authorization::Authorized
    }

    /// Handles a text command. `None` means no reply at all.
    pub fn handle_command(&self, sender_id: i64, text: &str) -> Option<Reply> {
        if !self.is_authorized(sender_id) {
            return None;
        }
        let command = text.split_whitespace().next()?;
        // Accept "/start@MyBot" in group chats.
        let command = command.split('@').next().unwrap_or(command);
        match command {
            "/start" | "/menu" => Some(Reply::show(MENU_TEXT, keyboard::main_menu())),
            _ => None,
        }
    }

    /// Handles a button press. `None` means the sender is not the admin and
    /// nothing happened.
    pub async fn handle(&self, sender_id: i64, action: BotAction) -> Option<Reply> {
        if !self.is_authorized(sender_id) {
            return None;
        }
        info!(action = %action.callback_data(), "Handling bot action.");

        let reply = match action {
            BotAction::Menu => Reply::show(MENU_TEXT, keyboard::main_menu()),
            BotAction::Close => Reply {
                toast: None,
                body: ReplyBody::Delete,
                after: None,
            },
            BotAction::Status => Reply::show(system_status().await.render(), keyboard::back_to_menu()),
            BotAction::Traffic => Reply::show(self.traffic_text().await, keyboard::back_to_menu()),
            BotAction::Logins => Reply::show(self.logins_text().await, keyboard::back_to_menu()),
            BotAction::FailedLogins => {
                Reply::show(self.failed_logins_text().await, keyboard::back_to_menu())
            }
            BotAction::Bans => Reply::show(self.bans_text().await, keyboard::back_to_menu()),
            BotAction::SetupLimit => self.limit_menu(),
            BotAction::SetLimit(gb) => self.apply_limit(Some(gb)),
            BotAction::LimitOff => self.apply_limit(None),
            BotAction::ToggleAuto => match self.config.toggle_auto_shutdown() {
                Ok(cfg) => {
                    let state = if cfg.auto_shutdown { "enabled" } else { "disabled" };
                    self.limit_menu().with_toast(format!("Auto-shutdown {state}."))
                }
                Err(e) => self.limit_menu().with_toast(format!("Failed to save configuration: {e}")),
            },
            BotAction::Reboot => Reply::show(
                "⚠️ High-risk action\nReally reboot the server?",
                keyboard::confirm(BotAction::ConfirmReboot, "reboot"),
            ),
            BotAction::Shutdown => Reply::show(
                "⚠️ High-risk action\nReally shut the server down?",
                keyboard::confirm(BotAction::ConfirmShutdown, "shutdown"),
            ),
            BotAction::ConfirmReboot => Reply {
                after: Some(PowerAction::Reboot),
                ..Reply::show("🔄 The system is rebooting...", InlineKeyboardMarkup::default())
            },
            BotAction::ConfirmShutdown => Reply {
                after: Some(PowerAction::Shutdown),
                ..Reply::show("🛑 The system is shutting down...", InlineKeyboardMarkup::default())
            },
        };
        Some(reply)
    }

    /// Executes a confirmed power action. Irreversible, not retried.
    pub async fn perform(&self, action: PowerAction) {
        let result = match action {
            PowerAction::Reboot => self.power.reboot().await,
            PowerAction::Shutdown => self.power.shutdown().await,
        };
        if let Err(e) = result {
            error!(?action, error = %e, "Power action failed.");
        }
    }

    fn limit_menu(&self) -> Reply {
        let cfg = self.config.snapshot();
        let limit = if cfg.limit_gb > 0 {
            format!("{}GB", cfg.limit_gb)
        } else {
            "none".to_string()
        };
        let auto = if cfg.auto_shutdown { "on" } else { "off" };
        Reply::show(
            format!(
                "⚙️ Traffic limit\nCurrent limit: {limit}\nAuto-shutdown: {auto}\n(the server shuts down once the limit is reached)"
            ),
            keyboard::limit_menu(cfg.auto_shutdown),
        )
    }

    fn apply_limit(&self, limit_gb: Option<u64>) -> Reply {
        let result = match limit_gb {
            Some(gb) => self.config.set_limit(gb),
            None => self.config.disable_limit(),
        };
        let toast = match (result, limit_gb) {
            (Ok(_), Some(gb)) => format!("Limit set to {gb}GB."),
            (Ok(_), None) => "Traffic limit disabled.".to_string(),
            (Err(e), _) => {
                warn!(error = %e, "Failed to persist limit change.");
                format!("Failed to save configuration: {e}")
            }
        };
        Reply::show(MENU_TEXT, keyboard::main_menu()).with_toast(toast)
    }

    async fn traffic_text(&self) -> String {
        let cfg = self.config.snapshot();
        match self.probe.sample(cfg.preferred_interface()).await {
            Ok(sample) => render_traffic(&sample, &cfg),
            Err(e) => {
                warn!(error = %e, "Traffic check failed.");
                render_traffic_error(&e)
            }
        }
    }

    async fn logins_text(&self) -> String {
        let timeout = self.config.snapshot().command_timeout();
        match reports::recent_logins(DEFAULT_REPORT_LINES, timeout).await {
            Ok(text) => format!("👥 Recent logins\n{text}"),
            Err(e) => e.unavailable_message(),
        }
    }

    async fn failed_logins_text(&self) -> String {
        let Some(path) = self.auth_log.as_deref() else {
            return "⚠️ No authentication log found on this system.".to_string();
        };
        match reports::recent_failed_logins(path, DEFAULT_REPORT_LINES).await {
            Ok(text) => format!("🚷 Recent failed logins\n{text}"),
            Err(e) => e.unavailable_message(),
        }
    }

    async fn bans_text(&self) -> String {
        let timeout = self.config.snapshot().command_timeout();
        match reports::ban_stats(DEFAULT_JAIL, timeout).await {
            Ok(stats) => stats.render(),
            Err(e) => e.unavailable_message(),
        }
    }
}
