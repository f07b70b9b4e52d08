//! The local numbered menu. Shares the configuration file with the bot daemon,
//! so a change saved here is picked up by the watchdog on its next tick.
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{BotConfig, ConfigError, ConfigStore};
use crate::power::PowerControl;
use crate::probes::traffic::{render_traffic, render_traffic_error};
use crate::probes::{TrafficProbe, system_status};
use crate::reports::{self, DEFAULT_JAIL, DEFAULT_REPORT_LINES};

#[derive(Error, Debug)]
pub enum MenuError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Terminal I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Input closed before setup finished")]
    InputClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    SetToken,
    SetAdmin,
    SetLimit,
    ToggleAutoShutdown,
    SetInterface,
    Status,
    Traffic,
    Logins,
    FailedLogins,
    Bans,
    Reboot,
    Shutdown,
    Exit,
}

impl MenuChoice {
    pub fn parse(input: &str) -> Option<Self> {
        let choice = match input.trim() {
            "1" => MenuChoice::SetToken,
            "2" => MenuChoice::SetAdmin,
            "3" => MenuChoice::SetLimit,
            "4" => MenuChoice::ToggleAutoShutdown,
            "5" => MenuChoice::SetInterface,
            "6" => MenuChoice::Status,
            "7" => MenuChoice::Traffic,
            "8" => MenuChoice::Logins,
            "9" => MenuChoice::FailedLogins,
            "10" => MenuChoice::Bans,
            "11" => MenuChoice::Reboot,
            "12" => MenuChoice::Shutdown,
            "0" | "q" | "exit" => MenuChoice::Exit,
            _ => return None,
        };
        Some(choice)
    }
}

fn render_menu(config: &BotConfig) -> String {
    let limit = if config.limit_gb > 0 {
        format!("{}GB", config.limit_gb)
    } else {
        "none".to_string()
    };
    let auto = if config.auto_shutdown { "on" } else { "off" };
    let interface = config.preferred_interface().unwrap_or("auto");
    format!(
        "\n===== VPS admin =====\n\
         limit: {limit} | auto-shutdown: {auto} | interface: {interface}\n\
         \n\
          1. Set bot token\n\
          2. Set admin id\n\
          3. Set traffic limit\n\
          4. Toggle auto-shutdown\n\
          5. Set vnstat interface\n\
          6. System status\n\
          7. Traffic\n\
          8. Recent logins\n\
          9. Failed logins\n\
         10. fail2ban stats\n\
         11. Reboot\n\
         12. Shutdown\n\
          0. Exit\n"
    )
}

/// Prints `label` and reads one trimmed line. `None` on end of input.
fn prompt<R: BufRead, W: Write>(input: &mut R, output: &mut W, label: &str) -> io::Result<Option<String>> {
    write!(output, "{label}")?;
    output.flush()?;
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

fn confirmed(answer: Option<&str>) -> bool {
    matches!(answer.map(str::to_ascii_lowercase).as_deref(), Some("y" | "yes"))
}

/// Loads the configuration, or walks the operator through creating it when
/// the file does not exist yet.
pub fn load_or_create<R: BufRead, W: Write>(
    path: &Path,
    input: &mut R,
    output: &mut W,
) -> Result<ConfigStore, MenuError> {
    match ConfigStore::load(path) {
        Ok(store) => return Ok(store),
        Err(ConfigError::NotFound(_)) => {}
        Err(e) => return Err(e.into()),
    }

    writeln!(output, "No configuration found at {}, starting first-run setup.", path.display())?;
    let token = prompt(input, output, "Bot token: ")?.ok_or(MenuError::InputClosed)?;
    let admin_id = loop {
        let raw = prompt(input, output, "Admin user id: ")?.ok_or(MenuError::InputClosed)?;
        match raw.parse::<i64>() {
            Ok(id) if id != 0 => break id,
            _ => writeln!(output, "Please enter a numeric Telegram user id.")?,
        }
    };

    let initial = BotConfig {
        bot_token: token,
        admin_id,
        ..BotConfig::default()
    };
    let store = ConfigStore::create(path, initial)?;
    writeln!(output, "Configuration saved.")?;
    Ok(store)
}

pub struct Menu {
    config: Arc<ConfigStore>,
    probe: Arc<dyn TrafficProbe>,
    power: Arc<dyn PowerControl>,
    auth_log: Option<PathBuf>,
}

impl Menu {
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

    /// Runs until the operator exits or input ends.
    pub async fn run<R: BufRead, W: Write>(&self, input: &mut R, output: &mut W) -> Result<(), MenuError> {
        loop {
            write!(output, "{}", render_menu(&self.config.reload().await))?;
            let Some(raw) = prompt(input, output, "Select: ")? else {
                return Ok(());
            };
            let Some(choice) = MenuChoice::parse(&raw) else {
                writeln!(output, "Invalid choice: {raw}")?;
                continue;
            };
            if choice == MenuChoice::Exit {
                return Ok(());
            }
            if !self.handle(choice, input, output).await? {
                return Ok(());
            }
        }
    }

    /// Returns `false` when input ended mid-action.
    async fn handle<R: BufRead, W: Write>(
        &self,
        choice: MenuChoice,
        input: &mut R,
        output: &mut W,
    ) -> Result<bool, MenuError> {
        match choice {
            MenuChoice::SetToken => {
                let Some(token) = prompt(input, output, "New bot token: ")? else {
                    return Ok(false);
                };
                if token.is_empty() {
                    writeln!(output, "Token unchanged.")?;
                } else {
                    self.save(output, self.config.set_token(&token))?;
                }
            }
            MenuChoice::SetAdmin => {
                let Some(raw) = prompt(input, output, "New admin id: ")? else {
                    return Ok(false);
                };
                match raw.parse::<i64>() {
                    Ok(id) => self.save(output, self.config.set_admin_id(id))?,
                    Err(_) => writeln!(output, "Not a number: {raw}")?,
                }
            }
            MenuChoice::SetLimit => {
                let Some(raw) = prompt(input, output, "Monthly limit in GB (0 disables): ")? else {
                    return Ok(false);
                };
                match raw.parse::<u64>() {
                    Ok(gb) => self.save(output, self.config.set_limit(gb))?,
                    Err(_) => writeln!(output, "Not a whole number: {raw}")?,
                }
            }
            MenuChoice::ToggleAutoShutdown => {
                let result = self.config.toggle_auto_shutdown();
                if let Ok(cfg) = &result {
                    if cfg.auto_shutdown && cfg.limit_gb == 0 {
                        writeln!(output, "Note: auto-shutdown has no effect until a limit is set.")?;
                    }
                }
                self.save(output, result)?;
            }
            MenuChoice::SetInterface => {
                let Some(raw) = prompt(input, output, "vnstat interface (empty for auto): ")? else {
                    return Ok(false);
                };
                self.save(output, self.config.set_interface(Some(&raw)))?;
            }
            MenuChoice::Status => writeln!(output, "{}", system_status().await.render())?,
            MenuChoice::Traffic => {
                let cfg = self.config.snapshot();
                let text = match self.probe.sample(cfg.preferred_interface()).await {
                    Ok(sample) => render_traffic(&sample, &cfg),
                    Err(e) => render_traffic_error(&e),
                };
                writeln!(output, "{text}")?;
            }
            MenuChoice::Logins => {
                let timeout = self.config.snapshot().command_timeout();
                let text = reports::recent_logins(DEFAULT_REPORT_LINES, timeout)
                    .await
                    .unwrap_or_else(|e| e.unavailable_message());
                writeln!(output, "{text}")?;
            }
            MenuChoice::FailedLogins => {
                let text = match self.auth_log.as_deref() {
                    Some(path) => reports::recent_failed_logins(path, DEFAULT_REPORT_LINES)
                        .await
                        .unwrap_or_else(|e| e.unavailable_message()),
                    None => "⚠️ No authentication log found on this system.".to_string(),
                };
                writeln!(output, "{text}")?;
            }
            MenuChoice::Bans => {
                let timeout = self.config.snapshot().command_timeout();
                let text = match reports::ban_stats(DEFAULT_JAIL, timeout).await {
                    Ok(stats) => stats.render(),
                    Err(e) => e.unavailable_message(),
                };
                writeln!(output, "{text}")?;
            }
            MenuChoice::Reboot | MenuChoice::Shutdown => {
                let verb = if choice == MenuChoice::Reboot { "reboot" } else { "shut down" };
                let answer = prompt(input, output, &format!("Really {verb} the server? [y/N]: "))?;
                if !confirmed(answer.as_deref()) {
                    writeln!(output, "Cancelled.")?;
                    return Ok(answer.is_some());
                }
                info!(action = verb, "Power action confirmed from menu.");
                let result = if choice == MenuChoice::Reboot {
                    self.power.reboot().await
                } else {
                    self.power.shutdown().await
                };
                if let Err(e) = result {
                    warn!(error = %e, "Power action failed.");
                    writeln!(output, "Failed: {e}")?;
                }
            }
            MenuChoice::Exit => return Ok(false),
        }
        Ok(true)
    }

    fn save<W: Write>(&self, output: &mut W, result: Result<BotConfig, ConfigError>) -> io::Result<()> {
        match result {
            Ok(_) => writeln!(output, "Saved."),
            Err(e) => writeln!(output, "Failed to save configuration: {e}"),
        }
    }
}
