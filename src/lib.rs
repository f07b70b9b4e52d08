pub mod bot;
pub mod command;
pub mod config;
pub mod daemon;
pub mod logging;
pub mod login_monitor;
pub mod menu;
pub mod notifications;
pub mod power;
pub mod probes;
pub mod reports;
pub mod version;
pub mod watchdog;
