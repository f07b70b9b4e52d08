use clap::Parser;
use dotenv::dotenv;
use std::path::PathBuf;
use tracing::{error, info};

use vpsbot::bot::api::DEFAULT_API_BASE;
use vpsbot::config::DEFAULT_CONFIG_PATH;
use vpsbot::daemon::{self, DaemonOptions};
use vpsbot::logging::init_logging;
use vpsbot::version::VERSION;

#[derive(Parser, Debug)]
#[command(author, version, about = "Telegram bot, traffic watchdog and SSH login monitor", long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "VPSBOT_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Telegram Bot API endpoint
    #[arg(long, env = "VPSBOT_API_BASE", default_value = DEFAULT_API_BASE)]
    api_base: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if std::env::args().any(|arg| arg == "--version") {
        println!("vpsbot version: {VERSION}");
        return Ok(());
    }

    dotenv().ok();
    let args = Args::parse();

    init_logging("bot.log", true);
    info!(version = VERSION, "Starting VPS bot...");

    let options = DaemonOptions {
        config_path: PathBuf::from(&args.config),
        api_base: args.api_base,
        ..DaemonOptions::default()
    };
    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received, shutting down."),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl-C, shutting down."),
        }
    };

    if let Err(e) = daemon::run(options, shutdown).await {
        error!(path = %args.config, error = %e, "Startup failed. Run the menu to finish setup.");
        return Err(e.into());
    }
    Ok(())
}
