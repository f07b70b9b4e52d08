use clap::Parser;
use dotenv::dotenv;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use vpsbot::config::DEFAULT_CONFIG_PATH;
use vpsbot::logging::init_logging;
use vpsbot::login_monitor::{AUTH_LOG_CANDIDATES, locate_auth_log};
use vpsbot::menu::{Menu, load_or_create};
use vpsbot::power::SystemPower;
use vpsbot::probes::VnstatProbe;
use vpsbot::version::VERSION;

#[derive(Parser, Debug)]
#[command(author, version, about = "Local VPS admin menu", long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "VPSBOT_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenv().ok();
    let args = Args::parse();

    init_logging("menu.log", false);
    info!(version = VERSION, "Starting menu...");

    let stdin = std::io::stdin();
    let mut input = stdin.lock();
    let mut output = std::io::stdout();

    let store = match load_or_create(&args.config, &mut input, &mut output) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, "Failed to load configuration.");
            eprintln!("Failed to load configuration: {e}");
            return Err(e.into());
        }
    };

    let timeout = store.snapshot().command_timeout();
    let menu = Menu::new(
        store,
        Arc::new(VnstatProbe::new(timeout)),
        Arc::new(SystemPower::new(timeout)),
        locate_auth_log(&AUTH_LOG_CANDIDATES).ok(),
    );
    menu.run(&mut input, &mut output).await?;
    info!("Menu exited.");
    Ok(())
}
