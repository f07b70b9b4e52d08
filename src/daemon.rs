//! Startup and task wiring for the bot daemon.
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::bot::api::{ApiError, BotApi, DEFAULT_API_BASE};
use crate::bot::bot_polling_loop;
use crate::bot::dispatcher::Dispatcher;
use crate::config::{BotConfig, ConfigError, ConfigStore, DEFAULT_CONFIG_PATH};
use crate::login_monitor::{
    AUTH_LOG_CANDIDATES, DEFAULT_COOLDOWN, LoginMonitor, locate_auth_log, login_monitor_loop,
};
use crate::notifications::{NotificationSender, TelegramSender};
use crate::power::{PowerControl, SystemPower};
use crate::probes::{TrafficProbe, VnstatProbe};
use crate::watchdog::{TrafficWatchdog, WatchdogTimings};

#[derive(Error, Debug)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Failed to set up the Telegram client: {0}")]
    Api(#[from] ApiError),
}

#[derive(Debug, Clone)]
pub struct DaemonOptions {
    pub config_path: PathBuf,
    pub api_base: String,
    pub auth_log_candidates: Vec<PathBuf>,
    pub watchdog_timings: WatchdogTimings,
}

impl Default for DaemonOptions {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            api_base: DEFAULT_API_BASE.to_string(),
            auth_log_candidates: AUTH_LOG_CANDIDATES.iter().map(PathBuf::from).collect(),
            watchdog_timings: WatchdogTimings::default(),
        }
    }
}

/// The host-facing collaborators, built only once the configuration is known
/// to be usable.
pub struct Services {
    pub probe: Arc<dyn TrafficProbe>,
    pub power: Arc<dyn PowerControl>,
}

impl Services {
    pub fn system(config: &BotConfig) -> Self {
        Self {
            probe: Arc::new(VnstatProbe::new(config.command_timeout())),
            power: Arc::new(SystemPower::new(config.command_timeout())),
        }
    }
}

pub struct BotDaemon {
    store: Arc<ConfigStore>,
    api: BotApi,
    notifier: Arc<dyn NotificationSender>,
    services: Services,
    auth_log: Option<PathBuf>,
    login_debounce_sweep: bool,
    watchdog_timings: WatchdogTimings,
}

impl BotDaemon {
    /// Loads and validates the configuration, then builds the services.
    /// `services` is never called when the configuration is unusable.
    pub fn prepare<F>(options: DaemonOptions, services: F) -> Result<Self, StartupError>
    where
        F: FnOnce(&BotConfig) -> Services,
    {
        let store = Arc::new(ConfigStore::load(&options.config_path)?);
        let config = store.snapshot();
        config.validate_for_bot()?;

        let api = BotApi::with_api_base(&options.api_base, &config.bot_token)?;
        let notifier: Arc<dyn NotificationSender> =
            Arc::new(TelegramSender::new(api.clone(), store.clone()));
        let services = services(&config);

        let auth_log = match locate_auth_log(&options.auth_log_candidates) {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(error = %e, "Login monitor disabled.");
                None
            }
        };

        Ok(Self {
            store,
            api,
            notifier,
            services,
            auth_log,
            login_debounce_sweep: config.login_debounce_sweep,
            watchdog_timings: options.watchdog_timings,
        })
    }

    /// Runs the watchdog, the login monitor and the bot loop until `shutdown`
    /// completes, then waits for all of them to stop.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let mut tasks = Vec::new();

        let watchdog = Arc::new(TrafficWatchdog::new(
            self.store.clone(),
            self.services.probe.clone(),
            self.notifier.clone(),
            self.services.power.clone(),
            self.watchdog_timings,
        ));
        tasks.push(tokio::spawn(watchdog.run(shutdown_rx.clone())));

        if let Some(path) = self.auth_log.clone() {
            let monitor = LoginMonitor::new(DEFAULT_COOLDOWN, self.login_debounce_sweep);
            let monitor_rx = shutdown_rx.clone();
            let notifier = self.notifier.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = login_monitor_loop(path, monitor, notifier, monitor_rx).await {
                    error!(error = %e, "Login monitor stopped.");
                }
            }));
        }

        let dispatcher = Arc::new(Dispatcher::new(
            self.store,
            self.services.probe,
            self.services.power,
            self.auth_log,
        ));
        tasks.push(tokio::spawn(bot_polling_loop(self.api, dispatcher, shutdown_rx)));
        info!("All tasks spawned.");

        shutdown.await;
        let _ = shutdown_tx.send(());

        for result in futures::future::join_all(tasks).await {
            if let Err(join_error) = result {
                error!(error = ?join_error, "A task panicked.");
            }
        }
        info!("Shutdown complete.");
    }
}

/// Starts the daemon against the real host until `shutdown` completes.
pub async fn run(
    options: DaemonOptions,
    shutdown: impl Future<Output = ()>,
) -> Result<(), StartupError> {
    let daemon = BotDaemon::prepare(options, Services::system)?;
    daemon.run(shutdown).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandError;
    use crate::probes::{ProbeError, TrafficSample};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct Counters {
        built: AtomicUsize,
        sampled: AtomicUsize,
    }

    struct CountingTraffic(Arc<Counters>);

    #[async_trait]
    impl TrafficProbe for CountingTraffic {
        async fn sample(&self, _preferred: Option<&str>) -> Result<TrafficSample, ProbeError> {
            self.0.sampled.fetch_add(1, Ordering::SeqCst);
            Err(ProbeError::NoInterfaces)
        }
    }

    struct InertPower;

    #[async_trait]
    impl PowerControl for InertPower {
        async fn reboot(&self) -> Result<(), CommandError> {
            Ok(())
        }
        async fn shutdown(&self) -> Result<(), CommandError> {
            Ok(())
        }
    }

    fn counting_services(counters: Arc<Counters>) -> impl FnOnce(&BotConfig) -> Services {
        move |_config| {
            counters.built.fetch_add(1, Ordering::SeqCst);
            Services {
                probe: Arc::new(CountingTraffic(counters)),
                power: Arc::new(InertPower),
            }
        }
    }

    fn options(config_path: PathBuf, api_base: &str) -> DaemonOptions {
        DaemonOptions {
            config_path,
            api_base: api_base.to_string(),
            auth_log_candidates: Vec::new(),
            ..DaemonOptions::default()
        }
    }

    #[test]
    fn test_missing_config_stops_before_services() {
        let dir = tempfile::tempdir().unwrap();
        let counters = Arc::new(Counters::default());

        let result = BotDaemon::prepare(
            options(dir.path().join("absent.json"), DEFAULT_API_BASE),
            counting_services(counters.clone()),
        );

        assert!(matches!(
            result,
            Err(StartupError::Config(ConfigError::NotFound(_)))
        ));
        assert_eq!(counters.built.load(Ordering::SeqCst), 0);
        assert_eq!(counters.sampled.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_malformed_config_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        std::fs::write(&config_path, "{ not json").unwrap();
        let counters = Arc::new(Counters::default());

        let result = BotDaemon::prepare(options(config_path, DEFAULT_API_BASE), counting_services(counters.clone()));

        assert!(matches!(result, Err(StartupError::Config(ConfigError::Parse(_)))));
        assert_eq!(counters.built.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_config_without_token_is_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        std::fs::write(&config_path, json!({ "admin_id": 1000 }).to_string()).unwrap();
        let counters = Arc::new(Counters::default());

        let result = BotDaemon::prepare(options(config_path, DEFAULT_API_BASE), counting_services(counters.clone()));

        assert!(matches!(
            result,
            Err(StartupError::Config(ConfigError::Incomplete("bot_token")))
        ));
        assert_eq!(counters.built.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bottoken/getUpdates"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "ok": true, "result": [] }))
                    .set_delay(Duration::from_millis(50)),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        std::fs::write(&config_path, json!({ "bot_token": "token", "admin_id": 1000 }).to_string()).unwrap();
        let counters = Arc::new(Counters::default());

        let daemon = BotDaemon::prepare(options(config_path, &server.uri()), counting_services(counters.clone())).unwrap();
        assert_eq!(counters.built.load(Ordering::SeqCst), 1);
        assert!(daemon.auth_log.is_none());

        let stopped = tokio::time::timeout(
            Duration::from_secs(5),
            daemon.run(tokio::time::sleep(Duration::from_millis(200))),
        )
        .await;
        assert!(stopped.is_ok());
    }
}
