//! Traffic watchdog: polls monthly usage and shuts the host down once the
//! configured threshold is reached.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, warn};

use crate::config::{BotConfig, ConfigStore};
use crate::notifications::NotificationSender;
use crate::power::PowerControl;
use crate::probes::{TrafficProbe, TrafficSample};

#[derive(Debug, Clone, Copy)]
pub struct WatchdogTimings {
    /// Delay before the first check.
    pub warmup: Duration,
    pub interval: Duration,
    /// Time between the warning and the shutdown order.
    pub grace: Duration,
}

impl Default for WatchdogTimings {
    fn default() -> Self {
        Self {
            warmup: Duration::from_secs(10),
            interval: Duration::from_secs(60),
            grace: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogState {
    Idle,
    Armed { limit_gb: u64 },
}

impl WatchdogState {
    pub fn from_config(config: &BotConfig) -> Self {
        if config.is_armed() {
            WatchdogState::Armed {
                limit_gb: config.limit_gb,
            }
        } else {
            WatchdogState::Idle
        }
    }
}

/// A zero limit never breaches.
pub fn is_breach(total_gb: f64, limit_gb: u64) -> bool {
    limit_gb > 0 && total_gb >= limit_gb as f64
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Idle,
    ProbeFailed,
    WithinLimit { total_gb: f64, limit_gb: u64 },
    Breached { total_gb: f64, limit_gb: u64 },
    AlreadyTriggered,
}

pub fn breach_warning(sample: &TrafficSample, limit_gb: u64, grace: Duration) -> String {
    format!(
        "🚨 Traffic limit reached\n\
         Interface {}: used {} GB of {} GB.\n\
         The system will shut down in {} seconds!",
        sample.interface,
        sample.total_gb,
        limit_gb,
        grace.as_secs()
    )
}

pub struct TrafficWatchdog {
    config: Arc<ConfigStore>,
    probe: Arc<dyn TrafficProbe>,
    notifier: Arc<dyn NotificationSender>,
    power: Arc<dyn PowerControl>,
    timings: WatchdogTimings,
    shutdown_issued: AtomicBool,
}

impl TrafficWatchdog {
    pub fn new(
        config: Arc<ConfigStore>,
        probe: Arc<dyn TrafficProbe>,
        notifier: Arc<dyn NotificationSender>,
        power: Arc<dyn PowerControl>,
        timings: WatchdogTimings,
    ) -> Self {
        Self {
            config,
            probe,
            notifier,
            power,
            timings,
            shutdown_issued: AtomicBool::new(false),
        }
    }

    pub fn shutdown_issued(&self) -> bool {
        self.shutdown_issued.load(Ordering::SeqCst)
    }

    /// One watchdog check. Re-reads the configuration, samples traffic and
    /// runs the breach sequence at most once per process.
    pub async fn tick(&self) -> TickOutcome {
        if self.shutdown_issued() {
            return TickOutcome::AlreadyTriggered;
        }

        let config = self.config.reload().await;
        let limit_gb = match WatchdogState::from_config(&config) {
            WatchdogState::Idle => return TickOutcome::Idle,
            WatchdogState::Armed { limit_gb } => limit_gb,
        };

        let sample = match self.probe.sample(config.preferred_interface()).await {
            Ok(sample) => sample,
            Err(e) => {
                warn!(error = %e, "Traffic probe failed, skipping this check.");
                return TickOutcome::ProbeFailed;
            }
        };

        if !is_breach(sample.total_gb, limit_gb) {
            debug!(total_gb = sample.total_gb, limit_gb, "Traffic within limit.");
            return TickOutcome::WithinLimit {
                total_gb: sample.total_gb,
                limit_gb,
            };
        }

        if self.shutdown_issued.swap(true, Ordering::SeqCst) {
            return TickOutcome::AlreadyTriggered;
        }
        self.run_breach_sequence(&sample, limit_gb).await;
        TickOutcome::Breached {
            total_gb: sample.total_gb,
            limit_gb,
        }
    }

    async fn run_breach_sequence(&self, sample: &TrafficSample, limit_gb: u64) {
        error!(
            interface = %sample.interface,
            total_gb = sample.total_gb,
            limit_gb,
            "Traffic limit reached, starting shutdown sequence."
        );

        // Best-effort: a slow or failing transport must not hold back the shutdown.
        let warning = breach_warning(sample, limit_gb, self.timings.grace);
        match tokio::time::timeout(self.timings.grace.max(Duration::from_secs(1)), self.notifier.send(&warning)).await {
            Ok(Ok(())) => info!("Breach warning delivered."),
            Ok(Err(e)) => error!(error = %e, "Failed to deliver breach warning."),
            Err(_) => error!("Timed out delivering breach warning."),
        }

        tokio::time::sleep(self.timings.grace).await;

        if let Err(e) = self.power.shutdown().await {
            error!(error = %e, "Shutdown command failed.");
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<()>) {
        let mut ticker = interval_at(Instant::now() + self.timings.warmup, self.timings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            warmup_secs = self.timings.warmup.as_secs(),
            interval_secs = self.timings.interval.as_secs(),
            "Traffic watchdog started."
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    info!("Shutdown signal received, terminating traffic watchdog.");
                    break;
                }

                _ = ticker.tick() => {
                    let outcome = self.tick().await;
                    debug!(?outcome, "Watchdog tick finished.");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandError;
    use crate::notifications::SenderError;
    use crate::probes::ProbeError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    const GB: u64 = 1024 * 1024 * 1024;

    struct FakeProbe {
        total_bytes: Option<u64>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TrafficProbe for FakeProbe {
        async fn sample(&self, _preferred: Option<&str>) -> Result<TrafficSample, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.total_bytes {
                Some(bytes) => {
                    let gb = crate::probes::traffic::bytes_to_gb(bytes);
                    Ok(TrafficSample {
                        interface: "eth0".into(),
                        rx_bytes: bytes,
                        tx_bytes: 0,
                        rx_gb: gb,
                        tx_gb: 0.0,
                        total_gb: gb,
                        period: None,
                    })
                }
                None => Err(ProbeError::NoInterfaces),
            }
        }
    }

    #[derive(Default)]
    struct FakeNotifier {
        fail: bool,
        sent: AtomicUsize,
    }

    #[async_trait]
    impl NotificationSender for FakeNotifier {
        async fn send(&self, _message: &str) -> Result<(), SenderError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(SenderError::SendFailed("offline".into()))
            } else {
                Ok(())
            }
        }
    }

    #[derive(Default)]
    struct FakePower {
        shutdowns: AtomicUsize,
    }

    #[async_trait]
    impl PowerControl for FakePower {
        async fn reboot(&self) -> Result<(), CommandError> {
            Ok(())
        }
        async fn shutdown(&self) -> Result<(), CommandError> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        watchdog: TrafficWatchdog,
        probe: Arc<FakeProbe>,
        notifier: Arc<FakeNotifier>,
        power: Arc<FakePower>,
    }

    fn harness(limit_gb: u64, auto_shutdown: bool, used: Option<u64>, notifier_fails: bool) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let initial = BotConfig {
            limit_gb,
            auto_shutdown,
            ..BotConfig::default()
        };
        let store = Arc::new(ConfigStore::create(dir.path().join("config.json"), initial).unwrap());
        let probe = Arc::new(FakeProbe {
            total_bytes: used,
            calls: AtomicUsize::new(0),
        });
        let notifier = Arc::new(FakeNotifier {
            fail: notifier_fails,
            ..FakeNotifier::default()
        });
        let power = Arc::new(FakePower::default());
        let timings = WatchdogTimings {
            warmup: Duration::ZERO,
            interval: Duration::from_millis(10),
            grace: Duration::ZERO,
        };
        let watchdog = TrafficWatchdog::new(
            store,
            probe.clone(),
            notifier.clone(),
            power.clone(),
            timings,
        );
        Harness {
            _dir: dir,
            watchdog,
            probe,
            notifier,
            power,
        }
    }

    #[test]
    fn test_is_breach() {
        assert!(is_breach(500.0, 500));
        assert!(is_breach(500.01, 500));
        assert!(!is_breach(499.99, 500));
        assert!(!is_breach(10_000.0, 0));
        assert!(!is_breach(0.0, 0));
    }

    #[test]
    fn test_state_from_config() {
        let mut cfg = BotConfig::default();
        assert_eq!(WatchdogState::from_config(&cfg), WatchdogState::Idle);
        cfg.auto_shutdown = true;
        assert_eq!(WatchdogState::from_config(&cfg), WatchdogState::Idle);
        cfg.limit_gb = 100;
        assert_eq!(WatchdogState::from_config(&cfg), WatchdogState::Armed { limit_gb: 100 });
        cfg.auto_shutdown = false;
        assert_eq!(WatchdogState::from_config(&cfg), WatchdogState::Idle);
    }

    #[tokio::test]
    async fn test_breach_warns_then_shuts_down() {
        let h = harness(500, true, Some(500 * GB), false);
        let outcome = h.watchdog.tick().await;
        assert_eq!(outcome, TickOutcome::Breached { total_gb: 500.0, limit_gb: 500 });
        assert_eq!(h.notifier.sent.load(Ordering::SeqCst), 1);
        assert_eq!(h.power.shutdowns.load(Ordering::SeqCst), 1);
        assert!(h.watchdog.shutdown_issued());
    }

    #[tokio::test]
    async fn test_breach_fires_only_once() {
        let h = harness(500, true, Some(600 * GB), false);
        h.watchdog.tick().await;
        assert_eq!(h.watchdog.tick().await, TickOutcome::AlreadyTriggered);
        assert_eq!(h.power.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(h.notifier.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_within_limit_does_nothing() {
        let h = harness(500, true, Some(499 * GB), false);
        assert_eq!(
            h.watchdog.tick().await,
            TickOutcome::WithinLimit { total_gb: 499.0, limit_gb: 500 }
        );
        assert_eq!(h.notifier.sent.load(Ordering::SeqCst), 0);
        assert_eq!(h.power.shutdowns.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_zero_limit_never_breaches() {
        let h = harness(0, true, Some(100_000 * GB), false);
        assert_eq!(h.watchdog.tick().await, TickOutcome::Idle);
        assert_eq!(h.probe.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.power.shutdowns.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_auto_shutdown_disabled_is_idle() {
        let h = harness(500, false, Some(900 * GB), false);
        assert_eq!(h.watchdog.tick().await, TickOutcome::Idle);
        assert_eq!(h.power.shutdowns.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_probe_failure_skips_tick() {
        let h = harness(500, true, None, false);
        assert_eq!(h.watchdog.tick().await, TickOutcome::ProbeFailed);
        assert_eq!(h.notifier.sent.load(Ordering::SeqCst), 0);
        assert_eq!(h.power.shutdowns.load(Ordering::SeqCst), 0);
        assert!(!h.watchdog.shutdown_issued());
    }

    #[tokio::test]
    async fn test_notification_failure_still_shuts_down() {
        let h = harness(100, true, Some(150 * GB), true);
        assert!(matches!(h.watchdog.tick().await, TickOutcome::Breached { .. }));
        assert_eq!(h.notifier.sent.load(Ordering::SeqCst), 1);
        assert_eq!(h.power.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_loop_stops_on_signal() {
        let h = harness(0, false, Some(0), false);
        let watchdog = Arc::new(h.watchdog);
        let (tx, rx) = watch::channel(());
        let handle = tokio::spawn(watchdog.clone().run(rx));
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
