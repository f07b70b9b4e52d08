//! Follows the SSH authentication log and alerts the admin on successful logins.
use chrono::{DateTime, Local, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader, SeekFrom};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::notifications::NotificationSender;

pub const AUTH_LOG_CANDIDATES: [&str; 2] = ["/var/log/auth.log", "/var/log/secure"];
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);
const SWEEP_INTERVAL: Duration = Duration::from_secs(600);
const POLL_INTERVAL: Duration = Duration::from_secs(1);
const SUPERUSER: &str = "root";

// Anchored on the syslog header and the sshd tag: user names from failed
// attempts are logged verbatim and may contain text that looks like a login.
static ACCEPTED_LOGIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"^(?:[A-Z][a-z]{2}\s+\d{1,2}\s+\d{2}:\d{2}:\d{2}|\S+)\s+\S+\s+",
        r"sshd(?:-session)?\[\d+\]: ",
        r"Accepted (?P<method>password|publickey) for (?P<user>\S+) from (?P<addr>\S+) port \d+",
    ))
    .expect("accepted-login pattern is valid")
});

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("No authentication log found (looked for: {0})")]
    Unavailable(String),
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Password,
    PublicKey,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Password => "password",
            AuthMethod::PublicKey => "publickey",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginEvent {
    pub user: String,
    pub address: String,
    pub method: AuthMethod,
}

/// Extracts a successful login from an auth log line. Anything else is `None`.
pub fn parse_login_line(line: &str) -> Option<LoginEvent> {
    let caps = ACCEPTED_LOGIN.captures(line)?;
    let method = match &caps["method"] {
        "password" => AuthMethod::Password,
        "publickey" => AuthMethod::PublicKey,
        _ => return None,
    };
    Some(LoginEvent {
        user: caps["user"].to_string(),
        address: caps["addr"].to_string(),
        method,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoginAlert {
    pub event: LoginEvent,
    pub at: DateTime<Utc>,
}

impl LoginAlert {
    pub fn is_superuser(&self) -> bool {
        self.event.user == SUPERUSER
    }

    pub fn render(&self) -> String {
        let header = if self.is_superuser() {
            "🚨 ROOT login detected"
        } else {
            "🔐 SSH login detected"
        };
        format!(
            "{header}\n\
             👤 User: {}\n\
             🌐 From: {}\n\
             🔑 Method: {}\n\
             🕒 Time: {}",
            self.event.user,
            self.event.address,
            self.event.method.as_str(),
            self.at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
        )
    }
}

/// Per-address cool-down. A timestamp is only recorded when a notification
/// goes out, so suppressed logins do not extend the window.
pub struct DebounceTable {
    window: chrono::Duration,
    last_notified: HashMap<String, DateTime<Utc>>,
}

impl DebounceTable {
    pub fn new(window: Duration) -> Self {
        Self {
            window: chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::days(365)),
            last_notified: HashMap::new(),
        }
    }

    pub fn should_notify(&mut self, address: &str, now: DateTime<Utc>) -> bool {
        if let Some(last) = self.last_notified.get(address) {
            if now.signed_duration_since(*last) < self.window {
                return false;
            }
        }
        self.last_notified.insert(address.to_string(), now);
        true
    }

    /// Drops entries whose cool-down has expired. Returns how many were removed.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.last_notified.len();
        let window = self.window;
        self.last_notified
            .retain(|_, last| now.signed_duration_since(*last) < window);
        before - self.last_notified.len()
    }

    pub fn len(&self) -> usize {
        self.last_notified.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_notified.is_empty()
    }
}

/// Matcher and debounce state. Owned by the monitor task alone.
pub struct LoginMonitor {
    table: DebounceTable,
    sweep_enabled: bool,
    last_sweep: Option<DateTime<Utc>>,
}

impl LoginMonitor {
    pub fn new(cooldown: Duration, sweep_enabled: bool) -> Self {
        Self {
            table: DebounceTable::new(cooldown),
            sweep_enabled,
            last_sweep: None,
        }
    }

    pub fn tracked_addresses(&self) -> usize {
        self.table.len()
    }

    pub fn process_line(&mut self, line: &str, now: DateTime<Utc>) -> Option<LoginAlert> {
        self.maybe_sweep(now);

        let event = parse_login_line(line)?;
        if !self.table.should_notify(&event.address, now) {
            debug!(address = %event.address, user = %event.user, "Login within cool-down, suppressed.");
            return None;
        }
        Some(LoginAlert { event, at: now })
    }

    fn maybe_sweep(&mut self, now: DateTime<Utc>) {
        if !self.sweep_enabled {
            return;
        }
        let due = match self.last_sweep {
            None => true,
            Some(last) => now.signed_duration_since(last).to_std().unwrap_or_default() >= SWEEP_INTERVAL,
        };
        if due {
            let removed = self.table.sweep(now);
            if removed > 0 {
                debug!(removed, "Swept expired login cool-down entries.");
            }
            self.last_sweep = Some(now);
        }
    }
}

/// Returns the first candidate path that exists.
pub fn locate_auth_log<P: AsRef<Path>>(candidates: &[P]) -> Result<PathBuf, MonitorError> {
    candidates
        .iter()
        .map(|p| p.as_ref())
        .find(|p| p.exists())
        .map(Path::to_path_buf)
        .ok_or_else(|| {
            let looked: Vec<String> = candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect();
            MonitorError::Unavailable(looked.join(", "))
        })
}

#[cfg(unix)]
fn file_identity(meta: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(meta.ino())
}

#[cfg(not(unix))]
fn file_identity(_meta: &std::fs::Metadata) -> Option<u64> {
    None
}

/// `tail -F` over a single file: starts at the end, yields complete lines and
/// reopens the file when it is rotated or truncated.
pub struct LogFollower {
    path: PathBuf,
    reader: BufReader<File>,
    position: u64,
    identity: Option<u64>,
    pending: Vec<u8>,
}

impl LogFollower {
    pub async fn open_at_end(path: impl AsRef<Path>) -> Result<Self, MonitorError> {
        let path = path.as_ref().to_path_buf();
        let io_err = |source| MonitorError::Io {
            path: path.clone(),
            source,
        };
        let mut file = File::open(&path).await.map_err(io_err)?;
        let meta = file.metadata().await.map_err(io_err)?;
        let position = file.seek(SeekFrom::End(0)).await.map_err(io_err)?;
        Ok(Self {
            identity: file_identity(&meta),
            path,
            reader: BufReader::new(file),
            position,
            pending: Vec::new(),
        })
    }

    async fn reopen_from_start(&mut self) -> Result<(), MonitorError> {
        let io_err = |source| MonitorError::Io {
            path: self.path.clone(),
            source,
        };
        let file = File::open(&self.path).await.map_err(io_err)?;
        let meta = file.metadata().await.map_err(io_err)?;
        info!(path = ?self.path, "Auth log rotated or truncated, reopening.");
        self.identity = file_identity(&meta);
        self.reader = BufReader::new(file);
        self.position = 0;
        self.pending.clear();
        Ok(())
    }

    /// Reads every complete line appended since the last call. Returns an
    /// empty vector when nothing new is available.
    pub async fn read_new_lines(&mut self) -> Result<Vec<String>, MonitorError> {
        let mut lines = Vec::new();
        loop {
            let read = self
                .reader
                .read_until(b'\n', &mut self.pending)
                .await
                .map_err(|source| MonitorError::Io {
                    path: self.path.clone(),
                    source,
                })?;
            if read == 0 {
                break;
            }
            self.position += read as u64;
            if self.pending.last() == Some(&b'\n') {
                let raw = std::mem::take(&mut self.pending);
                let line = String::from_utf8_lossy(&raw);
                lines.push(line.trim_end_matches(['\n', '\r']).to_string());
            }
        }

        if lines.is_empty() {
            self.check_rotation().await?;
        }
        Ok(lines)
    }

    async fn check_rotation(&mut self) -> Result<(), MonitorError> {
        let meta = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta,
            // Between rotation and recreation the path may briefly not exist.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(source) => {
                return Err(MonitorError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        let replaced = match (self.identity, file_identity(&meta)) {
            (Some(old), Some(new)) => old != new,
            _ => false,
        };
        if replaced || meta.len() < self.position {
            self.reopen_from_start().await?;
        }
        Ok(())
    }
}

/// Follows `path` until `shutdown_rx` fires, sending one alert per
/// non-suppressed login. A failing line or send is logged and skipped.
pub async fn login_monitor_loop(
    path: PathBuf,
    mut monitor: LoginMonitor,
    notifier: Arc<dyn NotificationSender>,
    mut shutdown_rx: watch::Receiver<()>,
) -> Result<(), MonitorError> {
    let mut follower = LogFollower::open_at_end(&path).await?;
    info!(path = ?path, "Login monitor started.");

    loop {
        let batch = tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                info!("Shutdown signal received, terminating login monitor.");
                break;
            }

            batch = follower.read_new_lines() => batch,
        };

        let lines = match batch {
            Ok(lines) => lines,
            Err(e) => {
                warn!(error = %e, "Failed to read auth log, retrying.");
                Vec::new()
            }
        };

        if lines.is_empty() {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    info!("Shutdown signal received, terminating login monitor.");
                    break;
                }
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
            continue;
        }

        for line in lines {
            let Some(alert) = monitor.process_line(&line, Utc::now()) else {
                continue;
            };
            info!(
                user = %alert.event.user,
                address = %alert.event.address,
                method = alert.event.method.as_str(),
                superuser = alert.is_superuser(),
                "SSH login detected."
            );
            if let Err(e) = notifier.send(&alert.render()).await {
                error!(error = %e, "Failed to send login alert.");
            }
        }
    }
    Ok(())
}
