//! On-demand SSH history and fail2ban reports.
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tracing::warn;

use crate::command::{CommandError, run_command};

pub const DEFAULT_JAIL: &str = "sshd";
pub const DEFAULT_REPORT_LINES: usize = 10;
/// Only the end of the auth log is scanned for failed logins.
pub const AUTH_LOG_TAIL_BYTES: u64 = 256 * 1024;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("{0} is not installed")]
    NotInstalled(&'static str),
    #[error("Permission denied while running {0}")]
    PermissionDenied(&'static str),
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ReportError {
    fn from_command(tool: &'static str, err: CommandError) -> Self {
        if err.is_not_found() {
            ReportError::NotInstalled(tool)
        } else if err.is_permission_denied() {
            ReportError::PermissionDenied(tool)
        } else {
            ReportError::Command(err)
        }
    }

    /// Text shown to the operator instead of a report.
    pub fn unavailable_message(&self) -> String {
        format!("⚠️ Report unavailable: {self}")
    }
}

/// Keeps up to `n` session lines from `last` output, skipping reboot
/// pseudo-sessions and the trailing wtmp banner.
pub fn filter_login_sessions(raw: &str, n: usize) -> Vec<&str> {
    raw.lines()
        .map(str::trim_end)
        .filter(|line| {
            !line.is_empty()
                && !line.starts_with("reboot")
                && !line.starts_with("wtmp begins")
        })
        .take(n)
        .collect()
}

/// Keeps the last `n` failed-password lines, oldest first.
pub fn filter_failed_logins(contents: &str, n: usize) -> Vec<&str> {
    let failed: Vec<&str> = contents
        .lines()
        .filter(|line| line.contains("Failed password"))
        .collect();
    let skip = failed.len().saturating_sub(n);
    failed.into_iter().skip(skip).collect()
}

fn join_or_placeholder(lines: &[&str], placeholder: &str) -> String {
    if lines.is_empty() {
        placeholder.to_string()
    } else {
        lines.join("\n")
    }
}

pub async fn recent_logins(n: usize, timeout: Duration) -> Result<String, ReportError> {
    let output = run_command("last", &["-w"], timeout)
        .await
        .map_err(|e| ReportError::from_command("last", e))?;
    let sessions = filter_login_sessions(&output.stdout, n);
    Ok(join_or_placeholder(&sessions, "No login records found."))
}

/// Reads at most the last `window` bytes of `path`. When the read starts
/// mid-file the leading partial line is dropped.
pub async fn read_tail(path: &Path, window: u64) -> Result<String, ReportError> {
    let io_err = |source| ReportError::Io {
        path: path.display().to_string(),
        source,
    };
    let mut file = File::open(path).await.map_err(io_err)?;
    let len = file.metadata().await.map_err(io_err)?.len();
    let start = len.saturating_sub(window);
    file.seek(SeekFrom::Start(start)).await.map_err(io_err)?;

    let mut bytes = Vec::with_capacity((len - start) as usize);
    file.take(window).read_to_end(&mut bytes).await.map_err(io_err)?;

    if start > 0 {
        match bytes.iter().position(|b| *b == b'\n') {
            Some(newline) => {
                bytes.drain(..=newline);
            }
            None => bytes.clear(),
        }
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

pub async fn recent_failed_logins(auth_log: &Path, n: usize) -> Result<String, ReportError> {
    let contents = read_tail(auth_log, AUTH_LOG_TAIL_BYTES).await?;
    let failed = filter_failed_logins(&contents, n);
    Ok(join_or_placeholder(&failed, "No failed login attempts found."))
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BanStats {
    pub jail: String,
    pub currently_failed: u64,
    pub total_failed: u64,
    pub currently_banned: u64,
    pub total_banned: u64,
    pub banned_ips: Vec<String>,
}

impl BanStats {
    pub fn render(&self) -> String {
        let ips = if self.banned_ips.is_empty() {
            "none".to_string()
        } else {
            self.banned_ips.join(", ")
        };
        format!(
            "🛡 fail2ban ({})\n\
             -------------------\n\
             ❗ Currently failed: {}\n\
             📈 Total failed: {}\n\
             🚫 Currently banned: {}\n\
             📊 Total banned: {}\n\
             🌐 Banned IPs: {ips}",
            self.jail,
            self.currently_failed,
            self.total_failed,
            self.currently_banned,
            self.total_banned,
        )
    }
}

fn value_after<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    line.find(key).map(|idx| line[idx + key.len()..].trim())
}

fn count_after(line: &str, key: &str) -> Option<u64> {
    value_after(line, key).map(|raw| {
        raw.parse().unwrap_or_else(|_| {
            warn!(key, raw, "Unparsable fail2ban count, treating as 0.");
            0
        })
    })
}

/// Parses `fail2ban-client status <jail>` output. Unparsable counts become 0.
pub fn parse_ban_stats(jail: &str, text: &str) -> BanStats {
    let mut stats = BanStats {
        jail: jail.to_string(),
        ..BanStats::default()
    };
    for line in text.lines() {
        if let Some(count) = count_after(line, "Currently failed:") {
            stats.currently_failed = count;
        } else if let Some(count) = count_after(line, "Total failed:") {
            stats.total_failed = count;
        } else if let Some(count) = count_after(line, "Currently banned:") {
            stats.currently_banned = count;
        } else if let Some(count) = count_after(line, "Total banned:") {
            stats.total_banned = count;
        } else if let Some(ips) = value_after(line, "Banned IP list:") {
            stats.banned_ips = ips.split_whitespace().map(str::to_string).collect();
        }
    }
    stats
}

pub async fn ban_stats(jail: &str, timeout: Duration) -> Result<BanStats, ReportError> {
    let output = run_command("fail2ban-client", &["status", jail], timeout)
        .await
        .map_err(|e| ReportError::from_command("fail2ban-client", e))?;
    Ok(parse_ban_stats(jail, &output.stdout))
}
