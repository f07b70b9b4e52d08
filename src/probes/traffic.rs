//! Monthly traffic accounting read from `vnstat --json`.
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::command::{CommandError, run_command};
use crate::config::BotConfig;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("vnstat invocation failed: {0}")]
    Command(#[from] CommandError),
    #[error("Malformed vnstat output: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("vnstat reported no interfaces")]
    NoInterfaces,
    #[error("No monthly traffic recorded yet for interface {0}")]
    NoMonthlyData(String),
}

#[derive(Deserialize, Debug)]
struct VnstatReport {
    #[serde(default)]
    interfaces: Vec<VnstatInterface>,
}

#[derive(Deserialize, Debug)]
struct VnstatInterface {
    name: String,
    #[serde(default)]
    traffic: VnstatTraffic,
}

#[derive(Deserialize, Debug, Default)]
struct VnstatTraffic {
    #[serde(default)]
    month: Vec<VnstatMonth>,
}

#[derive(Deserialize, Debug)]
struct VnstatMonth {
    rx: u64,
    tx: u64,
    #[serde(default)]
    date: Option<VnstatDate>,
}

#[derive(Deserialize, Debug)]
struct VnstatDate {
    year: i32,
    month: u32,
}

/// Current-month usage of one interface. Not persisted, recomputed every poll.
#[derive(Debug, Clone, PartialEq)]
pub struct TrafficSample {
    pub interface: String,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_gb: f64,
    pub tx_gb: f64,
    /// Sum of the already rounded `rx_gb` and `tx_gb`, rounded again.
    pub total_gb: f64,
    /// `YYYY-MM` when vnstat reports the bucket date.
    pub period: Option<String>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn bytes_to_gb(bytes: u64) -> f64 {
    round2(bytes as f64 / BYTES_PER_GB)
}

/// Builds a [`TrafficSample`] from vnstat's JSON document.
///
/// The preferred interface wins when it matches a name exactly, otherwise the
/// first reported interface is used. The last entry of the monthly list is the
/// current month.
pub fn parse_vnstat(json: &str, preferred_interface: Option<&str>) -> Result<TrafficSample, ProbeError> {
    let report: VnstatReport = serde_json::from_str(json)?;

    let preferred = preferred_interface.filter(|name| !name.is_empty());
    let selected = preferred
        .and_then(|wanted| report.interfaces.iter().find(|iface| iface.name == wanted))
        .or_else(|| {
            if let Some(wanted) = preferred {
                warn!(interface = %wanted, "Configured interface not reported by vnstat, using the first one.");
            }
            report.interfaces.first()
        })
        .ok_or(ProbeError::NoInterfaces)?;

    let current = selected
        .traffic
        .month
        .last()
        .ok_or_else(|| ProbeError::NoMonthlyData(selected.name.clone()))?;

    let rx_gb = bytes_to_gb(current.rx);
    let tx_gb = bytes_to_gb(current.tx);

    Ok(TrafficSample {
        interface: selected.name.clone(),
        rx_bytes: current.rx,
        tx_bytes: current.tx,
        rx_gb,
        tx_gb,
        total_gb: round2(rx_gb + tx_gb),
        period: current
            .date
            .as_ref()
            .map(|date| format!("{:04}-{:02}", date.year, date.month)),
    })
}

#[async_trait]
pub trait TrafficProbe: Send + Sync {
    async fn sample(&self, preferred_interface: Option<&str>) -> Result<TrafficSample, ProbeError>;
}

/// Probe backed by the `vnstat` binary.
pub struct VnstatProbe {
    timeout: Duration,
}

impl VnstatProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl TrafficProbe for VnstatProbe {
    async fn sample(&self, preferred_interface: Option<&str>) -> Result<TrafficSample, ProbeError> {
        let output = run_command("vnstat", &["--json"], self.timeout).await?;
        let sample = parse_vnstat(&output.stdout, preferred_interface)?;
        debug!(
            interface = %sample.interface,
            rx_gb = sample.rx_gb,
            tx_gb = sample.tx_gb,
            total_gb = sample.total_gb,
            "Sampled monthly traffic."
        );
        Ok(sample)
    }
}

pub fn render_traffic(sample: &TrafficSample, config: &BotConfig) -> String {
    let limit = if config.limit_gb > 0 {
        format!("{} GB", config.limit_gb)
    } else {
        "no limit".to_string()
    };
    let auto_shutdown = if config.auto_shutdown { "✅ on" } else { "❌ off" };
    let period = sample.period.as_deref().unwrap_or("current month");

    format!(
        "📡 Traffic ({period})\n\
         -------------------\n\
         🔌 Interface: {}\n\
         ⬇️ Received: {} GB\n\
         ⬆️ Transmitted: {} GB\n\
         📊 Total: {} GB\n\
         -------------------\n\
         🚫 Threshold: {limit}\n\
         ⚡️ Auto-shutdown: {auto_shutdown}",
        sample.interface, sample.rx_gb, sample.tx_gb, sample.total_gb
    )
}

pub fn render_traffic_error(error: &ProbeError) -> String {
    match error {
        ProbeError::NoInterfaces => "⚠️ vnstat has not detected any interface data.".to_string(),
        ProbeError::NoMonthlyData(name) => {
            format!("⚠️ Interface {name} has no traffic recorded for this month.")
        }
        other => format!("⚠️ Failed to read traffic: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GB: u64 = 1024 * 1024 * 1024;

    fn report(interfaces: &[(&str, &[(u64, u64)])]) -> String {
        let list: Vec<serde_json::Value> = interfaces
            .iter()
            .map(|(name, months)| {
                let month: Vec<serde_json::Value> = months
                    .iter()
                    .enumerate()
                    .map(|(i, (rx, tx))| {
                        serde_json::json!({
                            "id": i,
                            "date": {"year": 2024, "month": i + 1},
                            "rx": rx,
                            "tx": tx,
                        })
                    })
                    .collect();
                serde_json::json!({"name": name, "traffic": {"month": month}})
            })
            .collect();
        serde_json::json!({"vnstatversion": "2.9", "jsonversion": "2", "interfaces": list}).to_string()
    }

    #[test]
    fn test_selects_preferred_interface() {
        let json = report(&[("A", &[(GB, GB)]), ("B", &[(2 * GB, 2 * GB)])]);
        assert_eq!(parse_vnstat(&json, Some("B")).unwrap().interface, "B");
    }

    #[test]
    fn test_falls_back_to_first_interface() {
        let json = report(&[("A", &[(GB, GB)]), ("B", &[(2 * GB, 2 * GB)])]);
        assert_eq!(parse_vnstat(&json, Some("Z")).unwrap().interface, "A");
        assert_eq!(parse_vnstat(&json, None).unwrap().interface, "A");
        assert_eq!(parse_vnstat(&json, Some("")).unwrap().interface, "A");
    }

    #[test]
    fn test_uses_last_month_bucket() {
        let json = report(&[("eth0", &[(GB, 0), (3 * GB, GB)])]);
        let sample = parse_vnstat(&json, None).unwrap();
        assert_eq!(sample.rx_gb, 3.0);
        assert_eq!(sample.tx_gb, 1.0);
        assert_eq!(sample.total_gb, 4.0);
        assert_eq!(sample.period.as_deref(), Some("2024-02"));
    }

    #[test]
    fn test_total_is_sum_of_rounded_parts() {
        // Each side is 0.0039999997 GB: rounds to 0.0 alone, but the raw sum would round to 0.01.
        let json = report(&[("eth0", &[(4_294_967, 4_294_967)])]);
        let sample = parse_vnstat(&json, None).unwrap();
        assert_eq!(sample.rx_gb, 0.0);
        assert_eq!(sample.tx_gb, 0.0);
        assert_eq!(sample.total_gb, 0.0);
    }

    #[test]
    fn test_rounding_to_two_decimals() {
        assert_eq!(bytes_to_gb(1_079_110_533), 1.0);
        assert_eq!(bytes_to_gb(GB + GB / 100 * 2), 1.02);
        assert_eq!(bytes_to_gb(0), 0.0);
    }

    #[test]
    fn test_no_interfaces() {
        let json = r#"{"interfaces": []}"#;
        assert!(matches!(parse_vnstat(json, None), Err(ProbeError::NoInterfaces)));
    }

    #[test]
    fn test_no_monthly_data() {
        let json = r#"{"interfaces": [{"name": "eth0", "traffic": {"month": []}}]}"#;
        match parse_vnstat(json, Some("eth0")) {
            Err(ProbeError::NoMonthlyData(name)) => assert_eq!(name, "eth0"),
            other => panic!("unexpected result: {other:?}"),
        }
        let json = r#"{"interfaces": [{"name": "eth0"}]}"#;
        assert!(matches!(parse_vnstat(json, None), Err(ProbeError::NoMonthlyData(_))));
    }

    #[test]
    fn test_malformed_output() {
        assert!(matches!(parse_vnstat("Error: database not found", None), Err(ProbeError::Parse(_))));
    }

    #[test]
    fn test_render_mentions_threshold() {
        let json = report(&[("eth0", &[(GB, GB)])]);
        let sample = parse_vnstat(&json, None).unwrap();
        let mut config = BotConfig::default();
        assert!(render_traffic(&sample, &config).contains("no limit"));
        config.limit_gb = 500;
        config.auto_shutdown = true;
        let text = render_traffic(&sample, &config);
        assert!(text.contains("500 GB"));
        assert!(text.contains("eth0"));
        assert!(text.contains("Total: 2 GB"));
    }
}
