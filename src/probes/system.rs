use chrono::{DateTime, Local};
use std::path::Path;
use std::time::Duration;
use sysinfo::{Disks, MINIMUM_CPU_UPDATE_INTERVAL, System};
use tracing::{debug, warn};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;
const CPU_SAMPLE_WINDOW: Duration = Duration::from_secs(1);

/// Point-in-time host utilisation.
#[derive(Debug, Clone)]
pub struct SystemStatus {
    pub boot_time: Option<DateTime<Local>>,
    pub cpu_percent: f32,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub disk_used_bytes: u64,
    pub disk_total_bytes: u64,
}

fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    ((used as f64 / total as f64) * 1000.0).round() / 10.0
}

fn gb(bytes: u64) -> f64 {
    ((bytes as f64 / BYTES_PER_GB) * 100.0).round() / 100.0
}

impl SystemStatus {
    pub fn memory_percent(&self) -> f64 {
        percent(self.memory_used_bytes, self.memory_total_bytes)
    }

    pub fn disk_percent(&self) -> f64 {
        percent(self.disk_used_bytes, self.disk_total_bytes)
    }

    pub fn render(&self) -> String {
        let boot_time = self
            .boot_time
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "unknown".to_string());
        format!(
            "🖥 VPS status\n\
             -------------------\n\
             ⏱ Booted at: {boot_time}\n\
             🧠 CPU: {:.1}%\n\
             🐏 Memory: {}G / {}G ({}%)\n\
             💾 Disk: {}G / {}G ({}%)",
            self.cpu_percent,
            gb(self.memory_used_bytes),
            gb(self.memory_total_bytes),
            self.memory_percent(),
            gb(self.disk_used_bytes),
            gb(self.disk_total_bytes),
            self.disk_percent(),
        )
    }
}

/// Samples CPU over a short window, plus memory, root disk and boot time.
pub async fn system_status() -> SystemStatus {
    let mut sys = System::new();
    sys.refresh_cpu_usage();
    tokio::time::sleep(CPU_SAMPLE_WINDOW.max(MINIMUM_CPU_UPDATE_INTERVAL)).await;
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    let disks = Disks::new_with_refreshed_list();
    let (disk_used_bytes, disk_total_bytes) = disks
        .list()
        .iter()
        .find(|disk| disk.mount_point() == Path::new("/"))
        .map(|disk| {
            let total = disk.total_space();
            (total.saturating_sub(disk.available_space()), total)
        })
        .unwrap_or_else(|| {
            warn!("Root filesystem not found in disk list, disk usage will be 0.");
            (0, 0)
        });

    let boot_time = DateTime::from_timestamp(System::boot_time() as i64, 0)
        .map(|utc| utc.with_timezone(&Local));

    let status = SystemStatus {
        boot_time,
        cpu_percent: sys.global_cpu_usage(),
        memory_used_bytes: sys.used_memory(),
        memory_total_bytes: sys.total_memory(),
        disk_used_bytes,
        disk_total_bytes,
    };
    debug!(?status, "Collected system status.");
    status
}
