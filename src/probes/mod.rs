pub mod system;
pub mod traffic;

pub use system::{SystemStatus, system_status};
pub use traffic::{ProbeError, TrafficProbe, TrafficSample, VnstatProbe, parse_vnstat};
