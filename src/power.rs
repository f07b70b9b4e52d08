//! Irreversible host power actions.
use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

use crate::command::{CommandError, run_command};

#[async_trait]
pub trait PowerControl: Send + Sync {
    async fn reboot(&self) -> Result<(), CommandError>;
    async fn shutdown(&self) -> Result<(), CommandError>;
}

/// Calls the host's `reboot` and `shutdown -h now`.
pub struct SystemPower {
    timeout: Duration,
}

impl SystemPower {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl PowerControl for SystemPower {
    async fn reboot(&self) -> Result<(), CommandError> {
        warn!("Issuing system reboot.");
        run_command("reboot", &[], self.timeout).await.map(|_| ())
    }

    async fn shutdown(&self) -> Result<(), CommandError> {
        warn!("Issuing system shutdown.");
        run_command("shutdown", &["-h", "now"], self.timeout)
            .await
            .map(|_| ())
    }
}
