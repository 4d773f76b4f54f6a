// src/sys/systemd.rs

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;
use crate::sys::command::run_checked;

#[async_trait]
pub trait ServiceManager: Send + Sync {
    async fn daemon_reload(&self) -> Result<()>;
    async fn enable_now(&self, unit: &str) -> Result<()>;
    async fn restart(&self, unit: &str) -> Result<()>;
    /// Reloads a running unit, starts a stopped one.
    async fn reload_or_restart(&self, unit: &str) -> Result<()>;
}

pub struct SystemctlManager;

impl SystemctlManager {
    async fn systemctl(&self, args: &[&str]) -> Result<()> {
        debug!("systemctl {}", args.join(" "));
        run_checked("systemctl", args).await?;
        Ok(())
    }
}

#[async_trait]
impl ServiceManager for SystemctlManager {
    async fn daemon_reload(&self) -> Result<()> {
        self.systemctl(&["daemon-reload"]).await
    }

    async fn enable_now(&self, unit: &str) -> Result<()> {
        self.systemctl(&["enable", "--now", unit]).await
    }

    async fn restart(&self, unit: &str) -> Result<()> {
        self.systemctl(&["restart", unit]).await
    }

    async fn reload_or_restart(&self, unit: &str) -> Result<()> {
        self.systemctl(&["reload-or-restart", unit]).await
    }
}
