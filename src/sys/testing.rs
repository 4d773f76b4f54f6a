// Fakes shared by unit tests across the sys modules and the installer.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::sys::systemd::ServiceManager;

/// Records every systemctl verb instead of running it.
#[derive(Clone, Default)]
pub struct RecordingServices(pub Arc<Mutex<Vec<String>>>);

impl RecordingServices {
    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    fn push(&self, call: String) {
        self.0.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ServiceManager for RecordingServices {
    async fn daemon_reload(&self) -> Result<()> {
        self.push("daemon-reload".into());
        Ok(())
    }
    async fn enable_now(&self, unit: &str) -> Result<()> {
        self.push(format!("enable {unit}"));
        Ok(())
    }
    async fn restart(&self, unit: &str) -> Result<()> {
        self.push(format!("restart {unit}"));
        Ok(())
    }
    async fn reload_or_restart(&self, unit: &str) -> Result<()> {
        self.push(format!("reload {unit}"));
        Ok(())
    }
}
