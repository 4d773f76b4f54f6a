// src/sys/scheduler.rs

use crate::error::{InstallError, Result};
use crate::sys::files::write_atomic;
use crate::sys::systemd::ServiceManager;
use crate::sys::traits::{JobIntent, JobScheduler};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::info;

/// Twice a day, the cadence certbot's own packaging uses.
pub const RENEWAL_SCHEDULE: &str = "*-*-* 00,12:00:00";

pub fn certificate_renewal_job() -> JobIntent {
    JobIntent {
        name: "certbot-renew".into(),
        description: "Renew ACME certificates and reload nginx".into(),
        command: "/usr/bin/certbot renew --quiet --deploy-hook \"systemctl reload nginx\"".into(),
        schedule: RENEWAL_SCHEDULE.into(),
    }
}

// ==============================================================================
// 1. Concrete Implementation (Systemd)
// ==============================================================================

pub struct SystemdTimerManager {
    systemd_dir: PathBuf,
    services: Box<dyn ServiceManager>,
}

impl SystemdTimerManager {
    pub fn new(systemd_dir: PathBuf, services: Box<dyn ServiceManager>) -> Self {
        Self { systemd_dir, services }
    }

    pub fn unit_name(intent: &JobIntent) -> String {
        format!("veilgate-{}", intent.name)
    }
}

pub fn render_service_unit(intent: &JobIntent) -> String {
    // Type=oneshot: the process exits when done and must not be restarted like a daemon.
    format!(
        r#"[Unit]
Description=Veilgate: {description}
After=network-online.target
Wants=network-online.target

[Service]
Type=oneshot
ExecStart={command}
PrivateTmp=true
"#,
        description = intent.description,
        command = intent.command
    )
}

pub fn render_timer_unit(intent: &JobIntent) -> String {
    format!(
        r#"[Unit]
Description=Veilgate timer: {description}

[Timer]
OnCalendar={schedule}
RandomizedDelaySec=1h
# Fire on boot if the machine was down at the scheduled time.
Persistent=true

[Install]
WantedBy=timers.target
"#,
        description = intent.description,
        schedule = intent.schedule
    )
}

#[async_trait]
impl JobScheduler for SystemdTimerManager {
    async fn schedule_job(&self, intent: &JobIntent) -> Result<()> {
        if intent.name.is_empty() || !intent.name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(InstallError::Validation(format!("invalid job name '{}'", intent.name)));
        }
        if intent.command.contains('\n') || intent.schedule.contains('\n') {
            return Err(InstallError::Validation("job fields must be single-line".into()));
        }

        let unit = Self::unit_name(intent);
        let service_path = self.systemd_dir.join(format!("{}.service", unit));
        let timer_path = self.systemd_dir.join(format!("{}.timer", unit));

        write_atomic(&service_path, &render_service_unit(intent), 0o644).await?;
        write_atomic(&timer_path, &render_timer_unit(intent), 0o644).await?;

        self.services.daemon_reload().await?;
        // Enable the timer, not the service.
        self.services.enable_now(&format!("{}.timer", unit)).await?;

        info!("⏱️ Scheduled {} ({})", unit, intent.schedule);
        Ok(())
    }
}
