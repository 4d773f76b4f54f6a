use async_trait::async_trait;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{InstallError, Result};
use crate::sys::command::run_checked;
use crate::sys::files::write_atomic;
use crate::sys::systemd::ServiceManager;
use crate::sys::traits::JailManager;

/// Log files sshd writes to when a syslog daemon is present (Debian family, RedHat family).
pub const SSHD_LOG_CANDIDATES: &[&str] = &["/var/log/auth.log", "/var/log/secure"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Jail {
    pub name: String,
    pub port: String,
    pub logpath: Option<String>,
    pub backend: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JailSettings {
    pub bantime: String,
    pub findtime: String,
    pub maxretry: u32,
    pub ignoreip: Vec<String>,
    pub jails: Vec<Jail>,
}

impl Default for JailSettings {
    fn default() -> Self {
        Self {
            bantime: "1h".into(),
            findtime: "10m".into(),
            maxretry: 5,
            ignoreip: vec!["127.0.0.1/8".into(), "::1".into()],
            jails: vec![
                Jail { name: "sshd".into(), port: "ssh".into(), logpath: None, backend: None },
                Jail {
                    name: "nginx-http-auth".into(),
                    port: "http,https".into(),
                    logpath: Some("/var/log/nginx/error.log".into()),
                    backend: None,
                },
                Jail {
                    name: "nginx-botsearch".into(),
                    port: "http,https".into(),
                    logpath: Some("/var/log/nginx/access.log".into()),
                    backend: None,
                },
            ],
        }
    }
}

impl JailSettings {
    /// Journal-only hosts (Debian 12 minimal, most cloud images) have no sshd
    /// log file, so the sshd jail has to read the systemd journal instead.
    pub fn with_sshd_backend_for(mut self, existing_logs: &[&Path]) -> Self {
        if existing_logs.is_empty() {
            if let Some(sshd) = self.jails.iter_mut().find(|j| j.name == "sshd") {
                sshd.backend = Some("systemd".into());
            }
        }
        self
    }

    fn validate(&self) -> Result<()> {
        if self.maxretry == 0 {
            return Err(InstallError::Validation("maxretry must be at least 1".into()));
        }

        let clean = |v: &str| !v.is_empty() && !v.chars().any(|c| c.is_whitespace() || c == '[' || c == ']');
        for value in [&self.bantime, &self.findtime] {
            if !clean(value) {
                return Err(InstallError::Validation(format!("invalid jail duration '{}'", value)));
            }
        }
        if let Some(bad) = self.ignoreip.iter().find(|ip| !clean(ip)) {
            return Err(InstallError::Validation(format!("invalid ignoreip entry '{}'", bad)));
        }
        if let Some(bad) = self.jails.iter().find(|j| !clean(&j.name) || !clean(&j.port)) {
            return Err(InstallError::Validation(format!("invalid jail definition '{}'", bad.name)));
        }
        Ok(())
    }
}

pub fn render_jail_local(settings: &JailSettings) -> String {
    let mut out = String::from("# Managed by veilgate. Local edits are overwritten on the next run.\n");

    let _ = writeln!(out, "[DEFAULT]");
    let _ = writeln!(out, "bantime  = {}", settings.bantime);
    let _ = writeln!(out, "findtime = {}", settings.findtime);
    let _ = writeln!(out, "maxretry = {}", settings.maxretry);
    let _ = writeln!(out, "ignoreip = {}", settings.ignoreip.join(" "));
    let _ = writeln!(out, "backend  = auto");

    for jail in &settings.jails {
        let _ = writeln!(out);
        let _ = writeln!(out, "[{}]", jail.name);
        let _ = writeln!(out, "enabled = true");
        let _ = writeln!(out, "port    = {}", jail.port);
        if let Some(logpath) = &jail.logpath {
            let _ = writeln!(out, "logpath = {}", logpath);
        }
        if let Some(backend) = &jail.backend {
            let _ = writeln!(out, "backend = {}", backend);
        }
    }

    out
}

// ==============================================================================
// Concrete Implementation (fail2ban)
// ==============================================================================

pub struct Fail2banManager {
    fail2ban_dir: PathBuf,
    services: Box<dyn ServiceManager>,
}

impl Fail2banManager {
    pub fn new(fail2ban_dir: PathBuf, services: Box<dyn ServiceManager>) -> Self {
        Self { fail2ban_dir, services }
    }

    pub fn jail_path(&self) -> PathBuf {
        self.fail2ban_dir.join("jail.local")
    }

    /// Checks the configuration directory the jail file was written to.
    pub fn config_test_args(&self) -> Vec<String> {
        vec!["-c".to_string(), self.fail2ban_dir.display().to_string(), "-t".to_string()]
    }
}

#[async_trait]
impl JailManager for Fail2banManager {
    async fn apply(&self, settings: &JailSettings) -> Result<()> {
        settings.validate()?;

        let path = self.jail_path();
        write_atomic(&path, &render_jail_local(settings), 0o644).await?;

        let args = self.config_test_args();
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        run_checked("fail2ban-client", &args).await.map_err(|e| match e {
            InstallError::CommandFailed { stderr, .. } => {
                InstallError::Validation(format!("fail2ban config error: {}", stderr))
            }
            other => other,
        })?;

        self.services.enable_now("fail2ban").await?;
        self.services.restart("fail2ban").await?;

        let names: Vec<&str> = settings.jails.iter().map(|j| j.name.as_str()).collect();
        info!("🛡️ fail2ban active with jails: {}", names.join(", "));
        Ok(())
    }
}
