// src/installer.rs

use async_trait::async_trait;
use serde::Serialize;
use std::io::{BufRead, Write};
use std::net::IpAddr;
use std::path::Path;
use tracing::{error, info, warn};

use crate::cli::Cli;
use crate::config::InstallerConfig;
use crate::error::{InstallError, Result};
use crate::sys::firewall::IptablesManager;
use crate::sys::jail::{Fail2banManager, JailSettings, SSHD_LOG_CANDIDATES};
use crate::sys::network::HttpIpResolver;
use crate::sys::packages::{OsFamily, OsRelease, SystemPackageManager};
use crate::sys::panel::RemotePanelInstaller;
use crate::sys::proxy::{validate_domain, NginxManager};
use crate::sys::scheduler::{certificate_renewal_job, SystemdTimerManager};
use crate::sys::ssl::CertbotAuthority;
use crate::sys::systemd::SystemctlManager;
use crate::sys::traits::{
    CertificateAuthority, FirewallManager, FirewallPolicy, JailManager, JobScheduler,
    PackageManager, PanelInstaller, ProxyManager, ProxySettings, PublicIpResolver,
    SiteMode,
};

const MAX_PROMPT_ATTEMPTS: usize = 3;
const DECOY_PORTS: &[u16] = &[80, 443];

// ==============================================================================
// 1. Domain prompt
// ==============================================================================

#[async_trait]
pub trait DomainPrompt: Send + Sync {
    /// `None` means the operator chose to run without a domain.
    async fn ask(&self) -> Option<String>;
}

/// Reads from the controlling terminal. The prompt goes to stderr so stdout stays clean for logs.
pub struct StdinPrompt;

#[async_trait]
impl DomainPrompt for StdinPrompt {
    async fn ask(&self) -> Option<String> {
        let answer = tokio::task::spawn_blocking(|| {
            let stdin = std::io::stdin();
            let mut stderr = std::io::stderr();
            prompt_domain(&mut stdin.lock(), &mut stderr, MAX_PROMPT_ATTEMPTS)
        })
        .await;
        settle_prompt(answer)
    }
}

/// A prompt task that panicked or was cancelled counts as "no domain", loudly.
fn settle_prompt(answer: std::result::Result<Option<String>, tokio::task::JoinError>) -> Option<String> {
    match answer {
        Ok(domain) => domain,
        Err(e) => {
            warn!("Domain prompt aborted, continuing without TLS: {}", e);
            None
        }
    }
}

/// Asks until a valid domain or an empty line is entered. Gives up after `attempts` invalid answers.
pub fn prompt_domain<R: BufRead, W: Write>(input: &mut R, out: &mut W, attempts: usize) -> Option<String> {
    for _ in 0..attempts {
        let _ = write!(out, "Enter the domain for this server (leave empty to skip TLS): ");
        let _ = out.flush();

        let mut line = String::new();
        match input.read_line(&mut line) {
            Ok(0) | Err(_) => return None, // EOF: non-interactive session
            Ok(_) => {}
        }

        let candidate = line.trim().trim_end_matches('.').to_ascii_lowercase();
        if candidate.is_empty() {
            return None;
        }
        match validate_domain(&candidate) {
            Ok(()) => return Some(candidate),
            Err(e) => {
                let _ = writeln!(out, "{}", e);
            }
        }
    }

    warn!("No valid domain after {} attempts; continuing without TLS", attempts);
    None
}

// ==============================================================================
// 2. Run state and summary
// ==============================================================================

/// Everything decided during one run. Discarded at exit.
#[derive(Debug, Clone)]
pub struct RunState {
    pub family: OsFamily,
    pub public_ip: Option<IpAddr>,
    pub domain: Option<String>,
    pub skip_ssl: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Summary {
    pub os_family: String,
    pub public_ip: Option<String>,
    pub domain: Option<String>,
    pub https: bool,
    pub decoy_url: Option<String>,
    pub ws_path: Option<String>,
    pub upstream_port: u16,
    pub panel_installed: Option<bool>,
}

// ==============================================================================
// 3. Pipeline
// ==============================================================================

pub struct Installer {
    config: InstallerConfig,
    cli: Cli,
    family: OsFamily,
    packages: Box<dyn PackageManager>,
    ip_resolver: Box<dyn PublicIpResolver>,
    prompt: Box<dyn DomainPrompt>,
    cert_authority: Box<dyn CertificateAuthority>,
    proxy: Box<dyn ProxyManager>,
    firewall: Box<dyn FirewallManager>,
    jails: Box<dyn JailManager>,
    scheduler: Box<dyn JobScheduler>,
    panel: Box<dyn PanelInstaller>,
}

/// Collaborators the pipeline drives. Split out so tests can swap every external effect.
pub struct Collaborators {
    pub packages: Box<dyn PackageManager>,
    pub ip_resolver: Box<dyn PublicIpResolver>,
    pub prompt: Box<dyn DomainPrompt>,
    pub cert_authority: Box<dyn CertificateAuthority>,
    pub proxy: Box<dyn ProxyManager>,
    pub firewall: Box<dyn FirewallManager>,
    pub jails: Box<dyn JailManager>,
    pub scheduler: Box<dyn JobScheduler>,
    pub panel: Box<dyn PanelInstaller>,
}

impl Collaborators {
    /// The real thing: package managers, certbot, nginx, fail2ban, systemd.
    pub fn system(config: &InstallerConfig, family: OsFamily) -> Result<Self> {
        Ok(Self {
            packages: Box::new(SystemPackageManager::new(family)),
            ip_resolver: Box::new(HttpIpResolver::new(config.ip_endpoints.clone())?),
            prompt: Box::new(StdinPrompt),
            cert_authority: Box::new(CertbotAuthority::new(
                config.web_root.clone(),
                config.letsencrypt_dir.clone(),
            )),
            proxy: Box::new(NginxManager::new(config.nginx_dir.clone(), Box::new(SystemctlManager))),
            firewall: Box::new(IptablesManager::new()),
            jails: Box::new(Fail2banManager::new(config.fail2ban_dir.clone(), Box::new(SystemctlManager))),
            scheduler: Box::new(SystemdTimerManager::new(config.systemd_dir.clone(), Box::new(SystemctlManager))),
            panel: Box::new(RemotePanelInstaller::new(config.panel_url.clone())?),
        })
    }
}

/// Reads `/etc/os-release` and maps it to a supported family.
pub async fn detect_os(config: &InstallerConfig) -> Result<(OsRelease, OsFamily)> {
    let release = OsRelease::read(&config.os_release_path).await?;
    let family = OsFamily::detect(&release)?;
    info!(
        "🖥️ Detected {} {} ({:?} family)",
        release.display_name(),
        release.version_id.as_deref().unwrap_or(""),
        family
    );
    Ok((release, family))
}

impl Installer {
    pub fn new(config: InstallerConfig, cli: Cli, family: OsFamily, parts: Collaborators) -> Self {
        Self {
            config,
            cli,
            family,
            packages: parts.packages,
            ip_resolver: parts.ip_resolver,
            prompt: parts.prompt,
            cert_authority: parts.cert_authority,
            proxy: parts.proxy,
            firewall: parts.firewall,
            jails: parts.jails,
            scheduler: parts.scheduler,
            panel: parts.panel,
        }
    }

    fn proxy_settings(&self) -> ProxySettings {
        ProxySettings {
            web_root: self.config.web_root.clone(),
            ws_path: self.config.ws_path.clone(),
            upstream_port: self.config.upstream_port,
            nginx_user: self
                .config
                .nginx_user
                .clone()
                .unwrap_or_else(|| self.family.nginx_user().to_string()),
        }
    }

    pub async fn run(&self) -> Result<Summary> {
        self.install_packages().await?;

        if !self.cli.skip_firewall {
            self.open_firewall().await;
        }

        let public_ip = match self.ip_resolver.lookup().await {
            Ok(ip) => {
                info!("🌐 Public IP: {}", ip);
                Some(ip)
            }
            Err(e) => {
                warn!("Could not determine public IP, continuing: {}", e);
                None
            }
        };

        let domain = self.resolve_domain().await?;
        let mut state = RunState {
            family: self.family,
            public_ip,
            skip_ssl: domain.is_none(),
            domain,
        };

        let settings = self.proxy_settings();

        // HTTP first: it is the fallback and it serves the ACME webroot challenge.
        self.proxy.apply(&SiteMode::HttpOnly, &settings).await?;

        let mode = self.obtain_certificate(&mut state).await;
        if let SiteMode::Https { .. } = &mode {
            self.proxy.apply(&mode, &settings).await?;
            if let Err(e) = self.scheduler.schedule_job(&certificate_renewal_job()).await {
                warn!("Certificate renewal timer not installed: {}", e);
            }
        }

        let existing_logs: Vec<&Path> = SSHD_LOG_CANDIDATES
            .iter()
            .map(Path::new)
            .filter(|p| p.exists())
            .collect();
        let jail_settings = JailSettings::default().with_sshd_backend_for(&existing_logs);
        self.jails.apply(&jail_settings).await?;

        let panel_installed = if self.cli.skip_panel {
            info!("Skipping panel installer");
            None
        } else {
            match self.panel.install().await {
                Ok(()) => Some(true),
                Err(e) => {
                    // The proxy side is already live; report and finish normally.
                    error!("Panel installer failed: {}", e);
                    Some(false)
                }
            }
        };

        Ok(self.summarize(&state, &mode, panel_installed))
    }

    async fn install_packages(&self) -> Result<()> {
        let bootstrap = self.family.bootstrap_packages();
        if !bootstrap.is_empty() {
            // Fedora ships certbot natively and has no epel-release.
            if let Err(e) = self.packages.install(bootstrap).await {
                warn!("Repository bootstrap skipped: {}", e);
            }
        }

        self.packages.refresh().await?;
        self.packages.install(&self.family.required_packages()).await
    }

    async fn open_firewall(&self) {
        for &port in DECOY_PORTS {
            let policy = FirewallPolicy { port };
            if let Err(e) = self.firewall.allow(&policy).await {
                warn!("Could not open port {}/tcp: {}", port, e);
            }
        }
    }

    async fn resolve_domain(&self) -> Result<Option<String>> {
        match &self.cli.domain {
            Some(raw) => {
                let domain = raw.trim().trim_end_matches('.').to_ascii_lowercase();
                if domain.is_empty() {
                    return Ok(None);
                }
                validate_domain(&domain)?;
                Ok(Some(domain))
            }
            None => Ok(self.prompt.ask().await),
        }
    }

    /// Certificate failure degrades to HTTP-only; it never aborts the run.
    async fn obtain_certificate(&self, state: &mut RunState) -> SiteMode {
        let Some(domain) = state.domain.clone() else {
            info!("No domain supplied; serving the decoy over plain HTTP");
            return SiteMode::HttpOnly;
        };

        match self.cert_authority.issue(&domain, self.cli.email.as_deref()).await {
            Ok(cert) => SiteMode::Https { domain, cert },
            Err(e) => {
                warn!("Certificate issuance failed, falling back to HTTP-only: {}", e);
                state.skip_ssl = true;
                SiteMode::HttpOnly
            }
        }
    }

    fn summarize(&self, state: &RunState, mode: &SiteMode, panel_installed: Option<bool>) -> Summary {
        let https = !state.skip_ssl;
        let decoy_url = match mode {
            SiteMode::Https { domain, .. } => Some(format!("https://{}/", domain)),
            SiteMode::HttpOnly => state.public_ip.map(|ip| match ip {
                IpAddr::V4(v4) => format!("http://{}/", v4),
                IpAddr::V6(v6) => format!("http://[{}]/", v6),
            }),
        };

        Summary {
            os_family: format!("{:?}", state.family),
            public_ip: state.public_ip.map(|ip| ip.to_string()),
            domain: state.domain.clone(),
            https,
            decoy_url,
            ws_path: https.then(|| self.config.ws_path.clone()),
            upstream_port: self.config.upstream_port,
            panel_installed,
        }
    }
}
