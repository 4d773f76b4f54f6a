use async_trait::async_trait;
use std::net::IpAddr;
use std::path::PathBuf;

use crate::error::Result;
use crate::sys::jail::JailSettings;

// ==============================================================================
// 1. Package Installation
// ==============================================================================

#[async_trait]
pub trait PackageManager: Send + Sync {
    /// Refreshes the package index (apt-get update, dnf makecache, pacman -Sy).
    async fn refresh(&self) -> Result<()>;

    /// Installs the given packages non-interactively.
    async fn install(&self, packages: &[&str]) -> Result<()>;
}

// ==============================================================================
// 2. Public Address Discovery
// ==============================================================================

#[async_trait]
pub trait PublicIpResolver: Send + Sync {
    async fn lookup(&self) -> Result<IpAddr>;
}

// ==============================================================================
// 3. Certificate Issuance (ACME client)
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificatePaths {
    pub fullchain: PathBuf,
    pub privkey: PathBuf,
}

#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    /// Obtains a certificate for `domain` and returns where it was stored.
    /// The HTTP site must already be serving the webroot challenge directory.
    async fn issue(&self, domain: &str, email: Option<&str>) -> Result<CertificatePaths>;
}

// ==============================================================================
// 4. Reverse Proxy (Nginx)
// ==============================================================================

/// Which site template gets rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteMode {
    /// Decoy site only, plain HTTP. Used when there is no domain or no certificate.
    HttpOnly,
    /// Decoy site over TLS with the WebSocket-gated proxy location.
    Https { domain: String, cert: CertificatePaths },
}

impl SiteMode {
    pub fn is_https(&self) -> bool {
        matches!(self, SiteMode::Https { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySettings {
    pub web_root: PathBuf,
    pub ws_path: String,
    pub upstream_port: u16,
    pub nginx_user: String,
}

#[async_trait]
pub trait ProxyManager: Send + Sync {
    /// Writes the main config, site file and decoy page, then validates and reloads.
    async fn apply(&self, mode: &SiteMode, settings: &ProxySettings) -> Result<()>;
}

// ==============================================================================
// 5. Brute-Force Protection (fail2ban)
// ==============================================================================

#[async_trait]
pub trait JailManager: Send + Sync {
    async fn apply(&self, settings: &JailSettings) -> Result<()>;
}

// ==============================================================================
// 6. Firewall
// ==============================================================================

/// Inbound TCP opening. The decoy only ever listens on TCP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirewallPolicy {
    pub port: u16,
}

#[async_trait]
pub trait FirewallManager: Send + Sync {
    /// Opens the port for inbound traffic unless an identical rule already exists.
    async fn allow(&self, policy: &FirewallPolicy) -> Result<()>;
}

// ==============================================================================
// 7. Job Scheduling (certificate renewal)
// ==============================================================================

/// Discrete fields; the command line is passed to systemd, never to a shell.
pub struct JobIntent {
    pub name: String,
    pub description: String,
    pub command: String,
    pub schedule: String, // Systemd OnCalendar format
}

#[async_trait]
pub trait JobScheduler: Send + Sync {
    async fn schedule_job(&self, intent: &JobIntent) -> Result<()>;
}

// ==============================================================================
// 8. Third-Party Panel
// ==============================================================================

#[async_trait]
pub trait PanelInstaller: Send + Sync {
    /// Fetches and runs the panel installer. Its stdio is handed to the operator.
    async fn install(&self) -> Result<()>;
}
