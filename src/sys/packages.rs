// src/sys/packages.rs

use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::info;

use crate::error::{InstallError, Result};
use crate::sys::command::{run_checked, run_command};
use crate::sys::traits::PackageManager;

// ==============================================================================
// 1. /etc/os-release
// ==============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OsRelease {
    pub id: String,
    pub id_like: Vec<String>,
    pub version_id: Option<String>,
    pub pretty_name: Option<String>,
}

impl OsRelease {
    pub async fn read(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| InstallError::io(path, e))?;
        Ok(Self::parse(&contents))
    }

    /// Parses `KEY=value` lines. Values may be single- or double-quoted.
    pub fn parse(contents: &str) -> Self {
        let mut release = OsRelease::default();

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, raw)) = line.split_once('=') else {
                continue;
            };
            let value = unquote(raw.trim());

            match key.trim() {
                "ID" => release.id = value.to_ascii_lowercase(),
                "ID_LIKE" => {
                    release.id_like = value
                        .split_whitespace()
                        .map(|s| s.to_ascii_lowercase())
                        .collect()
                }
                "VERSION_ID" => release.version_id = Some(value.to_string()),
                "PRETTY_NAME" => release.pretty_name = Some(value.to_string()),
                _ => {}
            }
        }

        release
    }

    pub fn display_name(&self) -> &str {
        self.pretty_name.as_deref().unwrap_or(&self.id)
    }
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value.strip_prefix(quote).and_then(|v| v.strip_suffix(quote)) {
            return inner;
        }
    }
    value
}

/// Same names across apt, dnf (with EPEL) and pacman.
pub const REQUIRED_PACKAGES: &[&str] = &["nginx", "certbot", "fail2ban", "curl", "socat", "iptables"];

// ==============================================================================
// 2. Family detection
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFamily {
    Debian,
    RedHat,
    Arch,
}

impl OsFamily {
    pub fn detect(release: &OsRelease) -> Result<Self> {
        if let Some(family) = Self::from_id(&release.id) {
            return Ok(family);
        }
        // Derivatives (Mint, Pop!_OS, Oracle Linux...) announce their parent in ID_LIKE.
        release
            .id_like
            .iter()
            .find_map(|id| Self::from_id(id))
            .ok_or_else(|| {
                let name = if release.id.is_empty() { "unknown" } else { release.display_name() };
                InstallError::UnsupportedOs(name.to_string())
            })
    }

    fn from_id(id: &str) -> Option<Self> {
        match id {
            "debian" | "ubuntu" => Some(OsFamily::Debian),
            "centos" | "rhel" | "rocky" | "almalinux" | "fedora" => Some(OsFamily::RedHat),
            "arch" | "manjaro" => Some(OsFamily::Arch),
            _ => None,
        }
    }

    /// Repositories that must be enabled before `REQUIRED_PACKAGES` resolve.
    pub fn bootstrap_packages(self) -> &'static [&'static str] {
        match self {
            // certbot and fail2ban live in EPEL on RHEL clones.
            OsFamily::RedHat => &["epel-release"],
            OsFamily::Debian | OsFamily::Arch => &[],
        }
    }

    /// `REQUIRED_PACKAGES` plus what fail2ban needs to read the journal.
    /// Debian and Arch only recommend the python systemd bindings.
    pub fn required_packages(self) -> Vec<&'static str> {
        let mut packages = REQUIRED_PACKAGES.to_vec();
        match self {
            OsFamily::Debian => packages.push("python3-systemd"),
            OsFamily::Arch => packages.push("python-systemd"),
            OsFamily::RedHat => {}
        }
        packages
    }

    /// Account nginx workers run as on this family.
    pub fn nginx_user(self) -> &'static str {
        match self {
            OsFamily::Debian => "www-data",
            OsFamily::RedHat => "nginx",
            // Arch builds nginx with --user=http; there is no nginx account.
            OsFamily::Arch => "http",
        }
    }
}

// ==============================================================================
// 3. Concrete Implementation
// ==============================================================================

pub struct SystemPackageManager {
    family: OsFamily,
}

impl SystemPackageManager {
    pub fn new(family: OsFamily) -> Self {
        Self { family }
    }

    fn install_args<'a>(&self, packages: &[&'a str]) -> (&'static str, Vec<&'a str>) {
        let (program, mut args): (&'static str, Vec<&'a str>) = match self.family {
            OsFamily::Debian => ("apt-get", vec!["install", "-y", "--no-install-recommends"]),
            OsFamily::RedHat => ("dnf", vec!["install", "-y"]),
            OsFamily::Arch => ("pacman", vec!["-S", "--noconfirm", "--needed"]),
        };
        args.extend_from_slice(packages);
        (program, args)
    }
}

#[async_trait]
impl PackageManager for SystemPackageManager {
    async fn refresh(&self) -> Result<()> {
        match self.family {
            OsFamily::Debian => {
                run_command(
                    Command::new("apt-get")
                        .arg("update")
                        .env("DEBIAN_FRONTEND", "noninteractive"),
                    "apt-get",
                )
                .await?;
            }
            OsFamily::RedHat => {
                run_checked("dnf", &["makecache", "-y"]).await?;
            }
            OsFamily::Arch => {
                run_checked("pacman", &["-Sy", "--noconfirm"]).await?;
            }
        }
        Ok(())
    }

    async fn install(&self, packages: &[&str]) -> Result<()> {
        if packages.is_empty() {
            return Ok(());
        }

        let (program, args) = self.install_args(packages);
        info!("📦 Installing packages via {}: {}", program, packages.join(" "));

        let mut cmd = Command::new(program);
        cmd.args(&args);
        if self.family == OsFamily::Debian {
            cmd.env("DEBIAN_FRONTEND", "noninteractive");
        }
        run_command(&mut cmd, program).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UBUNTU: &str = r#"PRETTY_NAME="Ubuntu 24.04.1 LTS"
NAME="Ubuntu"
VERSION_ID="24.04"
ID=ubuntu
ID_LIKE=debian
"#;

    #[test]
    fn parses_quoted_and_bare_values() {
        let release = OsRelease::parse(UBUNTU);
        assert_eq!(release.id, "ubuntu");
        assert_eq!(release.id_like, vec!["debian"]);
        assert_eq!(release.version_id.as_deref(), Some("24.04"));
        assert_eq!(release.display_name(), "Ubuntu 24.04.1 LTS");
    }

    #[test]
    fn skips_comments_and_garbage() {
        let release = OsRelease::parse("# comment\n\nnot a pair\nID='rocky'\nID_LIKE=\"rhel centos fedora\"\n");
        assert_eq!(release.id, "rocky");
        assert_eq!(release.id_like, vec!["rhel", "centos", "fedora"]);
    }

    #[test]
    fn detects_families() {
        assert_eq!(OsFamily::detect(&OsRelease::parse(UBUNTU)).unwrap(), OsFamily::Debian);
        assert_eq!(OsFamily::detect(&OsRelease::parse("ID=almalinux")).unwrap(), OsFamily::RedHat);
        assert_eq!(OsFamily::detect(&OsRelease::parse("ID=fedora")).unwrap(), OsFamily::RedHat);
        assert_eq!(OsFamily::detect(&OsRelease::parse("ID=arch")).unwrap(), OsFamily::Arch);
    }

    #[test]
    fn falls_back_to_id_like() {
        let mint = OsRelease::parse("ID=linuxmint\nID_LIKE=\"ubuntu debian\"");
        assert_eq!(OsFamily::detect(&mint).unwrap(), OsFamily::Debian);

        let ol = OsRelease::parse("ID=\"ol\"\nID_LIKE=\"fedora\"");
        assert_eq!(OsFamily::detect(&ol).unwrap(), OsFamily::RedHat);
    }

    #[test]
    fn unsupported_os_is_rejected() {
        let alpine = OsRelease::parse("ID=alpine\nPRETTY_NAME=\"Alpine Linux v3.20\"");
        match OsFamily::detect(&alpine) {
            Err(InstallError::UnsupportedOs(name)) => assert_eq!(name, "Alpine Linux v3.20"),
            other => panic!("expected UnsupportedOs, got {other:?}"),
        }
        assert!(matches!(OsFamily::detect(&OsRelease::default()), Err(InstallError::UnsupportedOs(_))));
    }

    #[test]
    fn install_args_per_family() {
        let (program, args) = SystemPackageManager::new(OsFamily::Debian).install_args(&["nginx", "fail2ban"]);
        assert_eq!(program, "apt-get");
        assert_eq!(args, vec!["install", "-y", "--no-install-recommends", "nginx", "fail2ban"]);

        let (program, args) = SystemPackageManager::new(OsFamily::Arch).install_args(&["nginx"]);
        assert_eq!(program, "pacman");
        assert_eq!(args, vec!["-S", "--noconfirm", "--needed", "nginx"]);
    }

    #[test]
    fn epel_only_on_redhat() {
        assert_eq!(OsFamily::RedHat.bootstrap_packages(), &["epel-release"]);
        assert!(OsFamily::Debian.bootstrap_packages().is_empty());
        assert_eq!(OsFamily::Debian.nginx_user(), "www-data");
        assert_eq!(OsFamily::RedHat.nginx_user(), "nginx");
    }

    #[test]
    fn arch_workers_run_as_http() {
        assert_eq!(OsFamily::Arch.nginx_user(), "http");
    }

    #[test]
    fn journal_bindings_are_installed_where_only_recommended() {
        assert!(OsFamily::Debian.required_packages().contains(&"python3-systemd"));
        assert!(OsFamily::Arch.required_packages().contains(&"python-systemd"));
        assert_eq!(OsFamily::RedHat.required_packages(), REQUIRED_PACKAGES);
        for family in [OsFamily::Debian, OsFamily::RedHat, OsFamily::Arch] {
            assert!(REQUIRED_PACKAGES.iter().all(|p| family.required_packages().contains(p)));
        }
    }
}
