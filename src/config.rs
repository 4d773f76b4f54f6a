// src/config.rs

use rand::distributions::Alphanumeric;
use rand::Rng;
use std::env;
use std::path::PathBuf;

use crate::error::{InstallError, Result};

pub const DEFAULT_PANEL_URL: &str =
    "https://raw.githubusercontent.com/MHSanaei/3x-ui/master/install.sh";

pub const DEFAULT_IP_ENDPOINTS: &[&str] = &[
    "https://api.ipify.org",
    "https://ifconfig.me/ip",
    "https://icanhazip.com",
];

const WS_PATH_LEN: usize = 16;

#[derive(Clone, Debug)]
pub struct InstallerConfig {
    // 📂 Filesystem layout
    pub nginx_dir: PathBuf,
    pub web_root: PathBuf,
    pub fail2ban_dir: PathBuf,
    pub systemd_dir: PathBuf,
    pub letsencrypt_dir: PathBuf,
    pub os_release_path: PathBuf,

    /// Overrides the distribution default worker user when set.
    pub nginx_user: Option<String>,

    // 🛡️ Proxy endpoint
    pub upstream_port: u16,
    pub ws_path: String,

    // 🌐 External collaborators
    pub panel_url: String,
    pub ip_endpoints: Vec<String>,

    pub json_logs: bool,
}

impl InstallerConfig {
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary key source so tests never touch the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = |key: &str, default: &str| PathBuf::from(lookup(key).unwrap_or_else(|| default.to_string()));

        let upstream_port = match lookup("VEILGATE_UPSTREAM_PORT") {
            Some(raw) => parse_port(&raw)?,
            None => 10000,
        };

        let ws_path = match lookup("VEILGATE_WS_PATH") {
            Some(raw) => normalize_ws_path(&raw)?,
            None => random_ws_path(),
        };

        let ip_endpoints = match lookup("VEILGATE_IP_ENDPOINTS") {
            Some(raw) => {
                let list: Vec<String> = raw
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
                if list.is_empty() {
                    return Err(InstallError::Config("VEILGATE_IP_ENDPOINTS is empty".into()));
                }
                list
            }
            None => DEFAULT_IP_ENDPOINTS.iter().map(|s| s.to_string()).collect(),
        };

        Ok(Self {
            nginx_dir: path("VEILGATE_NGINX_DIR", "/etc/nginx"),
            web_root: path("VEILGATE_WEB_ROOT", "/var/www/veilgate"),
            fail2ban_dir: path("VEILGATE_FAIL2BAN_DIR", "/etc/fail2ban"),
            systemd_dir: path("VEILGATE_SYSTEMD_DIR", "/etc/systemd/system"),
            letsencrypt_dir: path("VEILGATE_LETSENCRYPT_DIR", "/etc/letsencrypt"),
            os_release_path: path("VEILGATE_OS_RELEASE", "/etc/os-release"),
            nginx_user: lookup("VEILGATE_NGINX_USER").filter(|u| !u.trim().is_empty()),
            upstream_port,
            ws_path,
            panel_url: lookup("VEILGATE_PANEL_URL").unwrap_or_else(|| DEFAULT_PANEL_URL.to_string()),
            ip_endpoints,
            json_logs: lookup("VEILGATE_LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json")),
        })
    }
}

fn parse_port(raw: &str) -> Result<u16> {
    match raw.trim().parse::<u16>() {
        Ok(0) | Err(_) => Err(InstallError::Config(format!(
            "VEILGATE_UPSTREAM_PORT must be a port between 1 and 65535, got '{}'",
            raw
        ))),
        Ok(port) => Ok(port),
    }
}

/// The path lands verbatim inside an nginx `location` directive.
fn normalize_ws_path(raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_start_matches('/');
    if trimmed.is_empty() {
        return Err(InstallError::Config("VEILGATE_WS_PATH cannot be empty".into()));
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '/')
        || trimmed.contains("//")
    {
        return Err(InstallError::Config(format!(
            "VEILGATE_WS_PATH contains characters nginx would misread: '{}'",
            raw
        )));
    }
    Ok(format!("/{}", trimmed))
}

fn random_ws_path() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(WS_PATH_LEN)
        .map(char::from)
        .collect();
    format!("/{}", suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<InstallerConfig> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        InstallerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let cfg = load(&[]).unwrap();
        assert_eq!(cfg.nginx_dir, PathBuf::from("/etc/nginx"));
        assert_eq!(cfg.fail2ban_dir, PathBuf::from("/etc/fail2ban"));
        assert_eq!(cfg.upstream_port, 10000);
        assert_eq!(cfg.panel_url, DEFAULT_PANEL_URL);
        assert_eq!(cfg.ip_endpoints.len(), DEFAULT_IP_ENDPOINTS.len());
        assert!(cfg.nginx_user.is_none());
        assert!(!cfg.json_logs);
    }

    #[test]
    fn random_ws_path_shape() {
        let cfg = load(&[]).unwrap();
        assert!(cfg.ws_path.starts_with('/'));
        assert_eq!(cfg.ws_path.len(), WS_PATH_LEN + 1);
        assert!(cfg.ws_path[1..].chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = load(&[
            ("VEILGATE_NGINX_DIR", "/tmp/nginx"),
            ("VEILGATE_UPSTREAM_PORT", "2096"),
            ("VEILGATE_WS_PATH", "tunnel"),
            ("VEILGATE_IP_ENDPOINTS", " https://a.example , ,https://b.example"),
            ("VEILGATE_LOG_FORMAT", "JSON"),
        ])
        .unwrap();
        assert_eq!(cfg.nginx_dir, PathBuf::from("/tmp/nginx"));
        assert_eq!(cfg.upstream_port, 2096);
        assert_eq!(cfg.ws_path, "/tunnel");
        assert_eq!(cfg.ip_endpoints, vec!["https://a.example", "https://b.example"]);
        assert!(cfg.json_logs);
    }

    #[test]
    fn rejects_bad_port() {
        assert!(load(&[("VEILGATE_UPSTREAM_PORT", "0")]).is_err());
        assert!(load(&[("VEILGATE_UPSTREAM_PORT", "70000")]).is_err());
        assert!(load(&[("VEILGATE_UPSTREAM_PORT", "http")]).is_err());
    }

    #[test]
    fn rejects_injectable_ws_path() {
        assert!(load(&[("VEILGATE_WS_PATH", "/ws; return 200")]).is_err());
        assert!(load(&[("VEILGATE_WS_PATH", "/ws{")]).is_err());
        assert!(load(&[("VEILGATE_WS_PATH", "/")]).is_err());
        assert!(load(&[("VEILGATE_WS_PATH", "/a//b")]).is_err());
        assert!(load(&[("VEILGATE_IP_ENDPOINTS", " , ")]).is_err());
    }
}
