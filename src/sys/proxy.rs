use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tokio::fs;
use tracing::{info, warn};

use crate::error::{InstallError, Result};
use crate::sys::command::run_checked;
use crate::sys::files::{backup_existing, has_header, write_atomic};
use crate::sys::systemd::ServiceManager;
use crate::sys::traits::{ProxyManager, ProxySettings, SiteMode};

pub const SITE_NAME: &str = "veilgate";
const MANAGED_HEADER: &str = "# Managed by veilgate";
const MAX_DOMAIN_LEN: usize = 253;

static LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$").expect("static regex"));

/// 🛡️ Zero-Trust: the domain is spliced into nginx directives and filesystem paths,
/// so anything beyond lower-case LDH labels is refused.
pub fn validate_domain(domain: &str) -> Result<()> {
    if domain.is_empty() {
        return Err(InstallError::Validation("domain cannot be empty".into()));
    }
    if domain.len() > MAX_DOMAIN_LEN {
        return Err(InstallError::Validation(format!(
            "domain is longer than {} characters",
            MAX_DOMAIN_LEN
        )));
    }
    if !domain.contains('.') {
        return Err(InstallError::Validation(format!(
            "'{}' is not a fully qualified domain name",
            domain
        )));
    }
    if let Some(label) = domain.split('.').find(|label| !LABEL_RE.is_match(label)) {
        return Err(InstallError::Validation(format!(
            "invalid label '{}' in domain '{}'",
            label, domain
        )));
    }
    Ok(())
}

// ==============================================================================
// 1. Templates
// ==============================================================================

pub fn render_main_config(nginx_dir: &Path, nginx_user: &str) -> String {
    format!(
        r#"# Managed by veilgate. Local edits are overwritten on the next run.
user {user};
worker_processes auto;
pid /run/nginx.pid;
error_log /var/log/nginx/error.log warn;

events {{
    worker_connections 1024;
}}

http {{
    include {dir}/mime.types;
    default_type application/octet-stream;

    sendfile on;
    tcp_nopush on;
    keepalive_timeout 65;
    types_hash_max_size 2048;
    server_tokens off;

    access_log /var/log/nginx/access.log;

    gzip on;
    gzip_types text/plain text/css application/javascript application/json;

    include {dir}/conf.d/*.conf;
    include {dir}/sites-enabled/*;
}}
"#,
        user = nginx_user,
        dir = nginx_dir.display()
    )
}

fn acme_challenge_block(web_root: &Path) -> String {
    format!(
        r#"    location /.well-known/acme-challenge/ {{
        root {root};
        default_type "text/plain";
        try_files $uri =404;
    }}
"#,
        root = web_root.display()
    )
}

/// Chooses between the HTTP-only decoy and the TLS decoy fronting the WebSocket upstream.
pub fn render_site(mode: &SiteMode, settings: &ProxySettings) -> String {
    let acme = acme_challenge_block(&settings.web_root);
    let root = settings.web_root.display();

    match mode {
        SiteMode::HttpOnly => format!(
            r#"# Managed by veilgate (HTTP-only decoy).
server {{
    listen 80 default_server;
    listen [::]:80 default_server;
    server_name _;

    root {root};
    index index.html;

{acme}
    location / {{
        try_files $uri $uri/ =404;
    }}
}}
"#
        ),
        SiteMode::Https { domain, cert } => format!(
            r#"# Managed by veilgate (TLS decoy + WebSocket proxy).
server {{
    listen 80;
    listen [::]:80;
    server_name {domain};

{acme}
    location / {{
        return 301 https://$host$request_uri;
    }}
}}

server {{
    listen 443 ssl http2;
    listen [::]:443 ssl http2;
    server_name {domain};

    ssl_certificate {fullchain};
    ssl_certificate_key {privkey};
    ssl_protocols TLSv1.2 TLSv1.3;
    ssl_prefer_server_ciphers off;
    ssl_session_cache shared:SSL:10m;
    ssl_session_timeout 1d;

    root {root};
    index index.html;

    location / {{
        try_files $uri $uri/ =404;
    }}

    location {ws_path} {{
        if ($http_upgrade != "websocket") {{
            return 404;
        }}
        proxy_pass http://127.0.0.1:{port};
        proxy_http_version 1.1;
        proxy_set_header Upgrade $http_upgrade;
        proxy_set_header Connection "upgrade";
        proxy_set_header Host $host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_read_timeout 300s;
        proxy_send_timeout 300s;
    }}
}}
"#,
            fullchain = cert.fullchain.display(),
            privkey = cert.privkey.display(),
            ws_path = settings.ws_path,
            port = settings.upstream_port,
        ),
    }
}

pub fn render_decoy_page(title: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>{title}</title>
  <style>
    body {{ font-family: system-ui, sans-serif; margin: 0; background: #f5f5f4; color: #292524; }}
    main {{ max-width: 40rem; margin: 12vh auto; padding: 0 1.5rem; }}
    h1 {{ font-weight: 600; }}
  </style>
</head>
<body>
  <main>
    <h1>{title}</h1>
    <p>This site is under construction. Please check back soon.</p>
  </main>
</body>
</html>
"#
    )
}

/// Cheap structural check run before nginx ever sees the file: braces balance
/// and every directive is terminated.
pub fn lint_config(config: &str) -> Result<()> {
    let mut depth: i64 = 0;

    for (idx, raw) in config.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        depth += line.matches('{').count() as i64;
        depth -= line.matches('}').count() as i64;
        if depth < 0 {
            return Err(InstallError::Validation(format!(
                "unbalanced '}}' on line {}",
                idx + 1
            )));
        }

        if !(line.ends_with(';') || line.ends_with('{') || line.ends_with('}')) {
            return Err(InstallError::Validation(format!(
                "unterminated directive on line {}: '{}'",
                idx + 1,
                line
            )));
        }
    }

    if depth != 0 {
        return Err(InstallError::Validation(format!("{} unclosed block(s)", depth)));
    }
    Ok(())
}

// ==============================================================================
// 2. Nginx Implementation
// ==============================================================================

pub struct NginxManager {
    base_path: PathBuf,
    services: Box<dyn ServiceManager>,
}

impl NginxManager {
    pub fn new(base_path: PathBuf, services: Box<dyn ServiceManager>) -> Self {
        Self { base_path, services }
    }

    fn site_path(&self) -> PathBuf {
        self.base_path.join("sites-available").join(SITE_NAME)
    }

    fn enabled_link(&self) -> PathBuf {
        self.base_path.join("sites-enabled").join(SITE_NAME)
    }

    /// Writes every file nginx will read. Does not touch the running service.
    pub async fn write_files(&self, mode: &SiteMode, settings: &ProxySettings) -> Result<()> {
        if let SiteMode::Https { domain, .. } = mode {
            validate_domain(domain)?;
        }

        let main_conf = render_main_config(&self.base_path, &settings.nginx_user);
        let site_conf = render_site(mode, settings);
        lint_config(&main_conf)?;
        lint_config(&site_conf)?;

        // Only the distribution's (or operator's) config is worth keeping.
        let main_path = self.base_path.join("nginx.conf");
        if !has_header(&main_path, MANAGED_HEADER).await {
            backup_existing(&main_path).await?;
        }
        write_atomic(&main_path, &main_conf, 0o644).await?;

        let site_path = self.site_path();
        write_atomic(&site_path, &site_conf, 0o644).await?;

        let enabled_dir = self.base_path.join("sites-enabled");
        fs::create_dir_all(&enabled_dir)
            .await
            .map_err(|e| InstallError::io(&enabled_dir, e))?;

        let link = self.enabled_link();
        if fs::symlink_metadata(&link).await.is_err() {
            fs::symlink(&site_path, &link)
                .await
                .map_err(|e| InstallError::io(&link, e))?;
        }

        // The distribution's default site would claim default_server on :80.
        let default_link = enabled_dir.join("default");
        if fs::symlink_metadata(&default_link).await.is_ok() {
            fs::remove_file(&default_link)
                .await
                .map_err(|e| InstallError::io(&default_link, e))?;
            info!("Disabled distribution default site");
        }

        let index = settings.web_root.join("index.html");
        if fs::try_exists(&index).await.unwrap_or(false) {
            info!("Keeping existing decoy page at {}", index.display());
        } else {
            write_atomic(&index, &render_decoy_page("Welcome"), 0o644).await?;
        }

        Ok(())
    }

    /// `nginx -t` against the tree this manager writes, not the compiled-in default.
    pub fn config_test_args(&self) -> Vec<String> {
        let main_path = self.base_path.join("nginx.conf");
        vec!["-t".to_string(), "-c".to_string(), main_path.display().to_string()]
    }

    async fn test_and_reload(&self) -> Result<()> {
        let args = self.config_test_args();
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        run_checked("nginx", &args).await.map_err(|e| match e {
            InstallError::CommandFailed { stderr, .. } => {
                InstallError::Validation(format!("nginx config error: {}", stderr))
            }
            other => other,
        })?;

        self.services.enable_now("nginx").await?;
        self.services.reload_or_restart("nginx").await
    }
}

#[async_trait]
impl ProxyManager for NginxManager {
    async fn apply(&self, mode: &SiteMode, settings: &ProxySettings) -> Result<()> {
        self.write_files(mode, settings).await?;
        if let Err(e) = self.test_and_reload().await {
            warn!("Generated nginx configuration was rejected");
            return Err(e);
        }
        info!(
            "🌐 Nginx serving {} decoy from {}",
            if mode.is_https() { "HTTPS" } else { "HTTP" },
            settings.web_root.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys::testing::RecordingServices;
    use crate::sys::traits::CertificatePaths;
    use tempfile::TempDir;

    fn settings(web_root: PathBuf) -> ProxySettings {
        ProxySettings {
            web_root,
            ws_path: "/k3Vq9".to_string(),
            upstream_port: 10000,
            nginx_user: "www-data".to_string(),
        }
    }

    fn https_mode() -> SiteMode {
        SiteMode::Https {
            domain: "vpn.example.com".to_string(),
            cert: CertificatePaths {
                fullchain: PathBuf::from("/etc/letsencrypt/live/vpn.example.com/fullchain.pem"),
                privkey: PathBuf::from("/etc/letsencrypt/live/vpn.example.com/privkey.pem"),
            },
        }
    }

    #[test]
    fn test_validate_domain_valid() {
        assert!(validate_domain("example.com").is_ok());
        assert!(validate_domain("sub.example.com").is_ok());
        assert!(validate_domain("my-site.com").is_ok());
        assert!(validate_domain("123.com").is_ok());
        assert!(validate_domain("xn--80ak6aa92e.com").is_ok());
    }

    #[test]
    fn test_validate_domain_invalid() {
        // Injection attempts
        assert!(validate_domain("example.com;").is_err());
        assert!(validate_domain("example.com{").is_err());
        assert!(validate_domain("example.com space").is_err());
        assert!(validate_domain("example.com\n").is_err());

        // Path traversal
        assert!(validate_domain("../foo.com").is_err());
        assert!(validate_domain("foo/bar.com").is_err());

        // Shape
        assert!(validate_domain("").is_err());
        assert!(validate_domain("localhost").is_err());
        assert!(validate_domain("a..com").is_err());
        assert!(validate_domain("-lead.com").is_err());
        assert!(validate_domain("trail-.com").is_err());
        assert!(validate_domain("Upper.com").is_err());
        assert!(validate_domain("under_score.com").is_err());
        assert!(validate_domain(&format!("{}.com", "a".repeat(64))).is_err());
        assert!(validate_domain(&format!("{}com", "abcdefgh.".repeat(30))).is_err());
    }

    #[test]
    fn http_only_site_has_no_proxy_location() {
        let site = render_site(&SiteMode::HttpOnly, &settings(PathBuf::from("/var/www/veilgate")));
        assert!(site.contains("listen 80 default_server;"));
        assert!(site.contains("root /var/www/veilgate;"));
        assert!(site.contains("location /.well-known/acme-challenge/"));
        assert!(!site.contains("443"));
        assert!(!site.contains("proxy_pass"));
        assert!(!site.contains("/k3Vq9"));
        lint_config(&site).unwrap();
    }

    #[test]
    fn https_site_gates_proxy_on_websocket_upgrade() {
        let site = render_site(&https_mode(), &settings(PathBuf::from("/var/www/veilgate")));

        assert!(site.contains("listen 443 ssl http2;"));
        assert!(site.contains("server_name vpn.example.com;"));
        assert!(site.contains("ssl_certificate /etc/letsencrypt/live/vpn.example.com/fullchain.pem;"));
        assert!(site.contains("ssl_certificate_key /etc/letsencrypt/live/vpn.example.com/privkey.pem;"));
        assert!(site.contains("return 301 https://$host$request_uri;"));

        let location = site.split("location /k3Vq9 {").nth(1).expect("proxy location present");
        assert!(location.contains("if ($http_upgrade != \"websocket\") {\n            return 404;"));
        assert!(location.contains("proxy_pass http://127.0.0.1:10000;"));
        assert!(location.contains("proxy_set_header Upgrade $http_upgrade;"));
        assert!(location.contains("proxy_set_header Connection \"upgrade\";"));

        lint_config(&site).unwrap();
    }

    #[test]
    fn main_config_is_well_formed() {
        let conf = render_main_config(Path::new("/etc/nginx"), "nginx");
        assert!(conf.contains("user nginx;"));
        assert!(conf.contains("include /etc/nginx/sites-enabled/*;"));
        assert!(conf.contains("server_tokens off;"));
        lint_config(&conf).unwrap();
    }

    #[test]
    fn lint_catches_structural_errors() {
        assert!(lint_config("server {\n    listen 80;\n").is_err());
        assert!(lint_config("}\n").is_err());
        assert!(lint_config("server {\n    listen 80\n}\n").is_err());
        assert!(lint_config("# comment only\n\n").is_ok());
    }

    #[test]
    fn decoy_page_carries_title() {
        let page = render_decoy_page("Welcome");
        assert!(page.starts_with("<!DOCTYPE html>"));
        assert!(page.contains("<title>Welcome</title>"));
    }

    #[tokio::test]
    async fn write_files_lays_out_tree() {
        let dir = TempDir::new().unwrap();
        let nginx_dir = dir.path().join("nginx");
        let web_root = dir.path().join("www");
        std::fs::create_dir_all(nginx_dir.join("sites-enabled")).unwrap();
        std::fs::create_dir_all(nginx_dir.join("sites-available")).unwrap();
        std::fs::write(nginx_dir.join("sites-available/default"), "server {}").unwrap();
        std::os::unix::fs::symlink(
            nginx_dir.join("sites-available/default"),
            nginx_dir.join("sites-enabled/default"),
        )
        .unwrap();
        std::fs::write(nginx_dir.join("nginx.conf"), "user www-data;").unwrap();

        let mgr = NginxManager::new(nginx_dir.clone(), Box::new(RecordingServices::default()));
        mgr.write_files(&https_mode(), &settings(web_root.clone())).await.unwrap();

        let site = std::fs::read_to_string(nginx_dir.join("sites-available/veilgate")).unwrap();
        assert!(site.contains("server_name vpn.example.com;"));
        assert!(std::fs::symlink_metadata(nginx_dir.join("sites-enabled/veilgate")).unwrap().file_type().is_symlink());
        assert!(std::fs::symlink_metadata(nginx_dir.join("sites-enabled/default")).is_err());
        assert!(web_root.join("index.html").exists());

        assert_eq!(count_backups(&nginx_dir), 1);

        // Re-running swaps templates in place and keeps the symlink.
        mgr.write_files(&SiteMode::HttpOnly, &settings(web_root)).await.unwrap();
        let site = std::fs::read_to_string(nginx_dir.join("sites-enabled/veilgate")).unwrap();
        assert!(site.contains("HTTP-only decoy"));
        assert_eq!(count_backups(&nginx_dir), 1);
    }

    fn count_backups(nginx_dir: &Path) -> usize {
        std::fs::read_dir(nginx_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("nginx.conf.bak-"))
            .count()
    }

    #[tokio::test]
    async fn own_main_config_is_not_backed_up() {
        let dir = TempDir::new().unwrap();
        let nginx_dir = dir.path().join("nginx");
        let web_root = dir.path().join("www");
        std::fs::create_dir_all(&nginx_dir).unwrap();
        std::fs::write(nginx_dir.join("nginx.conf"), render_main_config(&nginx_dir, "www-data")).unwrap();

        let mgr = NginxManager::new(nginx_dir.clone(), Box::new(RecordingServices::default()));
        mgr.write_files(&SiteMode::HttpOnly, &settings(web_root.clone())).await.unwrap();
        mgr.write_files(&https_mode(), &settings(web_root.clone())).await.unwrap();
        mgr.write_files(&SiteMode::HttpOnly, &settings(web_root)).await.unwrap();

        assert_eq!(count_backups(&nginx_dir), 0);
    }

    #[test]
    fn config_test_targets_managed_tree() {
        let mgr = NginxManager::new(PathBuf::from("/srv/ng"), Box::new(RecordingServices::default()));
        assert_eq!(mgr.config_test_args(), vec!["-t", "-c", "/srv/ng/nginx.conf"]);
    }

    #[tokio::test]
    async fn write_files_keeps_operator_decoy_page() {
        let dir = TempDir::new().unwrap();
        let web_root = dir.path().join("www");
        std::fs::create_dir_all(&web_root).unwrap();
        std::fs::write(web_root.join("index.html"), "<p>my blog</p>").unwrap();

        let mgr = NginxManager::new(dir.path().join("nginx"), Box::new(RecordingServices::default()));
        mgr.write_files(&SiteMode::HttpOnly, &settings(web_root.clone())).await.unwrap();

        assert_eq!(std::fs::read_to_string(web_root.join("index.html")).unwrap(), "<p>my blog</p>");
    }

    #[tokio::test]
    async fn write_files_rejects_bad_domain() {
        let dir = TempDir::new().unwrap();
        let mgr = NginxManager::new(dir.path().to_path_buf(), Box::new(RecordingServices::default()));
        let mode = SiteMode::Https {
            domain: "evil.com; include /etc/shadow".to_string(),
            cert: CertificatePaths { fullchain: PathBuf::from("/x"), privkey: PathBuf::from("/y") },
        };
        assert!(mgr.write_files(&mode, &settings(dir.path().join("www"))).await.is_err());
        assert!(!dir.path().join("sites-available").exists());
    }
}
