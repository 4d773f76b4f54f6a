use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

use crate::error::{InstallError, Result};
use crate::sys::command::run_checked;
use crate::sys::proxy::validate_domain;
use crate::sys::traits::{CertificateAuthority, CertificatePaths};

// ==============================================================================
// 1. Concrete Implementation (certbot, webroot challenge)
// ==============================================================================

pub struct CertbotAuthority {
    // Nginx serves /.well-known/acme-challenge/ out of this directory.
    web_root: PathBuf,
    letsencrypt_dir: PathBuf,
}

impl CertbotAuthority {
    pub fn new(web_root: PathBuf, letsencrypt_dir: PathBuf) -> Self {
        Self { web_root, letsencrypt_dir }
    }

    /// Where certbot stores the lineage for `domain`.
    pub fn paths_for(letsencrypt_dir: &Path, domain: &str) -> CertificatePaths {
        let live = letsencrypt_dir.join("live").join(domain);
        CertificatePaths {
            fullchain: live.join("fullchain.pem"),
            privkey: live.join("privkey.pem"),
        }
    }

    fn certonly_args(&self, domain: &str, email: Option<&str>) -> Vec<String> {
        let mut args = vec![
            "certonly".to_string(),
            "--webroot".to_string(),
            "-w".to_string(),
            self.web_root.display().to_string(),
            "-d".to_string(),
            domain.to_string(),
            "--non-interactive".to_string(),
            "--agree-tos".to_string(),
            "--keep-until-expiring".to_string(),
        ];

        match email {
            Some(addr) => {
                args.push("-m".to_string());
                args.push(addr.to_string());
            }
            None => args.push("--register-unsafely-without-email".to_string()),
        }

        args
    }
}

fn validate_email(email: &str) -> Result<()> {
    let valid = match email.split_once('@') {
        Some((local, host)) => {
            !local.is_empty()
                && host.contains('.')
                && !email.chars().any(|c| c.is_whitespace() || c.is_control())
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(InstallError::Validation(format!("invalid ACME account email: '{}'", email)))
    }
}

#[async_trait]
impl CertificateAuthority for CertbotAuthority {
    async fn issue(&self, domain: &str, email: Option<&str>) -> Result<CertificatePaths> {
        validate_domain(domain)?;
        if let Some(addr) = email {
            validate_email(addr)?;
        }

        info!("🔐 Requesting certificate for {} via certbot", domain);

        let args = self.certonly_args(domain, email);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        run_checked("certbot", &arg_refs).await?;

        // certbot can exit 0 without touching the lineage (e.g. dry hooks); trust the files, not the status.
        let paths = Self::paths_for(&self.letsencrypt_dir, domain);
        for pem in [&paths.fullchain, &paths.privkey] {
            let present = fs::try_exists(pem).await.map_err(|e| InstallError::io(pem, e))?;
            if !present {
                return Err(InstallError::Validation(format!(
                    "certbot reported success but {} is missing",
                    pem.display()
                )));
            }
        }

        info!("✅ Certificate installed at {}", paths.fullchain.display());
        Ok(paths)
    }
}
