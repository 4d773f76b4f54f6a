use async_trait::async_trait;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::process::Stdio;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::info;

use crate::error::{InstallError, Result};
use crate::sys::traits::PanelInstaller;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Downloads a third-party installer script and hands the terminal to it.
pub struct RemotePanelInstaller {
    client: reqwest::Client,
    url: String,
}

impl RemotePanelInstaller {
    pub fn new(url: String) -> Result<Self> {
        if !url.starts_with("https://") {
            return Err(InstallError::Config(format!(
                "panel installer must be fetched over https, got '{}'",
                url
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .user_agent(concat!("veilgate/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, url })
    }

    async fn fetch(&self) -> Result<String> {
        info!("⬇️ Fetching panel installer from {}", self.url);
        let response = self.client.get(&self.url).send().await?.error_for_status()?;
        let body = response.text().await?;
        check_script(&body)?;
        Ok(body)
    }
}

/// A captive portal or error page must never reach `bash`.
pub fn check_script(body: &str) -> Result<()> {
    if body.trim().is_empty() {
        return Err(InstallError::Validation("panel installer download is empty".into()));
    }
    if !body.starts_with("#!") {
        return Err(InstallError::Validation(
            "panel installer download is not a shell script (missing #! line)".into(),
        ));
    }
    Ok(())
}

/// Persists the script into a 0700 temp file. The file is removed when the handle drops.
pub fn stage_script(body: &str) -> Result<NamedTempFile> {
    let mut script = tempfile::Builder::new()
        .prefix("veilgate-panel-")
        .suffix(".sh")
        .tempfile()
        .map_err(|e| InstallError::io(std::env::temp_dir(), e))?;

    if let Err(e) = script.write_all(body.as_bytes()) {
        return Err(InstallError::io(script.path(), e));
    }
    if let Err(e) = script.flush() {
        return Err(InstallError::io(script.path(), e));
    }

    std::fs::set_permissions(script.path(), std::fs::Permissions::from_mode(0o700))
        .map_err(|e| InstallError::io(script.path(), e))?;

    Ok(script)
}

#[async_trait]
impl PanelInstaller for RemotePanelInstaller {
    async fn install(&self) -> Result<()> {
        let body = self.fetch().await?;
        let script = stage_script(&body)?;

        info!("🧩 Running panel installer; it may ask questions on this terminal");

        // Inherited stdio: the installer is interactive.
        let status = Command::new("bash")
            .arg(script.path())
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|source| InstallError::CommandSpawn { program: "bash".into(), source })?;

        drop(script);

        if !status.success() {
            return Err(InstallError::CommandFailed {
                program: "panel installer".into(),
                code: status.code().unwrap_or(-1),
                stderr: String::new(),
            });
        }

        info!("✅ Panel installer finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_shebang_scripts() {
        assert!(check_script("#!/bin/bash\necho hi\n").is_ok());
        assert!(check_script("#!/usr/bin/env bash\n").is_ok());
    }

    #[test]
    fn rejects_html_and_empty_bodies() {
        assert!(check_script("").is_err());
        assert!(check_script("   \n").is_err());
        assert!(check_script("<!DOCTYPE html><title>Login</title>").is_err());
    }

    #[test]
    fn staged_script_is_private_and_ephemeral() {
        let script = stage_script("#!/bin/sh\nexit 0\n").unwrap();
        let path = script.path().to_path_buf();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o700);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "#!/bin/sh\nexit 0\n");

        drop(script);
        assert!(!path.exists());
    }

    #[test]
    fn plain_http_url_is_refused() {
        assert!(matches!(
            RemotePanelInstaller::new("http://example.com/install.sh".into()),
            Err(InstallError::Config(_))
        ));
        assert!(RemotePanelInstaller::new("https://example.com/install.sh".into()).is_ok());
    }
}
