// src/sys/files.rs

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

use crate::error::{InstallError, Result};

/// Writes `content` to `path` through a sibling `.tmp` file and a rename,
/// so a reader never observes a half-written config.
pub async fn write_atomic(path: &Path, content: &str, mode: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| InstallError::io(parent, e))?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    fs::write(&tmp_path, content)
        .await
        .map_err(|e| InstallError::io(&tmp_path, e))?;

    let perms = std::fs::Permissions::from_mode(mode);
    if let Err(e) = fs::set_permissions(&tmp_path, perms).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(InstallError::io(&tmp_path, e));
    }

    if let Err(e) = fs::rename(&tmp_path, path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(InstallError::io(path, e));
    }

    Ok(())
}

/// Copies an existing file to `<path>.bak-<timestamp>` before it is overwritten.
/// Returns the backup location, or `None` when there was nothing to keep.
pub async fn backup_existing(path: &Path) -> Result<Option<PathBuf>> {
    if !fs::try_exists(path).await.map_err(|e| InstallError::io(path, e))? {
        return Ok(None);
    }

    let timestamp = chrono::Local::now().format("%Y%m%d%H%M%S");
    let mut backup_name = path.as_os_str().to_owned();
    backup_name.push(format!(".bak-{}", timestamp));
    let backup = PathBuf::from(backup_name);

    fs::copy(path, &backup)
        .await
        .map_err(|e| InstallError::io(&backup, e))?;
    info!(original = %path.display(), backup = %backup.display(), "backed up existing file");
    Ok(Some(backup))
}

/// True when `path` exists and its first line is `marker`-prefixed.
pub async fn has_header(path: &Path, marker: &str) -> bool {
    match fs::read_to_string(path).await {
        Ok(contents) => contents.starts_with(marker),
        Err(_) => false,
    }
}
