use nix::unistd::Uid;

use crate::error::{InstallError, Result};

/// Fails unless the effective UID is root.
pub fn require_root() -> Result<()> {
    check_uid(Uid::effective())
}

fn check_uid(uid: Uid) -> Result<()> {
    if uid.is_root() {
        Ok(())
    } else {
        Err(InstallError::NotRoot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_passes() {
        assert!(check_uid(Uid::from_raw(0)).is_ok());
    }

    #[test]
    fn regular_user_is_rejected() {
        assert!(matches!(check_uid(Uid::from_raw(1000)), Err(InstallError::NotRoot)));
    }
}
