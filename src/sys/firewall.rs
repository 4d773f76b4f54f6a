// src/sys/firewall.rs
//
// 🛡️ Single-Responsibility: opening the decoy's ports, nothing else.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use crate::error::{InstallError, Result};
use crate::sys::command::run_checked;
use crate::sys::traits::{FirewallManager, FirewallPolicy};

/// Inserts ACCEPT rules at the head of INPUT so they win over a trailing DROP policy.
pub struct IptablesManager;

impl IptablesManager {
    pub fn new() -> Self {
        Self
    }
}

/// The rule spec shared by `-C` (check) and `-I` (insert).
pub fn rule_args(proto: &str, port: u16) -> Vec<String> {
    vec![
        "INPUT".to_string(),
        "-p".to_string(), proto.to_string(),
        "--dport".to_string(), port.to_string(),
        "-j".to_string(), "ACCEPT".to_string(),
    ]
}

#[async_trait]
impl FirewallManager for IptablesManager {
    async fn allow(&self, policy: &FirewallPolicy) -> Result<()> {
        // Port range is enforced by u16; 0 is reserved.
        if policy.port == 0 {
            return Err(InstallError::Validation("port 0 is reserved and cannot be opened".into()));
        }

        let spec = rule_args("tcp", policy.port);

        // `iptables -C` exits 1 when the rule is absent; that is not an error here.
        let check = Command::new("iptables")
            .arg("-C")
            .args(&spec)
            .output()
            .await
            .map_err(|source| InstallError::CommandSpawn { program: "iptables".into(), source })?;

        if check.status.success() {
            info!("🛡️ Firewall: {}/tcp already open", policy.port);
            return Ok(());
        }

        let mut insert = vec!["-I"];
        insert.extend(spec.iter().map(String::as_str));
        run_checked("iptables", &insert).await?;

        info!("🛡️ Firewall: ACCEPT port {}/tcp", policy.port);
        Ok(())
    }
}

// ==============================================================================
// 🛡️ Unit Tests — Firewall Logic Validation
// ==============================================================================
