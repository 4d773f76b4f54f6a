// Modules are public so the installer can wire concrete managers; traits live in `traits`.

pub mod traits;     // Collaborator contracts
pub mod command;    // External process execution
pub mod files;      // Atomic config writes and backups
pub mod privilege;  // Root gate
pub mod packages;   // OS detection + package manager
pub mod network;    // Public IP lookup
pub mod ssl;        // ACME certificate issuance
pub mod proxy;      // Nginx decoy + WebSocket proxy
pub mod jail;       // fail2ban jails
pub mod systemd;    // Service control
pub mod scheduler;  // Renewal timer
pub mod firewall;   // iptables openings
pub mod panel;      // Third-party panel installer

#[cfg(test)]
pub mod testing;    // Shared fakes
