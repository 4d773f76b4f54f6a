//! Command-line interface. Every flag is optional; with none given the
//! installer asks for the domain interactively.

use clap::Parser;

/// Provision an Nginx decoy site that fronts a WebSocket proxy, protect it
/// with fail2ban and hand over to the panel installer.
#[derive(Parser, Debug, Default, Clone)]
#[command(name = "veilgate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Domain pointing at this server. Skips the interactive prompt.
    #[arg(short, long, value_name = "DOMAIN")]
    pub domain: Option<String>,

    /// Contact address for the ACME account.
    #[arg(short, long, value_name = "EMAIL")]
    pub email: Option<String>,

    /// Do not download and run the third-party panel installer.
    #[arg(long)]
    pub skip_panel: bool,

    /// Leave iptables untouched.
    #[arg(long)]
    pub skip_firewall: bool,
}
