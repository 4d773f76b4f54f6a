// src/main.rs

use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod error;
mod installer;
mod sys;

use crate::cli::Cli;
use crate::config::InstallerConfig;
use crate::error::Result;
use crate::installer::{detect_os, Collaborators, Installer, Summary};

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// `VEILGATE_LOG_FORMAT` is read only through the config. A config error is logged as text.
fn wants_json(loaded: &Result<InstallerConfig>) -> bool {
    loaded.as_ref().is_ok_and(|config| config.json_logs)
}

fn report(summary: &Summary, json: bool) {
    if json {
        match serde_json::to_string(summary) {
            Ok(line) => info!(summary = %line, "installation complete"),
            Err(e) => error!("Failed to serialize summary: {}", e),
        }
        return;
    }

    info!("==============================================================");
    info!("✅ Installation complete ({} host)", summary.os_family);
    if let Some(ip) = &summary.public_ip {
        info!("   Public IP:      {}", ip);
    }
    if let Some(url) = &summary.decoy_url {
        info!("   Decoy site:     {}", url);
    }
    match &summary.ws_path {
        Some(path) => info!(
            "   Proxy endpoint: wss://{}{} -> 127.0.0.1:{}",
            summary.domain.as_deref().unwrap_or_default(),
            path,
            summary.upstream_port
        ),
        None => info!("   Proxy endpoint: disabled (no TLS certificate)"),
    }
    match summary.panel_installed {
        Some(true) => info!("   Panel:          installed; bind its inbound to 127.0.0.1:{}", summary.upstream_port),
        Some(false) => info!("   Panel:          installer failed, rerun it manually"),
        None => info!("   Panel:          skipped"),
    }
    info!("==============================================================");
}

async fn run(cli: Cli, config: InstallerConfig) -> Result<Summary> {
    // ==============================================================================
    // 1. Privilege & Platform Gate
    // ==============================================================================
    sys::privilege::require_root()?;
    let (_release, family) = detect_os(&config).await?;

    // ==============================================================================
    // 2. Dependency Injection & Pipeline
    // ==============================================================================
    let parts = Collaborators::system(&config, family)?;
    Installer::new(config, cli, family, parts).run().await
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let loaded = InstallerConfig::load();
    init_logging(wants_json(&loaded));

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            error!("❌ {}", e);
            return ExitCode::from(e.exit_code() as u8);
        }
    };
    let json = config.json_logs;

    info!("⚙️ veilgate {} starting", env!("CARGO_PKG_VERSION"));

    match run(cli, config).await {
        Ok(summary) => {
            report(&summary, json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("❌ {}", e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
