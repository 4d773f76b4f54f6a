// src/sys/network.rs

use async_trait::async_trait;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{InstallError, Result};
use crate::sys::traits::PublicIpResolver;

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(8);

/// Asks plain-text "what is my IP" services in order; the first parseable answer wins.
pub struct HttpIpResolver {
    client: reqwest::Client,
    endpoints: Vec<String>,
}

impl HttpIpResolver {
    pub fn new(endpoints: Vec<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(LOOKUP_TIMEOUT)
            .user_agent(concat!("veilgate/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, endpoints })
    }

    async fn query(&self, endpoint: &str) -> Result<IpAddr> {
        let response = self.client.get(endpoint).send().await?.error_for_status()?;
        let body = response.text().await?;
        parse_ip_body(&body)
    }
}

/// Services answer with the bare address, sometimes followed by a newline.
pub fn parse_ip_body(body: &str) -> Result<IpAddr> {
    let trimmed = body.trim();
    trimmed
        .parse::<IpAddr>()
        .map_err(|_| InstallError::Validation(format!("not an IP address: '{}'", trimmed)))
}

#[async_trait]
impl PublicIpResolver for HttpIpResolver {
    async fn lookup(&self) -> Result<IpAddr> {
        let mut last_err = None;

        for endpoint in &self.endpoints {
            match self.query(endpoint).await {
                Ok(ip) => {
                    debug!(endpoint = %endpoint, %ip, "public IP resolved");
                    return Ok(ip);
                }
                Err(e) => {
                    warn!(endpoint = %endpoint, "IP lookup failed: {}", e);
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| InstallError::Config("no IP lookup endpoints configured".into())))
    }
}
