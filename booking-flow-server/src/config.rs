use anyhow::{Context, Result, bail};
use booking_flow::PollerConfig;
use std::net::SocketAddr;
use std::time::Duration;

use crate::app::Retention;

const DEFAULT_SESSION_IDLE: Duration = Duration::from_secs(30 * 60);
const DEFAULT_SETTLED_PAGE: Duration = Duration::from_secs(5 * 60);

/// Settings read from the environment at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub verify_base_url: String,
    pub retention: Retention,
    pub poller: PollerConfig,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let bind_addr = lookup("BIND_ADDR")
            .unwrap_or_else(|| "0.0.0.0:3000".to_string())
            .parse()
            .context("BIND_ADDR must be a socket address")?;

        let Some(verify_base_url) = lookup("VERIFY_BASE_URL") else {
            bail!("VERIFY_BASE_URL not set");
        };

        let retention = Retention {
            session_idle: seconds(&lookup, "SESSION_IDLE_TTL_SECS", DEFAULT_SESSION_IDLE)?,
            settled_page: seconds(&lookup, "CONFIRMATION_RETENTION_SECS", DEFAULT_SETTLED_PAGE)?,
        };
        let poller = PollerConfig::from_lookup(&lookup)?;

        Ok(Self {
            bind_addr,
            verify_base_url,
            retention,
            poller,
        })
    }
}

fn seconds(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: Duration,
) -> Result<Duration> {
    let Some(raw) = lookup(name) else {
        return Ok(default);
    };
    let secs: u64 = raw
        .trim()
        .parse()
        .with_context(|| format!("{name} must be a whole number of seconds"))?;
    if secs == 0 {
        bail!("{name} must be greater than zero");
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<ServerConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn requires_verify_base_url() {
        assert!(config(&[]).is_err());

        let config = config(&[("VERIFY_BASE_URL", "https://pay.example.com")]).unwrap();
        assert_eq!(config.bind_addr.port(), 3000);
        assert_eq!(config.retention.session_idle, DEFAULT_SESSION_IDLE);
        assert_eq!(config.retention.settled_page, DEFAULT_SETTLED_PAGE);
    }

    #[test]
    fn retention_overrides() {
        let config = config(&[
            ("VERIFY_BASE_URL", "https://pay.example.com"),
            ("SESSION_IDLE_TTL_SECS", "120"),
            ("CONFIRMATION_RETENTION_SECS", "15"),
        ])
        .unwrap();
        assert_eq!(config.retention.session_idle, Duration::from_secs(120));
        assert_eq!(config.retention.settled_page, Duration::from_secs(15));

        assert!(
            super::ServerConfig::from_lookup(|name| match name {
                "VERIFY_BASE_URL" => Some("https://pay.example.com".to_string()),
                "SESSION_IDLE_TTL_SECS" => Some("0".to_string()),
                _ => None,
            })
            .is_err()
        );
    }
}
