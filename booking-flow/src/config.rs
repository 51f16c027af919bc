use std::str::FromStr;
use std::time::Duration;

use crate::error::{BookingError, Result};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(5000);

/// What a transport error during one verification attempt means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkErrorPolicy {
    /// Treat it as a declined payment and stop.
    #[default]
    FailFast,
    /// Count it like a pending answer and keep polling.
    Retry,
}

/// Retry budget for payment confirmation polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    pub max_attempts: u32,
    pub interval: Duration,
    pub network_errors: NetworkErrorPolicy,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            interval: DEFAULT_INTERVAL,
            network_errors: NetworkErrorPolicy::FailFast,
        }
    }
}

impl PollerConfig {
    /// Defaults overridden by `BOOKING_POLL_MAX_ATTEMPTS`,
    /// `BOOKING_POLL_INTERVAL_MS` and `BOOKING_POLL_RETRY_NETWORK_ERRORS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(attempts) = parse_var::<u32>(&lookup, "BOOKING_POLL_MAX_ATTEMPTS")? {
            config.max_attempts = attempts;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "BOOKING_POLL_INTERVAL_MS")? {
            config.interval = Duration::from_millis(ms);
        }
        if let Some(retry) = parse_var::<bool>(&lookup, "BOOKING_POLL_RETRY_NETWORK_ERRORS")? {
            config.network_errors = if retry {
                NetworkErrorPolicy::Retry
            } else {
                NetworkErrorPolicy::FailFast
            };
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(BookingError::Config(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.interval.is_zero() {
            return Err(BookingError::Config(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>> {
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| BookingError::Config(format!("{name} has invalid value '{raw}'"))),
    }
}
