use std::time::Duration;

use crate::{ApiClientError, Result};

/// Configures HTTP timeout, retry and rate-limit behavior.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientOptions {
    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: u64,
    /// Maximum number of retries after the initial attempt.
    pub max_retries: usize,
    /// Base retry backoff in milliseconds (exponential strategy).
    pub retry_backoff_ms: u64,
    /// Upper bound for a single generic backoff wait.
    pub max_backoff_ms: u64,
    /// Statuses retried with the generic backoff schedule.
    pub retry_on_status: Vec<u16>,
    /// Wait used for a rate-limited response without a usable retry-after hint.
    pub rate_limit_wait_ms: u64,
    /// Cap applied to server supplied retry-after hints.
    pub max_rate_limit_wait_ms: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_retries: 0,
            retry_backoff_ms: 100,
            max_backoff_ms: 10_000,
            retry_on_status: vec![500, 502, 503, 504],
            rate_limit_wait_ms: 1_000,
            max_rate_limit_wait_ms: 60_000,
        }
    }
}

impl ClientOptions {
    /// Builds options from the defaults overridden by environment variables.
    ///
    /// Reads (all optional):
    /// - `API_CLIENT_TIMEOUT_MS`
    /// - `API_CLIENT_MAX_RETRIES`
    /// - `API_CLIENT_RETRY_BACKOFF_MS`
    pub fn from_env() -> Result<Self> {
        let mut opts = Self::default();
        if let Some(value) = read_env_number("API_CLIENT_TIMEOUT_MS")? {
            opts.timeout_ms = value;
        }
        if let Some(value) = read_env_number("API_CLIENT_MAX_RETRIES")? {
            opts.max_retries = env_usize("API_CLIENT_MAX_RETRIES", value)?;
        }
        if let Some(value) = read_env_number("API_CLIENT_RETRY_BACKOFF_MS")? {
            opts.retry_backoff_ms = value;
        }
        Ok(opts)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

fn read_env_number(name: &'static str) -> Result<Option<u64>> {
    let Ok(raw) = std::env::var(name) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<u64>()
        .map(Some)
        .map_err(|err| ApiClientError::InvalidEnv {
            name,
            reason: err.to_string(),
        })
}

fn env_usize(name: &'static str, value: u64) -> Result<usize> {
    usize::try_from(value).map_err(|err| ApiClientError::InvalidEnv {
        name,
        reason: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::{env_usize, ClientOptions};
    use crate::ApiClientError;

    #[test]
    fn defaults_match_documented_values() {
        let opts = ClientOptions::default();
        assert_eq!(opts.timeout_ms, 30_000);
        assert_eq!(opts.max_retries, 0);
        assert_eq!(opts.retry_backoff_ms, 100);
        assert_eq!(opts.retry_on_status, vec![500, 502, 503, 504]);
    }

    #[test]
    fn backoff_accessors_convert_millis() {
        let opts = ClientOptions {
            retry_backoff_ms: 250,
            max_backoff_ms: 1_000,
            ..ClientOptions::default()
        };
        assert_eq!(opts.retry_backoff().as_millis(), 250);
        assert_eq!(opts.max_backoff().as_millis(), 1_000);
        assert_eq!(opts.timeout().as_secs(), 30);
    }

    #[test]
    fn env_count_outside_usize_is_rejected() {
        assert_eq!(env_usize("API_CLIENT_MAX_RETRIES", 7).unwrap(), 7);
        if usize::BITS < u64::BITS {
            let err = env_usize("API_CLIENT_MAX_RETRIES", u64::MAX).unwrap_err();
            assert!(matches!(
                err,
                ApiClientError::InvalidEnv { name: "API_CLIENT_MAX_RETRIES", .. }
            ));
        }
    }
}
