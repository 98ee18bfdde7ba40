//! Environment-driven core configuration.
//!
//! Values come from the process environment (after a best-effort
//! `dotenvy::dotenv()` so local `.env` files work during development).
//! Every knob has a default matching the production deployment.

use std::time::Duration;

/// Default façade base URL for local development.
const DEFAULT_API_URL: &str = "http://localhost:3001";

/// Default deadline for a single block fetch.
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 60;

/// Default deadline for a single pointer publish.
const DEFAULT_PUBLISH_TIMEOUT_SECS: u64 = 120;

/// Default cross-device sync polling interval.
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30;

/// Default per-user pin quota (500 MiB). The façade enforces the real
/// number; this is only used for local preflight display.
const DEFAULT_QUOTA_LIMIT_BYTES: u64 = 500 * 1024 * 1024;

/// Core runtime configuration.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Base URL of the CipherBox façade API.
    pub api_base_url: String,
    /// Deadline for a single block fetch.
    pub fetch_timeout: Duration,
    /// Deadline for a single pointer publish.
    pub publish_timeout: Duration,
    /// Cross-device sync polling interval.
    pub sync_interval: Duration,
    /// Default pin quota in bytes.
    pub quota_limit_bytes: u64,
}

impl CoreConfig {
    /// Load configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        // Missing .env is fine; the process environment still applies.
        let _ = dotenvy::dotenv();

        Self {
            api_base_url: std::env::var("CIPHERBOX_API_URL")
                .unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            fetch_timeout: Duration::from_secs(env_u64(
                "CIPHERBOX_FETCH_TIMEOUT_SECS",
                DEFAULT_FETCH_TIMEOUT_SECS,
            )),
            publish_timeout: Duration::from_secs(env_u64(
                "CIPHERBOX_PUBLISH_TIMEOUT_SECS",
                DEFAULT_PUBLISH_TIMEOUT_SECS,
            )),
            sync_interval: Duration::from_secs(env_u64(
                "CIPHERBOX_SYNC_INTERVAL_SECS",
                DEFAULT_SYNC_INTERVAL_SECS,
            )),
            quota_limit_bytes: env_u64("CIPHERBOX_QUOTA_LIMIT_BYTES", DEFAULT_QUOTA_LIMIT_BYTES),
        }
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            publish_timeout: Duration::from_secs(DEFAULT_PUBLISH_TIMEOUT_SECS),
            sync_interval: Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS),
            quota_limit_bytes: DEFAULT_QUOTA_LIMIT_BYTES,
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = CoreConfig::default();
        assert_eq!(cfg.fetch_timeout, Duration::from_secs(60));
        assert_eq!(cfg.publish_timeout, Duration::from_secs(120));
        assert_eq!(cfg.sync_interval, Duration::from_secs(30));
        assert_eq!(cfg.quota_limit_bytes, 500 * 1024 * 1024);
    }
}
