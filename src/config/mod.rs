use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub reconnect: ReconnectConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
}

/// Reconnection policy for the push channel.
///
/// Attempts are bounded; the delay grows per attempt up to `max_delay`,
/// and each handshake is cut off after `handshake_timeout`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub handshake_timeout_secs: u64,
    /// Add random jitter (up to 30%) to reconnect delays
    pub jitter: bool,
}

impl ReconnectConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 1_000,
            max_delay_ms: 5_000,
            handshake_timeout_secs: 20,
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Maximum number of cached notifications (LRU eviction beyond this)
    pub cache_capacity: usize,
    /// Interval between periodic unread-count reconciliations, in seconds
    pub reconcile_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 200,
            reconcile_interval_secs: 60,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Config {
            api: ApiConfig {
                base_url: std::env::var("NOTIFY_API_BASE_URL")
                    .unwrap_or_else(|_| "http://localhost:8000/api/v1".to_string()),
            },
            reconnect: ReconnectConfig {
                max_attempts: std::env::var("NOTIFY_RECONNECT_MAX_ATTEMPTS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()?,
                initial_delay_ms: std::env::var("NOTIFY_RECONNECT_INITIAL_DELAY_MS")
                    .unwrap_or_else(|_| "1000".to_string())
                    .parse()?,
                max_delay_ms: std::env::var("NOTIFY_RECONNECT_MAX_DELAY_MS")
                    .unwrap_or_else(|_| "5000".to_string())
                    .parse()?,
                handshake_timeout_secs: std::env::var("NOTIFY_HANDSHAKE_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()?,
                jitter: std::env::var("NOTIFY_RECONNECT_JITTER")
                    .unwrap_or_else(|_| "true".to_string())
                    .parse()?,
            },
            store: StoreConfig {
                cache_capacity: std::env::var("NOTIFY_CACHE_CAPACITY")
                    .unwrap_or_else(|_| "200".to_string())
                    .parse()?,
                reconcile_interval_secs: std::env::var("NOTIFY_RECONCILE_INTERVAL_SECS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()?,
            },
        })
    }
}
