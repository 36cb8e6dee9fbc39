//! Tunables for the token lifecycle, rate limiter and retry policy.
//!
//! All structs deserialize from TOML/JSON with every field optional; missing
//! fields fall back to the documented defaults.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::LedgerConfig;
use crate::resilience::RetryPolicy;

/// Error type for invalid configuration values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

/// Settings for one [`TokenLifecycleManager`](crate::lifecycle::TokenLifecycleManager).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Refresh once the token expires within this many seconds.
    pub proactive_window_secs: u64,

    /// Interval of the background refresh scheduler in seconds.
    pub refresh_interval_secs: u64,

    /// Keep exposing the last access token after a transient refresh failure.
    pub expose_stale_token: bool,

    pub ledger: LedgerConfig,

    pub retry: RetryPolicy,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            proactive_window_secs: 600,
            refresh_interval_secs: 900,
            expose_stale_token: true,
            ledger: LedgerConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl LifecycleConfig {
    pub fn proactive_window(&self) -> Duration {
        Duration::seconds(self.proactive_window_secs as i64)
    }

    pub fn refresh_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.refresh_interval_secs)
    }

    /// Reject values that would disable the limiter or the scheduler.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "refresh_interval_secs",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.ledger.max_attempts_in_window == 0 {
            return Err(ConfigError::Invalid {
                field: "ledger.max_attempts_in_window",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.ledger.capacity < self.ledger.max_attempts_in_window {
            return Err(ConfigError::Invalid {
                field: "ledger.capacity",
                message: format!(
                    "must be at least max_attempts_in_window ({})",
                    self.ledger.max_attempts_in_window
                ),
            });
        }
        self.retry.validate()
    }
}
