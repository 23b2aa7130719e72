//! CA status polling configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

/// Longest accepted single delay (10 minutes)
pub const MAX_DELAY_MS: u64 = 600_000;

/// Longest accepted wait on the CA (one day)
pub const MAX_TIMEOUT_SECS: u64 = 86_400;

/// Backoff applied while waiting on the CA
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PollingConfig {
    /// Delay before the first re-poll
    #[serde(default = "default_initial_delay_ms")]
    #[validate(range(min = 1, max = MAX_DELAY_MS))]
    pub initial_delay_ms: u64,

    /// Multiplier applied to the delay after each poll
    #[serde(default = "default_backoff_factor")]
    #[validate(range(min = 1, max = 16))]
    pub backoff_factor: u32,

    /// Upper bound for a single delay
    #[serde(default = "default_max_delay_ms")]
    #[validate(range(min = 1, max = MAX_DELAY_MS))]
    pub max_delay_ms: u64,

    /// Hard ceiling for one wait, after which issuance times out
    #[serde(default = "default_timeout_secs")]
    #[validate(range(min = 1, max = MAX_TIMEOUT_SECS))]
    pub timeout_secs: u64,
}

impl PollingConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            backoff_factor: default_backoff_factor(),
            max_delay_ms: default_max_delay_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_backoff_factor() -> u32 {
    2
}

fn default_max_delay_ms() -> u64 {
    16_000
}

fn default_timeout_secs() -> u64 {
    120
}
