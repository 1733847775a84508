use crate::config::{
    DEFAULT_LEASE_TIMEOUT_SECS, DEFAULT_PARALLELISM, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_RETRY_DELAY_SECS, default_lease_timeout_secs, default_parallelism,
    default_poll_interval_ms, default_retry_delay_secs,
};

use std::time::Duration;

use serde::{Deserialize, Serialize};
use upis_core::QueueSettings;

/// Job runner tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Jobs run concurrently per tick.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Pause between idle ticks.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How long a running job stays invisible to other ticks.
    #[serde(default = "default_lease_timeout_secs")]
    pub lease_timeout_secs: u64,
    /// Backoff after a failed remote call.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            parallelism: DEFAULT_PARALLELISM,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            lease_timeout_secs: DEFAULT_LEASE_TIMEOUT_SECS,
            retry_delay_secs: DEFAULT_RETRY_DELAY_SECS,
        }
    }
}

impl QueueConfig {
    pub(crate) fn queue_settings(&self) -> QueueSettings {
        QueueSettings {
            parallelism: self.parallelism,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            lease_timeout: Duration::from_secs(self.lease_timeout_secs),
        }
    }

    pub(crate) fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}
