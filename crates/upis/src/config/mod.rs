#[allow(clippy::module_inception)]
mod config;
mod queue_config;
mod remote_config;
mod storage_config;

pub(crate) use {
    config::Config, queue_config::QueueConfig, remote_config::RemoteConfig,
    storage_config::StorageConfig,
};

pub(crate) const DEFAULT_PARALLELISM: usize = 5;
pub(crate) const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
pub(crate) const DEFAULT_LEASE_TIMEOUT_SECS: u64 = 300;
pub(crate) const DEFAULT_RETRY_DELAY_SECS: u64 = 10;

pub(crate) fn default_parallelism() -> usize {
    DEFAULT_PARALLELISM
}

pub(crate) fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

pub(crate) fn default_lease_timeout_secs() -> u64 {
    DEFAULT_LEASE_TIMEOUT_SECS
}

pub(crate) fn default_retry_delay_secs() -> u64 {
    DEFAULT_RETRY_DELAY_SECS
}
