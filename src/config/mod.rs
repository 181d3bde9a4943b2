pub mod loader;
pub mod types;

pub use loader::*;
pub use types::*;

pub(crate) fn default_true() -> bool {
    true
}

pub(crate) fn default_logging_level() -> String {
    "info".to_string()
}

pub(crate) fn default_prometheus_listen() -> String {
    "0.0.0.0:9898".to_string()
}

pub(crate) fn default_batch_page_size() -> u32 {
    100
}

pub(crate) fn default_batch_queries() -> usize {
    25
}

pub(crate) fn default_batch_txs() -> usize {
    50
}

pub(crate) fn default_delegations_timeout_ms() -> u64 {
    30_000
}

pub(crate) fn default_query_timeout_ms() -> u64 {
    5_000
}

pub(crate) fn default_query_throttle_ms() -> u64 {
    100
}

pub(crate) fn default_gas_modifier() -> f64 {
    1.5
}

pub(crate) fn default_retries() -> u32 {
    2
}

pub(crate) fn default_retry_backoff_ms() -> u64 {
    30_000
}

pub(crate) fn default_decimals() -> u32 {
    6
}

pub(crate) fn default_minimum_reward() -> u64 {
    1_000
}

pub(crate) fn default_health_address() -> String {
    "https://hc-ping.com".to_string()
}
