pub mod metrics;

pub use metrics::{prometheus_enabled, try_init_prometheus};

/// 指标名集中定义，避免散落的字符串拼写不一致。
pub const METRIC_ADDRESSES_PROCESSED: &str = "kepler_addresses_processed_total";
pub const METRIC_ADDRESSES_SKIPPED: &str = "kepler_addresses_skipped_total";
pub const METRIC_ADDRESSES_FAILED: &str = "kepler_addresses_failed_total";
pub const METRIC_TXS_SENT: &str = "kepler_txs_sent_total";
pub const METRIC_TXS_FAILED: &str = "kepler_txs_failed_total";
pub const METRIC_RUN_ATTEMPTS: &str = "kepler_run_attempts_total";
