use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use metrics::describe_counter;
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;

use super::{
    METRIC_ADDRESSES_FAILED, METRIC_ADDRESSES_PROCESSED, METRIC_ADDRESSES_SKIPPED,
    METRIC_RUN_ATTEMPTS, METRIC_TXS_FAILED, METRIC_TXS_SENT,
};

static EXPORTER: OnceCell<()> = OnceCell::new();
static PROMETHEUS_ENABLED: AtomicBool = AtomicBool::new(false);

pub fn try_init_prometheus(listen: &str) -> Result<()> {
    EXPORTER
        .get_or_try_init(|| {
            let addr: SocketAddr = listen
                .parse()
                .with_context(|| format!("invalid prometheus listen address: {listen}"))?;
            PrometheusBuilder::new()
                .with_http_listener(addr)
                .install()
                .context("failed to install prometheus exporter")?;
            describe_metrics();
            PROMETHEUS_ENABLED.store(true, Ordering::Relaxed);
            Ok(())
        })
        .map(|_| ())
}

pub fn prometheus_enabled() -> bool {
    PROMETHEUS_ENABLED.load(Ordering::Relaxed)
}

fn describe_metrics() {
    describe_counter!(
        METRIC_ADDRESSES_PROCESSED,
        "Delegator addresses handled to completion (restaked or skipped)"
    );
    describe_counter!(
        METRIC_ADDRESSES_SKIPPED,
        "Delegator addresses skipped by policy (threshold, withdraw address, grant cap)"
    );
    describe_counter!(
        METRIC_ADDRESSES_FAILED,
        "Delegator addresses whose queries failed and were left for retry"
    );
    describe_counter!(METRIC_TXS_SENT, "Exec transactions broadcast successfully");
    describe_counter!(
        METRIC_TXS_FAILED,
        "Exec transactions that failed simulation or broadcast"
    );
    describe_counter!(METRIC_RUN_ATTEMPTS, "Autostake run attempts per network");
}
