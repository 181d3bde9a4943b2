//! 有界补跑驱动。
//!
//! 显式循环状态机：`Attempt(n)` → `Success | FatalFailure |
//! RetryableFailure`。每轮补跑的输入永远是上一轮的失败地址，已经成功
//! 的地址绝不会被二次处理；`force_fail`（余额不足）是终态，剩余补跑
//! 预算再多也不会继续——缺钱不是重试能解决的问题。

use std::time::Duration;

use metrics::counter;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::RunTunables;
use crate::health::HealthReporter;
use crate::monitoring::METRIC_RUN_ATTEMPTS;
use crate::runner::AutostakeRun;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    FatalFailure,
    RetryableFailure,
}

/// 单轮 attempt 的摘要，追加写入，不回改。
#[derive(Debug, Clone)]
pub struct AttemptSummary {
    pub attempt: u32,
    pub sent_txs: usize,
    pub tx_hashes: Vec<String>,
    pub failed_addresses: Vec<String>,
    pub error: Option<String>,
    pub force_fail: bool,
}

pub struct RetryDriver {
    max_retries: u32,
    backoff: Duration,
}

impl RetryDriver {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    pub fn from_tunables(tunables: &RunTunables) -> Self {
        Self::new(
            tunables.retries,
            Duration::from_millis(tunables.retry_backoff_ms),
        )
    }

    pub async fn drive(
        &self,
        runner: &dyn AutostakeRun,
        health: &HealthReporter,
    ) -> (RunOutcome, Vec<AttemptSummary>) {
        let network = runner.network_name().to_string();
        health.started().await;

        let mut attempts: Vec<AttemptSummary> = Vec::new();
        let mut addresses: Option<Vec<String>> = None;
        let total_attempts = self.max_retries + 1;

        for attempt in 1..=total_attempts {
            if attempt > 1 {
                info!(
                    target: "retry",
                    network = %network,
                    attempt,
                    backoff_secs = self.backoff.as_secs(),
                    "等待后补跑失败地址"
                );
                sleep(self.backoff).await;
            }
            counter!(METRIC_RUN_ATTEMPTS, "network" => network.clone()).increment(1);

            match runner.run(addresses.clone()).await {
                Ok(report) => {
                    let summary = AttemptSummary {
                        attempt,
                        sent_txs: report.sent_tx_count(),
                        tx_hashes: report.tx_hashes(),
                        failed_addresses: report.failed_addresses(),
                        error: None,
                        force_fail: report.force_fail,
                    };
                    health
                        .log(format!(
                            "attempt {attempt}: {} tx sent, {} addresses failed",
                            summary.sent_txs,
                            summary.failed_addresses.len()
                        ))
                        .await;

                    if report.force_fail {
                        attempts.push(summary);
                        health.failed(format!("{network}: aborted, bot balance too low")).await;
                        return (RunOutcome::FatalFailure, attempts);
                    }
                    if report.succeeded() {
                        let sent = summary.sent_txs;
                        attempts.push(summary);
                        info!(
                            target: "retry",
                            network = %network,
                            attempt,
                            sent,
                            "复投运行成功"
                        );
                        health.success(format!("{network}: {sent} tx sent")).await;
                        return (RunOutcome::Success, attempts);
                    }

                    // 下一轮只看这次失败的地址。
                    addresses = Some(summary.failed_addresses.clone());
                    attempts.push(summary);
                }
                Err(err) => {
                    warn!(
                        target: "retry",
                        network = %network,
                        attempt,
                        %err,
                        "本轮运行抛出异常"
                    );
                    health.log(format!("attempt {attempt}: {err}")).await;
                    // 异常没有产生新的失败集合，补跑范围维持不变。
                    attempts.push(AttemptSummary {
                        attempt,
                        sent_txs: 0,
                        tx_hashes: Vec::new(),
                        failed_addresses: addresses.clone().unwrap_or_default(),
                        error: Some(err.to_string()),
                        force_fail: false,
                    });
                }
            }
        }

        health
            .failed(format!("{network}: retries exhausted after {total_attempts} attempts"))
            .await;
        (RunOutcome::RetryableFailure, attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet, VecDeque};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use rust_decimal::Decimal;

    use crate::query::QueryError;
    use crate::runner::{RunReport, RunnerError, SentBatch};

    struct ScriptedRunner {
        responses: Mutex<VecDeque<Result<RunReport, RunnerError>>>,
        inputs: Mutex<Vec<Option<Vec<String>>>>,
    }

    impl ScriptedRunner {
        fn new(responses: Vec<Result<RunReport, RunnerError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                inputs: Mutex::new(Vec::new()),
            }
        }

        fn inputs(&self) -> Vec<Option<Vec<String>>> {
            self.inputs.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl AutostakeRun for ScriptedRunner {
        fn network_name(&self) -> &str {
            "testnet"
        }

        async fn run(&self, addresses: Option<Vec<String>>) -> Result<RunReport, RunnerError> {
            self.inputs.lock().expect("lock").push(addresses);
            self.responses
                .lock()
                .expect("lock")
                .pop_front()
                .expect("unexpected extra attempt")
        }
    }

    fn report_success() -> RunReport {
        RunReport {
            results: Vec::new(),
            errors: BTreeMap::new(),
            processed: BTreeSet::new(),
            balance: Decimal::ZERO,
            force_fail: false,
        }
    }

    fn report_failing(addresses: &[&str]) -> RunReport {
        let mut errors = BTreeMap::new();
        for address in addresses {
            errors.insert(address.to_string(), "query timed out".to_string());
        }
        RunReport {
            results: Vec::new(),
            errors,
            processed: BTreeSet::new(),
            balance: Decimal::ZERO,
            force_fail: false,
        }
    }

    fn report_fatal() -> RunReport {
        RunReport {
            results: Vec::new(),
            errors: BTreeMap::new(),
            processed: BTreeSet::new(),
            balance: Decimal::ZERO,
            force_fail: true,
        }
    }

    fn driver(max_retries: u32) -> RetryDriver {
        RetryDriver::new(max_retries, Duration::ZERO)
    }

    fn health() -> HealthReporter {
        HealthReporter::new("testnet", None)
    }

    #[tokio::test]
    async fn success_stops_after_first_attempt() {
        let runner = ScriptedRunner::new(vec![Ok(report_success())]);
        let (outcome, attempts) = driver(2).drive(&runner, &health()).await;

        assert_eq!(outcome, RunOutcome::Success);
        assert_eq!(attempts.len(), 1);
        assert_eq!(runner.inputs(), vec![None]);
    }

    #[tokio::test]
    async fn attempt_summary_carries_tx_hashes() {
        let mut report = report_success();
        report.results.push(SentBatch {
            message: "AB12CD".into(),
            addresses: vec!["cosmos1a".into()],
            error: None,
        });
        let runner = ScriptedRunner::new(vec![Ok(report)]);
        let (outcome, attempts) = driver(0).drive(&runner, &health()).await;

        assert_eq!(outcome, RunOutcome::Success);
        assert_eq!(attempts[0].tx_hashes, vec!["AB12CD".to_string()]);
    }

    #[tokio::test]
    async fn retries_narrow_to_failed_addresses() {
        let runner = ScriptedRunner::new(vec![
            Ok(report_failing(&["cosmos1a", "cosmos1b"])),
            Ok(report_failing(&["cosmos1b"])),
            Ok(report_success()),
        ]);
        let (outcome, attempts) = driver(2).drive(&runner, &health()).await;

        assert_eq!(outcome, RunOutcome::Success);
        assert_eq!(attempts.len(), 3);
        assert_eq!(
            runner.inputs(),
            vec![
                None,
                Some(vec!["cosmos1a".to_string(), "cosmos1b".to_string()]),
                Some(vec!["cosmos1b".to_string()]),
            ]
        );
    }

    #[tokio::test]
    async fn force_fail_is_terminal_despite_remaining_budget() {
        let runner = ScriptedRunner::new(vec![Ok(report_fatal())]);
        let (outcome, attempts) = driver(5).drive(&runner, &health()).await;

        assert_eq!(outcome, RunOutcome::FatalFailure);
        assert_eq!(attempts.len(), 1);
        assert!(attempts[0].force_fail);
    }

    #[tokio::test]
    async fn exhausted_budget_reports_retryable_failure() {
        let runner = ScriptedRunner::new(vec![
            Ok(report_failing(&["cosmos1a"])),
            Ok(report_failing(&["cosmos1a"])),
            Ok(report_failing(&["cosmos1a"])),
        ]);
        let (outcome, attempts) = driver(2).drive(&runner, &health()).await;

        assert_eq!(outcome, RunOutcome::RetryableFailure);
        assert_eq!(attempts.len(), 3);
    }

    #[tokio::test]
    async fn runner_errors_keep_the_previous_address_scope() {
        let runner = ScriptedRunner::new(vec![
            Err(RunnerError::Balance(QueryError::Schema("boom".into()))),
            Ok(report_failing(&["cosmos1a"])),
            Err(RunnerError::Discovery(QueryError::Schema("boom".into()))),
            Ok(report_success()),
        ]);
        let (outcome, attempts) = driver(3).drive(&runner, &health()).await;

        assert_eq!(outcome, RunOutcome::Success);
        assert_eq!(attempts.len(), 4);
        assert!(attempts[0].error.is_some());
        assert_eq!(
            runner.inputs(),
            vec![
                None,
                None,
                Some(vec!["cosmos1a".to_string()]),
                Some(vec!["cosmos1a".to_string()]),
            ]
        );
    }
}
