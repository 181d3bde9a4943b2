use std::sync::Arc;

use metrics::counter;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::chain::{Network, Operator};
use crate::monitoring::{METRIC_TXS_FAILED, METRIC_TXS_SENT};
use crate::signing::{AnyMsg, Signer, exec};

use super::{AutostakeMessage, SentBatch};

/// 广播工作协程的最终产出。
#[derive(Debug)]
pub struct BroadcastOutcome {
    pub results: Vec<SentBatch>,
    pub balance: Decimal,
    pub force_fail: bool,
}

/// 单消费者的批量广播器。
///
/// 计算阶段把每个地址的委托消息投进 channel，这里按到达顺序去重累积，
/// 攒满 `batch_txs` 个地址或输入收尾时打包成一条 exec 交易。同一账户的
/// 序列号必须单调递增，广播串行由“只有这一个消费者”结构性保证，而不是
/// 靠调用方自律。余额也由这里独占：每笔成功（或 dry-run 模拟）的费用
/// 从余额里扣除，模拟费用超出余额直接置 `force_fail` 停机。
pub struct BatchBroadcaster<S> {
    network: Network,
    operator: Operator,
    signer: Arc<S>,
    balance: Decimal,
    dry_run: bool,
    pending: Vec<AutostakeMessage>,
    results: Vec<SentBatch>,
    force_fail: bool,
}

impl<S: Signer> BatchBroadcaster<S> {
    pub fn new(
        network: Network,
        operator: Operator,
        signer: Arc<S>,
        initial_balance: Decimal,
        dry_run: bool,
    ) -> Self {
        Self {
            network,
            operator,
            signer,
            balance: initial_balance,
            dry_run,
            pending: Vec::new(),
            results: Vec::new(),
            force_fail: false,
        }
    }

    pub async fn run(mut self, mut rx: mpsc::Receiver<AutostakeMessage>) -> BroadcastOutcome {
        let batch_txs = self.network.tunables.batch_txs.max(1);

        while let Some(message) = rx.recv().await {
            self.upsert(message);
            if self.pending.len() >= batch_txs {
                self.flush().await;
                if self.force_fail {
                    break;
                }
            }
        }
        // 输入收尾：最后一批不足 batch_txs 也要出清，不能把地址留在队里。
        if !self.force_fail && !self.pending.is_empty() {
            self.flush().await;
        }

        BroadcastOutcome {
            results: self.results,
            balance: self.balance,
            force_fail: self.force_fail,
        }
    }

    /// 一个地址在 pending 里至多占一个槽位，重复投递按后到覆盖。
    fn upsert(&mut self, message: AutostakeMessage) {
        match self
            .pending
            .iter_mut()
            .find(|entry| entry.address == message.address)
        {
            Some(entry) => entry.messages = message.messages,
            None => self.pending.push(message),
        }
    }

    async fn flush(&mut self) {
        let batch = std::mem::take(&mut self.pending);
        let addresses: Vec<String> = batch.iter().map(|entry| entry.address.clone()).collect();
        let inner: Vec<AnyMsg> = batch
            .into_iter()
            .flat_map(|entry| entry.messages)
            .collect();
        let message_count = inner.len();
        let description = format!("exec[{message_count}]");

        let exec_msg = exec(&self.operator.bot_address, &inner);
        let messages = [exec_msg];
        let memo = self.operator.memo();

        let gas = match self
            .signer
            .simulate(&self.operator.bot_address, &messages, &memo)
            .await
        {
            Ok(gas) => gas,
            Err(err) => {
                warn!(
                    target: "runner::broadcast",
                    network = %self.network.name,
                    addresses = addresses.len(),
                    %err,
                    "批次模拟失败"
                );
                counter!(METRIC_TXS_FAILED, "network" => self.network.name.clone()).increment(1);
                self.results.push(SentBatch {
                    message: description,
                    addresses,
                    error: Some(err.to_string()),
                });
                return;
            }
        };

        let fee = self.signer.fee(gas);
        let fee_total = fee.total();
        if fee_total > self.balance {
            error!(
                target: "runner::broadcast",
                network = %self.network.name,
                fee = %fee.amount,
                balance = %self.balance,
                "机器人余额不足以支付模拟费用，终止本次运行"
            );
            self.force_fail = true;
            self.results.push(SentBatch {
                message: description,
                addresses,
                error: Some(format!(
                    "insufficient balance: fee {} exceeds {}",
                    fee.amount, self.balance
                )),
            });
            return;
        }

        if self.dry_run {
            self.balance -= fee_total;
            info!(
                target: "runner::broadcast",
                network = %self.network.name,
                addresses = addresses.len(),
                gas,
                fee = %fee.amount,
                "dry-run：仅模拟，不广播"
            );
            self.results.push(SentBatch {
                message: format!("dry-run {description}"),
                addresses,
                error: None,
            });
            return;
        }

        match self
            .signer
            .sign_and_broadcast(&self.operator.bot_address, &messages, gas, &memo)
            .await
        {
            Ok(result) => {
                self.balance -= fee_total;
                counter!(METRIC_TXS_SENT, "network" => self.network.name.clone()).increment(1);
                info!(
                    target: "runner::broadcast",
                    network = %self.network.name,
                    tx_hash = %result.tx_hash,
                    addresses = addresses.len(),
                    balance = %self.balance,
                    "批次广播成功"
                );
                self.results.push(SentBatch {
                    message: result.tx_hash,
                    addresses,
                    error: None,
                });
            }
            Err(err) => {
                // 单批广播失败不影响后续批次，地址留给下一轮补跑。
                warn!(
                    target: "runner::broadcast",
                    network = %self.network.name,
                    addresses = addresses.len(),
                    %err,
                    "批次广播失败"
                );
                counter!(METRIC_TXS_FAILED, "network" => self.network.name.clone()).increment(1);
                self.results.push(SentBatch {
                    message: description,
                    addresses,
                    error: Some(err.to_string()),
                });
            }
        }
    }
}
