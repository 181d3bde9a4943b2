//! 单个网络一次复投流水的编排核心。
//!
//! 流程：余额检查 → 委托发现 →（批量优先的）授权发现与校验 → 逐地址
//! 计算 → 打包广播。地址级查询失败只记入 `errors`，留给补跑；余额不足
//! 支付模拟费用是唯一的致命路径（`force_fail`）。

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use metrics::counter;
use rust_decimal::Decimal;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::time::{Duration, sleep};
use tracing::{debug, info, warn};

use crate::authz::{GrantRecord, StakeGrant, parse_stake_grant};
use crate::chain::{Coin, Network, Operator, amount_to_string, floor_amount};
use crate::monitoring::{
    METRIC_ADDRESSES_FAILED, METRIC_ADDRESSES_PROCESSED, METRIC_ADDRESSES_SKIPPED,
};
use crate::query::{QueryApi, QueryError};
use crate::signing::{AnyMsg, Signer, delegate};

pub mod broadcast;

use broadcast::BatchBroadcaster;

#[derive(Debug, Error)]
pub enum RunnerError {
    /// 余额检查是后续所有广播闸门的前提，失败直接中止本轮。
    #[error("余额查询失败: {0}")]
    Balance(#[source] QueryError),
    #[error("委托发现失败: {0}")]
    Discovery(#[source] QueryError),
    #[error("广播工作协程异常退出")]
    WorkerGone,
}

/// 持有有效复投授权的地址。
#[derive(Debug, Clone)]
pub struct GrantedAddress {
    pub address: String,
    pub grant: StakeGrant,
}

/// 一个地址计算出的待广播消息。
#[derive(Debug, Clone)]
pub struct AutostakeMessage {
    pub address: String,
    pub messages: Vec<AnyMsg>,
}

/// 一次 flush 的结果，追加写，驱动上报与补跑地址筛选。
#[derive(Debug, Clone)]
pub struct SentBatch {
    pub message: String,
    pub addresses: Vec<String>,
    pub error: Option<String>,
}

/// 一次 attempt 结束后幸存的状态。
#[derive(Debug)]
pub struct RunReport {
    pub results: Vec<SentBatch>,
    pub errors: BTreeMap<String, String>,
    pub processed: BTreeSet<String>,
    pub balance: Decimal,
    pub force_fail: bool,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        !self.force_fail
            && self.errors.is_empty()
            && self.results.iter().all(|batch| batch.error.is_none())
    }

    /// 补跑输入：查询出错的地址 + 落在失败批次里的地址。
    pub fn failed_addresses(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut failed = Vec::new();
        for address in self.errors.keys() {
            if seen.insert(address.clone()) {
                failed.push(address.clone());
            }
        }
        for batch in self.results.iter().filter(|b| b.error.is_some()) {
            for address in &batch.addresses {
                if seen.insert(address.clone()) {
                    failed.push(address.clone());
                }
            }
        }
        failed
    }

    pub fn sent_tx_count(&self) -> usize {
        self.results
            .iter()
            .filter(|batch| batch.error.is_none())
            .count()
    }

    /// 成功批次的标识：广播模式下是链上 tx hash，dry-run 下是模拟说明。
    pub fn tx_hashes(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|batch| batch.error.is_none())
            .map(|batch| batch.message.clone())
            .collect()
    }
}

/// 补跑驱动依赖的最小接口，让重试契约可以脱离真实网络单测。
#[async_trait]
pub trait AutostakeRun: Send + Sync {
    fn network_name(&self) -> &str;

    async fn run(&self, addresses: Option<Vec<String>>) -> Result<RunReport, RunnerError>;
}

pub struct NetworkRunner<Q, S> {
    network: Network,
    operator: Operator,
    query: Arc<Q>,
    signer: Arc<S>,
    dry_run: bool,
}

impl<Q, S> NetworkRunner<Q, S>
where
    Q: QueryApi + 'static,
    S: Signer + 'static,
{
    pub fn new(
        network: Network,
        operator: Operator,
        query: Arc<Q>,
        signer: Arc<S>,
        dry_run: bool,
    ) -> Self {
        Self {
            network,
            operator,
            query,
            signer,
            dry_run,
        }
    }

    /// 跑一轮。`addresses` 为 None 时走完整发现流程；补跑时传入上一轮
    /// 的失败地址，跳过发现。
    pub async fn run(&self, addresses: Option<Vec<String>>) -> Result<RunReport, RunnerError> {
        let balance_coin = self
            .query
            .balance(&self.operator.bot_address, &self.network.denom)
            .await
            .map_err(RunnerError::Balance)?;
        let balance = balance_coin
            .decimal_amount()
            .map_err(|err| RunnerError::Balance(QueryError::Schema(err.to_string())))?;
        info!(
            target: "runner",
            network = %self.network.name,
            bot = %self.operator.bot_address,
            balance = %balance_coin,
            "机器人余额检查完成"
        );

        let candidates = match addresses {
            Some(list) => {
                info!(
                    target: "runner",
                    network = %self.network.name,
                    addresses = list.len(),
                    "补跑模式：跳过发现，只处理指定地址"
                );
                list
            }
            None => self.discover().await?,
        };

        let mut errors: BTreeMap<String, String> = BTreeMap::new();
        let mut processed: BTreeSet<String> = BTreeSet::new();

        let granted = self
            .resolve_grants(&candidates, &mut errors, &mut processed)
            .await;
        info!(
            target: "runner",
            network = %self.network.name,
            candidates = candidates.len(),
            granted = granted.len(),
            "授权校验完成"
        );

        let (tx, rx) = mpsc::channel::<AutostakeMessage>(self.network.tunables.batch_txs.max(1));
        let broadcaster = BatchBroadcaster::new(
            self.network.clone(),
            self.operator.clone(),
            Arc::clone(&self.signer),
            balance,
            self.dry_run,
        );
        let worker = tokio::spawn(broadcaster.run(rx));

        let throttle = Duration::from_millis(self.network.tunables.query_throttle_ms);
        let window = self.network.tunables.batch_queries.max(1);
        let mut windows = granted.chunks(window).peekable();
        'windows: while let Some(chunk) = windows.next() {
            let results = join_all(chunk.iter().map(|entry| self.compute(entry))).await;
            for (entry, result) in chunk.iter().zip(results) {
                match result {
                    Ok(Some(message)) => {
                        processed.insert(entry.address.clone());
                        if tx.send(message).await.is_err() {
                            // 广播端已因致命错误收摊，继续算也没有意义。
                            break 'windows;
                        }
                    }
                    Ok(None) => {
                        processed.insert(entry.address.clone());
                    }
                    Err(err) => {
                        errors.insert(entry.address.clone(), err.to_string());
                    }
                }
            }
            if windows.peek().is_some() {
                sleep(throttle).await;
            }
        }
        drop(tx);

        let outcome = worker.await.map_err(|_| RunnerError::WorkerGone)?;

        counter!(METRIC_ADDRESSES_PROCESSED, "network" => self.network.name.clone())
            .increment(processed.len() as u64);
        counter!(METRIC_ADDRESSES_FAILED, "network" => self.network.name.clone())
            .increment(errors.len() as u64);

        Ok(RunReport {
            results: outcome.results,
            errors,
            processed,
            balance: outcome.balance,
            force_fail: outcome.force_fail,
        })
    }

    /// 发现阶段：分页拉取对本验证人的全部委托，丢掉零余额的条目。
    async fn discover(&self) -> Result<Vec<String>, RunnerError> {
        let delegations = self
            .query
            .validator_delegations(
                &self.operator.validator_address,
                self.network.tunables.batch_page_size,
            )
            .await
            .map_err(RunnerError::Discovery)?;

        let mut addresses = Vec::new();
        for delegation in delegations {
            let live = delegation
                .balance
                .decimal_amount()
                .map(|amount| amount > Decimal::ZERO)
                .unwrap_or(false);
            if live {
                addresses.push(delegation.delegator_address);
            }
        }
        info!(
            target: "runner",
            network = %self.network.name,
            validator = %self.operator.validator_address,
            delegators = addresses.len(),
            "委托发现完成"
        );
        Ok(addresses)
    }

    /// 授权发现：优先一次批量查询，失败时透明回落到逐地址查询。
    /// 没有有效授权的地址按“已处理”跳过，不算错误。
    async fn resolve_grants(
        &self,
        candidates: &[String],
        errors: &mut BTreeMap<String, String>,
        processed: &mut BTreeSet<String>,
    ) -> Vec<GrantedAddress> {
        let now = OffsetDateTime::now_utc();
        let grantee = &self.operator.bot_address;

        let bulk = match self.query.grantee_grants(grantee).await {
            Ok(records) => {
                let mut by_granter: HashMap<String, Vec<GrantRecord>> = HashMap::new();
                for record in records {
                    if let Some(granter) = record.granter.clone() {
                        by_granter.entry(granter).or_default().push(record);
                    }
                }
                Some(by_granter)
            }
            Err(err) => {
                warn!(
                    target: "runner",
                    network = %self.network.name,
                    %err,
                    "批量授权查询失败，回退为逐地址查询"
                );
                None
            }
        };

        let mut granted = Vec::new();

        if let Some(by_granter) = bulk {
            for address in candidates {
                let records = by_granter.get(address).cloned().unwrap_or_default();
                match parse_stake_grant(
                    &records,
                    grantee,
                    address,
                    &self.operator.validator_address,
                    now,
                ) {
                    Some(grant) => granted.push(GrantedAddress {
                        address: address.clone(),
                        grant,
                    }),
                    None => {
                        self.skip(address, "无有效复投授权");
                        processed.insert(address.clone());
                    }
                }
            }
            return granted;
        }

        let throttle = Duration::from_millis(self.network.tunables.query_throttle_ms);
        let window = self.network.tunables.batch_queries.max(1);
        let mut windows = candidates.chunks(window).peekable();
        while let Some(chunk) = windows.next() {
            let results = join_all(
                chunk
                    .iter()
                    .map(|address| self.query.grants(grantee, address)),
            )
            .await;
            for (address, result) in chunk.iter().zip(results) {
                match result {
                    Ok(records) => {
                        match parse_stake_grant(
                            &records,
                            grantee,
                            address,
                            &self.operator.validator_address,
                            now,
                        ) {
                            Some(grant) => granted.push(GrantedAddress {
                                address: address.clone(),
                                grant,
                            }),
                            None => {
                                self.skip(address, "无有效复投授权");
                                processed.insert(address.clone());
                            }
                        }
                    }
                    Err(err) => {
                        errors.insert(address.clone(), err.to_string());
                    }
                }
            }
            if windows.peek().is_some() {
                sleep(throttle).await;
            }
        }

        granted
    }

    /// 逐地址计算：领奖地址必须是本人，奖励按本验证人口径取整数，
    /// 低于阈值跳过，超出授权上限收紧到上限。
    async fn compute(&self, entry: &GrantedAddress) -> Result<Option<AutostakeMessage>, QueryError> {
        let address = &entry.address;

        let withdraw = self.query.withdraw_address(address).await?;
        if withdraw != *address {
            self.skip(address, "领奖地址已改道，复投会流向他人账户");
            return Ok(None);
        }

        let rewards = self.query.rewards(address).await?;
        let mut total = Decimal::ZERO;
        if let Some(reward) = rewards
            .iter()
            .find(|r| r.validator_address == self.operator.validator_address)
        {
            for coin in &reward.reward {
                if coin.denom == self.network.denom {
                    let amount = coin
                        .decimal_amount()
                        .map_err(|err| QueryError::Schema(err.to_string()))?;
                    total += amount;
                }
            }
        }

        let mut amount = floor_amount(total);
        if amount < self.operator.minimum_reward_decimal() {
            self.skip(address, "奖励低于复投阈值");
            return Ok(None);
        }

        if let Some(max_tokens) = entry.grant.max_tokens {
            if max_tokens <= Decimal::ZERO {
                self.skip(address, "授权额度已耗尽");
                return Ok(None);
            }
            let cap = floor_amount(max_tokens);
            if cap < amount {
                debug!(
                    target: "runner",
                    network = %self.network.name,
                    address = %address,
                    reward = %amount,
                    cap = %cap,
                    "复投金额收紧到授权上限"
                );
                amount = cap;
            }
        }

        let coin = Coin::new(self.network.denom.clone(), amount_to_string(amount));
        debug!(
            target: "runner",
            network = %self.network.name,
            address = %address,
            amount = %coin,
            "生成复投委托消息"
        );
        Ok(Some(AutostakeMessage {
            address: address.clone(),
            messages: vec![delegate(address, &self.operator.validator_address, &coin)],
        }))
    }

    fn skip(&self, address: &str, reason: &str) {
        debug!(
            target: "runner",
            network = %self.network.name,
            address,
            reason,
            "地址跳过"
        );
        counter!(METRIC_ADDRESSES_SKIPPED, "network" => self.network.name.clone()).increment(1);
    }
}

#[async_trait]
impl<Q, S> AutostakeRun for NetworkRunner<Q, S>
where
    Q: QueryApi + 'static,
    S: Signer + 'static,
{
    fn network_name(&self) -> &str {
        &self.network.name
    }

    async fn run(&self, addresses: Option<Vec<String>>) -> Result<RunReport, RunnerError> {
        NetworkRunner::run(self, addresses).await
    }
}
