use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::authz::GrantRecord;
use crate::chain::Coin;

pub mod lcd;

pub use lcd::LcdClient;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("HTTP 请求失败: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{endpoint} 返回 {status}")]
    Status {
        endpoint: String,
        status: reqwest::StatusCode,
    },
    #[error("解析响应失败: {0}")]
    Schema(String),
    #[error("无效端点: {0}")]
    Url(String),
}

/// 对某验证人的一条委托（只保留复投关心的字段）。
#[derive(Debug, Clone, Deserialize)]
pub struct Delegation {
    pub delegator_address: String,
    pub balance: Coin,
}

/// 按验证人分组的可领取奖励（DecCoin，18 位小数字符串）。
#[derive(Debug, Clone, Deserialize)]
pub struct ValidatorReward {
    pub validator_address: String,
    #[serde(default)]
    pub reward: Vec<Coin>,
}

/// 链上只读查询的接口。生产实现为 [`LcdClient`]，测试用内存桩替换。
#[async_trait]
pub trait QueryApi: Send + Sync {
    async fn balance(&self, address: &str, denom: &str) -> Result<Coin, QueryError>;

    /// 分页取回某验证人的全部委托。
    async fn validator_delegations(
        &self,
        validator: &str,
        page_size: u32,
    ) -> Result<Vec<Delegation>, QueryError>;

    /// 批量查询 grantee 名下的全部授权（v0.46+ 才有的端点，失败时
    /// 由调用方回落到逐地址查询）。
    async fn grantee_grants(&self, grantee: &str) -> Result<Vec<GrantRecord>, QueryError>;

    async fn grants(&self, grantee: &str, granter: &str) -> Result<Vec<GrantRecord>, QueryError>;

    async fn withdraw_address(&self, delegator: &str) -> Result<String, QueryError>;

    async fn rewards(&self, delegator: &str) -> Result<Vec<ValidatorReward>, QueryError>;
}
