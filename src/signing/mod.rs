//! 签名协作方的接口与费用计算。
//!
//! 机器人本体不持有任何私钥：模拟、签名与广播都交给操作者自己部署的
//! 签名 sidecar（见 [`RestSigner`]）。这里只定义 trait 边界、消息模型
//! 与纯函数的费用计算。

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::chain::Coin;

pub mod messages;
pub mod rest;

pub use messages::{AnyMsg, MSG_EXEC_TYPE_URL, delegate, exec};
pub use rest::RestSigner;

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("签名服务请求失败: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{endpoint} 返回 {status}")]
    Status {
        endpoint: String,
        status: reqwest::StatusCode,
    },
    #[error("解析签名服务响应失败: {0}")]
    Schema(String),
    #[error("链上拒绝交易 (code {code}): {raw_log}")]
    Chain { code: u32, raw_log: String },
    #[error("无效端点: {0}")]
    Url(String),
}

/// 一笔交易的费用：gas 上限与 base denom 计价的金额。
#[derive(Debug, Clone)]
pub struct Fee {
    pub amount: Coin,
    pub gas: u64,
}

impl Fee {
    pub fn total(&self) -> Decimal {
        // 金额由 calculate_fee 生成，必定可解析。
        self.amount.decimal_amount().unwrap_or(Decimal::ZERO)
    }
}

/// fee = ceil(gas × gas_price)，向上取整，宁可多付一个最小单位也不能
/// 低于节点的最低费率。
pub fn calculate_fee(gas: u64, gas_price: Decimal, denom: &str) -> Fee {
    let amount = (Decimal::from(gas) * gas_price).ceil();
    Fee {
        amount: Coin::new(denom, amount.normalize().to_string()),
        gas,
    }
}

#[derive(Debug, Clone)]
pub struct TxResult {
    pub tx_hash: String,
}

/// 签名协作方：模拟出 gas、换算费用、签名并广播。
#[async_trait]
pub trait Signer: Send + Sync {
    /// 模拟一组消息，返回已乘过 gas 系数的 gas 用量。
    async fn simulate(
        &self,
        sender: &str,
        messages: &[AnyMsg],
        memo: &str,
    ) -> Result<u64, SigningError>;

    fn fee(&self, gas: u64) -> Fee;

    /// 签名并广播；链上执行失败（code != 0）视为错误返回。
    async fn sign_and_broadcast(
        &self,
        sender: &str,
        messages: &[AnyMsg],
        gas: u64,
        memo: &str,
    ) -> Result<TxResult, SigningError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn fee_rounds_up_to_whole_units() {
        let price = Decimal::from_str("0.0025").expect("price");
        let fee = calculate_fee(200_001, price, "uosmo");
        // 200001 * 0.0025 = 500.0025 → 501
        assert_eq!(fee.amount.amount, "501");
        assert_eq!(fee.gas, 200_001);
        assert_eq!(fee.total(), Decimal::from(501));
    }

    #[test]
    fn fee_for_zero_gas_is_zero() {
        let price = Decimal::from_str("0.0025").expect("price");
        let fee = calculate_fee(0, price, "uosmo");
        assert_eq!(fee.total(), Decimal::ZERO);
    }
}
