use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{NetworkConfig, RunTunables};

/// 链上金额（base denom 单位）。LCD 返回的 `amount` 一律为十进制字符串，
/// 保留字符串形态直到需要参与运算为止。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub denom: String,
    pub amount: String,
}

impl Coin {
    pub fn new(denom: impl Into<String>, amount: impl Into<String>) -> Self {
        Self {
            denom: denom.into(),
            amount: amount.into(),
        }
    }

    /// 按任意精度十进制解析金额。高发行量、低精度的链上数值会超出
    /// f64 的安全范围，因此金额永远不走浮点。
    pub fn decimal_amount(&self) -> Result<Decimal, AmountError> {
        parse_amount(&self.amount)
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.denom)
    }
}

#[derive(Debug, Error)]
pub enum AmountError {
    #[error("金额解析失败: {raw}")]
    Parse { raw: String },
}

pub fn parse_amount(raw: &str) -> Result<Decimal, AmountError> {
    Decimal::from_str(raw.trim()).map_err(|_| AmountError::Parse {
        raw: raw.to_string(),
    })
}

/// 向下取整到整数个 base denom 单位。奖励查询返回 18 位小数的
/// DecCoin，上链的委托金额必须是整数，且永远不进位。
pub fn floor_amount(value: Decimal) -> Decimal {
    value.floor()
}

/// 整数金额转为消息体里的字符串（去掉小数位的尾零）。
pub fn amount_to_string(value: Decimal) -> String {
    value.floor().normalize().to_string()
}

/// 单个网络在一次运行内的不可变参数。
#[derive(Debug, Clone)]
pub struct Network {
    pub name: String,
    pub chain_id: String,
    pub denom: String,
    pub decimals: u32,
    pub gas_price: Decimal,
    pub tunables: RunTunables,
}

impl Network {
    pub fn from_config(cfg: &NetworkConfig, defaults: &RunTunables) -> Result<Self, AmountError> {
        Ok(Self {
            name: cfg.name.clone(),
            chain_id: cfg.chain_id.clone(),
            denom: cfg.denom.clone(),
            decimals: cfg.decimals,
            gas_price: parse_amount(&cfg.gas_price)?,
            tunables: cfg.overrides.resolve(defaults),
        })
    }
}

/// 操作者（验证人 + 机器人账户）。每次运行加载一次。
#[derive(Debug, Clone)]
pub struct Operator {
    /// 验证人地址（valoper）。
    pub validator_address: String,
    /// 被授权的机器人账户地址（grantee）。
    pub bot_address: String,
    pub moniker: String,
    /// 低于该阈值的奖励不值得复投（base denom 整数单位）。
    pub minimum_reward: u64,
}

impl Operator {
    pub fn memo(&self) -> String {
        format!("REStaked by {}", self.moniker)
    }

    pub fn minimum_reward_decimal(&self) -> Decimal {
        Decimal::from(self.minimum_reward)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_amount_accepts_dec_coin_strings() {
        let value = parse_amount("123456.789000000000000000").expect("parse");
        assert_eq!(floor_amount(value), Decimal::from(123456));
    }

    #[test]
    fn parse_amount_rejects_garbage() {
        assert!(parse_amount("12x4").is_err());
    }

    #[test]
    fn amount_to_string_drops_fraction() {
        let value = parse_amount("300000.999999").expect("parse");
        assert_eq!(amount_to_string(value), "300000");
    }

    #[test]
    fn memo_follows_restake_convention() {
        let operator = Operator {
            validator_address: "cosmosvaloper1xyz".into(),
            bot_address: "cosmos1bot".into(),
            moniker: "Example Validator".into(),
            minimum_reward: 1_000,
        };
        assert_eq!(operator.memo(), "REStaked by Example Validator");
    }
}
