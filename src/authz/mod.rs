//! Authz 授权记录的解析与校验。
//!
//! LCD 返回的 grant 载荷形态松散（`@type` 区分的多形 JSON），这里先经过
//! 一次显式解析落到带标签的联合类型，再由纯函数 [`parse_stake_grant`]
//! 判定一组记录是否构成一个可用的复投授权。

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::chain::Coin;

pub const MSG_DELEGATE_TYPE_URL: &str = "/cosmos.staking.v1beta1.MsgDelegate";

/// 授权载荷的联合类型，按 `@type` 区分。未知类型在解析阶段即失败，
/// 不会进入后续判定。
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "@type")]
pub enum Authorization {
    /// 不限验证人的通用授权（受限签名设备走这一形态）。
    #[serde(rename = "/cosmos.authz.v1beta1.GenericAuthorization")]
    Generic { msg: String },
    /// 质押专用授权，可带验证人白名单与累计上限。
    #[serde(rename = "/cosmos.staking.v1beta1.StakeAuthorization")]
    Stake {
        #[serde(default)]
        allow_list: Option<ValidatorList>,
        #[serde(default)]
        deny_list: Option<ValidatorList>,
        #[serde(default)]
        max_tokens: Option<Coin>,
        #[serde(default)]
        authorization_type: Option<String>,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ValidatorList {
    #[serde(default)]
    pub address: Vec<String>,
}

impl Authorization {
    pub fn parse(raw: &Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(raw.clone())
    }
}

/// LCD 返回的单条授权记录。成对查询端点不回填 granter/grantee，
/// 因此两个字段保持可选。
#[derive(Debug, Clone, Deserialize)]
pub struct GrantRecord {
    #[serde(default)]
    pub granter: Option<String>,
    #[serde(default)]
    pub grantee: Option<String>,
    pub authorization: Value,
    /// RFC3339 时间戳。null/缺失按无效处理（上游 API 对“无过期”的
    /// 表达不一致，这里取保守读法）。
    #[serde(default)]
    pub expiration: Option<String>,
}

/// 校验通过的复投授权。`validators` 为空表示不限验证人
/// （来自 GenericAuthorization）。
#[derive(Debug, Clone, PartialEq)]
pub struct StakeGrant {
    pub max_tokens: Option<Decimal>,
    pub validators: Vec<String>,
}

/// 从一组原始授权记录中提取可用的复投授权。
///
/// 判定条件：授权是点名目标验证人的 StakeAuthorization（或针对
/// MsgDelegate 的 GenericAuthorization），且过期时间解析后严格晚于
/// `now`。StakeAuthorization 优先于 GenericAuthorization；同类多条
/// 记录取输入顺序里的第一条。纯函数，同输入必同输出。
pub fn parse_stake_grant(
    records: &[GrantRecord],
    grantee: &str,
    granter: &str,
    validator: &str,
    now: OffsetDateTime,
) -> Option<StakeGrant> {
    let mut stake: Option<StakeGrant> = None;
    let mut generic: Option<StakeGrant> = None;

    for record in records {
        if record.grantee.as_deref().is_some_and(|g| g != grantee) {
            continue;
        }
        if record.granter.as_deref().is_some_and(|g| g != granter) {
            continue;
        }
        if !expiration_in_future(record.expiration.as_deref(), now) {
            continue;
        }

        let Ok(authorization) = Authorization::parse(&record.authorization) else {
            continue;
        };

        match authorization {
            Authorization::Generic { msg } => {
                if msg == MSG_DELEGATE_TYPE_URL && generic.is_none() {
                    generic = Some(StakeGrant {
                        max_tokens: None,
                        validators: Vec::new(),
                    });
                }
            }
            Authorization::Stake {
                allow_list,
                max_tokens,
                authorization_type,
                ..
            } => {
                if stake.is_some() {
                    continue;
                }
                if authorization_type
                    .as_deref()
                    .is_some_and(|t| t != "AUTHORIZATION_TYPE_DELEGATE")
                {
                    continue;
                }
                let validators = allow_list.map(|list| list.address).unwrap_or_default();
                if !validators.iter().any(|v| v == validator) {
                    continue;
                }
                let max_tokens = match max_tokens {
                    Some(coin) => match coin.decimal_amount() {
                        Ok(amount) => Some(amount),
                        Err(_) => continue,
                    },
                    None => None,
                };
                stake = Some(StakeGrant {
                    max_tokens,
                    validators,
                });
            }
        }
    }

    stake.or(generic)
}

fn expiration_in_future(raw: Option<&str>, now: OffsetDateTime) -> bool {
    let Some(raw) = raw else {
        return false;
    };
    match OffsetDateTime::parse(raw, &Rfc3339) {
        Ok(expiration) => expiration > now,
        Err(_) => false,
    }
}
