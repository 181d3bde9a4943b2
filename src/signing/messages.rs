use serde::Serialize;
use serde_json::{Value, json};

use crate::authz::MSG_DELEGATE_TYPE_URL;
use crate::chain::Coin;

pub const MSG_EXEC_TYPE_URL: &str = "/cosmos.authz.v1beta1.MsgExec";

/// proto-JSON 形态的链上消息：`@type` + 扁平的消息体。
/// 签名 sidecar 负责把它编码成 protobuf Any。
#[derive(Debug, Clone, Serialize)]
pub struct AnyMsg {
    #[serde(rename = "@type")]
    pub type_url: String,
    #[serde(flatten)]
    pub body: Value,
}

pub fn delegate(delegator: &str, validator: &str, amount: &Coin) -> AnyMsg {
    AnyMsg {
        type_url: MSG_DELEGATE_TYPE_URL.to_string(),
        body: json!({
            "delegator_address": delegator,
            "validator_address": validator,
            "amount": { "denom": amount.denom, "amount": amount.amount },
        }),
    }
}

/// 把 N 条代办消息包进一条 Authz exec。
pub fn exec(grantee: &str, msgs: &[AnyMsg]) -> AnyMsg {
    AnyMsg {
        type_url: MSG_EXEC_TYPE_URL.to_string(),
        body: json!({
            "grantee": grantee,
            "msgs": msgs,
        }),
    }
}
