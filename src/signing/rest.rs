use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

use crate::chain::{Coin, Network};

use super::{AnyMsg, Fee, Signer, SigningError, TxResult, calculate_fee};

/// 签名 sidecar 的 REST 客户端。sidecar 持有机器人私钥，对外暴露
/// `POST v1/simulate` 与 `POST v1/tx` 两个接口；机器人只提交 proto-JSON
/// 消息体，不接触密钥材料。
#[derive(Debug, Clone)]
pub struct RestSigner {
    base_url: Url,
    client: reqwest::Client,
    chain_id: String,
    denom: String,
    gas_price: Decimal,
    gas_modifier: f64,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct SimulateRequest<'a> {
    chain_id: &'a str,
    sender: &'a str,
    messages: &'a [AnyMsg],
    memo: &'a str,
}

#[derive(Debug, Deserialize)]
struct SimulateResponse {
    gas_used: u64,
}

#[derive(Debug, Serialize)]
struct BroadcastRequest<'a> {
    chain_id: &'a str,
    sender: &'a str,
    messages: &'a [AnyMsg],
    fee: FeeBody,
    memo: &'a str,
}

#[derive(Debug, Serialize)]
struct FeeBody {
    amount: Vec<Coin>,
    gas: String,
}

#[derive(Debug, Deserialize)]
struct BroadcastResponse {
    #[serde(default)]
    tx_hash: String,
    #[serde(default)]
    code: u32,
    #[serde(default)]
    raw_log: String,
}

impl RestSigner {
    pub fn new(signer_url: &str, network: &Network) -> Result<Self, SigningError> {
        let mut raw = signer_url.trim_end_matches('/').to_string();
        raw.push('/');
        let base_url = Url::parse(&raw).map_err(|err| SigningError::Url(err.to_string()))?;

        let client = reqwest::Client::builder()
            .user_agent(concat!("kepler/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            base_url,
            client,
            chain_id: network.chain_id.clone(),
            denom: network.denom.clone(),
            gas_price: network.gas_price,
            gas_modifier: network.tunables.gas_modifier,
            timeout: Duration::from_millis(network.tunables.query_timeout_ms),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, SigningError> {
        self.base_url
            .join(path)
            .map_err(|err| SigningError::Url(err.to_string()))
    }

    async fn post_json<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, SigningError>
    where
        Req: Serialize,
        Resp: for<'de> Deserialize<'de>,
    {
        let url = self.endpoint(path)?;
        let response = self
            .client
            .post(url.clone())
            .timeout(self.timeout)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SigningError::Status {
                endpoint: url.to_string(),
                status: response.status(),
            });
        }

        response
            .json::<Resp>()
            .await
            .map_err(|err| SigningError::Schema(err.to_string()))
    }
}

#[async_trait]
impl Signer for RestSigner {
    async fn simulate(
        &self,
        sender: &str,
        messages: &[AnyMsg],
        memo: &str,
    ) -> Result<u64, SigningError> {
        let request = SimulateRequest {
            chain_id: &self.chain_id,
            sender,
            messages,
            memo,
        };
        let response: SimulateResponse = self.post_json("v1/simulate", &request).await?;
        // gas 估算留出安全余量，估少了整批交易会被节点打回。
        let gas = (response.gas_used as f64 * self.gas_modifier).ceil() as u64;
        Ok(gas)
    }

    fn fee(&self, gas: u64) -> Fee {
        calculate_fee(gas, self.gas_price, &self.denom)
    }

    async fn sign_and_broadcast(
        &self,
        sender: &str,
        messages: &[AnyMsg],
        gas: u64,
        memo: &str,
    ) -> Result<TxResult, SigningError> {
        let fee = self.fee(gas);
        let request = BroadcastRequest {
            chain_id: &self.chain_id,
            sender,
            messages,
            fee: FeeBody {
                amount: vec![fee.amount.clone()],
                gas: gas.to_string(),
            },
            memo,
        };

        let response: BroadcastResponse = self.post_json("v1/tx", &request).await?;
        if response.code != 0 {
            return Err(SigningError::Chain {
                code: response.code,
                raw_log: response.raw_log,
            });
        }

        info!(
            target: "signing::rest",
            chain_id = %self.chain_id,
            tx_hash = %response.tx_hash,
            gas,
            fee = %fee.amount,
            "交易已签名广播"
        );

        Ok(TxResult {
            tx_hash: response.tx_hash,
        })
    }
}
