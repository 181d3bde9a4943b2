use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};
use url::Url;

use crate::authz::GrantRecord;
use crate::chain::Coin;
use crate::config::RunTunables;

use super::{Delegation, QueryApi, QueryError, ValidatorReward};

/// Cosmos LCD（REST）客户端。每个请求单独计超时，分页之间按
/// `query_throttle_ms` 限速，公共端点经不起连环快打。
#[derive(Debug, Clone)]
pub struct LcdClient {
    base_url: Url,
    client: reqwest::Client,
    page_size: u32,
    query_timeout: Duration,
    delegations_timeout: Duration,
    page_throttle: Duration,
}

impl LcdClient {
    pub fn new(rest_url: &str, tunables: &RunTunables) -> Result<Self, QueryError> {
        let mut raw = rest_url.trim_end_matches('/').to_string();
        raw.push('/');
        let base_url = Url::parse(&raw).map_err(|err| QueryError::Url(err.to_string()))?;

        let client = reqwest::Client::builder()
            .user_agent(concat!("kepler/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            base_url,
            client,
            page_size: tunables.batch_page_size,
            query_timeout: Duration::from_millis(tunables.query_timeout_ms),
            delegations_timeout: Duration::from_millis(tunables.delegations_timeout_ms),
            page_throttle: Duration::from_millis(tunables.query_throttle_ms),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, QueryError> {
        self.base_url
            .join(path)
            .map_err(|err| QueryError::Url(err.to_string()))
    }

    /// 分页查询参数，页大小统一走 `batch_page_size`。
    fn page_query(&self, next_key: Option<&str>) -> Vec<(&'static str, String)> {
        let mut query = vec![("pagination.limit", self.page_size.to_string())];
        if let Some(key) = next_key {
            query.push(("pagination.key", key.to_string()));
        }
        query
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        timeout: Duration,
    ) -> Result<T, QueryError> {
        let url = self.endpoint(path)?;
        let response = self
            .client
            .get(url.clone())
            .query(query)
            .timeout(timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(QueryError::Status {
                endpoint: url.to_string(),
                status: response.status(),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|err| QueryError::Schema(err.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct PageInfo {
    #[serde(default)]
    next_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    balance: Coin,
}

#[derive(Debug, Deserialize)]
struct DelegationsPage {
    #[serde(default)]
    delegation_responses: Vec<DelegationEntry>,
    #[serde(default)]
    pagination: Option<PageInfo>,
}

#[derive(Debug, Deserialize)]
struct DelegationEntry {
    delegation: DelegationInner,
    balance: Coin,
}

#[derive(Debug, Deserialize)]
struct DelegationInner {
    delegator_address: String,
}

#[derive(Debug, Deserialize)]
struct GrantsPage {
    #[serde(default)]
    grants: Vec<GrantRecord>,
    #[serde(default)]
    pagination: Option<PageInfo>,
}

#[derive(Debug, Deserialize)]
struct WithdrawAddressResponse {
    withdraw_address: String,
}

#[derive(Debug, Deserialize)]
struct RewardsResponse {
    #[serde(default)]
    rewards: Vec<ValidatorReward>,
}

#[async_trait]
impl QueryApi for LcdClient {
    async fn balance(&self, address: &str, denom: &str) -> Result<Coin, QueryError> {
        let path = format!("cosmos/bank/v1beta1/balances/{address}/by_denom");
        let response: BalanceResponse = self
            .get_json(&path, &[("denom", denom.to_string())], self.query_timeout)
            .await?;
        Ok(response.balance)
    }

    async fn validator_delegations(
        &self,
        validator: &str,
        page_size: u32,
    ) -> Result<Vec<Delegation>, QueryError> {
        let path = format!("cosmos/staking/v1beta1/validators/{validator}/delegations");
        let mut delegations = Vec::new();
        let mut next_key: Option<String> = None;
        let mut page = 0u32;

        loop {
            let mut query = vec![("pagination.limit", page_size.to_string())];
            if let Some(key) = &next_key {
                query.push(("pagination.key", key.clone()));
            }

            let response: DelegationsPage = self
                .get_json(&path, &query, self.delegations_timeout)
                .await?;

            page += 1;
            delegations.extend(response.delegation_responses.into_iter().map(|entry| {
                Delegation {
                    delegator_address: entry.delegation.delegator_address,
                    balance: entry.balance,
                }
            }));

            info!(
                target: "query::lcd",
                validator,
                page,
                total = delegations.len(),
                "已取回委托分页"
            );

            next_key = response
                .pagination
                .and_then(|info| info.next_key)
                .filter(|key| !key.is_empty());
            if next_key.is_none() {
                break;
            }
            tokio::time::sleep(self.page_throttle).await;
        }

        Ok(delegations)
    }

    async fn grantee_grants(&self, grantee: &str) -> Result<Vec<GrantRecord>, QueryError> {
        let path = format!("cosmos/authz/v1beta1/grants/grantee/{grantee}");
        let mut grants = Vec::new();
        let mut next_key: Option<String> = None;

        loop {
            let query = self.page_query(next_key.as_deref());

            let response: GrantsPage = self
                .get_json(&path, &query, self.delegations_timeout)
                .await?;
            grants.extend(response.grants);

            next_key = response
                .pagination
                .and_then(|info| info.next_key)
                .filter(|key| !key.is_empty());
            if next_key.is_none() {
                break;
            }
            tokio::time::sleep(self.page_throttle).await;
        }

        debug!(target: "query::lcd", grantee, total = grants.len(), "批量授权查询完成");
        Ok(grants)
    }

    async fn grants(&self, grantee: &str, granter: &str) -> Result<Vec<GrantRecord>, QueryError> {
        let response: GrantsPage = self
            .get_json(
                "cosmos/authz/v1beta1/grants",
                &[
                    ("grantee", grantee.to_string()),
                    ("granter", granter.to_string()),
                ],
                self.query_timeout,
            )
            .await?;
        Ok(response.grants)
    }

    async fn withdraw_address(&self, delegator: &str) -> Result<String, QueryError> {
        let path = format!("cosmos/distribution/v1beta1/delegators/{delegator}/withdraw_address");
        let response: WithdrawAddressResponse =
            self.get_json(&path, &[], self.query_timeout).await?;
        Ok(response.withdraw_address)
    }

    async fn rewards(&self, delegator: &str) -> Result<Vec<ValidatorReward>, QueryError> {
        let path = format!("cosmos/distribution/v1beta1/delegators/{delegator}/rewards");
        let response: RewardsResponse = self.get_json(&path, &[], self.query_timeout).await?;
        Ok(response.rewards)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tunables() -> RunTunables {
        RunTunables::default()
    }

    #[test]
    fn base_url_keeps_path_segments() {
        let client = LcdClient::new("https://rest.cosmos.directory/osmosis", &tunables())
            .expect("client");
        let url = client
            .endpoint("cosmos/bank/v1beta1/balances/osmo1x/by_denom")
            .expect("endpoint");
        assert_eq!(
            url.as_str(),
            "https://rest.cosmos.directory/osmosis/cosmos/bank/v1beta1/balances/osmo1x/by_denom"
        );
    }

    #[test]
    fn rejects_invalid_base_url() {
        assert!(LcdClient::new("not a url", &tunables()).is_err());
    }

    #[test]
    fn paged_queries_honor_the_configured_page_size() {
        let tunables = RunTunables {
            batch_page_size: 42,
            ..RunTunables::default()
        };
        let client = LcdClient::new("https://rest.example", &tunables).expect("client");

        assert_eq!(
            client.page_query(None),
            vec![("pagination.limit", "42".to_string())]
        );
        assert_eq!(
            client.page_query(Some("bmV4dA==")),
            vec![
                ("pagination.limit", "42".to_string()),
                ("pagination.key", "bmV4dA==".to_string()),
            ]
        );
    }
}
