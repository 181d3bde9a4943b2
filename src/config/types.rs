use serde::Deserialize;

/// kepler.yaml 的顶层结构：全局参数 + 网络清单。
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub networks: Vec<NetworkConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub prometheus: PrometheusConfig,
    /// 各网络未覆写时生效的调优参数。
    #[serde(default)]
    pub defaults: RunTunables,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "super::default_logging_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: super::default_logging_level(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrometheusConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default = "super::default_prometheus_listen")]
    pub listen: String,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            enable: false,
            listen: super::default_prometheus_listen(),
        }
    }
}

/// 一次运行的调优参数（已解析完覆写，见 [`TunableOverrides::resolve`]）。
#[derive(Debug, Clone, Deserialize)]
pub struct RunTunables {
    /// 分页查询委托人时的单页大小。
    #[serde(default = "super::default_batch_page_size")]
    pub batch_page_size: u32,
    /// 每个并发窗口内的地址级查询数量。
    #[serde(default = "super::default_batch_queries")]
    pub batch_queries: usize,
    /// 单笔 exec 交易内打包的地址数上限。
    #[serde(default = "super::default_batch_txs")]
    pub batch_txs: usize,
    #[serde(default = "super::default_delegations_timeout_ms")]
    pub delegations_timeout_ms: u64,
    #[serde(default = "super::default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    /// 并发窗口之间的等待，避免压垮公共端点。
    #[serde(default = "super::default_query_throttle_ms")]
    pub query_throttle_ms: u64,
    /// 模拟出的 gas 估算乘以该系数后再签名。
    #[serde(default = "super::default_gas_modifier")]
    pub gas_modifier: f64,
    /// 失败后的补跑次数（不含首轮）。
    #[serde(default = "super::default_retries")]
    pub retries: u32,
    #[serde(default = "super::default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for RunTunables {
    fn default() -> Self {
        Self {
            batch_page_size: super::default_batch_page_size(),
            batch_queries: super::default_batch_queries(),
            batch_txs: super::default_batch_txs(),
            delegations_timeout_ms: super::default_delegations_timeout_ms(),
            query_timeout_ms: super::default_query_timeout_ms(),
            query_throttle_ms: super::default_query_throttle_ms(),
            gas_modifier: super::default_gas_modifier(),
            retries: super::default_retries(),
            retry_backoff_ms: super::default_retry_backoff_ms(),
        }
    }
}

/// 网络级覆写：缺省字段回落到全局 defaults。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TunableOverrides {
    #[serde(default)]
    pub batch_page_size: Option<u32>,
    #[serde(default)]
    pub batch_queries: Option<usize>,
    #[serde(default)]
    pub batch_txs: Option<usize>,
    #[serde(default)]
    pub delegations_timeout_ms: Option<u64>,
    #[serde(default)]
    pub query_timeout_ms: Option<u64>,
    #[serde(default)]
    pub query_throttle_ms: Option<u64>,
    #[serde(default)]
    pub gas_modifier: Option<f64>,
    #[serde(default)]
    pub retries: Option<u32>,
    #[serde(default)]
    pub retry_backoff_ms: Option<u64>,
}

impl TunableOverrides {
    pub fn resolve(&self, defaults: &RunTunables) -> RunTunables {
        RunTunables {
            batch_page_size: self.batch_page_size.unwrap_or(defaults.batch_page_size),
            batch_queries: self.batch_queries.unwrap_or(defaults.batch_queries),
            batch_txs: self.batch_txs.unwrap_or(defaults.batch_txs),
            delegations_timeout_ms: self
                .delegations_timeout_ms
                .unwrap_or(defaults.delegations_timeout_ms),
            query_timeout_ms: self.query_timeout_ms.unwrap_or(defaults.query_timeout_ms),
            query_throttle_ms: self.query_throttle_ms.unwrap_or(defaults.query_throttle_ms),
            gas_modifier: self.gas_modifier.unwrap_or(defaults.gas_modifier),
            retries: self.retries.unwrap_or(defaults.retries),
            retry_backoff_ms: self.retry_backoff_ms.unwrap_or(defaults.retry_backoff_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    pub chain_id: String,
    #[serde(default)]
    pub pretty_name: Option<String>,
    /// LCD/REST 端点。
    pub rest_url: String,
    /// 签名 sidecar 端点（持有机器人私钥的本地服务）。
    pub signer_url: String,
    pub denom: String,
    #[serde(default = "super::default_decimals")]
    pub decimals: u32,
    /// base denom 计价的 gas 单价，十进制字符串。
    pub gas_price: String,
    pub operator: OperatorConfig,
    #[serde(default)]
    pub health: Option<HealthConfig>,
    #[serde(default = "super::default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub overrides: TunableOverrides,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OperatorConfig {
    /// 验证人地址（valoper）。
    pub address: String,
    /// 被授权执行复投的机器人地址。
    pub bot_address: String,
    pub moniker: String,
    #[serde(default = "super::default_minimum_reward")]
    pub minimum_reward: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "super::default_health_address")]
    pub address: String,
    pub uuid: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
global:
  logging:
    level: debug
  defaults:
    batch_txs: 20
networks:
  - name: osmosis
    chain_id: osmosis-1
    rest_url: https://rest.osmosis.zone
    signer_url: http://127.0.0.1:8090
    denom: uosmo
    gas_price: "0.0025"
    operator:
      address: osmovaloper1abc
      bot_address: osmo1bot
      moniker: Example
    overrides:
      batch_queries: 10
"#;

    #[test]
    fn deserialize_sample_config() {
        let config: AppConfig = serde_yaml::from_str(SAMPLE).expect("parse yaml");
        assert_eq!(config.global.logging.level, "debug");
        assert_eq!(config.networks.len(), 1);
        let network = &config.networks[0];
        assert!(network.enabled);
        assert_eq!(network.decimals, 6);
        assert_eq!(network.operator.minimum_reward, 1_000);
    }

    #[test]
    fn overrides_fall_back_to_defaults() {
        let config: AppConfig = serde_yaml::from_str(SAMPLE).expect("parse yaml");
        let resolved = config.networks[0]
            .overrides
            .resolve(&config.global.defaults);
        // 网络覆写优先，未覆写的字段取全局 defaults。
        assert_eq!(resolved.batch_queries, 10);
        assert_eq!(resolved.batch_txs, 20);
        assert_eq!(resolved.batch_page_size, 100);
        assert_eq!(resolved.retries, 2);
    }
}
