use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::AppConfig;

pub const DEFAULT_CONFIG_PATHS: &[&str] = &["kepler.yaml", "config/kepler.yaml"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("no config file found (looked for kepler.yaml / config/kepler.yaml)")]
    NotFound,
}

pub fn load_config(path: Option<PathBuf>) -> Result<AppConfig, ConfigError> {
    let candidate_paths = match path {
        Some(p) => vec![p],
        None => DEFAULT_CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .collect::<Vec<PathBuf>>(),
    };

    for candidate in candidate_paths {
        if let Some(config) = try_load_file(&candidate)? {
            return Ok(config);
        }
    }

    Err(ConfigError::NotFound)
}

fn try_load_file(path: &Path) -> Result<Option<AppConfig>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let config: AppConfig =
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(Some(config))
}

/// `kepler init` 写出的配置模版。
pub const CONFIG_TEMPLATE: &str = r#"# kepler 自动复投机器人配置
global:
  logging:
    level: info
    json: false
  prometheus:
    enable: false
    listen: 0.0.0.0:9898
  # 所有网络共用的调优参数，可在每个网络的 overrides 中单独覆写。
  defaults:
    batch_page_size: 100
    batch_queries: 25
    batch_txs: 50
    delegations_timeout_ms: 30000
    query_timeout_ms: 5000
    query_throttle_ms: 100
    gas_modifier: 1.5
    retries: 2
    retry_backoff_ms: 30000

networks:
  - name: osmosis
    chain_id: osmosis-1
    pretty_name: Osmosis
    rest_url: https://rest.cosmos.directory/osmosis
    # 持有机器人私钥的签名 sidecar，负责模拟与签名广播。
    signer_url: http://127.0.0.1:8090
    denom: uosmo
    decimals: 6
    gas_price: "0.0025"
    operator:
      address: osmovaloper1xxxxxxxx
      bot_address: osmo1xxxxxxxx
      moniker: My Validator
      # 低于该奖励（base denom 整数单位）不复投
      minimum_reward: 1000
    # health:
    #   uuid: 00000000-0000-0000-0000-000000000000
    overrides:
      batch_txs: 50
"#;
