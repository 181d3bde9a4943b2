use std::{fs, path::PathBuf, sync::Arc};

use anyhow::{Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use futures::future::join_all;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

mod authz;
mod chain;
mod config;
mod health;
mod monitoring;
mod query;
mod retry;
mod runner;
mod signing;

use chain::{Network, Operator};
use config::{AppConfig, CONFIG_TEMPLATE, NetworkConfig, RunTunables, load_config};
use health::HealthReporter;
use query::LcdClient;
use retry::{RetryDriver, RunOutcome};
use runner::NetworkRunner;
use signing::RestSigner;

#[derive(Parser, Debug)]
#[command(name = "kepler", version, about = "Cosmos 质押奖励自动复投机器人")]
struct Cli {
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "配置文件路径（默认查找 kepler.yaml 或 config/kepler.yaml）"
    )]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 对配置里的全部已启用网络执行一轮复投
    Run(RunCmd),
    /// 完整跑一遍流水，但只模拟、不广播
    #[command(name = "dry-run")]
    DryRun(RunCmd),
    /// 初始化配置模版文件
    Init(InitCmd),
}

#[derive(Args, Debug)]
struct RunCmd {
    #[arg(long, help = "只运行指定名称的网络")]
    network: Option<String>,
}

#[derive(Args, Debug)]
struct InitCmd {
    #[arg(long, value_name = "DIR", help = "可选输出目录（默认当前目录）")]
    output: Option<PathBuf>,
    #[arg(long, help = "若文件存在则覆盖")]
    force: bool,
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let (filter, dry_run) = match &cli.command {
        Command::Init(cmd) => return handle_init(cmd),
        Command::Run(cmd) => (cmd.network.clone(), false),
        Command::DryRun(cmd) => (cmd.network.clone(), true),
    };

    let config = load_config(cli.config.clone())?;
    init_tracing(&config.global.logging)?;

    if config.global.prometheus.enable {
        monitoring::try_init_prometheus(&config.global.prometheus.listen)
            .map_err(|err| anyhow!(err))?;
        info!(
            target: "kepler",
            listen = %config.global.prometheus.listen,
            enabled = monitoring::prometheus_enabled(),
            "Prometheus 指标导出已就绪"
        );
    }

    run_networks(&config, filter.as_deref(), dry_run).await
}

async fn run_networks(config: &AppConfig, filter: Option<&str>, dry_run: bool) -> Result<()> {
    let selected: Vec<&NetworkConfig> = config
        .networks
        .iter()
        .filter(|network| network.enabled)
        .filter(|network| filter.is_none_or(|name| network.name == name))
        .collect();
    if selected.is_empty() {
        bail!("没有匹配的已启用网络");
    }

    // 各网络的运行互不影响，只有网络内部的广播是串行的。
    let outcomes = join_all(
        selected
            .iter()
            .map(|cfg| run_network(cfg, &config.global.defaults, dry_run)),
    )
    .await;

    let mut failures = 0usize;
    for (cfg, outcome) in selected.iter().zip(outcomes) {
        match outcome {
            Ok(RunOutcome::Success) => {
                info!(target: "kepler", network = %cfg.name, "复投完成");
            }
            Ok(RunOutcome::FatalFailure) => {
                failures += 1;
                error!(target: "kepler", network = %cfg.name, "复投中止：机器人余额不足");
            }
            Ok(RunOutcome::RetryableFailure) => {
                failures += 1;
                error!(target: "kepler", network = %cfg.name, "复投失败：补跑预算用尽");
            }
            Err(err) => {
                failures += 1;
                error!(target: "kepler", network = %cfg.name, %err, "复投初始化失败");
            }
        }
    }

    if failures > 0 {
        bail!("{failures} 个网络复投失败");
    }
    Ok(())
}

async fn run_network(
    cfg: &NetworkConfig,
    defaults: &RunTunables,
    dry_run: bool,
) -> Result<RunOutcome> {
    let network = Network::from_config(cfg, defaults)?;
    let operator = Operator {
        validator_address: cfg.operator.address.clone(),
        bot_address: cfg.operator.bot_address.clone(),
        moniker: cfg.operator.moniker.clone(),
        minimum_reward: cfg.operator.minimum_reward,
    };

    let query = Arc::new(LcdClient::new(&cfg.rest_url, &network.tunables)?);
    let signer = Arc::new(RestSigner::new(&cfg.signer_url, &network)?);
    let health = HealthReporter::new(&network.name, cfg.health.as_ref());
    let driver = RetryDriver::from_tunables(&network.tunables);

    info!(
        target: "kepler",
        network = %network.name,
        pretty_name = cfg.pretty_name.as_deref().unwrap_or(&cfg.name),
        chain_id = %network.chain_id,
        denom = %network.denom,
        decimals = network.decimals,
        operator = %operator.validator_address,
        dry_run,
        "开始复投运行"
    );

    let runner = NetworkRunner::new(network, operator, query, signer, dry_run);
    let (outcome, attempts) = driver.drive(&runner, &health).await;

    for attempt in &attempts {
        let tx_hashes = if attempt.tx_hashes.is_empty() {
            "-".to_string()
        } else {
            attempt.tx_hashes.join(",")
        };
        info!(
            target: "kepler",
            network = %cfg.name,
            attempt = attempt.attempt,
            sent_txs = attempt.sent_txs,
            tx_hashes = %tx_hashes,
            failed = attempt.failed_addresses.len(),
            force_fail = attempt.force_fail,
            error = attempt.error.as_deref().unwrap_or("-"),
            "attempt 摘要"
        );
    }

    Ok(outcome)
}

fn handle_init(cmd: &InitCmd) -> Result<()> {
    let dir = cmd.output.clone().unwrap_or_else(|| PathBuf::from("."));
    let path = dir.join("kepler.yaml");
    if path.exists() && !cmd.force {
        bail!("{} 已存在，使用 --force 覆盖", path.display());
    }
    fs::create_dir_all(&dir)?;
    fs::write(&path, CONFIG_TEMPLATE)?;
    println!("已写入 {}", path.display());
    Ok(())
}

fn init_tracing(config: &config::LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.json {
        fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .with_span_list(false)
            .init();
    } else {
        fmt().with_env_filter(filter).init();
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("kepler: {err:#}");
        std::process::exit(1);
    }
}
