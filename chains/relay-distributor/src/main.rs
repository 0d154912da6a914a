use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use core_logic::{setup_logger, with_retry, ProgressSink, TracingProgress};
use dotenv::dotenv;
use ethers::types::U256;
use ethers::utils::{format_ether, format_units, parse_units};
use relay_distributor::config::{load_funding_key, parse_eth, DistributorConfig};
use relay_distributor::rpc::{ChainRpc, EthersRpc};
use relay_distributor::submitter::GasAdaptiveSubmitter;
use relay_distributor::targets::load_targets;
use relay_distributor::token::{self, TokenFlows};
use relay_distributor::{DistributionDriver, Wallet};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Relay-based fund distribution for EVM testnets")]
struct Args {
    #[arg(short, long, default_value = "chains/relay-distributor/config.toml")]
    config: String,
    /// Used when FUNDING_PRIVATE_KEY is not set
    #[arg(long, default_value = "pv.txt")]
    key_file: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fund temp wallets, deploy the contract pair, then pay every target
    Distribute {
        #[arg(short, long)]
        targets: String,
        /// Per-recipient amount in ETH
        #[arg(short, long)]
        amount: String,
        /// Write the per-job report as JSON
        #[arg(long)]
        report: Option<String>,
    },
    /// Approve if needed, then swap through the pool's router
    Swap {
        #[arg(short, long)]
        pool: String,
        #[arg(short, long)]
        amount: String,
        #[arg(long, default_value = "18")]
        decimals: u32,
        #[arg(long, default_value = "0")]
        min_out: String,
    },
    /// Approve both tokens and add liquidity on the pool's V2 router
    AddLiquidity {
        #[arg(short, long)]
        pool: String,
        #[arg(long)]
        amount_a: String,
        #[arg(long)]
        amount_b: String,
        #[arg(long, default_value = "18")]
        decimals: u32,
    },
    /// Native and configured-token balances of the funding wallet
    Balance,
}

fn token_amount(value: &str, decimals: u32) -> Result<U256> {
    Ok(parse_units(value, decimals)
        .with_context(|| format!("Invalid amount '{}'", value))?
        .into())
}

fn now_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = setup_logger();
    dotenv().ok();

    let args = Args::parse();
    info!("Loading config from: {}", args.config);

    let config = match DistributorConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load config: {:#}", e);
            return Ok(());
        }
    };
    info!(
        "Configuration loaded for {} (chain ID {})",
        config.name, config.chain_id
    );

    let funder = Wallet::from_private_key(&load_funding_key(&args.key_file)?)
        .context("Funding key is not a valid private key")?;
    info!("Funding wallet: {:?}", funder.address());

    let proxy = config.resolve_proxy()?;
    if let Some(ref p) = proxy {
        info!("Routing RPC through proxy {}", p.url);
    }
    let rpc: Arc<dyn ChainRpc> = Arc::new(EthersRpc::new(&config.rpc_url, proxy.as_ref())?);

    let chain = config.chain();
    let remote_chain = with_retry(config.policy.transport, "eth_chainId", || {
        let rpc = rpc.clone();
        async move { Ok(rpc.chain_id().await?) }
    })
    .await?;
    if remote_chain != chain.chain_id {
        anyhow::bail!(
            "RPC {} reports chain {} but {} is configured as {}",
            chain.rpc_endpoint,
            remote_chain,
            chain.name,
            chain.chain_id
        );
    }

    match args.command {
        Command::Distribute {
            targets,
            amount,
            report,
        } => {
            let targets = load_targets(&targets)?;
            let amount = parse_eth(&amount)?;
            let progress: Arc<dyn ProgressSink> = Arc::new(TracingProgress);

            let mut driver = DistributionDriver::from_config(&config, rpc, progress)?;
            let result = driver.run(&funder, &targets, amount).await?;
            info!("{}", result.summary_line());

            if let Some(path) = report {
                let json = serde_json::to_string_pretty(&result)?;
                std::fs::write(&path, json)
                    .with_context(|| format!("Failed to write report {}", path))?;
                info!("Report written to {}", path);
            }
        }
        Command::Swap {
            pool,
            amount,
            decimals,
            min_out,
        } => {
            let pool = config.pool(&pool)?.clone();
            let submitter = GasAdaptiveSubmitter::from_config(&config, rpc);
            let flows = TokenFlows::new(
                &submitter,
                config.timing.submit_timeout(),
                config.timing.settle_delay(),
            );

            let result = flows
                .swap(
                    &funder,
                    &pool,
                    token_amount(&amount, decimals)?,
                    token_amount(&min_out, decimals)?,
                    now_secs(),
                )
                .await?;
            info!("SUCCESS swap {:?}", result.tx_hash());
        }
        Command::AddLiquidity {
            pool,
            amount_a,
            amount_b,
            decimals,
        } => {
            let pool = config.pool(&pool)?.clone();
            let submitter = GasAdaptiveSubmitter::from_config(&config, rpc);
            let flows = TokenFlows::new(
                &submitter,
                config.timing.submit_timeout(),
                config.timing.settle_delay(),
            );

            let result = flows
                .add_liquidity(
                    &funder,
                    &pool,
                    token_amount(&amount_a, decimals)?,
                    token_amount(&amount_b, decimals)?,
                    now_secs(),
                )
                .await?;
            info!("SUCCESS addLiquidity {:?}", result.tx_hash());
        }
        Command::Balance => {
            let native = rpc.get_balance(funder.address()).await?;
            info!("{:?}: {} ETH", funder.address(), format_ether(native));

            for (name, pool) in &config.pools {
                for token_address in [pool.token_in, pool.token_out] {
                    match token::balance_of(rpc.as_ref(), token_address, funder.address()).await {
                        Ok(balance) => info!(
                            "[{}] {:?}: {}",
                            name,
                            token_address,
                            format_units(balance, 18).unwrap_or_else(|_| balance.to_string())
                        ),
                        Err(e) => error!("[{}] {:?}: {}", name, token_address, e),
                    }
                }
            }
        }
    }

    Ok(())
}
