use crate::contracts::ContractKind;
use crate::deployer::ContractBytecode;
use crate::gas::GasSettings;
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use core_logic::config::{ChainConfig, ProxyConfig};
use core_logic::{ConfigError, RetryPolicy};
use ethers::types::{Address, Bytes, U256};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const ENV_PREFIX: &str = "DISTRIBUTOR";
pub const FUNDING_KEY_ENV: &str = "FUNDING_PRIVATE_KEY";

#[derive(Debug, Deserialize, Clone)]
pub struct DistributorConfig {
    #[serde(default = "default_network_name")]
    pub name: String,
    pub rpc_url: String,
    pub chain_id: u64,
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,
    /// Proxy list file; the first usable line is taken
    #[serde(default)]
    pub proxy_file: Option<String>,
    #[serde(default)]
    pub gas: GasSettings,
    #[serde(default)]
    pub timing: TimingSettings,
    #[serde(default)]
    pub policy: PolicySettings,
    #[serde(default)]
    pub contracts: ContractSettings,
    #[serde(default)]
    pub distribution: DistributionSettings,
    #[serde(default)]
    pub pools: HashMap<String, PoolConfig>,
}

fn default_network_name() -> String {
    "testnet".to_string()
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct TimingSettings {
    pub poll_interval_ms: u64,
    pub submit_timeout_secs: u64,
    pub deploy_timeout_secs: u64,
    pub funding_timeout_secs: u64,
    pub deploy_settle_wait_secs: u64,
    pub inter_transfer_delay_ms: u64,
    /// Wait after an approval before re-reading the allowance
    pub settle_delay_ms: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 3_000,
            submit_timeout_secs: 120,
            deploy_timeout_secs: 120,
            funding_timeout_secs: 60,
            deploy_settle_wait_secs: 10,
            inter_transfer_delay_ms: 2_000,
            settle_delay_ms: 5_000,
        }
    }
}

impl TimingSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_secs(self.submit_timeout_secs)
    }

    pub fn deploy_timeout(&self) -> Duration {
        Duration::from_secs(self.deploy_timeout_secs)
    }

    pub fn funding_timeout(&self) -> Duration {
        Duration::from_secs(self.funding_timeout_secs)
    }

    pub fn deploy_settle_wait(&self) -> Duration {
        Duration::from_secs(self.deploy_settle_wait_secs)
    }

    pub fn inter_transfer_delay(&self) -> Duration {
        Duration::from_millis(self.inter_transfer_delay_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct PolicySettings {
    pub deployment: RetryPolicy,
    pub funding: RetryPolicy,
    /// Also bounds consecutive receipt-poll errors
    pub transport: RetryPolicy,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            deployment: RetryPolicy::for_deployment(),
            funding: RetryPolicy::for_funding(),
            transport: RetryPolicy::for_transport(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ContractSettings {
    pub distributor_bytecode: Option<String>,
    pub distributor_bytecode_path: Option<String>,
    pub relay_bytecode: Option<String>,
    pub relay_bytecode_path: Option<String>,
}

impl ContractSettings {
    /// Inline hex wins over the file path.
    pub fn bytecode(&self, kind: ContractKind) -> Result<Bytes, ConfigError> {
        let (inline, path, field) = match kind {
            ContractKind::Distributor => (
                &self.distributor_bytecode,
                &self.distributor_bytecode_path,
                "contracts.distributor_bytecode",
            ),
            ContractKind::Relay => (
                &self.relay_bytecode,
                &self.relay_bytecode_path,
                "contracts.relay_bytecode",
            ),
        };

        let text = match (inline, path) {
            (Some(hex), _) => hex.clone(),
            (None, Some(path)) => {
                if !Path::new(path).exists() {
                    return Err(ConfigError::FileNotFound { path: path.clone() });
                }
                fs::read_to_string(path).map_err(|e| ConfigError::IoError {
                    path: path.clone(),
                    msg: e.to_string(),
                })?
            }
            (None, None) => {
                return Err(ConfigError::MissingField {
                    field: field.to_string(),
                })
            }
        };

        decode_bytecode(&text).map_err(|reason| ConfigError::InvalidValue {
            field: field.to_string(),
            reason,
        })
    }

    pub fn load(&self) -> Result<ContractBytecode, ConfigError> {
        Ok(ContractBytecode {
            distributor: self.bytecode(ContractKind::Distributor)?,
            relay: self.bytecode(ContractKind::Relay)?,
        })
    }
}

fn decode_bytecode(text: &str) -> std::result::Result<Bytes, String> {
    let trimmed = text.trim();
    let body = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    if body.is_empty() {
        return Err("bytecode is empty".to_string());
    }
    hex::decode(body).map(Bytes::from).map_err(|e| e.to_string())
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DistributionSettings {
    pub temp_wallet_count: usize,
    /// Extra ETH for the owner wallet, which pays for both deployments
    pub owner_buffer_eth: String,
    /// Gas money added to every transfer a temp wallet will send
    pub gas_reserve_eth: String,
    /// `distributeWithRelay` instead of `distribute`
    pub use_relay: bool,
    pub audit_log_path: Option<String>,
}

impl Default for DistributionSettings {
    fn default() -> Self {
        Self {
            temp_wallet_count: 3,
            owner_buffer_eth: "0.05".to_string(),
            gas_reserve_eth: "0.002".to_string(),
            use_relay: true,
            audit_log_path: Some("temp_wallets.csv".to_string()),
        }
    }
}

impl DistributionSettings {
    pub fn owner_buffer(&self) -> Result<U256, ConfigError> {
        parse_eth_field("distribution.owner_buffer_eth", &self.owner_buffer_eth)
    }

    pub fn gas_reserve(&self) -> Result<U256, ConfigError> {
        parse_eth_field("distribution.gas_reserve_eth", &self.gas_reserve_eth)
    }
}

/// Named swap pool. Fee tier and token order live here, not in calldata.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// SwapRouter02-style router (exactInputSingle + multicall)
    pub router: Address,
    pub token_in: Address,
    pub token_out: Address,
    pub fee_tier: u32,
    /// UniswapV2-style router for addLiquidity
    #[serde(default)]
    pub v2_router: Option<Address>,
    /// Tolerated slippage in basis points for minimum amounts
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: u32,
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
}

fn default_slippage_bps() -> u32 {
    50
}

fn default_deadline_secs() -> u64 {
    600
}

pub fn parse_eth(value: &str) -> Result<U256, ConfigError> {
    parse_eth_field("amount", value)
}

fn parse_eth_field(field: &str, value: &str) -> Result<U256, ConfigError> {
    ethers::utils::parse_ether(value.trim()).map_err(|e| ConfigError::InvalidValue {
        field: field.to_string(),
        reason: e.to_string(),
    })
}

impl DistributorConfig {
    /// TOML file, then `DISTRIBUTOR__SECTION__KEY` environment overrides.
    pub fn load(path: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read config {}", path))?;

        let config: Self = settings
            .try_deserialize()
            .with_context(|| format!("Invalid config {}", path))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::from_str(text, config::FileFormat::Toml))
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if url::Url::parse(&self.rpc_url).is_err() {
            return Err(ConfigError::InvalidRpcUrl {
                url: self.rpc_url.clone(),
            });
        }
        if self.chain_id == 0 {
            return Err(ConfigError::InvalidValue {
                field: "chain_id".into(),
                reason: "must be non-zero".into(),
            });
        }
        if self.distribution.temp_wallet_count == 0 {
            return Err(ConfigError::InvalidValue {
                field: "distribution.temp_wallet_count".into(),
                reason: "at least one temp wallet is needed".into(),
            });
        }
        self.distribution.owner_buffer()?;
        self.distribution.gas_reserve()?;
        Ok(())
    }

    pub fn chain(&self) -> ChainConfig {
        ChainConfig {
            name: self.name.clone(),
            rpc_endpoint: self.rpc_url.clone(),
            chain_id: self.chain_id,
        }
    }

    pub fn pool(&self, name: &str) -> std::result::Result<&PoolConfig, ConfigError> {
        self.pools.get(name).ok_or_else(|| ConfigError::MissingField {
            field: format!("pools.{}", name),
        })
    }

    /// Explicit proxy, else the first entry of `proxy_file`.
    pub fn resolve_proxy(&self) -> Result<Option<ProxyConfig>> {
        if let Some(proxy) = &self.proxy {
            return Ok(Some(proxy.clone()));
        }
        match &self.proxy_file {
            Some(path) => Ok(core_logic::ProxyManager::load_from(path)?.into_iter().next()),
            None => Ok(None),
        }
    }
}

/// `FUNDING_PRIVATE_KEY`, else the first non-comment line of `key_file`.
pub fn load_funding_key(key_file: &str) -> Result<String> {
    if let Ok(key) = std::env::var(FUNDING_KEY_ENV) {
        if !key.trim().is_empty() {
            return Ok(key.trim().to_string());
        }
    }

    let content = fs::read_to_string(key_file).with_context(|| {
        format!(
            "{} not set and key file {} unreadable",
            FUNDING_KEY_ENV, key_file
        )
    })?;

    content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .with_context(|| format!("No private key found in {}", key_file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
rpc_url = "https://rpc.example.com"
chain_id = 11155111
"#;

    #[test]
    fn test_defaults_fill_every_section() {
        let config = DistributorConfig::from_toml_str(MINIMAL).unwrap();

        assert_eq!(config.gas.default_gas_limit, 500_000);
        assert_eq!(config.timing.poll_interval_ms, 3_000);
        assert_eq!(config.policy.deployment.max_attempts, 5);
        assert_eq!(config.policy.funding.max_attempts, 2);
        assert_eq!(config.policy.transport.max_attempts, 3);
        assert_eq!(config.distribution.temp_wallet_count, 3);
        assert!(config.distribution.use_relay);
        assert!(config.pools.is_empty());
        assert_eq!(config.chain().chain_id, 11155111);
    }

    #[test]
    fn test_sections_override() {
        let text = format!(
            "{}\n[timing]\nsubmit_timeout_secs = 60\n\n[policy.deployment]\nmax_attempts = 10\nbackoff_delay_ms = 100\n\n[pools.weth_usdc]\nrouter = \"0x3bFA4769FB09eefC5a80d6E87c3B9C650f7Ae48E\"\ntoken_in = \"0xfFf9976782d46CC05630D1f6eBAb18b2324d6B14\"\ntoken_out = \"0x1c7D4B196Cb0C7B01d743Fbc6116a902379C7238\"\nfee_tier = 3000\n",
            MINIMAL
        );
        let config = DistributorConfig::from_toml_str(&text).unwrap();

        assert_eq!(config.timing.submit_timeout_secs, 60);
        assert_eq!(config.timing.deploy_timeout_secs, 120);
        assert_eq!(config.policy.deployment.max_attempts, 10);
        assert_eq!(config.policy.funding.max_attempts, 2);

        let pool = config.pool("weth_usdc").unwrap();
        assert_eq!(pool.fee_tier, 3000);
        assert_eq!(pool.slippage_bps, 50);
        assert!(config.pool("missing").is_err());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(DistributorConfig::from_toml_str("rpc_url = \"nope\"\nchain_id = 1").is_err());
        assert!(DistributorConfig::from_toml_str(
            "rpc_url = \"https://x.io\"\nchain_id = 1\n[distribution]\ntemp_wallet_count = 0"
        )
        .is_err());
        assert!(DistributorConfig::from_toml_str(
            "rpc_url = \"https://x.io\"\nchain_id = 1\n[distribution]\ngas_reserve_eth = \"lots\""
        )
        .is_err());
    }

    #[test]
    fn test_bytecode_inline_and_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0x6080").unwrap();

        let settings = ContractSettings {
            distributor_bytecode: Some("0x6001".into()),
            relay_bytecode_path: Some(file.path().display().to_string()),
            ..Default::default()
        };
        let code = settings.load().unwrap();
        assert_eq!(code.distributor.to_vec(), vec![0x60, 0x01]);
        assert_eq!(code.relay.to_vec(), vec![0x60, 0x80]);
    }

    #[test]
    fn test_bytecode_missing_or_bad() {
        let settings = ContractSettings::default();
        assert!(matches!(
            settings.bytecode(ContractKind::Relay),
            Err(ConfigError::MissingField { .. })
        ));

        let settings = ContractSettings {
            relay_bytecode: Some("0xzz".into()),
            ..Default::default()
        };
        assert!(matches!(
            settings.bytecode(ContractKind::Relay),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_parse_eth() {
        assert_eq!(
            parse_eth("1.5").unwrap(),
            U256::from(1_500_000_000_000_000_000u64)
        );
        assert!(parse_eth("abc").is_err());
    }

    #[test]
    fn test_funding_key_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# funding wallet").unwrap();
        writeln!(file, "  0xabc123  ").unwrap();

        // only meaningful when the variable is absent from the test environment
        if std::env::var(FUNDING_KEY_ENV).is_err() {
            let key = load_funding_key(&file.path().display().to_string()).unwrap();
            assert_eq!(key, "0xabc123");
        }
    }
}
