use crate::rpc::ChainRpc;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::U256;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Gas-limit multipliers in percent, tried in order after a revert.
pub const GAS_LADDER_PERCENT: [u64; 7] = [100, 110, 120, 140, 160, 180, 200];

pub const DEFAULT_GAS_LIMIT: u64 = 500_000;
pub const TRANSFER_GAS_LIMIT: u64 = 21_000;
pub const DEPLOY_GAS_LIMIT: u64 = 3_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasSettings {
    /// Used when `eth_estimateGas` fails for a contract call
    #[serde(default = "default_gas_limit")]
    pub default_gas_limit: u64,
    #[serde(default = "transfer_gas_limit")]
    pub transfer_gas_limit: u64,
    /// Used when estimation fails for a contract creation
    #[serde(default = "deploy_gas_limit")]
    pub deploy_gas_limit: u64,
}

fn default_gas_limit() -> u64 {
    DEFAULT_GAS_LIMIT
}

fn transfer_gas_limit() -> u64 {
    TRANSFER_GAS_LIMIT
}

fn deploy_gas_limit() -> u64 {
    DEPLOY_GAS_LIMIT
}

impl Default for GasSettings {
    fn default() -> Self {
        Self {
            default_gas_limit: DEFAULT_GAS_LIMIT,
            transfer_gas_limit: TRANSFER_GAS_LIMIT,
            deploy_gas_limit: DEPLOY_GAS_LIMIT,
        }
    }
}

/// One step of the escalation sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GasRung {
    Ladder { percent: u64 },
    /// Last resort: the node's own estimate, unscaled
    FreshEstimate,
}

impl GasRung {
    pub fn multiplier(&self) -> f64 {
        match self {
            GasRung::Ladder { percent } => *percent as f64 / 100.0,
            GasRung::FreshEstimate => 1.0,
        }
    }

    pub fn apply(&self, base: U256) -> U256 {
        match self {
            GasRung::Ladder { percent } => base.saturating_mul(U256::from(*percent)) / 100,
            GasRung::FreshEstimate => base,
        }
    }
}

impl fmt::Display for GasRung {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GasRung::Ladder { .. } => write!(f, "x{:.1}", self.multiplier()),
            GasRung::FreshEstimate => write!(f, "fresh-estimate"),
        }
    }
}

/// The full ladder followed by the fresh-estimate fallback.
pub fn escalation() -> impl Iterator<Item = GasRung> {
    GAS_LADDER_PERCENT
        .iter()
        .map(|p| GasRung::Ladder { percent: *p })
        .chain(std::iter::once(GasRung::FreshEstimate))
}

/// `gas_limit * gas_price + value`, saturating.
pub fn required_cost(gas_limit: U256, gas_price: U256, value: U256) -> U256 {
    gas_limit.saturating_mul(gas_price).saturating_add(value)
}

/// Base gas figure for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasEstimate {
    pub gas: U256,
    /// False when the fallback constant stood in for the node's figure
    pub estimated: bool,
}

/// Asks the node; on failure falls back to `fallback` instead of aborting.
pub async fn estimate_or_fallback(
    rpc: &dyn ChainRpc,
    tx: &TypedTransaction,
    fallback: u64,
) -> GasEstimate {
    match rpc.estimate_gas(tx).await {
        Ok(gas) => GasEstimate {
            gas,
            estimated: true,
        },
        Err(e) => {
            warn!("Gas estimation failed ({}), using {} gas", e, fallback);
            GasEstimate {
                gas: U256::from(fallback),
                estimated: false,
            }
        }
    }
}
