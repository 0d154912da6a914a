//! Error taxonomy for the distribution engine.
//!
//! `EncodingError` is always an input or programming bug and is never
//! retried. Everything the engine can hit at runtime is an `EngineError`.

use crate::contracts::ContractKind;
use core_logic::{ConfigError, NetworkError, WalletError};
use ethers::types::{H256, U256};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("Invalid hex in '{input}'")]
    InvalidHex { input: String },

    #[error("Expected {expected} bytes, got {actual}")]
    WrongLength { expected: usize, actual: usize },

    #[error("Value does not fit in 256 bits: {value}")]
    Overflow { value: String },

    #[error("Not a decimal integer: '{input}'")]
    InvalidNumber { input: String },
}

#[derive(Error, Debug, Clone)]
pub enum EngineError {
    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error("Insufficient funds: have {balance} wei, need {required} wei")]
    InsufficientFunds { balance: U256, required: U256 },

    #[error("{kind} deployment failed after {attempts} attempts: {reason}")]
    DeploymentFailure {
        kind: ContractKind,
        attempts: u32,
        reason: String,
    },

    #[error("Transaction {tx_hash:?} reverted")]
    SubmissionReverted { tx_hash: H256 },

    #[error("No receipt for {tx_hash:?} within {timeout_secs}s")]
    ReceiptTimeout { tx_hash: H256, timeout_secs: u64 },

    #[error(transparent)]
    Transport(#[from] NetworkError),

    #[error("{operation} did not confirm: {reason}")]
    SubmissionFailed { operation: String, reason: String },

    #[error("Funding pipeline produced no usable wallets: {reason}")]
    FundingExhausted { reason: String },

    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
