//! # Relay Distributor
//!
//! Fans native-currency transfers out from one funding wallet to many
//! recipients on an EVM testnet. Ephemeral temp wallets act as senders, and
//! a Distributor/Relay contract pair sits between them and the recipients.
//!
//! ## Modules
//!
//! - [`calldata`] - Hand-assembled ABI calldata and call builders
//! - [`receipt`] - Deadline-bounded receipt polling
//! - [`submitter`] - Gas-ladder submission with balance pre-checks
//! - [`deployer`] - Distributor/Relay deployment and wiring
//! - [`funding`] - Temp wallet generation and funding
//! - [`driver`] - Run sequencing, job states and reporting
//! - [`token`] - ERC-20 reads, approve, swap and add-liquidity flows
//! - [`rpc`] - The `ChainRpc` seam and its ethers implementation

pub mod calldata;
pub mod config;
pub mod contracts;
pub mod deployer;
pub mod driver;
pub mod error;
pub mod funding;
pub mod gas;
pub mod receipt;
pub mod rpc;
pub mod submitter;
pub mod targets;
pub mod token;
pub mod wallet;

pub use config::DistributorConfig;
pub use driver::{DistributionDriver, DistributionReport, JobResult, JobStatus, TransferJob};
pub use error::{EncodingError, EngineError, EngineResult};
pub use rpc::{ChainRpc, EthersRpc, ReceiptInfo};
pub use submitter::{GasAdaptiveSubmitter, SubmissionResult, SubmissionStatus, TxPayload};
pub use wallet::Wallet;
