//! # Core Logic - Shared Utilities for Testnet Automation
//!
//! This crate provides the chain-agnostic pieces used by the EVM engine:
//! typed errors, shared configuration types, the retry policy, logging and
//! the progress-callback seam towards a UI.
//!
//! ## Modules
//!
//! - [`config`] - Chain and proxy configuration structures
//! - [`error`] - Typed error handling with thiserror
//! - [`traits`] - Progress reporting trait and default sinks
//! - [`utils`] - Logger, proxy rotation, retry helpers

pub mod config;
pub mod error;
pub mod traits;
pub(crate) mod utils;

pub use config::{ChainConfig, ProxyConfig};
pub use error::{ConfigError, NetworkError, WalletError};
pub use traits::{ProgressSink, RecordingProgress, TracingProgress};

pub use utils::{setup_logger, setup_logger_in, ProxyManager, DISTRIBUTION_TARGET};

pub use utils::retry::{retry_typed, with_retry, RetryPolicy};
