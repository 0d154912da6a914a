//! Bounded-time receipt polling.

use crate::rpc::{ChainRpc, ReceiptInfo};
use core_logic::NetworkError;
use ethers::types::H256;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Mined; execution status is in the receipt
    Confirmed(ReceiptInfo),
    /// Deadline passed without a receipt. Not proof of failure.
    TimedOut,
}

#[derive(Debug, Clone, Copy)]
pub struct ReceiptPoller {
    interval: Duration,
    max_consecutive_errors: u32,
}

impl ReceiptPoller {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3);

    pub fn new(interval: Duration, max_consecutive_errors: u32) -> Self {
        Self {
            interval,
            max_consecutive_errors: max_consecutive_errors.max(1),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Queries at least once, then every `interval` until `timeout` elapses.
    ///
    /// An RPC error counts as "no receipt yet"; only a run of
    /// `max_consecutive_errors` errors in a row is returned.
    pub async fn await_receipt(
        &self,
        rpc: &dyn ChainRpc,
        tx_hash: H256,
        timeout: Duration,
    ) -> Result<PollOutcome, NetworkError> {
        let deadline = Instant::now() + timeout;
        let mut consecutive_errors = 0u32;

        loop {
            match rpc.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => return Ok(PollOutcome::Confirmed(receipt)),
                Ok(None) => consecutive_errors = 0,
                Err(e) => {
                    consecutive_errors += 1;
                    if consecutive_errors >= self.max_consecutive_errors {
                        return Err(e);
                    }
                    debug!(
                        "Receipt query for {:?} failed ({}/{}): {}",
                        tx_hash, consecutive_errors, self.max_consecutive_errors, e
                    );
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(PollOutcome::TimedOut);
            }
            sleep(self.interval.min(deadline - now)).await;
        }
    }
}

impl Default for ReceiptPoller {
    fn default() -> Self {
        Self::new(Self::DEFAULT_INTERVAL, 3)
    }
}
