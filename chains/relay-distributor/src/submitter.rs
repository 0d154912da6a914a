//! Gas-adaptive submission.
//!
//! Each rung estimates gas (falling back to a fixed limit), prices the
//! attempt, checks the sender can pay for it, signs locally and sends the raw
//! transaction, then waits for a receipt. A revert moves to the next rung of
//! the ladder; a timeout stops immediately and reports the hash as
//! unconfirmed, since the nonce may still be pending. A send that errors is
//! only treated as not sent once the pending nonce and the locally computed
//! hash both show the node never took it.

use crate::config::DistributorConfig;
use crate::error::EngineError;
use crate::gas::{self, GasEstimate, GasRung, GasSettings};
use crate::receipt::{PollOutcome, ReceiptPoller};
use crate::rpc::{ChainRpc, ReceiptInfo};
use crate::wallet::Wallet;
use core_logic::{retry_typed, RetryPolicy, DISTRIBUTION_TARGET};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest, H256, U256};
use ethers::utils::keccak256;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// What to send: a value transfer, a contract call, or a creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxPayload {
    pub to: Option<Address>,
    pub data: Bytes,
    pub value: U256,
}

impl TxPayload {
    pub fn transfer(to: Address, value: U256) -> Self {
        Self {
            to: Some(to),
            data: Bytes::default(),
            value,
        }
    }

    pub fn call(to: Address, data: impl Into<Bytes>, value: U256) -> Self {
        Self {
            to: Some(to),
            data: data.into(),
            value,
        }
    }

    pub fn deploy(bytecode: impl Into<Bytes>) -> Self {
        Self {
            to: None,
            data: bytecode.into(),
            value: U256::zero(),
        }
    }

    pub fn is_deploy(&self) -> bool {
        self.to.is_none()
    }

    fn request(&self, from: Address) -> TransactionRequest {
        let mut tx = TransactionRequest::new()
            .from(from)
            .value(self.value)
            .data(self.data.clone());
        if let Some(to) = self.to {
            tx = tx.to(to);
        }
        tx
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AttemptOutcome {
    Sent,
    Confirmed,
    Reverted,
    TimedOut,
    RejectedInsufficientFunds,
    TransportFailed,
}

/// One rung's worth of submission, kept for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionAttempt {
    pub rung: GasRung,
    pub gas_limit: U256,
    /// False when a fallback limit stood in for `eth_estimateGas`
    pub gas_estimated: bool,
    pub gas_price: U256,
    pub nonce: Option<U256>,
    pub tx_hash: Option<H256>,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionStatus {
    Confirmed(ReceiptInfo),
    /// Sent but no receipt inside the deadline
    Unconfirmed { tx_hash: H256, timeout_secs: u64 },
    RejectedInsufficientFunds { balance: U256, required: U256 },
    Failed { last_error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionResult {
    pub status: SubmissionStatus,
    pub attempts: Vec<SubmissionAttempt>,
}

impl SubmissionResult {
    pub fn is_confirmed(&self) -> bool {
        matches!(self.status, SubmissionStatus::Confirmed(_))
    }

    pub fn receipt(&self) -> Option<&ReceiptInfo> {
        match &self.status {
            SubmissionStatus::Confirmed(r) => Some(r),
            _ => None,
        }
    }

    /// Hash of the last transaction that actually went out.
    pub fn tx_hash(&self) -> Option<H256> {
        match &self.status {
            SubmissionStatus::Confirmed(r) => Some(r.tx_hash),
            SubmissionStatus::Unconfirmed { tx_hash, .. } => Some(*tx_hash),
            _ => self.attempts.iter().rev().find_map(|a| a.tx_hash),
        }
    }

    /// Ladder multipliers tried, in order. The fresh-estimate fallback is
    /// not a ladder rung and is left out.
    pub fn multipliers(&self) -> Vec<f64> {
        self.attempts
            .iter()
            .filter(|a| matches!(a.rung, GasRung::Ladder { .. }))
            .map(|a| a.rung.multiplier())
            .collect()
    }

    pub fn error_message(&self) -> Option<String> {
        match &self.status {
            SubmissionStatus::Confirmed(_) => None,
            SubmissionStatus::Unconfirmed {
                tx_hash,
                timeout_secs,
            } => Some(
                EngineError::ReceiptTimeout {
                    tx_hash: *tx_hash,
                    timeout_secs: *timeout_secs,
                }
                .to_string(),
            ),
            SubmissionStatus::RejectedInsufficientFunds { balance, required } => Some(
                EngineError::InsufficientFunds {
                    balance: *balance,
                    required: *required,
                }
                .to_string(),
            ),
            SubmissionStatus::Failed { last_error } => Some(last_error.clone()),
        }
    }
}

enum RungResult {
    Done(SubmissionStatus),
    Escalate(String),
}

pub struct GasAdaptiveSubmitter {
    rpc: Arc<dyn ChainRpc>,
    chain_id: u64,
    gas: GasSettings,
    poller: ReceiptPoller,
    transport: RetryPolicy,
}

impl GasAdaptiveSubmitter {
    pub fn new(
        rpc: Arc<dyn ChainRpc>,
        chain_id: u64,
        gas: GasSettings,
        poller: ReceiptPoller,
        transport: RetryPolicy,
    ) -> Self {
        Self {
            rpc,
            chain_id,
            gas,
            poller,
            transport,
        }
    }

    /// Transport retries also bound consecutive receipt-poll errors.
    pub fn from_config(config: &DistributorConfig, rpc: Arc<dyn ChainRpc>) -> Self {
        let transport = config.policy.transport;
        Self::new(
            rpc,
            config.chain_id,
            config.gas,
            ReceiptPoller::new(config.timing.poll_interval(), transport.attempts()),
            transport,
        )
    }

    pub fn rpc(&self) -> &Arc<dyn ChainRpc> {
        &self.rpc
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn poller(&self) -> ReceiptPoller {
        self.poller
    }

    fn fallback_gas(&self, payload: &TxPayload) -> u64 {
        if payload.is_deploy() {
            self.gas.deploy_gas_limit
        } else if payload.data.is_empty() {
            self.gas.transfer_gas_limit
        } else {
            self.gas.default_gas_limit
        }
    }

    pub async fn submit(
        &self,
        from: &Wallet,
        payload: &TxPayload,
        timeout: Duration,
    ) -> SubmissionResult {
        let mut attempts = Vec::new();
        let mut last_error = String::from("no attempt made");

        for rung in gas::escalation() {
            match self
                .attempt(from, payload, rung, timeout, &mut attempts)
                .await
            {
                RungResult::Done(status) => return SubmissionResult { status, attempts },
                RungResult::Escalate(reason) => {
                    warn!(
                        target: DISTRIBUTION_TARGET,
                        "[{:?}] {} failed: {}", from.address(), rung, reason
                    );
                    last_error = reason;
                }
            }
        }

        SubmissionResult {
            status: SubmissionStatus::Failed { last_error },
            attempts,
        }
    }

    async fn attempt(
        &self,
        from: &Wallet,
        payload: &TxPayload,
        rung: GasRung,
        timeout: Duration,
        attempts: &mut Vec<SubmissionAttempt>,
    ) -> RungResult {
        let sender = from.address();
        let request = payload.request(sender);
        let typed: TypedTransaction = request.clone().into();

        let base = match rung {
            GasRung::FreshEstimate => {
                match retry_typed(self.transport, "eth_estimateGas", || {
                    self.rpc.estimate_gas(&typed)
                })
                .await
                {
                    Ok(gas) => GasEstimate {
                        gas,
                        estimated: true,
                    },
                    Err(e) => return RungResult::Escalate(format!("fresh estimate unavailable: {}", e)),
                }
            }
            GasRung::Ladder { .. } => {
                gas::estimate_or_fallback(self.rpc.as_ref(), &typed, self.fallback_gas(payload)).await
            }
        };
        let gas_limit = rung.apply(base.gas);

        let mut record = SubmissionAttempt {
            rung,
            gas_limit,
            gas_estimated: base.estimated,
            gas_price: U256::zero(),
            nonce: None,
            tx_hash: None,
            outcome: AttemptOutcome::TransportFailed,
        };

        let gas_price = match retry_typed(self.transport, "eth_gasPrice", || self.rpc.gas_price()).await {
            Ok(price) => price,
            Err(e) => {
                attempts.push(record);
                return RungResult::Escalate(EngineError::Transport(e).to_string());
            }
        };
        record.gas_price = gas_price;

        let balance = match retry_typed(self.transport, "eth_getBalance", || {
            self.rpc.get_balance(sender)
        })
        .await
        {
            Ok(balance) => balance,
            Err(e) => {
                attempts.push(record);
                return RungResult::Escalate(EngineError::Transport(e).to_string());
            }
        };

        let required = gas::required_cost(gas_limit, gas_price, payload.value);
        if balance < required {
            record.outcome = AttemptOutcome::RejectedInsufficientFunds;
            attempts.push(record);
            warn!(
                target: DISTRIBUTION_TARGET,
                "[{:?}] {} rejected: balance {} < required {}", sender, rung, balance, required
            );
            return RungResult::Done(SubmissionStatus::RejectedInsufficientFunds {
                balance,
                required,
            });
        }

        let nonce = match retry_typed(self.transport, "eth_getTransactionCount", || {
            self.rpc.get_transaction_count(sender)
        })
        .await
        {
            Ok(nonce) => nonce,
            Err(e) => {
                attempts.push(record);
                return RungResult::Escalate(EngineError::Transport(e).to_string());
            }
        };
        record.nonce = Some(nonce);

        let raw = match self.sign(from, request, gas_limit, gas_price, nonce) {
            Ok(raw) => raw,
            Err(e) => {
                attempts.push(record);
                return RungResult::Done(SubmissionStatus::Failed { last_error: e });
            }
        };

        let tx_hash = match retry_typed(self.transport, "eth_sendRawTransaction", || {
            self.rpc.send_raw_transaction(raw.clone())
        })
        .await
        {
            Ok(hash) => hash,
            Err(e) => {
                let local_hash = H256::from(keccak256(raw.as_ref()));
                if self.send_was_dropped(sender, nonce, local_hash).await {
                    attempts.push(record);
                    return RungResult::Escalate(EngineError::Transport(e).to_string());
                }
                warn!(
                    target: DISTRIBUTION_TARGET,
                    "[{:?}] {} send reported {} but nonce {} may be taken; tracking {:?}",
                    sender, rung, e, nonce, local_hash
                );
                local_hash
            }
        };
        record.tx_hash = Some(tx_hash);
        record.outcome = AttemptOutcome::Sent;

        info!(
            target: DISTRIBUTION_TARGET,
            "[{:?}] {} sent {:?} (gas {} @ {} wei, nonce {})",
            sender, rung, tx_hash, gas_limit, gas_price, nonce
        );

        let timeout_secs = timeout.as_secs();
        let outcome = self
            .poller
            .await_receipt(self.rpc.as_ref(), tx_hash, timeout)
            .await;

        match outcome {
            Ok(PollOutcome::Confirmed(receipt)) if receipt.succeeded() => {
                record.outcome = AttemptOutcome::Confirmed;
                attempts.push(record);
                info!(
                    target: DISTRIBUTION_TARGET,
                    "[{:?}] SUCCESS {:?} in block {:?}", sender, tx_hash, receipt.block_number
                );
                RungResult::Done(SubmissionStatus::Confirmed(receipt))
            }
            Ok(PollOutcome::Confirmed(_)) => {
                record.outcome = AttemptOutcome::Reverted;
                attempts.push(record);
                RungResult::Escalate(EngineError::SubmissionReverted { tx_hash }.to_string())
            }
            Ok(PollOutcome::TimedOut) => {
                record.outcome = AttemptOutcome::TimedOut;
                attempts.push(record);
                warn!(
                    target: DISTRIBUTION_TARGET,
                    "[{:?}] UNCONFIRMED {:?} after {}s", sender, tx_hash, timeout_secs
                );
                RungResult::Done(SubmissionStatus::Unconfirmed {
                    tx_hash,
                    timeout_secs,
                })
            }
            Err(e) => {
                // the transaction is out; resending under the same nonce is not safe
                record.outcome = AttemptOutcome::TimedOut;
                attempts.push(record);
                warn!(
                    target: DISTRIBUTION_TARGET,
                    "[{:?}] UNCONFIRMED {:?}, receipt polling gave up: {}", sender, tx_hash, e
                );
                RungResult::Done(SubmissionStatus::Unconfirmed {
                    tx_hash,
                    timeout_secs,
                })
            }
        }
    }

    /// True only when the node provably never accepted the transaction: the
    /// pending nonce has not moved past `nonce` and `tx_hash` has no receipt.
    /// Any error while checking counts as accepted, so the nonce is never
    /// signed twice.
    async fn send_was_dropped(&self, sender: Address, nonce: U256, tx_hash: H256) -> bool {
        let pending = retry_typed(self.transport, "eth_getTransactionCount", || {
            self.rpc.get_transaction_count(sender)
        })
        .await;
        let receipt = retry_typed(self.transport, "eth_getTransactionReceipt", || {
            self.rpc.get_transaction_receipt(tx_hash)
        })
        .await;

        matches!((pending, receipt), (Ok(pending), Ok(None)) if pending <= nonce)
    }

    fn sign(
        &self,
        from: &Wallet,
        request: TransactionRequest,
        gas_limit: U256,
        gas_price: U256,
        nonce: U256,
    ) -> Result<Bytes, String> {
        let signer = from.signer(self.chain_id).map_err(|e| e.to_string())?;

        let tx: TypedTransaction = request
            .gas(gas_limit)
            .gas_price(gas_price)
            .nonce(nonce)
            .chain_id(self.chain_id)
            .into();

        let signature = signer
            .sign_transaction_sync(&tx)
            .map_err(|e| format!("signing failed: {}", e))?;

        Ok(tx.rlp_signed(&signature))
    }
}
