//! In-memory chain for integration tests.
//!
//! Decodes and recovers every raw transaction it receives, tracks balances
//! and nonces, and lets a test script per-calldata-prefix behaviour.

#![allow(dead_code)]

use async_trait::async_trait;
use core_logic::{NetworkError, RetryPolicy};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Log, Transaction, H256, U256, U64};
use ethers::utils::{get_contract_address, keccak256, parse_ether, rlp};
use relay_distributor::calldata::{
    selector, SIG_DISTRIBUTE, SIG_DISTRIBUTE_WITH_RELAY, SIG_SET_RELAY_CONTRACT,
};
use relay_distributor::contracts::{encode_event_log, ContractEvent};
use relay_distributor::gas::GasSettings;
use relay_distributor::receipt::ReceiptPoller;
use relay_distributor::rpc::{ChainRpc, ExecutionStatus, ReceiptInfo};
use relay_distributor::{GasAdaptiveSubmitter, Wallet};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const CHAIN_ID: u64 = 31337;
pub const GAS_PRICE: u64 = 1_000_000_000;
pub const CALL_GAS: u64 = 60_000;
pub const DEPLOY_GAS: u64 = 1_000_000;

pub const DISTRIBUTOR_CODE: [u8; 6] = [0x60, 0x80, 0x60, 0x40, 0x52, 0x01];
pub const RELAY_CODE: [u8; 6] = [0x60, 0x80, 0x60, 0x40, 0x52, 0x02];

// anvil account #0
pub const FUNDER_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    /// Mined with status 0
    Revert,
    /// Accepted into the pool, never mined
    NeverMined,
    /// Mined, but the receipt stays hidden for this many queries
    MinedAfterPolls(usize),
    /// `eth_sendRawTransaction` fails at the transport level
    SendError,
    /// The node takes the transaction, but the caller only sees a timeout
    ResponseLost,
    /// Mined; the relay hop reports failure
    ForwardFailed,
}

struct Rule {
    prefix: Vec<u8>,
    behaviour: Behaviour,
    remaining: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct SentTx {
    pub from: Address,
    pub to: Option<Address>,
    pub data: Bytes,
    pub value: U256,
    pub gas: U256,
    pub gas_price: U256,
    pub nonce: U256,
    pub hash: H256,
}

#[derive(Default)]
struct State {
    balances: HashMap<Address, U256>,
    nonces: HashMap<Address, U256>,
    receipts: HashMap<H256, (ReceiptInfo, usize)>,
    rules: Vec<Rule>,
    estimate_failures: Vec<Vec<u8>>,
    receipt_errors: usize,
    call_responses: HashMap<[u8; 4], Vec<U256>>,
    calls: Vec<Bytes>,
    sent: Vec<SentTx>,
    estimate_calls: usize,
    receipt_queries: usize,
    block: u64,
}

impl State {
    fn take_behaviour(&mut self, data: &[u8]) -> Option<Behaviour> {
        let rule = self
            .rules
            .iter_mut()
            .find(|r| data.starts_with(&r.prefix) && r.remaining != Some(0))?;
        if let Some(n) = rule.remaining.as_mut() {
            *n -= 1;
        }
        Some(rule.behaviour)
    }

    fn balance(&self, address: Address) -> U256 {
        self.balances.get(&address).copied().unwrap_or_default()
    }

    fn credit(&mut self, address: Address, amount: U256) {
        *self.balances.entry(address).or_default() += amount;
    }

    fn debit(&mut self, address: Address, amount: U256) {
        let balance = self.balances.entry(address).or_default();
        *balance = balance.saturating_sub(amount);
    }
}

fn intrinsic_gas(to: Option<Address>, data: &[u8]) -> u64 {
    match to {
        None => DEPLOY_GAS,
        Some(_) if data.is_empty() => 21_000,
        Some(_) => CALL_GAS,
    }
}

fn argument_address(data: &[u8]) -> Address {
    Address::from_slice(&data[16..36])
}

#[derive(Default)]
pub struct MockChain {
    state: Mutex<State>,
}

impl MockChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fund(&self, address: Address, amount: U256) {
        self.state.lock().unwrap().credit(address, amount);
    }

    pub fn balance(&self, address: Address) -> U256 {
        self.state.lock().unwrap().balance(address)
    }

    pub fn nonce(&self, address: Address) -> U256 {
        self.state
            .lock()
            .unwrap()
            .nonces
            .get(&address)
            .copied()
            .unwrap_or_default()
    }

    /// Applies `behaviour` to every send whose calldata starts with `prefix`.
    pub fn on(&self, prefix: impl AsRef<[u8]>, behaviour: Behaviour) {
        self.push_rule(prefix.as_ref(), behaviour, None);
    }

    /// Same as [`on`](Self::on) for the next `times` matching sends only.
    pub fn on_times(&self, prefix: impl AsRef<[u8]>, behaviour: Behaviour, times: usize) {
        self.push_rule(prefix.as_ref(), behaviour, Some(times));
    }

    fn push_rule(&self, prefix: &[u8], behaviour: Behaviour, remaining: Option<usize>) {
        self.state.lock().unwrap().rules.push(Rule {
            prefix: prefix.to_vec(),
            behaviour,
            remaining,
        });
    }

    /// `eth_estimateGas` errors for calldata starting with `prefix`.
    pub fn fail_estimates(&self, prefix: impl AsRef<[u8]>) {
        self.state
            .lock()
            .unwrap()
            .estimate_failures
            .push(prefix.as_ref().to_vec());
    }

    pub fn fail_receipt_queries(&self, count: usize) {
        self.state.lock().unwrap().receipt_errors = count;
    }

    /// Queue of `eth_call` return values for a function; the last one repeats.
    pub fn respond(&self, signature: &str, values: Vec<U256>) {
        self.state
            .lock()
            .unwrap()
            .call_responses
            .insert(selector(signature), values);
    }

    pub fn sent(&self) -> Vec<SentTx> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn sent_matching(&self, prefix: impl AsRef<[u8]>) -> Vec<SentTx> {
        self.sent()
            .into_iter()
            .filter(|tx| tx.data.as_ref().starts_with(prefix.as_ref()))
            .collect()
    }

    pub fn calls(&self) -> Vec<Bytes> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn estimate_calls(&self) -> usize {
        self.state.lock().unwrap().estimate_calls
    }

    pub fn receipt_queries(&self) -> usize {
        self.state.lock().unwrap().receipt_queries
    }

    /// Puts a receipt on chain without a matching send.
    pub fn insert_receipt(&self, receipt: ReceiptInfo, hidden_polls: usize) {
        self.state
            .lock()
            .unwrap()
            .receipts
            .insert(receipt.tx_hash, (receipt, hidden_polls));
    }

    fn execute(
        state: &mut State,
        tx: &Transaction,
        from: Address,
        hash: H256,
        behaviour: Option<Behaviour>,
    ) -> ReceiptInfo {
        state.block += 1;
        let data = tx.input.as_ref();
        let gas_price = tx.gas_price.unwrap_or_default();
        let gas_used = U256::from(intrinsic_gas(tx.to, data)).min(tx.gas);
        state.debit(from, gas_used * gas_price);

        let mut receipt = ReceiptInfo {
            tx_hash: hash,
            status: ExecutionStatus::Success,
            block_number: Some(U64::from(state.block)),
            gas_used: Some(gas_used),
            contract_address: None,
            logs: Vec::new(),
        };

        if behaviour == Some(Behaviour::Revert) {
            receipt.status = ExecutionStatus::Reverted;
            return receipt;
        }

        state.debit(from, tx.value);
        let Some(to) = tx.to else {
            let created = get_contract_address(from, tx.nonce);
            state.credit(created, tx.value);
            receipt.contract_address = Some(created);
            return receipt;
        };

        let forward_failed = behaviour == Some(Behaviour::ForwardFailed);
        let mut emit = |event: ContractEvent| receipt.logs.push(encode_event_log(to, &event));

        if data.starts_with(&selector(SIG_DISTRIBUTE_WITH_RELAY)) {
            emit(ContractEvent::SentToRelay(!forward_failed));
            if !forward_failed {
                emit(ContractEvent::Forwarded(true));
            }
        } else if data.starts_with(&selector(SIG_DISTRIBUTE)) {
            emit(ContractEvent::Forwarded(!forward_failed));
        } else if data.starts_with(&selector(SIG_SET_RELAY_CONTRACT)) {
            emit(ContractEvent::RelaySet(argument_address(data)));
        }

        let is_distribution = data.starts_with(&selector(SIG_DISTRIBUTE_WITH_RELAY))
            || data.starts_with(&selector(SIG_DISTRIBUTE));
        if is_distribution && !forward_failed {
            state.credit(argument_address(data), tx.value);
        } else {
            state.credit(to, tx.value);
        }
        receipt
    }
}

#[async_trait]
impl ChainRpc for MockChain {
    async fn chain_id(&self) -> Result<u64, NetworkError> {
        Ok(CHAIN_ID)
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> Result<U256, NetworkError> {
        let mut state = self.state.lock().unwrap();
        state.estimate_calls += 1;

        let data = tx.data().map(|d| d.to_vec()).unwrap_or_default();
        if state.estimate_failures.iter().any(|p| data.starts_with(p)) {
            return Err(NetworkError::rpc("eth_estimateGas", "execution reverted"));
        }

        let to = tx.to().and_then(|t| t.as_address().copied());
        Ok(U256::from(intrinsic_gas(to, &data)))
    }

    async fn gas_price(&self) -> Result<U256, NetworkError> {
        Ok(U256::from(GAS_PRICE))
    }

    async fn get_balance(&self, address: Address) -> Result<U256, NetworkError> {
        Ok(self.balance(address))
    }

    async fn get_transaction_count(&self, address: Address) -> Result<U256, NetworkError> {
        Ok(self.nonce(address))
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, NetworkError> {
        let tx: Transaction = rlp::decode(raw.as_ref())
            .map_err(|e| NetworkError::rpc("eth_sendRawTransaction", format!("{:?}", e)))?;
        let from = tx
            .recover_from()
            .map_err(|e| NetworkError::rpc("eth_sendRawTransaction", e.to_string()))?;
        let hash = H256::from(keccak256(raw.as_ref()));

        let mut state = self.state.lock().unwrap();
        let behaviour = state.take_behaviour(tx.input.as_ref());
        if behaviour == Some(Behaviour::SendError) {
            return Err(NetworkError::ConnectionRefused {
                endpoint: "mock".into(),
                reason: "connection reset".into(),
            });
        }

        let expected = state.nonces.get(&from).copied().unwrap_or_default();
        if tx.nonce != expected {
            return Err(NetworkError::rpc("eth_sendRawTransaction", "nonce too low"));
        }

        let gas_price = tx.gas_price.unwrap_or_default();
        if state.balance(from) < tx.gas * gas_price + tx.value {
            return Err(NetworkError::rpc(
                "eth_sendRawTransaction",
                "insufficient funds for gas * price + value",
            ));
        }

        state.nonces.insert(from, expected + 1);
        state.sent.push(SentTx {
            from,
            to: tx.to,
            data: tx.input.clone(),
            value: tx.value,
            gas: tx.gas,
            gas_price,
            nonce: tx.nonce,
            hash,
        });

        if behaviour == Some(Behaviour::NeverMined) {
            return Ok(hash);
        }

        let receipt = Self::execute(&mut state, &tx, from, hash, behaviour);
        let hidden = match behaviour {
            Some(Behaviour::MinedAfterPolls(n)) => n,
            _ => 0,
        };
        state.receipts.insert(hash, (receipt, hidden));

        if behaviour == Some(Behaviour::ResponseLost) {
            return Err(NetworkError::Timeout {
                timeout_ms: 30_000,
                endpoint: "mock".into(),
            });
        }
        Ok(hash)
    }

    async fn get_transaction_receipt(&self, tx_hash: H256) -> Result<Option<ReceiptInfo>, NetworkError> {
        let mut state = self.state.lock().unwrap();
        state.receipt_queries += 1;

        if state.receipt_errors > 0 {
            state.receipt_errors -= 1;
            return Err(NetworkError::Timeout {
                timeout_ms: 30_000,
                endpoint: "mock".into(),
            });
        }

        match state.receipts.get_mut(&tx_hash) {
            Some((_, hidden)) if *hidden > 0 => {
                *hidden -= 1;
                Ok(None)
            }
            Some((receipt, _)) => Ok(Some(receipt.clone())),
            None => Ok(None),
        }
    }

    async fn call(&self, tx: &TypedTransaction) -> Result<Bytes, NetworkError> {
        let mut state = self.state.lock().unwrap();
        let data = tx.data().cloned().unwrap_or_default();
        state.calls.push(data.clone());

        if data.len() < 4 {
            return Err(NetworkError::rpc("eth_call", "execution reverted"));
        }
        let mut key = [0u8; 4];
        key.copy_from_slice(&data[..4]);

        let queue = state
            .call_responses
            .get_mut(&key)
            .ok_or_else(|| NetworkError::rpc("eth_call", "execution reverted"))?;
        let value = if queue.len() > 1 {
            queue.remove(0)
        } else {
            queue.first().copied().unwrap_or_default()
        };

        let mut word = [0u8; 32];
        value.to_big_endian(&mut word);
        Ok(Bytes::from(word.to_vec()))
    }
}

pub fn funder() -> Wallet {
    Wallet::from_private_key(FUNDER_KEY).unwrap()
}

pub fn eth(value: &str) -> U256 {
    parse_ether(value).unwrap()
}

pub fn fast_policy(attempts: u32) -> RetryPolicy {
    RetryPolicy::new(attempts, 1)
}

pub fn poller() -> ReceiptPoller {
    ReceiptPoller::new(Duration::from_millis(5), 3)
}

/// Timeout long enough for an immediately-mined receipt.
pub fn timeout() -> Duration {
    Duration::from_millis(200)
}

/// Timeout for scenarios that are expected to expire.
pub fn short_timeout() -> Duration {
    Duration::from_millis(40)
}

pub fn submitter(chain: &Arc<MockChain>) -> GasAdaptiveSubmitter {
    let rpc: Arc<dyn ChainRpc> = chain.clone();
    GasAdaptiveSubmitter::new(rpc, CHAIN_ID, GasSettings::default(), poller(), fast_policy(3))
}

pub fn receipt(tx_hash: H256, status: ExecutionStatus) -> ReceiptInfo {
    ReceiptInfo {
        tx_hash,
        status,
        block_number: Some(U64::from(1)),
        gas_used: Some(U256::from(21_000)),
        contract_address: None,
        logs: Vec::<Log>::new(),
    }
}
