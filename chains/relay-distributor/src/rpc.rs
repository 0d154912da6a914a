//! JSON-RPC seam. Everything the engine needs from a node goes through
//! [`ChainRpc`]; [`EthersRpc`] is the production implementation.

use async_trait::async_trait;
use core_logic::{ConfigError, NetworkError, ProxyConfig};
use ethers::prelude::*;
use ethers::types::transaction::eip2718::TypedTransaction;
use reqwest::Client;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Success,
    Reverted,
}

/// The parts of a receipt the engine looks at.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiptInfo {
    pub tx_hash: H256,
    pub status: ExecutionStatus,
    pub block_number: Option<U64>,
    pub gas_used: Option<U256>,
    pub contract_address: Option<Address>,
    pub logs: Vec<Log>,
}

impl ReceiptInfo {
    pub fn succeeded(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

impl From<TransactionReceipt> for ReceiptInfo {
    fn from(r: TransactionReceipt) -> Self {
        // pre-byzantium receipts carry no status; treat as success
        let status = match r.status {
            Some(s) if s.is_zero() => ExecutionStatus::Reverted,
            _ => ExecutionStatus::Success,
        };

        Self {
            tx_hash: r.transaction_hash,
            status,
            block_number: r.block_number,
            gas_used: r.gas_used,
            contract_address: r.contract_address,
            logs: r.logs,
        }
    }
}

#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn chain_id(&self) -> Result<u64, NetworkError>;

    async fn estimate_gas(&self, tx: &TypedTransaction) -> Result<U256, NetworkError>;

    async fn gas_price(&self) -> Result<U256, NetworkError>;

    async fn get_balance(&self, address: Address) -> Result<U256, NetworkError>;

    /// Pending-inclusive nonce
    async fn get_transaction_count(&self, address: Address) -> Result<U256, NetworkError>;

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, NetworkError>;

    async fn get_transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> Result<Option<ReceiptInfo>, NetworkError>;

    async fn call(&self, tx: &TypedTransaction) -> Result<Bytes, NetworkError>;
}

pub struct EthersRpc {
    provider: Provider<Http>,
    endpoint: String,
}

impl EthersRpc {
    pub fn new(rpc_url: &str, proxy: Option<&ProxyConfig>) -> Result<Self, ConfigError> {
        let mut client_builder = Client::builder().timeout(Duration::from_secs(30));

        if let Some(proxy_conf) = proxy {
            let mut proxy = reqwest::Proxy::all(&proxy_conf.url).map_err(|e| {
                ConfigError::InvalidValue {
                    field: "proxy".into(),
                    reason: e.to_string(),
                }
            })?;
            if let (Some(u), Some(p)) = (&proxy_conf.username, &proxy_conf.password) {
                proxy = proxy.basic_auth(u, p);
            }
            client_builder = client_builder.proxy(proxy);
        }

        let client = client_builder
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                field: "proxy".into(),
                reason: e.to_string(),
            })?;

        let url = reqwest::Url::parse(rpc_url)
            .map_err(|_| ConfigError::InvalidRpcUrl {
                url: rpc_url.to_string(),
            })?;

        Ok(Self {
            provider: Provider::new(Http::new_with_client(url, client)),
            endpoint: rpc_url.to_string(),
        })
    }

    fn classify(&self, method: &str, err: ProviderError) -> NetworkError {
        let message = err.to_string();
        let lower = message.to_lowercase();
        let endpoint = self.endpoint.clone();

        if lower.contains("timed out") || lower.contains("timeout") {
            NetworkError::Timeout {
                timeout_ms: 30_000,
                endpoint,
            }
        } else if lower.contains("429") || lower.contains("rate limit") {
            NetworkError::RateLimited {
                endpoint,
                retry_after: 1,
            }
        } else if lower.contains("connection refused") {
            NetworkError::ConnectionRefused {
                endpoint,
                reason: message,
            }
        } else {
            NetworkError::rpc(method, message)
        }
    }
}

#[async_trait]
impl ChainRpc for EthersRpc {
    async fn chain_id(&self) -> Result<u64, NetworkError> {
        self.provider
            .get_chainid()
            .await
            .map(|id| id.as_u64())
            .map_err(|e| self.classify("eth_chainId", e))
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> Result<U256, NetworkError> {
        self.provider
            .estimate_gas(tx, None)
            .await
            .map_err(|e| self.classify("eth_estimateGas", e))
    }

    async fn gas_price(&self) -> Result<U256, NetworkError> {
        self.provider
            .get_gas_price()
            .await
            .map_err(|e| self.classify("eth_gasPrice", e))
    }

    async fn get_balance(&self, address: Address) -> Result<U256, NetworkError> {
        self.provider
            .get_balance(address, None)
            .await
            .map_err(|e| self.classify("eth_getBalance", e))
    }

    async fn get_transaction_count(&self, address: Address) -> Result<U256, NetworkError> {
        self.provider
            .get_transaction_count(address, Some(BlockNumber::Pending.into()))
            .await
            .map_err(|e| self.classify("eth_getTransactionCount", e))
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, NetworkError> {
        let pending = self
            .provider
            .send_raw_transaction(raw)
            .await
            .map_err(|e| self.classify("eth_sendRawTransaction", e))?;
        Ok(pending.tx_hash())
    }

    async fn get_transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> Result<Option<ReceiptInfo>, NetworkError> {
        self.provider
            .get_transaction_receipt(tx_hash)
            .await
            .map(|r| r.map(ReceiptInfo::from))
            .map_err(|e| self.classify("eth_getTransactionReceipt", e))
    }

    async fn call(&self, tx: &TypedTransaction) -> Result<Bytes, NetworkError> {
        self.provider
            .call(tx, None)
            .await
            .map_err(|e| self.classify("eth_call", e))
    }
}
