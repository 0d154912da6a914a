//! Deploys the Distributor/Relay pair once per run and wires them together.

use crate::calldata::build_set_relay_contract_calldata;
use crate::contracts::{self, ContractKind, DeployedContract};
use crate::error::{EngineError, EngineResult};
use crate::receipt::PollOutcome;
use crate::rpc::ReceiptInfo;
use crate::submitter::{GasAdaptiveSubmitter, SubmissionStatus, TxPayload};
use crate::wallet::Wallet;
use core_logic::{ProgressSink, RetryPolicy, DISTRIBUTION_TARGET};
use ethers::types::{Address, Bytes, H256, U256};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployState {
    NotDeployed,
    Sent { attempt: u32, tx_hash: Option<H256> },
    Confirmed(DeployedContract),
    RetryPending { attempt: u32, reason: String },
}

/// Both helper contracts, live and wired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractPair {
    pub distributor: DeployedContract,
    pub relay: DeployedContract,
}

#[derive(Debug, Clone)]
pub struct ContractBytecode {
    pub distributor: Bytes,
    pub relay: Bytes,
}

impl ContractBytecode {
    fn for_kind(&self, kind: ContractKind) -> &Bytes {
        match kind {
            ContractKind::Distributor => &self.distributor,
            ContractKind::Relay => &self.relay,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DeploySettings {
    pub policy: RetryPolicy,
    pub timeout: Duration,
    /// Extra wait for a late receipt after a poll timed out
    pub settle_wait: Duration,
}

pub struct ContractDeploymentCoordinator {
    submitter: Arc<GasAdaptiveSubmitter>,
    bytecode: ContractBytecode,
    settings: DeploySettings,
    progress: Arc<dyn ProgressSink>,
    deployed: Option<ContractPair>,
    transitions: Vec<(ContractKind, DeployState)>,
}

impl ContractDeploymentCoordinator {
    pub fn new(
        submitter: Arc<GasAdaptiveSubmitter>,
        bytecode: ContractBytecode,
        settings: DeploySettings,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            submitter,
            bytecode,
            settings,
            progress,
            deployed: None,
            transitions: Vec::new(),
        }
    }

    pub fn deployed(&self) -> Option<&ContractPair> {
        self.deployed.as_ref()
    }

    /// Every state change in order, for both contracts.
    pub fn transitions(&self) -> &[(ContractKind, DeployState)] {
        &self.transitions
    }

    /// Deploys both contracts and wires them, unless this run already did.
    pub async fn ensure_deployed(&mut self, owner: &Wallet) -> EngineResult<ContractPair> {
        if let Some(pair) = &self.deployed {
            return Ok(pair.clone());
        }

        let distributor = self.deploy(ContractKind::Distributor, owner).await?;
        let relay = self.deploy(ContractKind::Relay, owner).await?;
        self.set_relay_contract(owner, distributor.address, relay.address)
            .await?;

        let pair = ContractPair { distributor, relay };
        self.progress.line(&format!(
            "Contracts ready: Distributor {:?}, Relay {:?}",
            pair.distributor.address, pair.relay.address
        ));
        self.deployed = Some(pair.clone());
        Ok(pair)
    }

    fn transition(&mut self, kind: ContractKind, state: DeployState) {
        info!(target: DISTRIBUTION_TARGET, "{} deployment: {:?}", kind, state);
        self.transitions.push((kind, state));
    }

    async fn deploy(&mut self, kind: ContractKind, owner: &Wallet) -> EngineResult<DeployedContract> {
        self.transition(kind, DeployState::NotDeployed);
        self.progress.line(&format!("Deploying {} contract", kind));

        let attempts = self.settings.policy.attempts();
        let payload = TxPayload::deploy(self.bytecode.for_kind(kind).clone());
        let mut last_reason = String::new();

        for attempt in 1..=attempts {
            let result = self
                .submitter
                .submit(owner, &payload, self.settings.timeout)
                .await;
            self.transition(
                kind,
                DeployState::Sent {
                    attempt,
                    tx_hash: result.tx_hash(),
                },
            );

            let outcome = match result.status {
                SubmissionStatus::Confirmed(receipt) => confirmed_contract(kind, owner, &receipt),
                SubmissionStatus::Unconfirmed { tx_hash, .. } => match self.late_receipt(tx_hash).await {
                    Some(receipt) => confirmed_contract(kind, owner, &receipt),
                    None => Err("no receipt after settle wait".to_string()),
                },
                SubmissionStatus::RejectedInsufficientFunds { balance, required } => {
                    return Err(EngineError::DeploymentFailure {
                        kind,
                        attempts: attempt,
                        reason: EngineError::InsufficientFunds { balance, required }.to_string(),
                    });
                }
                SubmissionStatus::Failed { last_error } => Err(last_error),
            };

            match outcome {
                Ok(contract) => {
                    self.transition(kind, DeployState::Confirmed(contract.clone()));
                    self.progress
                        .line(&format!("{} deployed at {:?}", kind, contract.address));
                    return Ok(contract);
                }
                Err(reason) => {
                    self.transition(
                        kind,
                        DeployState::RetryPending {
                            attempt,
                            reason: reason.clone(),
                        },
                    );
                    last_reason = reason;
                }
            }

            if attempt < attempts {
                sleep(self.settings.policy.delay_for(attempt - 1)).await;
            }
        }

        Err(EngineError::DeploymentFailure {
            kind,
            attempts,
            reason: last_reason,
        })
    }

    async fn late_receipt(&self, tx_hash: H256) -> Option<ReceiptInfo> {
        warn!(
            target: DISTRIBUTION_TARGET,
            "Deployment {:?} unconfirmed, waiting {:?} for a late receipt",
            tx_hash,
            self.settings.settle_wait
        );
        sleep(self.settings.settle_wait).await;

        match self
            .submitter
            .poller()
            .await_receipt(self.submitter.rpc().as_ref(), tx_hash, Duration::ZERO)
            .await
        {
            Ok(PollOutcome::Confirmed(receipt)) => Some(receipt),
            _ => None,
        }
    }

    async fn set_relay_contract(
        &mut self,
        owner: &Wallet,
        distributor: Address,
        relay: Address,
    ) -> EngineResult<()> {
        let payload = TxPayload::call(
            distributor,
            build_set_relay_contract_calldata(relay),
            U256::zero(),
        );
        let attempts = self.settings.policy.attempts();
        let mut last_reason = String::new();

        for attempt in 1..=attempts {
            let result = self
                .submitter
                .submit(owner, &payload, self.settings.timeout)
                .await;

            match result.receipt() {
                Some(receipt) => match contracts::relay_set_to(receipt) {
                    Some(set) if set != relay => {
                        last_reason = format!("RelaySet reported {:?}, expected {:?}", set, relay);
                    }
                    _ => {
                        self.progress
                            .line(&format!("Relay {:?} set on Distributor", relay));
                        return Ok(());
                    }
                },
                None => {
                    last_reason = result
                        .error_message()
                        .unwrap_or_else(|| "setRelayContract not confirmed".to_string());
                }
            }

            warn!(
                target: DISTRIBUTION_TARGET,
                "setRelayContract attempt {}/{} failed: {}", attempt, attempts, last_reason
            );
            if attempt < attempts {
                sleep(self.settings.policy.delay_for(attempt - 1)).await;
            }
        }

        Err(EngineError::DeploymentFailure {
            kind: ContractKind::Distributor,
            attempts,
            reason: format!("setRelayContract: {}", last_reason),
        })
    }
}

fn confirmed_contract(
    kind: ContractKind,
    owner: &Wallet,
    receipt: &ReceiptInfo,
) -> Result<DeployedContract, String> {
    if !receipt.succeeded() {
        return Err(EngineError::SubmissionReverted {
            tx_hash: receipt.tx_hash,
        }
        .to_string());
    }

    let address = receipt
        .contract_address
        .ok_or_else(|| "receipt carries no contract address".to_string())?;

    Ok(DeployedContract {
        address,
        kind,
        deployer: owner.address(),
        confirmed_block: receipt.block_number,
    })
}
