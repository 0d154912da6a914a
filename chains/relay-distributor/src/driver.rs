//! Top-level sequencing of one distribution run.
//!
//! funding -> deployment -> one `distribute` call per recipient, strictly in
//! order. Per-job failures land in the report; only funding and deployment
//! failures abort the run.

use crate::calldata::{build_distribute_calldata, build_distribute_with_relay_calldata};
use crate::config::{DistributionSettings, DistributorConfig};
use crate::contracts;
use crate::deployer::{ContractDeploymentCoordinator, ContractPair, DeploySettings};
use crate::error::EngineResult;
use crate::funding::{per_wallet_amount, FundedWallet, FundingSettings, TempWalletFundingPipeline};
use crate::rpc::ChainRpc;
use crate::submitter::{GasAdaptiveSubmitter, SubmissionStatus, TxPayload};
use crate::wallet::{AuditLog, Wallet};
use core_logic::{ConfigError, ProgressSink, DISTRIBUTION_TARGET};
use ethers::types::{Address, H256, U256};
use ethers::utils::format_ether;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    InProgress,
    Succeeded { tx_hash: H256 },
    Failed { error: String, tx_hash: Option<H256> },
    /// Sent, no receipt within the deadline. Terminal, but not a failure.
    SubmittedUnconfirmed { tx_hash: H256 },
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded { .. } | JobStatus::Failed { .. } | JobStatus::SubmittedUnconfirmed { .. }
        )
    }

    pub fn can_transition_to(&self, next: &JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::InProgress)
                | (JobStatus::Pending, JobStatus::Failed { .. })
                | (JobStatus::InProgress, JobStatus::Succeeded { .. })
                | (JobStatus::InProgress, JobStatus::Failed { .. })
                | (JobStatus::InProgress, JobStatus::SubmittedUnconfirmed { .. })
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            JobStatus::Pending => "Pending",
            JobStatus::InProgress => "InProgress",
            JobStatus::Succeeded { .. } => "Succeeded",
            JobStatus::Failed { .. } => "Failed",
            JobStatus::SubmittedUnconfirmed { .. } => "SubmittedUnconfirmed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Succeeded { tx_hash } => write!(f, "SUCCESS {:?}", tx_hash),
            JobStatus::Failed { error, .. } => write!(f, "FAILED {}", error),
            JobStatus::SubmittedUnconfirmed { tx_hash } => write!(f, "UNCONFIRMED {:?}", tx_hash),
            other => write!(f, "{}", other.label()),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid job transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: &'static str,
    pub to: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferJob {
    pub target: Address,
    pub amount: U256,
    pub sender: Option<Address>,
    status: JobStatus,
}

impl TransferJob {
    pub fn new(target: Address, amount: U256) -> Self {
        Self {
            target,
            amount,
            sender: None,
            status: JobStatus::Pending,
        }
    }

    pub fn status(&self) -> &JobStatus {
        &self.status
    }

    /// Forward-only; terminal states never change.
    pub fn advance(&mut self, next: JobStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(&next) {
            return Err(InvalidTransition {
                from: self.status.label(),
                to: next.label(),
            });
        }
        self.status = next;
        Ok(())
    }
}

/// Round-robin over funded senders, skipping quarantined ones.
#[derive(Debug)]
pub struct SenderPool {
    wallets: Vec<Wallet>,
    cursor: usize,
    quarantined: HashSet<Address>,
}

impl SenderPool {
    pub fn new(wallets: Vec<Wallet>) -> Self {
        Self {
            wallets,
            cursor: 0,
            quarantined: HashSet::new(),
        }
    }

    pub fn next(&mut self) -> Option<Wallet> {
        for _ in 0..self.wallets.len() {
            let wallet = &self.wallets[self.cursor % self.wallets.len()];
            self.cursor = (self.cursor + 1) % self.wallets.len();
            if !self.quarantined.contains(&wallet.address()) {
                return Some(wallet.clone());
            }
        }
        None
    }

    /// Never hand this sender out again in this run.
    pub fn quarantine(&mut self, address: Address) {
        self.quarantined.insert(address);
    }

    pub fn usable(&self) -> usize {
        self.wallets
            .iter()
            .filter(|w| !self.quarantined.contains(&w.address()))
            .count()
    }
}

/// Per-recipient outcome for report layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobResult {
    pub wallet_address: String,
    /// Wei, decimal
    pub amount: String,
    pub transaction_hash: Option<String>,
    pub is_success: bool,
    pub error_message: Option<String>,
    pub sender: Option<String>,
    pub status: String,
}

impl From<&TransferJob> for JobResult {
    fn from(job: &TransferJob) -> Self {
        let (tx_hash, error) = match job.status() {
            JobStatus::Succeeded { tx_hash } => (Some(*tx_hash), None),
            JobStatus::SubmittedUnconfirmed { tx_hash } => (
                Some(*tx_hash),
                Some("submitted, unconfirmed".to_string()),
            ),
            JobStatus::Failed { error, tx_hash } => (*tx_hash, Some(error.clone())),
            _ => (None, None),
        };

        Self {
            wallet_address: format!("{:?}", job.target),
            amount: job.amount.to_string(),
            transaction_hash: tx_hash.map(|h| format!("{:?}", h)),
            is_success: matches!(job.status(), JobStatus::Succeeded { .. }),
            error_message: error,
            sender: job.sender.map(|s| format!("{:?}", s)),
            status: job.status().label().to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DistributionReport {
    pub distributor: Option<String>,
    pub relay: Option<String>,
    pub funded_wallets: usize,
    pub succeeded: usize,
    pub unconfirmed: usize,
    pub failed: usize,
    pub jobs: Vec<JobResult>,
}

impl DistributionReport {
    fn build(pair: &ContractPair, funded: usize, jobs: &[TransferJob]) -> Self {
        let count = |label: &str| jobs.iter().filter(|j| j.status().label() == label).count();

        Self {
            distributor: Some(format!("{:?}", pair.distributor.address)),
            relay: Some(format!("{:?}", pair.relay.address)),
            funded_wallets: funded,
            succeeded: count("Succeeded"),
            unconfirmed: count("SubmittedUnconfirmed"),
            failed: count("Failed"),
            jobs: jobs.iter().map(JobResult::from).collect(),
        }
    }

    pub fn summary_line(&self) -> String {
        format!(
            "Distribution finished: {} succeeded, {} unconfirmed, {} failed",
            self.succeeded, self.unconfirmed, self.failed
        )
    }
}

pub struct DistributionDriver {
    submitter: Arc<GasAdaptiveSubmitter>,
    coordinator: ContractDeploymentCoordinator,
    funding: TempWalletFundingPipeline,
    settings: DistributionSettings,
    submit_timeout: Duration,
    inter_transfer_delay: Duration,
    progress: Arc<dyn ProgressSink>,
}

impl DistributionDriver {
    pub fn new(
        submitter: Arc<GasAdaptiveSubmitter>,
        coordinator: ContractDeploymentCoordinator,
        funding: TempWalletFundingPipeline,
        settings: DistributionSettings,
        submit_timeout: Duration,
        inter_transfer_delay: Duration,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            submitter,
            coordinator,
            funding,
            settings,
            submit_timeout,
            inter_transfer_delay,
            progress,
        }
    }

    /// Wires every component from configuration around the given transport.
    pub fn from_config(
        config: &DistributorConfig,
        rpc: Arc<dyn ChainRpc>,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<Self, ConfigError> {
        let timing = config.timing;
        let policy = config.policy;

        let submitter = Arc::new(GasAdaptiveSubmitter::from_config(config, rpc));

        let coordinator = ContractDeploymentCoordinator::new(
            submitter.clone(),
            config.contracts.load()?,
            DeploySettings {
                policy: policy.deployment,
                timeout: timing.deploy_timeout(),
                settle_wait: timing.deploy_settle_wait(),
            },
            progress.clone(),
        );

        let funding = TempWalletFundingPipeline::new(
            submitter.clone(),
            FundingSettings {
                policy: policy.funding,
                timeout: timing.funding_timeout(),
                inter_transfer_delay: timing.inter_transfer_delay(),
            },
            config.distribution.audit_log_path.as_ref().map(AuditLog::new),
            progress.clone(),
        );

        Ok(Self::new(
            submitter,
            coordinator,
            funding,
            config.distribution.clone(),
            timing.submit_timeout(),
            timing.inter_transfer_delay(),
            progress,
        ))
    }

    pub fn coordinator(&self) -> &ContractDeploymentCoordinator {
        &self.coordinator
    }

    pub async fn run(
        &mut self,
        funder: &Wallet,
        targets: &[Address],
        amount: U256,
    ) -> EngineResult<DistributionReport> {
        if targets.is_empty() {
            self.progress.line("No targets given, nothing to distribute");
            return Ok(DistributionReport::default());
        }

        let mut jobs: Vec<TransferJob> = targets
            .iter()
            .map(|t| TransferJob::new(*t, amount))
            .collect();

        self.progress.line(&format!(
            "Starting distribution of {} ETH to {} wallets",
            format_ether(amount),
            jobs.len()
        ));

        let wallet_count = self.settings.temp_wallet_count;
        let per_wallet = per_wallet_amount(
            amount,
            self.settings.gas_reserve()?,
            jobs.len(),
            wallet_count,
        );
        let funded = self
            .funding
            .fund(funder, wallet_count, per_wallet, self.settings.owner_buffer()?)
            .await?;

        // owner is always last and always funded
        let owner = funded
            .last()
            .map(|f| f.wallet.clone())
            .ok_or_else(|| crate::error::EngineError::FundingExhausted {
                reason: "no funded wallets".to_string(),
            })?;
        let pair = self.coordinator.ensure_deployed(&owner).await?;

        let mut pool = SenderPool::new(funded.iter().map(|f: &FundedWallet| f.wallet.clone()).collect());

        for (index, job) in jobs.iter_mut().enumerate() {
            if index > 0 {
                sleep(self.inter_transfer_delay).await;
            }
            self.run_job(job, &mut pool, pair.distributor.address).await;
        }

        let report = DistributionReport::build(&pair, funded.len(), &jobs);
        self.log_summary(&report);
        Ok(report)
    }

    async fn run_job(&self, job: &mut TransferJob, pool: &mut SenderPool, distributor: Address) {
        let target = format!("{:?}", job.target);

        let Some(sender) = pool.next() else {
            self.finish(
                job,
                JobStatus::Failed {
                    error: "no usable sender left (all quarantined or unfunded)".to_string(),
                    tx_hash: None,
                },
            );
            return;
        };

        job.sender = Some(sender.address());
        self.finish(job, JobStatus::InProgress);

        let calldata = if self.settings.use_relay {
            build_distribute_with_relay_calldata(job.target)
        } else {
            build_distribute_calldata(job.target)
        };
        let payload = TxPayload::call(distributor, calldata, job.amount);

        info!(
            target: DISTRIBUTION_TARGET,
            "[{}] distributing {} ETH via {:?}",
            target,
            format_ether(job.amount),
            sender.address()
        );

        let result = self
            .submitter
            .submit(&sender, &payload, self.submit_timeout)
            .await;

        let next = match &result.status {
            SubmissionStatus::Confirmed(receipt) => match contracts::forwarding_failure(receipt) {
                Some(reason) => JobStatus::Failed {
                    error: reason,
                    tx_hash: Some(receipt.tx_hash),
                },
                None => JobStatus::Succeeded {
                    tx_hash: receipt.tx_hash,
                },
            },
            SubmissionStatus::Unconfirmed { tx_hash, .. } => {
                pool.quarantine(sender.address());
                warn!(
                    target: DISTRIBUTION_TARGET,
                    "Sender {:?} quarantined, {} usable left",
                    sender.address(),
                    pool.usable()
                );
                JobStatus::SubmittedUnconfirmed { tx_hash: *tx_hash }
            }
            SubmissionStatus::RejectedInsufficientFunds { .. } | SubmissionStatus::Failed { .. } => {
                JobStatus::Failed {
                    error: result.error_message().unwrap_or_default(),
                    tx_hash: result.tx_hash(),
                }
            }
        };

        self.finish(job, next);
    }

    fn finish(&self, job: &mut TransferJob, next: JobStatus) {
        let rendered = next.to_string();
        match job.advance(next) {
            Ok(()) => self
                .progress
                .job_update(&format!("{:?}", job.target), &rendered),
            Err(e) => warn!(target: DISTRIBUTION_TARGET, "{:?}: {}", job.target, e),
        }
    }

    fn log_summary(&self, report: &DistributionReport) {
        self.progress.line(&report.summary_line());
        for job in report.jobs.iter().filter(|j| j.status == "Failed") {
            warn!(
                target: DISTRIBUTION_TARGET,
                "FAILED {}: {}",
                job.wallet_address,
                job.error_message.as_deref().unwrap_or("unknown error")
            );
        }
    }
}
