//! Generates and funds the temp wallets that act as senders for one run.
//!
//! The last generated wallet is the owner: it deploys the helper contracts
//! and gets an extra buffer on top of the per-wallet amount. It is funded
//! first, and a run without a funded owner cannot proceed.

use crate::error::{EngineError, EngineResult};
use crate::submitter::{GasAdaptiveSubmitter, SubmissionStatus, TxPayload};
use crate::wallet::{AuditLog, Wallet, WalletRole};
use core_logic::{ProgressSink, RetryPolicy, DISTRIBUTION_TARGET};
use ethers::types::{H256, U256};
use ethers::utils::format_ether;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct FundedWallet {
    pub wallet: Wallet,
    pub role: WalletRole,
    pub amount: U256,
    pub funding_tx: H256,
}

#[derive(Debug, Clone, Copy)]
pub struct FundingSettings {
    pub policy: RetryPolicy,
    pub timeout: Duration,
    pub inter_transfer_delay: Duration,
}

/// Per-wallet amount for `jobs` transfers of `amount` spread over `wallets`
/// senders, each transfer also carrying `gas_reserve`.
pub fn per_wallet_amount(amount: U256, gas_reserve: U256, jobs: usize, wallets: usize) -> U256 {
    let wallets = wallets.max(1);
    let jobs_per_wallet = jobs.div_ceil(wallets).max(1);
    amount
        .saturating_add(gas_reserve)
        .saturating_mul(U256::from(jobs_per_wallet))
}

pub struct TempWalletFundingPipeline {
    submitter: Arc<GasAdaptiveSubmitter>,
    settings: FundingSettings,
    audit: Option<AuditLog>,
    progress: Arc<dyn ProgressSink>,
}

impl TempWalletFundingPipeline {
    pub fn new(
        submitter: Arc<GasAdaptiveSubmitter>,
        settings: FundingSettings,
        audit: Option<AuditLog>,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            submitter,
            settings,
            audit,
            progress,
        }
    }

    /// Returns the funded wallets in generation order; the owner is last.
    pub async fn fund(
        &self,
        funder: &Wallet,
        count: usize,
        per_wallet: U256,
        owner_buffer: U256,
    ) -> EngineResult<Vec<FundedWallet>> {
        if count == 0 {
            return Err(EngineError::FundingExhausted {
                reason: "temp wallet count is zero".to_string(),
            });
        }

        let wallets: Vec<Wallet> = (0..count).map(|_| Wallet::generate()).collect();
        for (i, wallet) in wallets.iter().enumerate() {
            self.record(wallet, role_of(i, count))?;
        }

        self.progress.line(&format!(
            "Funding {} temp wallets with {} ETH each (+{} ETH owner buffer)",
            count,
            format_ether(per_wallet),
            format_ether(owner_buffer)
        ));

        let owner_index = count - 1;
        let owner_amount = per_wallet.saturating_add(owner_buffer);
        let owner = match self
            .fund_one(funder, &wallets[owner_index], owner_amount)
            .await
        {
            Ok(tx) => FundedWallet {
                wallet: wallets[owner_index].clone(),
                role: WalletRole::Owner,
                amount: owner_amount,
                funding_tx: tx,
            },
            Err(reason) => {
                return Err(EngineError::FundingExhausted {
                    reason: format!("owner wallet not funded: {}", reason),
                })
            }
        };

        let mut funded = Vec::with_capacity(count);
        for wallet in &wallets[..owner_index] {
            sleep(self.settings.inter_transfer_delay).await;

            match self.fund_one(funder, wallet, per_wallet).await {
                Ok(tx) => funded.push(FundedWallet {
                    wallet: wallet.clone(),
                    role: WalletRole::Temp,
                    amount: per_wallet,
                    funding_tx: tx,
                }),
                Err(reason) => {
                    warn!(
                        target: DISTRIBUTION_TARGET,
                        "Temp wallet {:?} left unfunded: {}",
                        wallet.address(),
                        reason
                    );
                    self.progress
                        .line(&format!("FAILED funding {:?}: {}", wallet.address(), reason));
                }
            }
        }
        funded.push(owner);

        if funded.len() < count {
            warn!(
                target: DISTRIBUTION_TARGET,
                "Degraded run: {}/{} temp wallets funded",
                funded.len(),
                count
            );
        }
        self.progress
            .line(&format!("{}/{} temp wallets funded", funded.len(), count));

        Ok(funded)
    }

    fn record(&self, wallet: &Wallet, role: WalletRole) -> EngineResult<()> {
        if let Some(audit) = &self.audit {
            audit.append(wallet, role)?;
        }
        Ok(())
    }

    /// A transfer is retried only when it definitely did not land; an
    /// unconfirmed one is given up on to avoid double funding.
    async fn fund_one(&self, funder: &Wallet, wallet: &Wallet, amount: U256) -> Result<H256, String> {
        let payload = TxPayload::transfer(wallet.address(), amount);
        let attempts = self.settings.policy.attempts();
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let result = self
                .submitter
                .submit(funder, &payload, self.settings.timeout)
                .await;

            match &result.status {
                SubmissionStatus::Confirmed(receipt) => {
                    info!(
                        target: DISTRIBUTION_TARGET,
                        "Funded {:?} with {} ETH ({:?})",
                        wallet.address(),
                        format_ether(amount),
                        receipt.tx_hash
                    );
                    return Ok(receipt.tx_hash);
                }
                SubmissionStatus::Unconfirmed { .. } | SubmissionStatus::RejectedInsufficientFunds { .. } => {
                    return Err(result.error_message().unwrap_or_default());
                }
                SubmissionStatus::Failed { last_error: e } => last_error = e.clone(),
            }

            if attempt < attempts {
                sleep(self.settings.policy.delay_for(attempt - 1)).await;
            }
        }

        Err(last_error)
    }
}

fn role_of(index: usize, count: usize) -> WalletRole {
    if index + 1 == count {
        WalletRole::Owner
    } else {
        WalletRole::Temp
    }
}
