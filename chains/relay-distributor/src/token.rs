//! ERC-20 reads plus approve, swap and add-liquidity flows, all driven by
//! hand-built calldata and sent through the gas-adaptive submitter.

use crate::calldata::{
    build_add_liquidity_calldata, build_allowance_calldata, build_approve_calldata,
    build_balance_of_calldata, build_multicall_calldata, build_swap_calldata,
    decode_uint256_return, AddLiquidityParams, CalldataFrame, SwapParams,
};
use crate::config::PoolConfig;
use crate::error::{EngineError, EngineResult};
use crate::rpc::ChainRpc;
use crate::submitter::{GasAdaptiveSubmitter, SubmissionResult, TxPayload};
use crate::wallet::Wallet;
use core_logic::{ConfigError, DISTRIBUTION_TARGET};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, TransactionRequest, U256};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

async fn read_uint(rpc: &dyn ChainRpc, to: Address, frame: CalldataFrame) -> EngineResult<U256> {
    let tx: TypedTransaction = TransactionRequest::new().to(to).data(frame).into();
    let data = rpc.call(&tx).await?;
    Ok(decode_uint256_return(&data)?)
}

pub async fn balance_of(rpc: &dyn ChainRpc, token: Address, owner: Address) -> EngineResult<U256> {
    read_uint(rpc, token, build_balance_of_calldata(owner)).await
}

pub async fn allowance(
    rpc: &dyn ChainRpc,
    token: Address,
    owner: Address,
    spender: Address,
) -> EngineResult<U256> {
    read_uint(rpc, token, build_allowance_calldata(owner, spender)).await
}

fn confirmed(result: SubmissionResult, what: &str) -> EngineResult<SubmissionResult> {
    if result.is_confirmed() {
        return Ok(result);
    }
    let reason = result
        .error_message()
        .unwrap_or_else(|| format!("{} not confirmed", what));
    Err(EngineError::SubmissionFailed {
        operation: what.to_string(),
        reason,
    })
}

/// Minimum out after `slippage_bps` (1 bp = 0.01%).
pub fn apply_slippage(amount: U256, slippage_bps: u32) -> U256 {
    let keep = 10_000u64.saturating_sub(slippage_bps as u64);
    amount.saturating_mul(U256::from(keep)) / 10_000
}

pub struct TokenFlows<'a> {
    submitter: &'a GasAdaptiveSubmitter,
    timeout: Duration,
    settle_delay: Duration,
}

impl<'a> TokenFlows<'a> {
    pub fn new(submitter: &'a GasAdaptiveSubmitter, timeout: Duration, settle_delay: Duration) -> Self {
        Self {
            submitter,
            timeout,
            settle_delay,
        }
    }

    fn rpc(&self) -> &dyn ChainRpc {
        self.submitter.rpc().as_ref()
    }

    /// Approves only when the current allowance is short, then waits for the
    /// chain to settle and re-reads it.
    pub async fn ensure_allowance(
        &self,
        wallet: &Wallet,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> EngineResult<U256> {
        let current = allowance(self.rpc(), token, wallet.address(), spender).await?;
        if current >= amount {
            return Ok(current);
        }

        info!(
            target: DISTRIBUTION_TARGET,
            "Approving {:?} to spend {} of {:?}", spender, amount, token
        );
        let payload = TxPayload::call(token, build_approve_calldata(spender, amount), U256::zero());
        let result = self.submitter.submit(wallet, &payload, self.timeout).await;
        confirmed(result, "approve")?;

        sleep(self.settle_delay).await;

        let updated = allowance(self.rpc(), token, wallet.address(), spender).await?;
        if updated < amount {
            warn!(
                target: DISTRIBUTION_TARGET,
                "Allowance still {} after approve (wanted {})", updated, amount
            );
        }
        Ok(updated)
    }

    /// `exactInputSingle` wrapped in `multicall(deadline, [..])` on the
    /// pool's router.
    pub async fn swap(
        &self,
        wallet: &Wallet,
        pool: &PoolConfig,
        amount_in: U256,
        amount_out_minimum: U256,
        now_secs: u64,
    ) -> EngineResult<SubmissionResult> {
        let balance = balance_of(self.rpc(), pool.token_in, wallet.address()).await?;
        if balance < amount_in {
            return Err(EngineError::InsufficientFunds {
                balance,
                required: amount_in,
            });
        }

        self.ensure_allowance(wallet, pool.token_in, pool.router, amount_in)
            .await?;

        let inner = build_swap_calldata(&SwapParams {
            token_in: pool.token_in,
            token_out: pool.token_out,
            fee_tier: pool.fee_tier,
            recipient: wallet.address(),
            amount_in,
            amount_out_minimum,
            sqrt_price_limit_x96: U256::zero(),
        })?;
        let deadline = U256::from(now_secs.saturating_add(pool.deadline_secs));
        let outer = build_multicall_calldata(deadline, &[inner.to_bytes()]);

        let payload = TxPayload::call(pool.router, outer, U256::zero());
        let result = self.submitter.submit(wallet, &payload, self.timeout).await;
        confirmed(result, "swap")
    }

    /// V2 `addLiquidity` for the pool's token pair, approving both sides.
    pub async fn add_liquidity(
        &self,
        wallet: &Wallet,
        pool: &PoolConfig,
        amount_a: U256,
        amount_b: U256,
        now_secs: u64,
    ) -> EngineResult<SubmissionResult> {
        let router = pool.v2_router.ok_or_else(|| ConfigError::MissingField {
            field: "pools.<name>.v2_router".to_string(),
        })?;

        self.ensure_allowance(wallet, pool.token_in, router, amount_a)
            .await?;
        self.ensure_allowance(wallet, pool.token_out, router, amount_b)
            .await?;

        let frame = build_add_liquidity_calldata(&AddLiquidityParams {
            token_a: pool.token_in,
            token_b: pool.token_out,
            amount_a_desired: amount_a,
            amount_b_desired: amount_b,
            amount_a_min: apply_slippage(amount_a, pool.slippage_bps),
            amount_b_min: apply_slippage(amount_b, pool.slippage_bps),
            to: wallet.address(),
            deadline: U256::from(now_secs.saturating_add(pool.deadline_secs)),
        });

        let payload = TxPayload::call(router, frame, U256::zero());
        let result = self.submitter.submit(wallet, &payload, self.timeout).await;
        confirmed(result, "addLiquidity")
    }
}
