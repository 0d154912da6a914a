mod common;

use common::{eth, funder, short_timeout, submitter, timeout, Behaviour, MockChain};
use ethers::types::{Address, U256};
use relay_distributor::calldata::{build_distribute_calldata, selector, SIG_DISTRIBUTE};
use relay_distributor::gas::GasRung;
use relay_distributor::submitter::{AttemptOutcome, SubmissionStatus, TxPayload};
use relay_distributor::Wallet;

const CONTRACT: [u8; 20] = [0xd1; 20];

fn distribute_payload(recipient: Address, value: U256) -> TxPayload {
    TxPayload::call(
        Address::from(CONTRACT),
        build_distribute_calldata(recipient),
        value,
    )
}

#[tokio::test]
async fn test_transfer_confirms_on_first_rung() {
    let chain = MockChain::new();
    let from = funder();
    chain.fund(from.address(), eth("10"));
    let recipient = Address::from([0x11; 20]);

    let result = submitter(&chain)
        .submit(&from, &TxPayload::transfer(recipient, eth("1")), timeout())
        .await;

    assert!(result.is_confirmed(), "{:?}", result.status);
    assert_eq!(result.multipliers(), vec![1.0]);
    assert_eq!(result.attempts[0].gas_limit, U256::from(21_000));
    assert!(result.attempts[0].gas_estimated);
    assert_eq!(result.attempts[0].outcome, AttemptOutcome::Confirmed);
    assert_eq!(chain.balance(recipient), eth("1"));
    assert_eq!(chain.sent().len(), 1);
}

#[tokio::test]
async fn test_reverts_walk_the_whole_ladder_then_fresh_estimate() {
    let chain = MockChain::new();
    let from = funder();
    chain.fund(from.address(), eth("10"));
    chain.on(selector(SIG_DISTRIBUTE), Behaviour::Revert);

    let result = submitter(&chain)
        .submit(&from, &distribute_payload(Address::from([0x22; 20]), U256::zero()), timeout())
        .await;

    assert!(matches!(result.status, SubmissionStatus::Failed { .. }));
    assert_eq!(
        result.multipliers(),
        vec![1.0, 1.1, 1.2, 1.4, 1.6, 1.8, 2.0]
    );
    assert_eq!(result.attempts.len(), 8);
    assert_eq!(result.attempts[7].rung, GasRung::FreshEstimate);

    let gas: Vec<u64> = chain.sent().iter().map(|tx| tx.gas.as_u64()).collect();
    assert_eq!(
        gas,
        vec![60_000, 66_000, 72_000, 84_000, 96_000, 108_000, 120_000, 60_000]
    );

    // one nonce per mined attempt
    let nonces: Vec<u64> = chain.sent().iter().map(|tx| tx.nonce.as_u64()).collect();
    assert_eq!(nonces, (0..8).collect::<Vec<u64>>());
    assert!(result.error_message().unwrap().contains("reverted"));
}

#[tokio::test]
async fn test_second_revert_then_success_stops_escalating() {
    let chain = MockChain::new();
    let from = funder();
    chain.fund(from.address(), eth("10"));
    chain.on_times(selector(SIG_DISTRIBUTE), Behaviour::Revert, 2);
    let recipient = Address::from([0x33; 20]);

    let result = submitter(&chain)
        .submit(&from, &distribute_payload(recipient, eth("0.5")), timeout())
        .await;

    assert!(result.is_confirmed());
    assert_eq!(result.multipliers(), vec![1.0, 1.1, 1.2]);
    assert_eq!(
        result
            .attempts
            .iter()
            .map(|a| a.outcome)
            .collect::<Vec<_>>(),
        vec![
            AttemptOutcome::Reverted,
            AttemptOutcome::Reverted,
            AttemptOutcome::Confirmed
        ]
    );
    assert_eq!(chain.balance(recipient), eth("0.5"));
}

#[tokio::test]
async fn test_insufficient_funds_never_sends() {
    let chain = MockChain::new();
    let poor = Wallet::generate();
    chain.fund(poor.address(), U256::from(1_000));

    let result = submitter(&chain)
        .submit(
            &poor,
            &TxPayload::transfer(Address::from([0x44; 20]), eth("1")),
            timeout(),
        )
        .await;

    match result.status {
        SubmissionStatus::RejectedInsufficientFunds { balance, required } => {
            assert_eq!(balance, U256::from(1_000));
            assert!(required > eth("1"));
        }
        other => panic!("expected rejection, got {:?}", other),
    }
    assert!(chain.sent().is_empty());
    assert_eq!(result.attempts.len(), 1);
    assert!(result.tx_hash().is_none());
}

#[tokio::test]
async fn test_estimate_failure_falls_back_to_default_limit() {
    let chain = MockChain::new();
    let from = funder();
    chain.fund(from.address(), eth("10"));
    chain.fail_estimates(selector(SIG_DISTRIBUTE));

    let result = submitter(&chain)
        .submit(&from, &distribute_payload(Address::from([0x55; 20]), U256::zero()), timeout())
        .await;

    assert!(result.is_confirmed());
    assert_eq!(result.attempts[0].gas_limit, U256::from(500_000));
    assert!(!result.attempts[0].gas_estimated);
    assert_eq!(chain.sent()[0].gas, U256::from(500_000));
}

#[tokio::test]
async fn test_deploy_estimate_failure_uses_deploy_limit() {
    let chain = MockChain::new();
    let from = funder();
    chain.fund(from.address(), eth("10"));
    chain.fail_estimates(common::DISTRIBUTOR_CODE);

    let result = submitter(&chain)
        .submit(&from, &TxPayload::deploy(common::DISTRIBUTOR_CODE.to_vec()), timeout())
        .await;

    assert!(result.is_confirmed());
    assert_eq!(result.attempts[0].gas_limit, U256::from(3_000_000));
    assert!(result.receipt().unwrap().contract_address.is_some());
}

#[tokio::test]
async fn test_timeout_is_unconfirmed_not_reverted() {
    let chain = MockChain::new();
    let from = funder();
    chain.fund(from.address(), eth("10"));
    chain.on(selector(SIG_DISTRIBUTE), Behaviour::NeverMined);

    let result = submitter(&chain)
        .submit(&from, &distribute_payload(Address::from([0x66; 20]), U256::zero()), short_timeout())
        .await;

    match &result.status {
        SubmissionStatus::Unconfirmed { tx_hash, .. } => {
            assert_eq!(*tx_hash, chain.sent()[0].hash);
        }
        other => panic!("expected unconfirmed, got {:?}", other),
    }
    // no escalation: the pending nonce may still land
    assert_eq!(chain.sent().len(), 1);
    assert_eq!(result.attempts[0].outcome, AttemptOutcome::TimedOut);
    assert!(result.error_message().unwrap().contains("No receipt"));
}

#[tokio::test]
async fn test_receipt_errors_end_as_unconfirmed() {
    let chain = MockChain::new();
    let from = funder();
    chain.fund(from.address(), eth("10"));
    chain.fail_receipt_queries(3);

    let result = submitter(&chain)
        .submit(&from, &TxPayload::transfer(Address::from([0x77; 20]), eth("1")), timeout())
        .await;

    assert!(matches!(result.status, SubmissionStatus::Unconfirmed { .. }));
    assert_eq!(chain.sent().len(), 1);
}

#[tokio::test]
async fn test_send_transport_errors_are_retried_within_rung() {
    let chain = MockChain::new();
    let from = funder();
    chain.fund(from.address(), eth("10"));
    chain.on_times(selector(SIG_DISTRIBUTE), Behaviour::SendError, 2);

    let result = submitter(&chain)
        .submit(&from, &distribute_payload(Address::from([0x88; 20]), U256::zero()), timeout())
        .await;

    assert!(result.is_confirmed());
    assert_eq!(result.multipliers(), vec![1.0]);
    assert_eq!(chain.sent().len(), 1);
}

#[tokio::test]
async fn test_fresh_estimate_unavailable_fails() {
    let chain = MockChain::new();
    let from = funder();
    chain.fund(from.address(), eth("10"));
    chain.on(selector(SIG_DISTRIBUTE), Behaviour::Revert);
    chain.fail_estimates(selector(SIG_DISTRIBUTE));

    let result = submitter(&chain)
        .submit(&from, &distribute_payload(Address::from([0x99; 20]), U256::zero()), timeout())
        .await;

    assert!(matches!(result.status, SubmissionStatus::Failed { .. }));
    assert_eq!(chain.sent().len(), 7);
    assert!(result
        .error_message()
        .unwrap()
        .contains("fresh estimate unavailable"));
}

#[tokio::test]
async fn test_lost_send_response_is_not_paid_twice() {
    let chain = MockChain::new();
    let from = funder();
    chain.fund(from.address(), eth("10"));
    let recipient = Address::from([0xab; 20]);
    chain.on_times(b"", Behaviour::ResponseLost, 1);

    let result = submitter(&chain)
        .submit(&from, &TxPayload::transfer(recipient, eth("1")), timeout())
        .await;

    assert!(result.is_confirmed(), "{:?}", result.status);
    assert_eq!(result.multipliers(), vec![1.0]);
    assert_eq!(chain.sent().len(), 1);
    assert_eq!(result.tx_hash(), Some(chain.sent()[0].hash));
    assert_eq!(chain.balance(recipient), eth("1"));
    assert_eq!(chain.nonce(from.address()), U256::one());
}

#[tokio::test]
async fn test_lost_send_response_with_unreadable_receipt_stays_unconfirmed() {
    let chain = MockChain::new();
    let from = funder();
    chain.fund(from.address(), eth("10"));
    let recipient = Address::from([0xac; 20]);
    chain.on_times(b"", Behaviour::ResponseLost, 1);
    // the node keeps failing receipt lookups after the lost response
    chain.fail_receipt_queries(1_000);

    let result = submitter(&chain)
        .submit(&from, &TxPayload::transfer(recipient, eth("1")), short_timeout())
        .await;

    match &result.status {
        SubmissionStatus::Unconfirmed { tx_hash, .. } => {
            assert_eq!(*tx_hash, chain.sent()[0].hash);
        }
        other => panic!("expected unconfirmed, got {:?}", other),
    }
    assert_eq!(chain.sent().len(), 1);
}

#[tokio::test]
async fn test_refused_sends_escalate_without_reaching_the_pool() {
    let chain = MockChain::new();
    let from = funder();
    chain.fund(from.address(), eth("10"));
    chain.on(selector(SIG_DISTRIBUTE), Behaviour::SendError);

    let result = submitter(&chain)
        .submit(&from, &distribute_payload(Address::from([0xad; 20]), U256::zero()), timeout())
        .await;

    assert!(matches!(result.status, SubmissionStatus::Failed { .. }));
    assert_eq!(result.attempts.len(), 8);
    assert!(result
        .attempts
        .iter()
        .all(|a| a.outcome == AttemptOutcome::TransportFailed && a.tx_hash.is_none()));
    assert!(chain.sent().is_empty());
    assert_eq!(chain.nonce(from.address()), U256::zero());
}
