//! Signing requests

use crate::utils::{ALICE, BOB, DAPP, MockSigner, TestBridge, error_code};
use alloy_primitives::{Bytes, U256};
use provider_bridge::{Approval, ApprovalError, Decision};
use provider_bridge_core::{MethodKind, RiskLevel};
use provider_bridge_rpc::error::ErrorCode;
use serde_json::json;
use std::time::Duration;

const TOKEN: &str = "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48";

/// `approve(BOB, type(uint256).max)`
const UNLIMITED_APPROVE: &str = "0x095ea7b30000000000000000000000003c44cdddb6a900fa2b585dd299e03d12fa4293bcffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff";

#[tokio::test(flavor = "multi_thread")]
async fn mismatched_account_is_refused_without_a_case() {
    let bridge = TestBridge::builder().with_grant(DAPP, ALICE, 1).spawn();
    let (provider, _events) = bridge.page(DAPP).await;

    let err = provider.request("personal_sign", json!(["0x68656c6c6f", BOB])).await.unwrap_err();
    assert_eq!(error_code(err), ErrorCode::Unauthorized);

    let tx = json!([{"from": BOB, "to": ALICE, "value": "0x1"}]);
    let err = provider.request("eth_sendTransaction", tx).await.unwrap_err();
    assert_eq!(error_code(err), ErrorCode::Unauthorized);

    assert!(bridge.api.approvals().cases().is_empty());
    assert!(bridge.signer.signed().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn unconnected_site_cannot_sign() {
    let bridge = TestBridge::spawn();
    let (provider, _events) = bridge.page(DAPP).await;

    let err = provider.request("personal_sign", json!(["0x68656c6c6f", ALICE])).await.unwrap_err();
    assert_eq!(error_code(err), ErrorCode::Unauthorized);
    assert!(bridge.api.approvals().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_signing_requests_are_invalid() {
    let bridge = TestBridge::builder().with_grant(DAPP, ALICE, 1).spawn();
    let (provider, _events) = bridge.page(DAPP).await;

    // no sender
    let err = provider.request("eth_sendTransaction", json!([{"to": BOB}])).await.unwrap_err();
    assert_eq!(error_code(err), ErrorCode::InvalidParams);

    // bound to a chain the site isn't on
    let tx = json!([{"from": ALICE, "to": BOB, "chainId": "0x89"}]);
    let err = provider.request("eth_sendTransaction", tx).await.unwrap_err();
    assert_eq!(error_code(err), ErrorCode::InvalidParams);

    let err = provider.request("personal_sign", json!("0x68656c6c6f")).await.unwrap_err();
    assert_eq!(error_code(err), ErrorCode::InvalidParams);

    assert!(bridge.api.approvals().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn approved_message_is_signed_with_granted_account() {
    let bridge = TestBridge::builder().with_grant(DAPP, ALICE, 1).spawn();
    let (provider, _events) = bridge.page(DAPP).await;

    let request = tokio::spawn({
        let provider = provider.clone();
        async move { provider.request("personal_sign", json!(["0x68656c6c6f", ALICE])).await }
    });
    let case = bridge.presented().await;
    assert_eq!(case.request.kind, MethodKind::SignMessage);
    assert_eq!(case.request.verdict.level, RiskLevel::Safe);
    bridge.api.approvals().decide(case.id, Decision::Approve(Approval::default())).unwrap();

    let signature = request.await.unwrap().unwrap();
    assert_eq!(signature, json!(MockSigner::message_signature(ALICE, b"hello")));
    assert_eq!(bridge.signer.signed().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_signature_is_never_signed() {
    let bridge = TestBridge::builder().with_grant(DAPP, ALICE, 1).spawn();
    let (provider, _events) = bridge.page(DAPP).await;

    let request = tokio::spawn({
        let provider = provider.clone();
        async move { provider.request("eth_sign", json!([ALICE, "0x68656c6c6f"])).await }
    });
    let case = bridge.presented().await;
    bridge.api.approvals().decide(case.id, Decision::Reject).unwrap();

    assert_eq!(error_code(request.await.unwrap().unwrap_err()), ErrorCode::UserRejected);
    assert!(bridge.signer.signed().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_signatures_resolve_to_their_own_calls() {
    let bridge = TestBridge::builder().with_grant(DAPP, ALICE, 1).spawn();
    // keeps the transaction's case from being created until the message's case is decided
    bridge.reputation.delay_simulations(Duration::from_millis(300));
    let (provider, _events) = bridge.page(DAPP).await;

    let a = tokio::spawn({
        let provider = provider.clone();
        async move {
            let tx = json!([{"from": ALICE, "to": BOB, "value": "0x1"}]);
            provider.request("eth_sendTransaction", tx).await
        }
    });
    let b = tokio::spawn({
        let provider = provider.clone();
        async move { provider.request("personal_sign", json!(["0x68656c6c6f", ALICE])).await }
    });

    let first = bridge.presented().await;
    assert_eq!(first.request.method, "personal_sign");
    bridge.api.approvals().decide(first.id, Decision::Approve(Approval::default())).unwrap();

    let second = bridge.presented_after(Some(first.id)).await;
    assert_eq!(second.request.method, "eth_sendTransaction");
    assert_ne!(first.request.call_id, second.request.call_id);
    bridge.api.approvals().decide(second.id, Decision::Approve(Approval::default())).unwrap();

    let b = b.await.unwrap().unwrap();
    let a = a.await.unwrap().unwrap();
    assert_eq!(b, json!(MockSigner::message_signature(ALICE, b"hello")));
    assert_eq!(a, json!(Bytes::from(U256::from(1).to_be_bytes_vec())));
    assert_eq!(provider.pending_calls(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn unlimited_approval_needs_acknowledgement() {
    let bridge = TestBridge::builder().with_grant(DAPP, ALICE, 1).spawn();
    let (provider, _events) = bridge.page(DAPP).await;

    let request = tokio::spawn({
        let provider = provider.clone();
        async move {
            let tx = json!([{"from": ALICE, "to": TOKEN, "data": UNLIMITED_APPROVE}]);
            provider.request("eth_sendTransaction", tx).await
        }
    });
    let case = bridge.presented().await;
    let level = case.request.verdict.level;
    assert!(level >= RiskLevel::Danger, "{:?}", case.request.verdict);
    assert!(!case.request.verdict.findings.is_empty());

    let queue = bridge.api.approvals();
    assert_eq!(
        queue.decide(case.id, Decision::Approve(Approval::default())),
        Err(ApprovalError::AcknowledgementRequired(case.id, level))
    );
    queue.decide(case.id, Decision::Approve(Approval::default().acknowledged())).unwrap();
    request.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn typed_data_may_be_sent_as_string() {
    let bridge = TestBridge::builder().with_grant(DAPP, ALICE, 1).spawn();
    let (provider, _events) = bridge.page(DAPP).await;

    let typed_data = json!({
        "types": {
            "EIP712Domain": [{"name": "name", "type": "string"}, {"name": "chainId", "type": "uint256"}],
            "Mail": [{"name": "contents", "type": "string"}]
        },
        "primaryType": "Mail",
        "domain": {"name": "Mailbox", "chainId": 1},
        "message": {"contents": "hello"}
    });
    let request = tokio::spawn({
        let provider = provider.clone();
        async move {
            provider
                .request("eth_signTypedData_v4", json!([ALICE, typed_data.to_string()]))
                .await
        }
    });
    let case = bridge.presented().await;
    assert_eq!(case.request.kind, MethodKind::SignTypedData);
    bridge.api.approvals().decide(case.id, Decision::Approve(Approval::default())).unwrap();
    assert_eq!(request.await.unwrap().unwrap(), json!(Bytes::from(ALICE.to_vec())));
}
