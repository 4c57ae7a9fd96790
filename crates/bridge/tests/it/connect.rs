//! Connecting sites

use crate::utils::{ALICE, BOB, DAPP, MALLORY, MockSigner, TestBridge, error_code, next_event};
use provider_bridge::{Approval, ApprovalError, Decision};
use provider_bridge_core::{MethodKind, RiskLevel, event::ProviderEvent};
use provider_bridge_rpc::error::ErrorCode;
use serde_json::{Value, json};

#[tokio::test(flavor = "multi_thread")]
async fn connect_resolves_before_accounts_changed() {
    let bridge = TestBridge::spawn();
    let (provider, mut events) = bridge.page(DAPP).await;

    assert_eq!(provider.request("eth_accounts", Value::Null).await.unwrap(), json!([]));

    let request = tokio::spawn({
        let provider = provider.clone();
        async move { provider.request("eth_requestAccounts", json!([])).await }
    });

    let case = bridge.presented().await;
    assert_eq!(case.request.kind, MethodKind::Connect);
    assert_eq!(case.request.accounts, vec![ALICE, BOB]);
    // never seen before
    assert_eq!(case.request.verdict.level, RiskLevel::Warning);

    bridge.api.approvals().decide(case.id, Decision::Approve(Approval::account(BOB))).unwrap();
    assert_eq!(request.await.unwrap().unwrap(), json!([BOB]));
    assert_eq!(next_event(&mut events).await, ProviderEvent::AccountsChanged(vec![BOB]));

    assert_eq!(provider.request("eth_accounts", Value::Null).await.unwrap(), json!([BOB]));
    assert_eq!(provider.request("eth_coinbase", Value::Null).await.unwrap(), json!(BOB));
    bridge.queue_drained().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_connect_leaves_site_unconnected() {
    let bridge = TestBridge::spawn();
    let (provider, _events) = bridge.page(DAPP).await;

    let request = tokio::spawn({
        let provider = provider.clone();
        async move { provider.enable().await }
    });
    let case = bridge.presented().await;
    bridge.api.approvals().decide(case.id, Decision::Reject).unwrap();

    let err = request.await.unwrap().unwrap_err();
    assert_eq!(error_code(err), ErrorCode::UserRejected);
    assert!(!bridge.api.store().is_connected(DAPP));
    assert_eq!(provider.request("eth_accounts", Value::Null).await.unwrap(), json!([]));
}

#[tokio::test(flavor = "multi_thread")]
async fn connect_needs_an_offered_account() {
    let bridge = TestBridge::spawn();
    let (provider, _events) = bridge.page(DAPP).await;

    let request = tokio::spawn({
        let provider = provider.clone();
        async move { provider.request("eth_requestAccounts", Value::Null).await }
    });
    let case = bridge.presented().await;
    let queue = bridge.api.approvals();

    assert_eq!(
        queue.decide(case.id, Decision::Approve(Approval::default())),
        Err(ApprovalError::AccountRequired)
    );
    assert_eq!(
        queue.decide(case.id, Decision::Approve(Approval::account(MALLORY))),
        Err(ApprovalError::UnknownAccount(MALLORY))
    );
    // still waiting for a valid decision
    assert_eq!(queue.presented().map(|case| case.id), Some(case.id));

    queue.decide(case.id, Decision::Approve(Approval::account(ALICE))).unwrap();
    assert_eq!(request.await.unwrap().unwrap(), json!([ALICE]));
}

#[tokio::test(flavor = "multi_thread")]
async fn connected_site_gets_accounts_without_prompt() {
    let bridge = TestBridge::builder().with_grant(DAPP, ALICE, 1).spawn();
    let (provider, _events) = bridge.page(DAPP).await;

    assert_eq!(provider.enable().await.unwrap(), vec![ALICE]);
    assert_eq!(provider.request("eth_requestAccounts", Value::Null).await.unwrap(), json!([ALICE]));
    assert!(bridge.api.approvals().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn request_permissions_replies_with_permissions() {
    let bridge = TestBridge::spawn();
    let (provider, _events) = bridge.page(DAPP).await;

    let request = tokio::spawn({
        let provider = provider.clone();
        async move {
            provider.request("wallet_requestPermissions", json!([{"eth_accounts": {}}])).await
        }
    });
    let case = bridge.presented().await;
    bridge.api.approvals().decide(case.id, Decision::Approve(Approval::account(ALICE))).unwrap();

    let permissions = request.await.unwrap().unwrap();
    assert_eq!(permissions[0]["parentCapability"], "eth_accounts");
    assert_eq!(permissions[0]["invoker"], DAPP);

    let current = provider.request("wallet_getPermissions", Value::Null).await.unwrap();
    assert_eq!(current[0]["parentCapability"], "eth_accounts");
}

#[tokio::test(flavor = "multi_thread")]
async fn unsupported_permission_is_invalid() {
    let bridge = TestBridge::spawn();
    let (provider, _events) = bridge.page(DAPP).await;

    let err = provider
        .request("wallet_requestPermissions", json!([{"eth_signTypedData": {}}]))
        .await
        .unwrap_err();
    assert_eq!(error_code(err), ErrorCode::InvalidParams);
    assert!(bridge.api.approvals().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn revoke_disconnects_the_site() {
    let bridge = TestBridge::builder().with_grant(DAPP, ALICE, 1).spawn();
    let (provider, mut events) = bridge.page(DAPP).await;

    let revoked =
        provider.request("wallet_revokePermissions", json!([{"eth_accounts": {}}])).await.unwrap();
    assert_eq!(revoked, Value::Null);
    assert_eq!(next_event(&mut events).await, ProviderEvent::AccountsChanged(vec![]));
    assert_eq!(provider.request("eth_accounts", Value::Null).await.unwrap(), json!([]));

    // revoking again is fine
    provider.request("wallet_revokePermissions", json!([{"eth_accounts": {}}])).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn remembered_site_reconnects_once_without_prompt() {
    let bridge = TestBridge::spawn();
    let (provider, _events) = bridge.page(DAPP).await;

    let request = tokio::spawn({
        let provider = provider.clone();
        async move { provider.enable().await }
    });
    let case = bridge.presented().await;
    bridge
        .api
        .approvals()
        .decide(case.id, Decision::Approve(Approval::account(ALICE).remembered()))
        .unwrap();
    assert_eq!(request.await.unwrap().unwrap(), vec![ALICE]);
    bridge.queue_drained().await;

    provider.request("wallet_revokePermissions", json!([{"eth_accounts": {}}])).await.unwrap();
    assert_eq!(provider.enable().await.unwrap(), vec![ALICE]);
    assert!(bridge.api.approvals().is_empty());

    // the remembered choice was used up
    provider.request("wallet_revokePermissions", json!([{"eth_accounts": {}}])).await.unwrap();
    let request = tokio::spawn({
        let provider = provider.clone();
        async move { provider.enable().await }
    });
    let case = bridge.presented().await;
    bridge.api.approvals().decide(case.id, Decision::Reject).unwrap();
    assert_eq!(error_code(request.await.unwrap().unwrap_err()), ErrorCode::UserRejected);
}

#[tokio::test(flavor = "multi_thread")]
async fn remembered_site_flagged_as_phishing_is_prompted() {
    let bridge = TestBridge::builder().with_signer(MockSigner::new(vec![ALICE])).spawn();
    bridge.api.store().remember(DAPP, ALICE).unwrap();
    bridge.reputation.flag(DAPP);
    let (provider, _events) = bridge.page(DAPP).await;

    let request = tokio::spawn({
        let provider = provider.clone();
        async move { provider.enable().await }
    });
    let case = bridge.presented().await;
    assert_eq!(case.request.verdict.level, RiskLevel::Danger);
    assert_eq!(
        bridge.api.approvals().decide(case.id, Decision::Approve(Approval::account(ALICE))),
        Err(ApprovalError::AcknowledgementRequired(case.id, RiskLevel::Danger))
    );
    bridge
        .api
        .approvals()
        .decide(case.id, Decision::Approve(Approval::account(ALICE).acknowledged()))
        .unwrap();
    assert_eq!(request.await.unwrap().unwrap(), vec![ALICE]);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_connects_keep_one_grant() {
    let bridge = TestBridge::spawn();
    let (first, _first_events) = bridge.page(DAPP).await;
    let (second, _second_events) = bridge.page(DAPP).await;

    let a = tokio::spawn(async move { first.enable().await });
    let case = bridge.presented().await;
    let b = tokio::spawn(async move { second.enable().await });
    bridge.queued(2).await;

    bridge.api.approvals().decide(case.id, Decision::Approve(Approval::account(ALICE))).unwrap();
    let next = bridge.presented_after(Some(case.id)).await;
    bridge.api.approvals().decide(next.id, Decision::Approve(Approval::account(BOB))).unwrap();

    assert_eq!(a.await.unwrap().unwrap(), vec![ALICE]);
    assert_eq!(b.await.unwrap().unwrap(), vec![BOB]);
    // last write wins
    let grants = bridge.api.store().grants();
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].address, BOB);
}
