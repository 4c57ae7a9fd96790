//! Switching and adding chains

use crate::utils::{ALICE, DAPP, OTHER_DAPP, TestBridge, assert_no_event, error_code, next_event};
use provider_bridge::{Approval, Decision};
use provider_bridge_core::{HexChainId, MethodKind, event::ProviderEvent};
use provider_bridge_rpc::error::ErrorCode;
use serde_json::{Value, json};

#[tokio::test(flavor = "multi_thread")]
async fn switch_to_unknown_chain_leaves_state_unchanged() {
    let bridge = TestBridge::builder().with_grant(DAPP, ALICE, 1).spawn();
    let (provider, mut events) = bridge.page(DAPP).await;

    let err = provider
        .request("wallet_switchEthereumChain", json!([{"chainId": "0x999"}]))
        .await
        .unwrap_err();
    assert_eq!(error_code(err), ErrorCode::UnrecognizedChain);

    assert_eq!(provider.request("eth_chainId", Value::Null).await.unwrap(), json!("0x1"));
    assert_eq!(bridge.api.chains().active(), 1);
    assert_eq!(bridge.api.store().get(DAPP).unwrap().chain_id, 1);
    assert_no_event(&mut events).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn switch_chain_notifies_pages() {
    let bridge = TestBridge::builder().with_grant(DAPP, ALICE, 1).spawn();
    let (provider, mut events) = bridge.page(DAPP).await;
    let (other, mut other_events) = bridge.page(OTHER_DAPP).await;

    let res = provider
        .request("wallet_switchEthereumChain", json!([{"chainId": "0x89"}]))
        .await
        .unwrap();
    assert_eq!(res, Value::Null);
    assert_eq!(next_event(&mut events).await, ProviderEvent::ChainChanged(HexChainId(137)));
    assert_eq!(provider.request("eth_chainId", Value::Null).await.unwrap(), json!("0x89"));
    assert_eq!(provider.request("net_version", Value::Null).await.unwrap(), json!("137"));
    assert_eq!(bridge.api.chains().active(), 137);

    // unconnected pages follow the wallet's active chain
    assert_eq!(next_event(&mut other_events).await, ProviderEvent::ChainChanged(HexChainId(137)));
    assert_eq!(other.request("eth_chainId", Value::Null).await.unwrap(), json!("0x89"));
    assert_no_event(&mut events).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn unconnected_site_cannot_switch() {
    let bridge = TestBridge::spawn();
    let (provider, _events) = bridge.page(DAPP).await;

    let err = provider
        .request("wallet_switchEthereumChain", json!([{"chainId": "0x89"}]))
        .await
        .unwrap_err();
    assert_eq!(error_code(err), ErrorCode::Unauthorized);
    assert_eq!(bridge.api.chains().active(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn add_chain_is_approved_and_does_not_switch() {
    let bridge = TestBridge::builder().with_grant(DAPP, ALICE, 1).spawn();
    let (provider, _events) = bridge.page(DAPP).await;

    let request = tokio::spawn({
        let provider = provider.clone();
        async move {
            let params = json!([{
                "chainId": "0x999",
                "chainName": "Testnet",
                "rpcUrls": ["https://rpc.testnet.example"],
                "nativeCurrency": {"name": "Test Ether", "symbol": "TST", "decimals": 18}
            }]);
            provider.request("wallet_addEthereumChain", params).await
        }
    });
    let case = bridge.presented().await;
    assert_eq!(case.request.kind, MethodKind::AddChain);
    bridge.api.approvals().decide(case.id, Decision::Approve(Approval::default())).unwrap();
    assert_eq!(request.await.unwrap().unwrap(), Value::Null);

    let chain = bridge.api.chains().get(0x999).unwrap();
    assert_eq!(chain.name, "Testnet");
    assert_eq!(chain.symbol, "TST");
    assert_eq!(bridge.api.chains().active(), 1);

    provider.request("wallet_switchEthereumChain", json!([{"chainId": "0x999"}])).await.unwrap();
    assert_eq!(provider.request("eth_chainId", Value::Null).await.unwrap(), json!("0x999"));
}

#[tokio::test(flavor = "multi_thread")]
async fn add_chain_fails_if_disconnected_while_presented() {
    let bridge = TestBridge::builder().with_grant(DAPP, ALICE, 1).spawn();
    let (provider, _events) = bridge.page(DAPP).await;

    let request = tokio::spawn({
        let provider = provider.clone();
        async move {
            let params = json!([{"chainId": "0x999", "rpcUrls": ["https://rpc.testnet.example"]}]);
            provider.request("wallet_addEthereumChain", params).await
        }
    });
    let case = bridge.presented().await;
    bridge.api.store().disconnect(DAPP).unwrap();
    bridge.api.approvals().decide(case.id, Decision::Approve(Approval::default())).unwrap();

    assert_eq!(error_code(request.await.unwrap().unwrap_err()), ErrorCode::Unauthorized);
    assert!(!bridge.api.chains().contains(0x999));
}

#[tokio::test(flavor = "multi_thread")]
async fn adding_known_chain_is_a_noop() {
    let bridge = TestBridge::builder().with_grant(DAPP, ALICE, 1).spawn();
    let (provider, _events) = bridge.page(DAPP).await;

    let params = json!([{"chainId": "0x89", "rpcUrls": ["https://polygon.example"]}]);
    assert_eq!(provider.request("wallet_addEthereumChain", params).await.unwrap(), Value::Null);
    assert!(bridge.api.approvals().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn add_chain_needs_an_http_rpc_url() {
    let bridge = TestBridge::builder().with_grant(DAPP, ALICE, 1).spawn();
    let (provider, _events) = bridge.page(DAPP).await;

    for urls in [json!([]), json!(["ftp://rpc.example"]), json!(["not a url"])] {
        let params = json!([{"chainId": "0x999", "rpcUrls": urls}]);
        let err = provider.request("wallet_addEthereumChain", params).await.unwrap_err();
        assert_eq!(error_code(err), ErrorCode::InvalidParams);
    }
    assert!(!bridge.api.chains().contains(0x999));
}
