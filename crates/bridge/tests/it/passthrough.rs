//! Chain RPC passthrough

use crate::utils::{ALICE, DAPP, TestBridge};
use provider_bridge::ProviderError;
use provider_bridge_rpc::{
    error::{ErrorCode, RpcError},
    request::{JsonRpcPayload, RequestParams},
};
use serde_json::{Value, json};

#[tokio::test(flavor = "multi_thread")]
async fn relays_result_verbatim() {
    let bridge = TestBridge::spawn();
    bridge.forwarder.respond("eth_getBalance", Ok(json!("0xde0b6b3a7640000")));
    let (provider, _events) = bridge.page(DAPP).await;

    let params = json!([ALICE, "latest"]);
    let balance = provider.request("eth_getBalance", params.clone()).await.unwrap();
    assert_eq!(balance, json!("0xde0b6b3a7640000"));
    assert_eq!(bridge.forwarder.calls(), vec![(1, "eth_getBalance".to_string(), params)]);
}

#[tokio::test(flavor = "multi_thread")]
async fn relays_network_errors() {
    let bridge = TestBridge::spawn();
    let reverted = RpcError::with_message(ErrorCode::ServerError(3), "execution reverted")
        .with_data(json!("0x08c379a0"));
    bridge.forwarder.respond("eth_call", Err(reverted.clone()));
    let (provider, _events) = bridge.page(DAPP).await;

    let err = provider.request("eth_call", json!([{"to": ALICE}, "latest"])).await.unwrap_err();
    match err {
        ProviderError::Rpc(err) => similar_asserts::assert_eq!(err, reverted),
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn forwards_to_the_site_chain() {
    let bridge = TestBridge::builder().with_grant(DAPP, ALICE, 137).spawn();
    bridge.forwarder.respond("eth_blockNumber", Ok(json!("0x10")));
    let (provider, _events) = bridge.page(DAPP).await;

    assert_eq!(provider.request("eth_blockNumber", Value::Null).await.unwrap(), json!("0x10"));
    assert_eq!(bridge.forwarder.calls()[0].0, 137);
}

#[tokio::test(flavor = "multi_thread")]
async fn legacy_send_async_replies_with_json_rpc() {
    let bridge = TestBridge::spawn();
    bridge.forwarder.respond("eth_blockNumber", Ok(json!("0x10")));
    let (provider, _events) = bridge.page(DAPP).await;

    let payload = JsonRpcPayload {
        jsonrpc: "2.0".to_string(),
        id: json!(42),
        method: "eth_blockNumber".to_string(),
        params: RequestParams::None,
    };
    let reply = provider.send_async(payload).await;
    assert_eq!(
        serde_json::to_value(&reply).unwrap(),
        json!({"jsonrpc": "2.0", "id": 42, "result": "0x10"})
    );

    let payload: JsonRpcPayload =
        serde_json::from_value(json!({"id": 43, "method": "eth_sign_nothing"})).unwrap();
    let reply = provider.send_async(payload).await;
    assert_eq!(reply.id, json!(43));
    assert_eq!(reply.error.unwrap().code, ErrorCode::UnsupportedMethod);

    assert_eq!(provider.send("eth_chainId", json!([])).await.unwrap(), json!("0x1"));
}
