use std::sync::Arc;

use serde_json::json;

use powerstream_core::codec::JsonResultCodec;
use powerstream_core::event::{AttributeMap, TxEvent, TxResult};
use powerstream_service::{
    RequestId, Router, RpcRequest, ServiceConfig, ServiceContext, SubscriptionRegistry,
};
use powerstream_storage::InMemoryArchive;

fn router() -> Router {
    let ctx = ServiceContext::new(
        ServiceConfig::default(),
        Arc::new(InMemoryArchive::new()),
        Arc::new(JsonResultCodec),
    );
    Router::new(ctx)
}

fn registry(router: &Router) -> &SubscriptionRegistry {
    &router.context().registry
}

fn event(pairs: &[(&str, &str)]) -> TxEvent {
    let mut attrs = AttributeMap::new();
    for (k, v) in pairs {
        attrs.entry(k.to_string()).or_default().push(v.to_string());
    }
    TxEvent::new(150, 0, b"tx", TxResult::default(), attrs)
}

#[tokio::test]
async fn repeated_subscriptions_are_removed_one_at_a_time() {
    let router = router();
    let (mut session, mut rx) = router.open_session();

    for id in 1..=2 {
        let resp = router
            .handle(&mut session, RpcRequest::new(id, "subscribe", json!({ "query": "x=1" })))
            .await;
        assert!(resp.is_ok());
    }
    assert_eq!(registry(&router).count_for("x=1"), 2);

    let resp = router
        .handle(&mut session, RpcRequest::new(3, "unsubscribe", json!({ "query": "x=1" })))
        .await;
    assert_eq!(resp.result, Some(json!({})));
    assert_eq!(registry(&router).count_for("x=1"), 1);
    assert_eq!(session.subscriptions(), 1);

    // the oldest registration went first
    registry(&router).dispatch(&event(&[("x", "1")]));
    assert_eq!(rx.try_recv().unwrap().id, RequestId::Number(2));
    assert!(rx.try_recv().is_err());

    drop(session);
    assert!(registry(&router).is_empty());
}

#[tokio::test]
async fn unsubscribe_with_nothing_registered_is_a_no_op() {
    let router = router();
    let (mut session, _rx) = router.open_session();

    let resp = router
        .handle(&mut session, RpcRequest::new(1, "unsubscribe", json!({ "query": "x=1" })))
        .await;
    assert_eq!(resp.result, Some(json!({})));
    assert!(resp.error.is_none());

    let resp = router
        .handle(&mut session, RpcRequest::new(2, "unsubscribe", json!({ "query": "x=" })))
        .await;
    assert_eq!(resp.error.map(|e| e.code), Some(-32602));
}

#[tokio::test]
async fn identity_is_the_exact_query_text() {
    let router = router();
    let (mut session, _rx) = router.open_session();

    router
        .handle(&mut session, RpcRequest::new(1, "subscribe", json!({ "query": "x=1" })))
        .await;
    router
        .handle(&mut session, RpcRequest::new(2, "unsubscribe", json!({ "query": "x = 1" })))
        .await;
    assert_eq!(registry(&router).count_for("x=1"), 1);

    router
        .handle(&mut session, RpcRequest::new(3, "unsubscribe", json!({ "query": "  x=1  " })))
        .await;
    assert!(registry(&router).is_empty());
}

#[tokio::test]
async fn matching_events_are_pushed_under_the_subscribe_id() {
    let router = router();
    let (mut session, mut rx) = router.open_session();

    let resp = router
        .handle(
            &mut session,
            RpcRequest::new(9, "subscribe", json!({ "query": "transfer.amount>=5000000uscrt" })),
        )
        .await;
    assert_eq!(
        resp.result.unwrap()["ast"],
        json!({ "type": "expr", "key": "transfer.amount", "op": ">=", "value": "5000000uscrt" })
    );

    registry(&router).dispatch(&event(&[("transfer.amount", "6000000uatom")]));
    registry(&router).dispatch(&event(&[("transfer.amount", "6000000uscrt")]));

    let push = rx.try_recv().unwrap();
    assert_eq!(push.id, RequestId::Number(9));
    assert_eq!(push.result["query"], json!("transfer.amount>=5000000uscrt"));
    assert_eq!(push.result["events"]["transfer.amount"], json!(["6000000uscrt"]));
    assert_eq!(push.result["data"]["type"], json!("tendermint/event/Tx"));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn a_failing_subscriber_does_not_block_others() {
    let router = router();
    let (mut gone, gone_rx) = router.open_session();
    let (mut live, mut live_rx) = router.open_session();

    router
        .handle(&mut gone, RpcRequest::new(1, "subscribe", json!({ "query": "x exists" })))
        .await;
    router
        .handle(&mut live, RpcRequest::new(1, "subscribe", json!({ "query": "x exists" })))
        .await;

    // the first subscriber's connection is gone, so its emit fails
    drop(gone_rx);
    let report = registry(&router).dispatch(&event(&[("x", "1")]));
    assert_eq!((report.delivered, report.failed), (1, 1));
    assert!(live_rx.try_recv().is_ok());
}

#[tokio::test]
async fn malformed_query_registers_nothing() {
    let router = router();
    let (mut session, _rx) = router.open_session();

    let resp = router
        .handle(&mut session, RpcRequest::new(1, "subscribe", json!({ "query": "a=1 AND (b=2" })))
        .await;
    let error = resp.error.unwrap();
    assert_eq!(error.code, -32602);
    assert!(error.data.unwrap()["offset"].is_u64());
    assert!(registry(&router).is_empty());
}

#[tokio::test]
async fn unsubscribe_all_and_close_clear_owned_registrations() {
    let router = router();
    let (mut a, _a_rx) = router.open_session();
    let (mut b, _b_rx) = router.open_session();

    for q in ["x=1", "y=2", "x=1"] {
        router
            .handle(&mut a, RpcRequest::new(1, "subscribe", json!({ "query": q })))
            .await;
    }
    router
        .handle(&mut b, RpcRequest::new(1, "subscribe", json!({ "query": "x=1" })))
        .await;
    assert_eq!(registry(&router).len(), 4);

    let resp = router
        .handle(&mut a, RpcRequest::new(2, "unsubscribe_all", serde_json::Value::Null))
        .await;
    assert_eq!(resp.result, Some(json!({})));
    assert_eq!(registry(&router).len(), 1);

    b.close();
    assert!(registry(&router).is_empty());
}
