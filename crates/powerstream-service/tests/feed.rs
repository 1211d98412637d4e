use std::sync::Arc;

use serde_json::json;
use tokio::sync::broadcast;

use powerstream_core::codec::JsonResultCodec;
use powerstream_core::event::{AbciEvent, EventAttribute, TxEvent, TxResult};
use powerstream_service::{LiveFeed, Router, RpcRequest, ServiceConfig, ServiceContext};
use powerstream_storage::InMemoryArchive;

fn transfer(amount: &str) -> TxEvent {
    let result = TxResult {
        events: vec![AbciEvent {
            kind: "transfer".into(),
            attributes: vec![EventAttribute {
                key: "amount".into(),
                value: amount.into(),
                index: true,
            }],
        }],
        ..Default::default()
    };
    let attrs = result.attributes();
    TxEvent::new(42, 0, b"tx", result, attrs)
}

#[tokio::test]
async fn feed_dispatches_until_upstream_closes() {
    let router = Router::new(ServiceContext::new(
        ServiceConfig::default(),
        Arc::new(InMemoryArchive::new()),
        Arc::new(JsonResultCodec),
    ));
    let (mut session, mut rx) = router.open_session();
    router
        .handle(
            &mut session,
            RpcRequest::new(1, "subscribe", json!({ "query": "transfer.amount>5uscrt" })),
        )
        .await;

    let (upstream, feed_rx) = broadcast::channel(16);
    let feed = LiveFeed::new(router.context().registry.clone());
    let task = tokio::spawn(async move { feed.run(feed_rx).await });

    upstream.send(transfer("6uscrt")).unwrap();
    upstream.send(transfer("4uscrt")).unwrap();
    upstream.send(transfer("6uatom")).unwrap();
    drop(upstream);

    let stats = task.await.unwrap();
    assert_eq!(stats.events, 3);
    assert_eq!(stats.delivered, 1);

    let push = rx.recv().await.unwrap();
    assert_eq!(push.result["events"]["transfer.amount"], json!(["6uscrt"]));
    assert!(rx.try_recv().is_err());
}
