//! End-to-end tests for the tokio-tungstenite connector.

use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tubes_core::{ChannelHandlers, Connector, Router};
use tubes_transport::{Transport, WebSocketTransport};

async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

async fn start() -> (Arc<Router>, String) {
    let mut router = Router::new();
    router
        .register_channel("room/{id}", ChannelHandlers::new())
        .unwrap();
    let router = Arc::new(router);
    let connector = Connector::new(Arc::clone(&router));

    let transport = WebSocketTransport::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = transport.local_addr().unwrap();
    tokio::spawn(async move { transport.serve(connector).await });

    (router, format!("ws://{addr}"))
}

#[tokio::test]
async fn test_subscribe_send_and_disconnect() {
    let (router, url) = start().await;
    let (mut ws, _) = connect_async(url).await.unwrap();

    ws.send(Message::Text(
        r#"{"type":"subscribe","channel":"room/42"}"#.to_string(),
    ))
    .await
    .unwrap();
    wait_until(|| router.stats().total_subscriptions == 1).await;

    let client_id = router.clients().ids().remove(0);
    assert!(router.is_subscribed("room/42", &client_id));
    router
        .send("room/42", &client_id, br#"{"text":"hi"}"#)
        .unwrap();

    let received = timeout(Duration::from_secs(2), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(
        received,
        Message::Text(r#"{"type":"message","channel":"room/42","payload":{"text":"hi"}}"#.to_string())
    );

    ws.close(None).await.unwrap();
    wait_until(|| router.stats().client_count == 0).await;
    assert!(!router.is_subscribed("room/42", &client_id));
    assert_eq!(router.stats().context_count, 0);
}

#[tokio::test]
async fn test_invalid_traffic_keeps_connection() {
    let (router, url) = start().await;
    let (mut ws, _) = connect_async(url).await.unwrap();

    ws.send(Message::Text(r#"{"type":"ping"}"#.to_string()))
        .await
        .unwrap();
    ws.send(Message::Text("garbage".to_string())).await.unwrap();
    ws.send(Message::Binary(
        br#"{"type":"subscribe","channel":"room/7"}"#.to_vec(),
    ))
    .await
    .unwrap();

    wait_until(|| router.stats().total_subscriptions == 1).await;
    assert_eq!(router.stats().client_count, 1);
}
