use std::{sync::Arc, time::Duration};

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::{
    net::{TcpListener, TcpStream},
    time::timeout,
};
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};
use watchparty_client::{
    ConnectivityStatus, Participant, PlayerDirective, SyncConfig, WatchPartyClient, WsConnector,
};

const WAIT: Duration = Duration::from_secs(5);

async fn next_json(ws: &mut WebSocketStream<TcpStream>) -> Value {
    loop {
        let msg = timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for client frame")
            .expect("client closed the socket")
            .expect("socket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn send_json(ws: &mut WebSocketStream<TcpStream>, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

#[tokio::test]
async fn client_syncs_with_websocket_room_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let config = SyncConfig::default()
        .with_endpoint("test", format!("ws://{addr}/ws"))
        .with_retry_budget(2);
    let connector = Arc::new(WsConnector::from_config(&config));
    let (client, mut directives) =
        WatchPartyClient::join(connector, config, "r1", Participant::new("me", "Me"));

    let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    let mut ws = accept_async(stream).await.unwrap();

    let join = next_json(&mut ws).await;
    assert_eq!(join["type"], "join");
    assert_eq!(join["payload"]["roomId"], "r1");
    assert_eq!(next_json(&mut ws).await["type"], "requestState");

    send_json(
        &mut ws,
        json!({
            "type": "roomStateSnapshot",
            "payload": {
                "currentVideoId": "m1",
                "positionSeconds": 30.0,
                "isPlaying": false,
                "durationSeconds": 120.0,
                "participants": [{ "id": "me", "displayName": "Me" }]
            },
            "ts": 1_000
        }),
    )
    .await;
    send_json(
        &mut ws,
        json!({ "type": "participantJoined", "payload": { "id": "u1", "displayName": "Ana" }, "ts": 1_100 }),
    )
    .await;

    let mut views = client.subscribe();
    let view = timeout(WAIT, views.wait_for(|v| v.synced && v.room.participants.len() == 2))
        .await
        .expect("room view never synced")
        .expect("view channel closed")
        .clone();
    assert_eq!(view.room.current_video_id.as_deref(), Some("m1"));
    assert_eq!(client.status(), ConnectivityStatus::Connected);

    let first = timeout(WAIT, directives.recv()).await.unwrap().unwrap();
    assert_eq!(first, PlayerDirective::SeekTo(30.0));

    client.seek(500.0).unwrap();
    let seek = next_json(&mut ws).await;
    assert_eq!(seek["type"], "seek");
    assert_eq!(seek["payload"]["positionSeconds"], 120.0);

    client.leave().await;
    let leave = next_json(&mut ws).await;
    assert_eq!(leave["type"], "leave");
    assert_eq!(leave["payload"]["participantId"], "me");
    assert_eq!(client.status(), ConnectivityStatus::Disconnected);
}

#[tokio::test]
async fn unreachable_server_ends_in_disconnected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = SyncConfig::default()
        .with_endpoint("test", format!("ws://{addr}/ws"))
        .with_retry_budget(2);
    config.backoff.initial = Duration::from_millis(5);
    config.backoff.max = Duration::from_millis(10);
    let connector = Arc::new(WsConnector::from_config(&config));
    let (client, _directives) =
        WatchPartyClient::join(connector, config, "r1", Participant::guest());

    let mut status = client.watch_status();
    timeout(WAIT, status.wait_for(|s| *s == ConnectivityStatus::Disconnected))
        .await
        .expect("never gave up")
        .unwrap();
    assert!(client.play().is_err());
}
