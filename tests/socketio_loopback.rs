//! Real Socket.IO sessions against a loopback WebSocket server that speaks
//! just enough Engine.IO v4 / Socket.IO v5 to exercise the handshake, the
//! heartbeat and event exchange.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};

use chat_realtime::realtime::{Connection, Connector, InboundEvent, Session};
use chat_realtime::{ChatError, ConnectionParams, SocketConfig, SocketIoConnector};

const OPEN: &str =
    r#"0{"sid":"eio-1","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;

type ServerSocket = WebSocketStream<TcpStream>;

async fn bind() -> (TcpListener, SocketConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let config = SocketConfig {
        server_url: format!("http://127.0.0.1:{}", port),
        handshake_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    (listener, config)
}

async fn accept(listener: &TcpListener) -> ServerSocket {
    let (stream, _) = listener.accept().await.unwrap();
    accept_async(stream).await.unwrap()
}

async fn next_text(ws: &mut ServerSocket) -> String {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return text,
            Some(Ok(_)) => continue,
            other => panic!("client went away: {:?}", other),
        }
    }
}

/// Send the open packet and return the client's auth payload.
async fn open_and_read_auth(ws: &mut ServerSocket) -> Value {
    ws.send(Message::Text(OPEN.to_string())).await.unwrap();
    let connect = next_text(ws).await;
    let auth = connect
        .strip_prefix("40")
        .unwrap_or_else(|| panic!("expected namespace connect, got {}", connect));
    serde_json::from_str(auth).unwrap()
}

#[tokio::test]
async fn test_handshake_ping_and_event_exchange() {
    let (listener, config) = bind().await;

    let server: JoinHandle<Value> = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        let auth = open_and_read_auth(&mut ws).await;
        ws.send(Message::Text(r#"40{"sid":"sock-1"}"#.to_string()))
            .await
            .unwrap();

        ws.send(Message::Text("2".to_string())).await.unwrap();

        let mut saw_pong = false;
        let mut message = None;
        while !(saw_pong && message.is_some()) {
            let text = next_text(&mut ws).await;
            if text == "3" {
                saw_pong = true;
            } else if let Some(body) = text.strip_prefix("42") {
                let args: Vec<Value> = serde_json::from_str(body).unwrap();
                assert_eq!(args[0], "message");
                message = Some(args[1].clone());
            }
        }
        assert_eq!(message, Some(json!("hello")));

        let reply = json!(["message", { "success": true, "message": "hi there" }]);
        ws.send(Message::Text(format!("42{}", reply))).await.unwrap();

        // Expect the namespace disconnect on close.
        let bye = next_text(&mut ws).await;
        assert_eq!(bye, "41");
        auth
    });

    let params = ConnectionParams::new("192.0.2.10", Some("tok-1"), true);
    let mut session = Session::establish(&config, &params).await.unwrap();
    assert_eq!(session.sid(), "eio-1");
    assert_eq!(session.socket_id(), Some("sock-1"));

    session.send("hello").await.unwrap();
    let event = tokio::time::timeout(Duration::from_secs(5), session.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event, InboundEvent::response("hi there"));

    session.close().await;

    let auth = server.await.unwrap();
    assert_eq!(auth, json!({ "ipAddress": "192.0.2.10", "token": "tok-1" }));
}

#[tokio::test]
async fn test_anonymous_auth_omits_token() {
    let (listener, config) = bind().await;

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        let auth = open_and_read_auth(&mut ws).await;
        ws.send(Message::Text(r#"40{"sid":"sock-2"}"#.to_string()))
            .await
            .unwrap();
        auth
    });

    // A stored token is ignored while the user is not authenticated.
    let params = ConnectionParams::new("192.0.2.11", Some("tok-stale"), false);
    let connector = SocketIoConnector::new(config);
    let _session = connector.connect(&params).await.unwrap();

    let auth = server.await.unwrap();
    assert_eq!(auth, json!({ "ipAddress": "192.0.2.11" }));
}

#[tokio::test]
async fn test_server_rejection() {
    let (listener, config) = bind().await;

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        open_and_read_auth(&mut ws).await;
        ws.send(Message::Text(r#"44{"message":"not authorized"}"#.to_string()))
            .await
            .unwrap();
    });

    let params = ConnectionParams::anonymous("192.0.2.12");
    let result = Session::establish(&config, &params).await;
    match result {
        Err(ChatError::Rejected(reason)) => assert_eq!(reason, "not authorized"),
        Err(other) => panic!("expected rejection, got {}", other),
        Ok(_) => panic!("expected rejection, got a session"),
    }
    server.await.unwrap();
}

#[tokio::test]
async fn test_server_close_ends_session() {
    let (listener, config) = bind().await;

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        open_and_read_auth(&mut ws).await;
        ws.send(Message::Text(r#"40{"sid":"sock-3"}"#.to_string()))
            .await
            .unwrap();
        ws.send(Message::Text("41".to_string())).await.unwrap();
        ws
    });

    let params = ConnectionParams::anonymous("192.0.2.13");
    let mut session = Session::establish(&config, &params).await.unwrap();
    let event = tokio::time::timeout(Duration::from_secs(5), session.recv())
        .await
        .unwrap();
    assert!(event.is_none());
    let _ws = server.await.unwrap();
}

#[tokio::test]
async fn test_unreachable_server_is_connection_error() {
    let (listener, config) = bind().await;
    drop(listener);

    let params = ConnectionParams::anonymous("192.0.2.14");
    let err = Session::establish(&config, &params).await.err().unwrap();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_silent_server_is_considered_dead() {
    let (listener, config) = bind().await;

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        ws.send(Message::Text(
            r#"0{"sid":"eio-quiet","upgrades":[],"pingInterval":100,"pingTimeout":100,"maxPayload":1000000}"#
                .to_string(),
        ))
        .await
        .unwrap();
        let connect = next_text(&mut ws).await;
        assert!(connect.starts_with("40"), "got {}", connect);
        ws.send(Message::Text(r#"40{"sid":"sock-4"}"#.to_string()))
            .await
            .unwrap();

        // No pings from here on; just wait for the client to give up.
        while let Some(Ok(_)) = ws.next().await {}
    });

    let params = ConnectionParams::anonymous("192.0.2.15");
    let mut session = Session::establish(&config, &params).await.unwrap();
    let event = tokio::time::timeout(Duration::from_secs(5), session.recv())
        .await
        .expect("liveness window not enforced");
    assert!(event.is_none());

    session.close().await;
    server.await.unwrap();
}

#[tokio::test]
async fn test_unanswered_connect_times_out() {
    let (listener, mut config) = bind().await;
    config.handshake_timeout = Duration::from_millis(300);

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        open_and_read_auth(&mut ws).await;
        // Never acknowledge the namespace connect.
        while let Some(Ok(_)) = ws.next().await {}
    });

    let params = ConnectionParams::anonymous("192.0.2.16");
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        Session::establish(&config, &params),
    )
    .await
    .expect("handshake timeout not enforced");
    match result {
        Err(err @ ChatError::Timeout(_)) => assert!(err.is_retryable()),
        Err(other) => panic!("expected a timeout, got {}", other),
        Ok(_) => panic!("expected a timeout, got a session"),
    }
    server.await.unwrap();
}
