//! End-to-end signaling over real WebSocket connections.

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite::Message};

use signal_server::{AppState, ServerConfig, create_router};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

async fn start_server() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_router(AppState::new(ServerConfig::default()));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
        .await
        .unwrap();
    client
}

async fn send(client: &mut Client, message: Value) {
    client
        .send(Message::Text(message.to_string().into()))
        .await
        .unwrap();
}

/// Next JSON message, skipping control frames
async fn recv(client: &mut Client) -> Value {
    loop {
        let frame = tokio::time::timeout(RECV_TIMEOUT, client.next())
            .await
            .expect("timed out waiting for a message")
            .expect("connection ended")
            .unwrap();
        match frame {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("Expected a text frame, got {:?}", other),
        }
    }
}

async fn login(addr: SocketAddr, name: &str, device: &str) -> Client {
    let mut client = connect(addr).await;
    send(
        &mut client,
        json!({"type": "login", "name": name, "device": device}),
    )
    .await;
    assert_eq!(
        recv(&mut client).await,
        json!({"type": "login", "success": true, "name": name, "device": device})
    );
    client
}

#[tokio::test]
async fn test_offer_answer_and_leave_on_disconnect() {
    let addr = start_server().await;
    let mut alice = login(addr, "alice", "d1").await;
    let mut bob = login(addr, "bob", "d2").await;

    send(
        &mut alice,
        json!({"type": "offer", "device": "d2", "offer": {"sdp": "v=0"}}),
    )
    .await;
    assert_eq!(
        recv(&mut bob).await,
        json!({"type": "offer", "offer": {"sdp": "v=0"}, "name": "alice", "device": "d1"})
    );

    send(
        &mut bob,
        json!({"type": "answer", "device": "d1", "answer": {"sdp": "v=1"}}),
    )
    .await;
    assert_eq!(
        recv(&mut alice).await,
        json!({"type": "answer", "answer": {"sdp": "v=1"}, "device": "d2"})
    );

    send(
        &mut bob,
        json!({"type": "candidate", "device": "d1", "candidate": {"candidate": "c1"}}),
    )
    .await;
    assert_eq!(
        recv(&mut alice).await,
        json!({"type": "candidate", "candidate": {"candidate": "c1"}})
    );

    alice.close(None).await.unwrap();
    assert_eq!(recv(&mut bob).await, json!({"type": "leave"}));
}

#[tokio::test]
async fn test_duplicate_login_rejected_while_live() {
    let addr = start_server().await;
    let _alice = login(addr, "alice", "d1").await;

    let mut imposter = connect(addr).await;
    send(
        &mut imposter,
        json!({"type": "login", "name": "alice", "device": "d1"}),
    )
    .await;
    assert_eq!(
        recv(&mut imposter).await,
        json!({"type": "login", "success": false})
    );
}

#[tokio::test]
async fn test_relogin_after_disconnect() {
    let addr = start_server().await;
    let mut alice = login(addr, "alice", "d1").await;
    alice.close(None).await.unwrap();

    // The close is processed asynchronously; retry until the device is free
    for _ in 0..50 {
        let mut client = connect(addr).await;
        send(
            &mut client,
            json!({"type": "login", "name": "alice", "device": "d1"}),
        )
        .await;
        if recv(&mut client).await["success"] == json!(true) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("device d1 never became available again");
}

#[tokio::test]
async fn test_login_under_other_name_closes_old_connection() {
    let addr = start_server().await;
    let mut first = login(addr, "alice", "d1").await;
    let _second = login(addr, "bob", "d1").await;

    let closed = tokio::time::timeout(RECV_TIMEOUT, async {
        loop {
            match first.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return true,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await
    .unwrap_or(false);
    assert!(closed, "evicted connection should be closed");
}

#[tokio::test]
async fn test_errors_go_to_sender() {
    let addr = start_server().await;
    let mut alice = login(addr, "alice", "d1").await;

    send(&mut alice, json!({"type": "frobnicate"})).await;
    assert_eq!(
        recv(&mut alice).await,
        json!({"type": "error", "message": "unrecognized kind: frobnicate"})
    );

    alice.send(Message::Text("not json".into())).await.unwrap();
    assert_eq!(
        recv(&mut alice).await,
        json!({"type": "error", "message": "unrecognized kind: "})
    );

    send(&mut alice, json!({"type": "transfer", "name": "alice"})).await;
    let reply = recv(&mut alice).await;
    assert_eq!(reply["type"], "error");
    assert!(
        reply["message"]
            .as_str()
            .unwrap()
            .starts_with("malformed transfer message")
    );
}

#[tokio::test]
async fn test_transfer_supersedes_previous_device() {
    let addr = start_server().await;
    let mut phone = login(addr, "bob", "phone").await;
    let mut laptop = login(addr, "bob", "laptop").await;

    send(
        &mut laptop,
        json!({"type": "transfer", "name": "bob", "device": "laptop"}),
    )
    .await;
    assert_eq!(
        recv(&mut laptop).await,
        json!({"type": "transfer", "success": true})
    );
    assert_eq!(
        recv(&mut phone).await,
        json!({"type": "transfer", "success": false, "device": "laptop"})
    );

    // Offers addressed by name now reach the laptop
    let mut alice = login(addr, "alice", "a1").await;
    send(
        &mut alice,
        json!({"type": "offer", "name": "bob", "offer": "sdp"}),
    )
    .await;
    assert_eq!(recv(&mut laptop).await["type"], "offer");
}

#[tokio::test]
async fn test_health_and_metrics() {
    let addr = start_server().await;
    let _alice = login(addr, "alice", "d1").await;

    let client = reqwest::Client::new();
    let health = client
        .get(format!("http://{}/health", addr))
        .send()
        .await
        .unwrap();
    assert!(health.status().is_success());
    let health: Value = serde_json::from_str(&health.text().await.unwrap()).unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["connections"], 1);
    assert_eq!(health["devices"], 1);

    let body = client
        .get(format!("http://{}/metrics", addr))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let metrics: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(metrics["connections"]["active"], 1);
    assert_eq!(metrics["state"]["devices"], 1);
    assert_eq!(metrics["messages"]["received"], 1);
}
