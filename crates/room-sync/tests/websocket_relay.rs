use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use room_sync::telemetry::init_test_logging;
use room_sync::{EngineSnapshot, Session, SessionConfig, SessionHandle};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};

#[derive(Clone)]
struct RelayState {
    frames: broadcast::Sender<String>,
    subscribers: Arc<AtomicUsize>,
    playlist: Arc<Vec<String>>,
}

async fn relay_socket(ws: WebSocketUpgrade, State(state): State<RelayState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| relay_connection(socket, state))
}

async fn relay_connection(socket: WebSocket, state: RelayState) {
    let (mut sink, mut stream) = socket.split();
    let mut frames = state.frames.subscribe();
    state.subscribers.fetch_add(1, Ordering::SeqCst);

    let forward = tokio::spawn(async move {
        while let Ok(frame) = frames.recv().await {
            if sink.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });
    while let Some(Ok(message)) = stream.next().await {
        if let Message::Text(text) = message {
            let _ = state.frames.send(text);
        }
    }
    forward.abort();
}

async fn room_playlist(Path(_room): Path<String>, State(state): State<RelayState>) -> Json<Vec<String>> {
    Json(state.playlist.as_ref().clone())
}

async fn spawn_relay(playlist: Vec<String>) -> (String, RelayState) {
    let (frames, _) = broadcast::channel(64);
    let state = RelayState {
        frames,
        subscribers: Arc::new(AtomicUsize::new(0)),
        playlist: Arc::new(playlist),
    };
    let app = Router::new()
        .route("/ws/:room", get(relay_socket))
        .route("/room/:room/playlist", get(room_playlist))
        .with_state(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (addr.to_string(), state)
}

async fn wait_for<F>(handle: &SessionHandle, what: &str, predicate: F) -> EngineSnapshot
where
    F: FnMut(&EngineSnapshot) -> bool,
{
    let mut rx = handle.subscribe();
    let result = timeout(Duration::from_secs(3), rx.wait_for(predicate)).await;
    match result {
        Ok(Ok(snapshot)) => snapshot.clone(),
        Ok(Err(_)) => panic!("session stopped while waiting for {what}"),
        Err(_) => panic!("timed out waiting for {what}: {:?}", handle.snapshot()),
    }
}

#[test_timeout::tokio_timeout_test(10)]
async fn request_travels_through_relay_and_room_service() {
    init_test_logging();
    let (addr, relay) = spawn_relay(vec!["abc".into(), "def".into()]).await;
    let config = SessionConfig::new("room-1")
        .with_transport_base_url(format!("ws://{addr}"))
        .with_api_base_url(format!("http://{addr}"))
        .with_initial_refresh_delay(Duration::from_secs(60));

    let alice = Session::connect(&config).await.expect("alice connects");
    let bob = Session::connect(&config).await.expect("bob connects");
    assert!(alice.is_connected());
    for _ in 0..300 {
        if relay.subscribers.load(Ordering::SeqCst) == 2 {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(relay.subscribers.load(Ordering::SeqCst), 2);

    alice.handle().request_video("abc").expect("request");

    let bob_state = wait_for(bob.handle(), "bob playlist", |s| s.playlist.len() == 2).await;
    assert_eq!(bob_state.playback.video_reference, "");
    let alice_state = wait_for(alice.handle(), "alice playlist", |s| s.playlist.len() == 2).await;
    assert_eq!(alice_state.playback.video_reference, "abc");
    assert_eq!(alice_state.outbound_failures, 0);

    alice.close().await;
    bob.close().await;
}

#[tokio::test]
async fn connect_fails_when_relay_is_unreachable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let config = SessionConfig::new("room-1").with_transport_base_url(format!("ws://{addr}"));
    let result = Session::connect(&config).await;
    assert!(matches!(result, Err(room_sync::SessionError::Transport(_))));
}
