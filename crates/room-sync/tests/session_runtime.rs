use std::sync::{Arc, Mutex};
use std::time::Duration;

use room_sync::session::SessionRuntime;
use room_sync::telemetry::init_test_logging;
use room_sync::{
    EngineSnapshot, FrameSink, InMemoryPlaylistStore, LocalRelay, MediaSurface, MemorySink,
    SessionConfig, SessionError, SessionHandle,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

const ROOM: &str = "room-1";

#[derive(Default)]
struct FakeSurface {
    seeks: Mutex<Vec<f64>>,
    time: Mutex<f64>,
}

impl FakeSurface {
    fn at(seconds: f64) -> Arc<Self> {
        let surface = Arc::new(Self::default());
        *surface.time.lock().unwrap() = seconds;
        surface
    }

    fn seeks(&self) -> Vec<f64> {
        self.seeks.lock().unwrap().clone()
    }
}

impl MediaSurface for FakeSurface {
    fn seek_to(&self, position_seconds: f64) {
        self.seeks.lock().unwrap().push(position_seconds);
        *self.time.lock().unwrap() = position_seconds;
    }

    fn current_time(&self) -> f64 {
        *self.time.lock().unwrap()
    }
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

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

fn actions(relay: &LocalRelay) -> Vec<String> {
    relay
        .history(ROOM)
        .iter()
        .map(|frame| {
            let value: Value = serde_json::from_str(frame).expect("relay frame json");
            value["action"].as_str().unwrap_or_default().to_string()
        })
        .collect()
}

fn join(
    relay: &Arc<LocalRelay>,
    store: &Arc<InMemoryPlaylistStore>,
    config: &SessionConfig,
) -> (SessionHandle, tokio::task::JoinHandle<()>) {
    let (peer, inbound) = relay.join(ROOM);
    SessionRuntime::spawn(config, Arc::new(peer), inbound, store.clone())
}

#[tokio::test]
async fn participants_converge_without_echo_storm() {
    init_test_logging();
    let relay = LocalRelay::new();
    let store = InMemoryPlaylistStore::new();
    let config = SessionConfig::new(ROOM).with_initial_refresh_delay(Duration::ZERO);

    let (alice, _alice_task) = join(&relay, &store, &config);
    let (bob, _bob_task) = join(&relay, &store, &config);
    let alice_surface = FakeSurface::at(0.0);
    let bob_surface = FakeSurface::at(0.0);
    alice.attach_surface(alice_surface.clone()).unwrap();
    bob.attach_surface(bob_surface.clone()).unwrap();

    store.enqueue(ROOM, "abc").await;
    alice.request_video("abc").unwrap();
    wait_for(&bob, "bob playlist", |s| s.playlist.entries() == ["abc".to_string()]).await;
    assert_eq!(bob.snapshot().playback.video_reference, "", "requests only queue for others");
    assert_eq!(alice.snapshot().playback.video_reference, "abc");

    // The relay hands the active video to everyone.
    relay.broadcast(ROOM, &json!({"action": "SYNC", "data": {"url": "abc", "time": 0, "playing": false}}).to_string());
    wait_for(&bob, "bob sync", |s| s.playback.video_reference == "abc").await;

    alice.notify_media_ready().unwrap();
    bob.notify_media_ready().unwrap();
    *alice_surface.time.lock().unwrap() = 5.0;
    alice.notify_play().unwrap();

    let bob_state = wait_for(&bob, "bob playing", |s| s.playback.is_playing && s.media_ready).await;
    assert_eq!(bob_state.playback.position_seconds, 5.0);
    assert_eq!(bob_surface.seeks(), vec![5.0]);

    // Bob's player reports the seek it was told to make, then playback.
    bob.notify_seek_committed().unwrap();
    bob.notify_play().unwrap();
    // Alice's player reports its own PLAY again once the echo lands.
    alice.notify_play().unwrap();

    // END frames mark that both command queues have drained.
    bob.notify_media_ended().unwrap();
    alice.notify_media_ended().unwrap();
    wait_until("end frames", || {
        actions(&relay).iter().filter(|a| *a == "END_VIDEO").count() == 2
    })
    .await;

    let plays = actions(&relay).iter().filter(|a| *a == "PLAY_VIDEO").count();
    assert_eq!(plays, 1, "history: {:?}", actions(&relay));
}

#[test_timeout::tokio_timeout_test(5, start_paused)]
async fn first_refresh_waits_for_initial_delay() {
    let relay = LocalRelay::new();
    let store = InMemoryPlaylistStore::new();
    store.replace(ROOM, vec!["a".into(), "b".into()]).await;
    let config = SessionConfig::new(ROOM).with_initial_refresh_delay(Duration::from_millis(250));

    let (handle, _task) = join(&relay, &store, &config);
    tokio::task::yield_now().await;
    assert_eq!(store.fetch_count(), 0);

    let snapshot = wait_for(&handle, "initial playlist", |s| s.playlist.len() == 2).await;
    assert_eq!(snapshot.playlist.entries(), ["a".to_string(), "b".to_string()]);
    assert_eq!(store.fetch_count(), 1);
}

#[tokio::test]
async fn inbound_request_triggers_one_fetch() {
    let relay = LocalRelay::new();
    let store = InMemoryPlaylistStore::new();
    store.replace(ROOM, vec!["xyz".into()]).await;
    let config = SessionConfig::new(ROOM).with_initial_refresh_delay(Duration::from_secs(60));

    let (handle, _task) = join(&relay, &store, &config);
    relay.broadcast(ROOM, r#"{"action":"REQUEST","data":{"url":"xyz"}}"#);

    let snapshot = wait_for(&handle, "playlist", |s| !s.playlist.is_empty()).await;
    assert_eq!(snapshot.playback, Default::default());
    sleep(Duration::from_millis(50)).await;
    assert_eq!(store.fetch_count(), 1);
}

#[tokio::test]
async fn slow_stale_fetch_does_not_overwrite_newer_playlist() {
    let relay = LocalRelay::new();
    let store = InMemoryPlaylistStore::new();
    store.replace(ROOM, vec!["a".into()]).await;
    store.push_latency(Duration::from_millis(300)).await;
    let config = SessionConfig::new(ROOM).with_initial_refresh_delay(Duration::ZERO);

    let (handle, _task) = join(&relay, &store, &config);
    wait_until("initial fetch started", || store.fetch_count() == 1).await;

    store.replace(ROOM, vec!["a".into(), "b".into()]).await;
    relay.broadcast(ROOM, r#"{"action":"REQUEST","data":{"url":"b"}}"#);
    wait_for(&handle, "newer playlist", |s| s.playlist.len() == 2).await;

    sleep(Duration::from_millis(400)).await;
    assert_eq!(handle.snapshot().playlist.len(), 2);
}

#[tokio::test]
async fn failed_refresh_keeps_previous_playlist() {
    let relay = LocalRelay::new();
    let store = InMemoryPlaylistStore::new();
    store.replace(ROOM, vec!["a".into()]).await;
    let config = SessionConfig::new(ROOM).with_initial_refresh_delay(Duration::ZERO);

    let (handle, _task) = join(&relay, &store, &config);
    wait_for(&handle, "initial playlist", |s| s.playlist.len() == 1).await;

    store.set_failing(true);
    relay.broadcast(
        ROOM,
        r#"{"action":"SYNC","data":{"url":"a","time":42,"playing":true}}"#,
    );
    let snapshot = wait_for(&handle, "sync", |s| s.playback.position_seconds == 42.0).await;
    wait_until("second fetch", || store.fetch_count() == 2).await;
    sleep(Duration::from_millis(20)).await;

    assert_eq!(snapshot.playlist.entries(), ["a".to_string()]);
    assert_eq!(handle.snapshot().playlist.entries(), ["a".to_string()]);
}

#[tokio::test]
async fn malformed_frames_do_not_stop_the_session() {
    let relay = LocalRelay::new();
    let store = InMemoryPlaylistStore::new();
    let config = SessionConfig::new(ROOM).with_initial_refresh_delay(Duration::from_secs(60));

    let (handle, _task) = join(&relay, &store, &config);
    relay.broadcast(ROOM, "definitely not json");
    relay.broadcast(ROOM, r#"{"data":{"url":"abc"}}"#);
    relay.broadcast(ROOM, r#"{"action":"PAUSE_VIDEO","data":{"url":"abc","time":3,"playing":false}}"#);

    let snapshot = wait_for(&handle, "pause", |s| s.playback.video_reference == "abc").await;
    assert!(!snapshot.playback.is_playing);
    assert_eq!(store.fetch_count(), 0);
}

#[tokio::test]
async fn local_actions_continue_after_transport_closes() {
    let sink = MemorySink::new();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
    let store = InMemoryPlaylistStore::new();
    let config = SessionConfig::new(ROOM).with_initial_refresh_delay(Duration::from_secs(60));
    let (handle, _task) = SessionRuntime::spawn(&config, sink.clone(), inbound_rx, store);

    drop(inbound_tx);
    handle.request_video("abc").unwrap();

    wait_for(&handle, "optimistic reference", |s| s.playback.video_reference == "abc").await;
    assert_eq!(sink.frames().len(), 1);
    assert!(sink.is_open());
}

#[tokio::test]
async fn send_failures_are_reported_in_snapshot() {
    let sink = MemorySink::new();
    sink.set_closed(true);
    let (_inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
    let store = InMemoryPlaylistStore::new();
    let config = SessionConfig::new(ROOM).with_initial_refresh_delay(Duration::from_secs(60));
    let (handle, _task) = SessionRuntime::spawn(&config, sink.clone(), inbound_rx, store);

    handle.request_video("abc").unwrap();

    let snapshot = wait_for(&handle, "failure count", |s| s.outbound_failures == 1).await;
    assert_eq!(snapshot.playback.video_reference, "abc");
}

#[tokio::test]
async fn handle_reports_closed_after_shutdown() {
    let relay = LocalRelay::new();
    let store = InMemoryPlaylistStore::new();
    let config = SessionConfig::new(ROOM).with_initial_refresh_delay(Duration::from_secs(60));
    let (handle, task) = join(&relay, &store, &config);

    handle.shutdown().unwrap();
    timeout(Duration::from_secs(1), task)
        .await
        .expect("task stops")
        .expect("task completes");

    assert!(matches!(handle.notify_play(), Err(SessionError::Closed)));
}
