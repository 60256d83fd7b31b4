use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::{FrameSink, InboundFrames, TransportError, TransportResult};

/// WebSocket connection to the relay's session endpoint.
pub struct WebSocketChannel {
    tx: mpsc::UnboundedSender<String>,
    connected: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl WebSocketChannel {
    /// Connects to `url` (`ws://` or `wss://`) and spawns the socket task.
    pub async fn connect(url: &str) -> TransportResult<(Self, InboundFrames)> {
        let parsed = Url::parse(url).map_err(|err| TransportError::InvalidUrl(format!("{url}: {err}")))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(TransportError::InvalidUrl(format!(
                "{url}: expected ws:// or wss://"
            )));
        }

        let (ws_stream, _) = connect_async(parsed.as_str())
            .await
            .map_err(|err| TransportError::Connect {
                url: url.to_string(),
                reason: err.to_string(),
            })?;
        info!(target = "room.transport", url = %parsed, "websocket connected");

        let (tx_out, rx_out) = mpsc::unbounded_channel::<String>();
        let (tx_in, rx_in) = mpsc::unbounded_channel::<String>();
        let connected = Arc::new(AtomicBool::new(true));

        let task = tokio::spawn(handle_websocket(ws_stream, rx_out, tx_in, connected.clone()));

        Ok((
            Self {
                tx: tx_out,
                connected,
                task: Some(task),
            },
            rx_in,
        ))
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub async fn close(mut self) {
        self.connected.store(false, Ordering::Release);
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

impl FrameSink for WebSocketChannel {
    fn send_text(&self, frame: String) -> TransportResult<()> {
        if !self.is_connected() {
            return Err(TransportError::Closed);
        }
        self.tx.send(frame).map_err(|_| TransportError::Closed)
    }

    fn is_open(&self) -> bool {
        self.is_connected()
    }
}

impl Drop for WebSocketChannel {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn handle_websocket(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut rx_out: mpsc::UnboundedReceiver<String>,
    tx_in: mpsc::UnboundedSender<String>,
    connected: Arc<AtomicBool>,
) {
    let (ws_sender, mut ws_receiver) = ws_stream.split();

    let send_task = tokio::spawn(forward_outbound(ws_sender, rx_out, connected.clone()));

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if tx_in.send(text).is_err() {
                    break;
                }
            }
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => {
                    if tx_in.send(text).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!(target = "room.transport", error = %err, "dropping non-utf8 binary frame");
                }
            },
            Ok(Message::Close(frame)) => {
                debug!(target = "room.transport", ?frame, "websocket closed by peer");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(target = "room.transport", error = %err, "websocket receive failed");
                break;
            }
        }
    }

    connected.store(false, Ordering::Release);
    send_task.abort();
    let _ = send_task.await;
}

/// Writes queued frames until the queue closes or a write fails. A failed
/// write marks the channel disconnected right away.
async fn forward_outbound<S>(
    mut sink: S,
    mut rx_out: mpsc::UnboundedReceiver<String>,
    connected: Arc<AtomicBool>,
) where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(frame) = rx_out.recv().await {
        if let Err(err) = sink.send(Message::Text(frame)).await {
            warn!(target = "room.transport", error = %err, "websocket send failed");
            connected.store(false, Ordering::Release);
            break;
        }
    }
    let _ = sink.close().await;
}
