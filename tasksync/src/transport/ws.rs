//! WebSocket hub transport.
//!
//! [`WsConnector::connect`] opens a WebSocket to the hub, authenticates,
//! and spawns a background reader that splits incoming frames into push
//! events (queued for [`HubSession::recv`]) and invocation completions
//! (matched to their waiting caller by invocation id).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use tasksync_proto::codec;
use tasksync_proto::hub::{HubEvent, HubFrame, HubMethod};
use tasksync_proto::task::TaskId;

use super::{Connector, HubSession, TransportError};

type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Waiters for invocation completions, keyed by invocation id.
type Completions = Arc<parking_lot::Mutex<HashMap<u64, oneshot::Sender<Option<String>>>>>;

/// Default timeout for opening the WebSocket.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for an invocation completion.
pub const DEFAULT_INVOKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens [`WsSession`]s to one hub URL.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    connect_timeout: Duration,
    invoke_timeout: Duration,
    channel_capacity: usize,
}

impl WsConnector {
    /// Creates a connector for `url` (e.g. `ws://127.0.0.1:8080/hub`).
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            invoke_timeout: DEFAULT_INVOKE_TIMEOUT,
            channel_capacity: 256,
        }
    }

    /// Sets the connect and authenticate timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets how long an invocation waits for its completion.
    #[must_use]
    pub const fn with_invoke_timeout(mut self, timeout: Duration) -> Self {
        self.invoke_timeout = timeout;
        self
    }

    /// Sets the inbound event queue capacity.
    #[must_use]
    pub const fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// The hub URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Connector for WsConnector {
    type Session = WsSession;

    async fn connect(&self, credential: &str) -> Result<WsSession, TransportError> {
        let url = self.url.as_str();
        let (ws_stream, _response) = tokio::time::timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| {
                tracing::warn!(url, "hub WebSocket connect timed out");
                TransportError::Timeout
            })?
            .map_err(|e| {
                tracing::warn!(url, err = %e, "hub WebSocket connect failed");
                map_ws_connect_error(url, e)
            })?;

        let (mut ws_sender, mut ws_reader) = ws_stream.split();

        let hello = HubFrame::Authenticate {
            credential: credential.to_string(),
        };
        send_frame(&mut ws_sender, &hello).await?;

        let user_id = tokio::time::timeout(self.connect_timeout, await_authenticated(&mut ws_reader))
            .await
            .map_err(|_| {
                tracing::warn!(url, "hub authentication timed out");
                TransportError::Timeout
            })??;
        tracing::info!(url, user_id = %user_id, "authenticated with hub");

        let (tx, rx) = mpsc::channel(self.channel_capacity.max(1));
        let connected = Arc::new(AtomicBool::new(true));
        let completions: Completions = Arc::default();
        let reader = tokio::spawn(reader_loop(
            ws_reader,
            tx,
            Arc::clone(&completions),
            Arc::clone(&connected),
        ));

        Ok(WsSession {
            user_id,
            ws_sender: Mutex::new(ws_sender),
            incoming: Mutex::new(rx),
            completions,
            next_invocation: AtomicU64::new(1),
            connected,
            invoke_timeout: self.invoke_timeout,
            reader,
        })
    }
}

/// A live WebSocket session with the hub.
pub struct WsSession {
    user_id: String,
    ws_sender: Mutex<WsSender>,
    incoming: Mutex<mpsc::Receiver<(TaskId, HubEvent)>>,
    completions: Completions,
    next_invocation: AtomicU64,
    connected: Arc<AtomicBool>,
    invoke_timeout: Duration,
    reader: tokio::task::JoinHandle<()>,
}

impl std::fmt::Debug for WsSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsSession")
            .field("user_id", &self.user_id)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl Drop for WsSession {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl HubSession for WsSession {
    async fn invoke(&self, method: HubMethod) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::ConnectionClosed);
        }
        let invocation_id = self.next_invocation.fetch_add(1, Ordering::Relaxed);
        let (done_tx, done_rx) = oneshot::channel();
        self.completions.lock().insert(invocation_id, done_tx);

        let frame = HubFrame::Invoke {
            invocation_id,
            method,
        };
        let sent = {
            let mut sender = self.ws_sender.lock().await;
            send_frame(&mut sender, &frame).await
        };
        if let Err(e) = sent {
            self.completions.lock().remove(&invocation_id);
            self.connected.store(false, Ordering::Relaxed);
            return Err(e);
        }

        match tokio::time::timeout(self.invoke_timeout, done_rx).await {
            Ok(Ok(None)) => Ok(()),
            Ok(Ok(Some(reason))) => {
                tracing::warn!(method = method.name(), task_id = %method.task_id(), reason = %reason, "invocation rejected");
                Err(TransportError::Rejected(reason))
            }
            Ok(Err(_)) => Err(TransportError::ConnectionClosed),
            Err(_) => {
                self.completions.lock().remove(&invocation_id);
                Err(TransportError::Timeout)
            }
        }
    }

    async fn recv(&self) -> Result<(TaskId, HubEvent), TransportError> {
        let mut rx = self.incoming.lock().await;
        rx.recv().await.ok_or(TransportError::ConnectionClosed)
    }

    async fn close(&self) {
        if self.connected.swap(false, Ordering::Relaxed) {
            let mut sender = self.ws_sender.lock().await;
            let _ = sender.send(Message::Close(None)).await;
        }
        self.reader.abort();
        self.completions.lock().clear();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn user_id(&self) -> &str {
        &self.user_id
    }
}

async fn send_frame(sender: &mut WsSender, frame: &HubFrame) -> Result<(), TransportError> {
    let bytes = codec::encode(frame).map_err(|e| TransportError::Io(std::io::Error::other(e)))?;
    sender
        .send(Message::Binary(bytes.into()))
        .await
        .map_err(|e| {
            tracing::warn!(err = %e, "hub send failed");
            TransportError::ConnectionClosed
        })
}

/// Waits for the hub's answer to `Authenticate`.
async fn await_authenticated(reader: &mut WsReader) -> Result<String, TransportError> {
    loop {
        match reader.next().await {
            Some(Ok(Message::Binary(data))) => {
                return match codec::decode(&data) {
                    Ok(HubFrame::Authenticated { user_id }) => Ok(user_id),
                    Ok(HubFrame::Error { reason }) => {
                        tracing::warn!(reason = %reason, "hub rejected credential");
                        Err(TransportError::Rejected(reason))
                    }
                    Ok(other) => {
                        tracing::warn!(?other, "unexpected hub frame during authentication");
                        Err(TransportError::Io(std::io::Error::other(
                            "unexpected frame during authentication",
                        )))
                    }
                    Err(e) => Err(TransportError::Io(std::io::Error::other(format!(
                        "malformed authentication response: {e}"
                    )))),
                };
            }
            Some(Ok(Message::Close(_))) | None => return Err(TransportError::ConnectionClosed),
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                return Err(TransportError::Io(std::io::Error::other(format!(
                    "WebSocket error during authentication: {e}"
                ))));
            }
        }
    }
}

/// Reads frames until the socket closes.
///
/// Malformed frames are logged and skipped; they never end the session.
async fn reader_loop(
    mut ws_reader: WsReader,
    tx: mpsc::Sender<(TaskId, HubEvent)>,
    completions: Completions,
    connected: Arc<AtomicBool>,
) {
    while let Some(msg_result) = ws_reader.next().await {
        match msg_result {
            Ok(Message::Binary(data)) => match codec::decode(&data) {
                Ok(HubFrame::Push { task_id, event }) => {
                    if tx.send((task_id, event)).await.is_err() {
                        break;
                    }
                }
                Ok(HubFrame::Completion {
                    invocation_id,
                    error,
                }) => {
                    let waiter = completions.lock().remove(&invocation_id);
                    match waiter {
                        Some(waiter) => {
                            let _ = waiter.send(error);
                        }
                        None => tracing::debug!(invocation_id, "completion for unknown invocation"),
                    }
                }
                Ok(HubFrame::Error { reason }) => {
                    tracing::warn!(reason = %reason, "hub error");
                }
                Ok(other) => {
                    tracing::debug!(?other, "unexpected hub frame");
                }
                Err(e) => {
                    tracing::warn!(err = %e, "malformed hub frame, skipping");
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!("hub WebSocket closed by server");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(err = %e, "hub WebSocket read error");
                break;
            }
        }
    }
    connected.store(false, Ordering::Relaxed);
    completions.lock().clear();
    tracing::info!("hub reader task exiting");
}

fn map_ws_connect_error(url: &str, err: tokio_tungstenite::tungstenite::Error) -> TransportError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => {
            if matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::AddrNotAvailable
            ) {
                TransportError::Unreachable(url.to_string())
            } else {
                TransportError::Io(io_err)
            }
        }
        WsError::Http(response) => TransportError::Rejected(format!(
            "hub HTTP error: status {}",
            response.status()
        )),
        other => TransportError::Io(std::io::Error::other(format!(
            "hub connection error: {other}"
        ))),
    }
}
