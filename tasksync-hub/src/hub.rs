//! Hub core: connection registry, task groups, and the WebSocket handler.
//!
//! A connection authenticates with its first frame, then invokes
//! `JoinTaskGroup` / `LeaveTaskGroup`. Every write accepted by the REST
//! routes is broadcast to all members of the task's group, including the
//! connection of the user who made it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tasksync_proto::codec;
use tasksync_proto::hub::{HubEvent, HubFrame, HubMethod};
use tasksync_proto::task::TaskId;
use tokio::sync::{RwLock, mpsc};

use crate::store::CommentStore;

/// Default maximum accepted frame size in bytes (64 KB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

struct Connection {
    user_id: String,
    tx: mpsc::UnboundedSender<Message>,
}

/// Shared hub state: live connections, group membership, and the store.
pub struct HubState {
    connections: RwLock<HashMap<u64, Connection>>,
    groups: RwLock<HashMap<TaskId, HashSet<u64>>>,
    next_connection: AtomicU64,
    /// Persistence behind the REST routes.
    pub store: CommentStore,
    max_frame_size: usize,
}

impl Default for HubState {
    fn default() -> Self {
        Self::new()
    }
}

impl HubState {
    /// Creates an empty hub with the default frame size limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Creates an empty hub with a custom frame size limit.
    #[must_use]
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            groups: RwLock::new(HashMap::new()),
            next_connection: AtomicU64::new(1),
            store: CommentStore::new(),
            max_frame_size,
        }
    }

    async fn register(&self, user_id: &str, tx: mpsc::UnboundedSender<Message>) -> u64 {
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        self.connections.write().await.insert(
            id,
            Connection {
                user_id: user_id.to_string(),
                tx,
            },
        );
        id
    }

    async fn unregister(&self, connection: u64) {
        self.connections.write().await.remove(&connection);
        let mut groups = self.groups.write().await;
        for members in groups.values_mut() {
            members.remove(&connection);
        }
        groups.retain(|_, members| !members.is_empty());
    }

    async fn join(&self, connection: u64, task_id: TaskId) {
        self.groups
            .write()
            .await
            .entry(task_id)
            .or_default()
            .insert(connection);
    }

    async fn leave(&self, connection: u64, task_id: TaskId) {
        let mut groups = self.groups.write().await;
        if let Some(members) = groups.get_mut(&task_id) {
            members.remove(&connection);
            if members.is_empty() {
                groups.remove(&task_id);
            }
        }
    }

    /// Sends `event` to every connection in `task_id`'s group.
    ///
    /// Returns the number of connections it was queued for.
    pub async fn broadcast(&self, task_id: TaskId, event: HubEvent) -> usize {
        let members: Vec<u64> = self
            .groups
            .read()
            .await
            .get(&task_id)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default();
        if members.is_empty() {
            return 0;
        }
        let frame = HubFrame::Push { task_id, event };
        let bytes = match codec::encode(&frame) {
            Ok(b) => b,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode push");
                return 0;
            }
        };
        let connections = self.connections.read().await;
        let delivered = members
            .iter()
            .filter_map(|id| connections.get(id))
            .filter(|c| c.tx.send(Message::Binary(bytes.clone().into())).is_ok())
            .count();
        drop(connections);
        tracing::debug!(task_id = %task_id, delivered, "broadcast");
        delivered
    }

    /// Number of connections in `task_id`'s group.
    pub async fn group_size(&self, task_id: TaskId) -> usize {
        self.groups.read().await.get(&task_id).map_or(0, HashSet::len)
    }

    /// Number of authenticated connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Send a Close frame to every connection. Clients see a dropped
    /// session and reconnect.
    pub async fn close_all_connections(&self) {
        let conns = self.connections.read().await;
        for (id, conn) in conns.iter() {
            tracing::info!(connection = id, user_id = %conn.user_id, "closing connection");
            let _ = conn.tx.send(Message::Close(None));
        }
    }
}

/// Handles an upgraded WebSocket connection.
///
/// 1. Wait for `Authenticate`; reply `Authenticated` or `Error`.
/// 2. Serve `Invoke` frames, answering each with a `Completion`.
/// 3. On disconnect, drop the connection from every group.
pub async fn handle_socket(socket: WebSocket, state: Arc<HubState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let user_id = match wait_for_authenticate(&mut ws_receiver, state.max_frame_size).await {
        Ok(user_id) => user_id,
        Err(reason) => {
            tracing::warn!(reason = %reason, "authentication failed");
            let _ = send_frame(&mut ws_sender, &HubFrame::Error { reason }).await;
            return;
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let connection = state.register(&user_id, tx.clone()).await;

    let ack = HubFrame::Authenticated {
        user_id: user_id.clone(),
    };
    if let Err(e) = send_frame(&mut ws_sender, &ack).await {
        tracing::error!(user_id = %user_id, error = %e, "failed to send Authenticated");
        state.unregister(connection).await;
        return;
    }
    tracing::info!(user_id = %user_id, connection, "connection authenticated");

    let writer_user = user_id.clone();
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(user_id = %writer_user, "WebSocket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let reader_user = user_id.clone();
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Binary(data) => {
                    handle_frame(&reader_state, connection, &reader_user, &data, &tx).await;
                }
                Message::Close(_) => {
                    tracing::info!(user_id = %reader_user, "received close frame");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => write_task.abort(),
        _ = &mut write_task => read_task.abort(),
    }

    state.unregister(connection).await;
    tracing::info!(user_id = %user_id, connection, "connection closed");
}

async fn wait_for_authenticate(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
    max_frame_size: usize,
) -> Result<String, String> {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Binary(data) => {
                return match codec::decode_bounded(&data, max_frame_size) {
                    Ok(HubFrame::Authenticate { credential }) if credential.trim().is_empty() => {
                        Err("empty credential".to_string())
                    }
                    Ok(HubFrame::Authenticate { credential }) => Ok(credential),
                    Ok(other) => Err(format!("expected Authenticate, got {other:?}")),
                    Err(e) => Err(e.to_string()),
                };
            }
            Message::Close(_) => return Err("closed before authenticating".to_string()),
            _ => {}
        }
    }
    Err("closed before authenticating".to_string())
}

async fn handle_frame(
    state: &HubState,
    connection: u64,
    user_id: &str,
    data: &[u8],
    tx: &mpsc::UnboundedSender<Message>,
) {
    let frame = match codec::decode_bounded(data, state.max_frame_size) {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(user_id = %user_id, error = %e, "undecodable frame");
            queue_frame(tx, &HubFrame::Error { reason: e.to_string() });
            return;
        }
    };

    let (invocation_id, method) = match frame {
        HubFrame::Invoke { invocation_id, method } => (invocation_id, method),
        other => {
            tracing::warn!(user_id = %user_id, frame = ?other, "unexpected frame from client");
            return;
        }
    };

    tracing::debug!(user_id = %user_id, method = method.name(), task_id = %method.task_id(), "invoke");
    match method {
        HubMethod::JoinTaskGroup(task_id) => {
            state.join(connection, task_id).await;
            queue_frame(
                tx,
                &HubFrame::Completion {
                    invocation_id,
                    error: None,
                },
            );
            queue_frame(
                tx,
                &HubFrame::Push {
                    task_id,
                    event: HubEvent::JoinedGroup(task_id),
                },
            );
        }
        HubMethod::LeaveTaskGroup(task_id) => {
            state.leave(connection, task_id).await;
            queue_frame(
                tx,
                &HubFrame::Completion {
                    invocation_id,
                    error: None,
                },
            );
        }
    }
}

fn queue_frame(tx: &mpsc::UnboundedSender<Message>, frame: &HubFrame) {
    match codec::encode(frame) {
        Ok(bytes) => {
            let _ = tx.send(Message::Binary(bytes.into()));
        }
        Err(e) => tracing::error!(error = %e, "failed to encode frame"),
    }
}

async fn send_frame(
    ws_sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    frame: &HubFrame,
) -> Result<(), String> {
    let bytes = codec::encode(frame).map_err(|e| e.to_string())?;
    ws_sender
        .send(Message::Binary(bytes.into()))
        .await
        .map_err(|e| format!("WebSocket send error: {e}"))
}

/// axum handler that upgrades an HTTP request to a hub connection.
pub async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<HubState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
