//! `TaskSync` hub library.
//!
//! Exposes the hub server for use in tests and embedding. The hub accepts
//! authenticated WebSocket connections, tracks task group membership, and
//! serves the REST write path whose writes it broadcasts to those groups.

pub mod api;
pub mod config;
pub mod hub;
pub mod store;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::hub::HubState;

/// Starts the hub on `addr` with fresh state.
///
/// This is the primary entry point used by both `main.rs` and test code.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<(SocketAddr, JoinHandle<()>), Box<dyn std::error::Error + Send + Sync>> {
    start_server_with_state(addr, Arc::new(HubState::new())).await
}

/// Starts the hub with pre-built state, so callers can keep a handle to it.
///
/// Routes: `GET /hub` (WebSocket) and the REST routes in [`api::routes`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<HubState>,
) -> Result<(SocketAddr, JoinHandle<()>), Box<dyn std::error::Error + Send + Sync>> {
    let app = axum::Router::new()
        .route("/hub", axum::routing::get(hub::ws_handler))
        .merge(api::routes())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "hub server error");
        }
    });

    Ok((bound_addr, handle))
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tasksync_proto::codec;
    use tasksync_proto::hub::{HubEvent, HubFrame, HubMethod};
    use tasksync_proto::task::TaskId;
    use tokio_tungstenite::tungstenite;

    use super::*;

    type Client =
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

    async fn send(ws: &mut Client, frame: &HubFrame) {
        let bytes = codec::encode(frame).unwrap();
        ws.send(tungstenite::Message::Binary(bytes.into()))
            .await
            .unwrap();
    }

    async fn recv(ws: &mut Client) -> HubFrame {
        let msg = tokio::time::timeout(std::time::Duration::from_secs(5), ws.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        codec::decode(&msg.into_data()).unwrap()
    }

    async fn connect(addr: SocketAddr, user: &str) -> Client {
        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/hub"))
            .await
            .unwrap();
        send(
            &mut ws,
            &HubFrame::Authenticate {
                credential: user.to_string(),
            },
        )
        .await;
        assert_eq!(
            recv(&mut ws).await,
            HubFrame::Authenticated {
                user_id: user.to_string()
            }
        );
        ws
    }

    #[tokio::test]
    async fn empty_credential_is_refused() {
        let (addr, _handle) = start_server("127.0.0.1:0").await.unwrap();
        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/hub"))
            .await
            .unwrap();
        send(
            &mut ws,
            &HubFrame::Authenticate {
                credential: "  ".to_string(),
            },
        )
        .await;
        assert!(matches!(recv(&mut ws).await, HubFrame::Error { .. }));
    }

    #[tokio::test]
    async fn joined_connection_receives_broadcasts() {
        let state = Arc::new(HubState::new());
        let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
            .await
            .unwrap();
        let mut ws = connect(addr, "alice").await;
        let task = TaskId::new(11);

        send(
            &mut ws,
            &HubFrame::Invoke {
                invocation_id: 1,
                method: HubMethod::JoinTaskGroup(task),
            },
        )
        .await;
        assert_eq!(
            recv(&mut ws).await,
            HubFrame::Completion {
                invocation_id: 1,
                error: None
            }
        );
        assert_eq!(
            recv(&mut ws).await,
            HubFrame::Push {
                task_id: task,
                event: HubEvent::JoinedGroup(task)
            }
        );

        assert_eq!(state.broadcast(task, HubEvent::JoinedGroup(task)).await, 1);
        assert!(matches!(recv(&mut ws).await, HubFrame::Push { task_id, .. } if task_id == task));
    }

    #[tokio::test]
    async fn disconnect_clears_membership() {
        let state = Arc::new(HubState::new());
        let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
            .await
            .unwrap();
        let mut ws = connect(addr, "bob").await;
        let task = TaskId::new(5);
        send(
            &mut ws,
            &HubFrame::Invoke {
                invocation_id: 1,
                method: HubMethod::JoinTaskGroup(task),
            },
        )
        .await;
        recv(&mut ws).await;
        assert_eq!(state.group_size(task).await, 1);

        ws.close(None).await.unwrap();
        for _ in 0..50 {
            if state.connection_count().await == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(state.connection_count().await, 0);
        assert_eq!(state.group_size(task).await, 0);
    }
}
