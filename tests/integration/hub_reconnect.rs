// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! Reconnect behaviour of [`ConnectionManager`] against a real hub.
//!
//! The hub's `close_all_connections` drops every session from the server
//! side, which is what a hub restart looks like to the client. The manager
//! must come back on its own and rejoin every group it had joined.

use std::sync::Arc;
use std::time::Duration;

use tasksync::connection::{ConnectionEvent, ConnectionManager, ConnectionState, ReconnectPolicy};
use tasksync::transport::ws::WsConnector;
use tasksync_hub::hub::HubState;
use tasksync_proto::hub::HubEvent;
use tasksync_proto::task::TaskId;
use tokio::sync::mpsc;

const TASK: TaskId = TaskId::new(42);

fn fast_policy() -> ReconnectPolicy {
    ReconnectPolicy::new(vec![Duration::ZERO, Duration::from_millis(50)])
}

async fn start_hub() -> (String, Arc<HubState>) {
    let state = Arc::new(HubState::new());
    let (addr, _handle) = tasksync_hub::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .unwrap();
    (format!("ws://{addr}/hub"), state)
}

/// Polls the hub until `task_id`'s group has `size` members.
async fn wait_group_size(hub: &HubState, task_id: TaskId, size: usize) {
    for _ in 0..250 {
        if hub.group_size(task_id).await == size {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("group {task_id} never reached {size} members");
}

/// Polls the hub until it holds `count` authenticated connections.
async fn wait_connections(hub: &HubState, count: usize) {
    for _ in 0..250 {
        if hub.connection_count().await == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("hub never reached {count} connections");
}

/// Waits for the next push event, skipping state changes.
async fn next_push(events: &mut mpsc::Receiver<ConnectionEvent>) -> (TaskId, HubEvent) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await.expect("event channel closed") {
                ConnectionEvent::Push { task_id, event } => return (task_id, event),
                ConnectionEvent::StateChanged(_) => {}
            }
        }
    })
    .await
    .expect("no push event")
}

/// Consumes events until the state changes to `target`.
async fn wait_state(events: &mut mpsc::Receiver<ConnectionEvent>, target: ConnectionState) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if events.recv().await.expect("event channel closed") == ConnectionEvent::StateChanged(target) {
                return;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("never reached {target}"));
}

#[tokio::test]
async fn rejoins_groups_after_server_side_close() {
    let (url, hub) = start_hub().await;
    let (manager, mut events) = ConnectionManager::new(WsConnector::new(url), fast_policy(), 64);

    manager.start("alice", None).await;
    manager.join(TASK).await.unwrap();
    assert_eq!(next_push(&mut events).await, (TASK, HubEvent::JoinedGroup(TASK)));
    assert_eq!(hub.group_size(TASK).await, 1);

    hub.close_all_connections().await;
    wait_state(&mut events, ConnectionState::Reconnecting).await;
    wait_state(&mut events, ConnectionState::Connected).await;
    assert_eq!(next_push(&mut events).await, (TASK, HubEvent::JoinedGroup(TASK)));
    wait_group_size(&hub, TASK, 1).await;

    // Pushes flow on the new session.
    assert_eq!(hub.broadcast(TASK, HubEvent::JoinedGroup(TASK)).await, 1);
    assert_eq!(next_push(&mut events).await.0, TASK);

    manager.stop();
}

#[tokio::test]
async fn keeps_retrying_until_hub_comes_up() {
    // Reserve a port, then release it so the first attempts are refused.
    let addr = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap();
    let connector = WsConnector::new(format!("ws://{addr}/hub"))
        .with_connect_timeout(Duration::from_millis(500));
    let (manager, _events) = ConnectionManager::new(connector, fast_policy(), 64);
    manager.launch("bob");

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(manager.state(), ConnectionState::Connecting);

    let state = Arc::new(HubState::new());
    tasksync_hub::start_server_with_state(&addr.to_string(), Arc::clone(&state))
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), manager.wait_connected())
        .await
        .expect("never connected");
    wait_connections(&state, 1).await;

    manager.stop();
}

#[tokio::test]
async fn stop_leaves_groups_and_disconnects() {
    let (url, hub) = start_hub().await;
    let (manager, mut events) = ConnectionManager::new(WsConnector::new(url), fast_policy(), 64);

    manager.start("carol", Some(TASK)).await;
    assert_eq!(next_push(&mut events).await, (TASK, HubEvent::JoinedGroup(TASK)));
    assert_eq!(hub.group_size(TASK).await, 1);

    manager.stop();

    wait_connections(&hub, 0).await;
    assert_eq!(hub.group_size(TASK).await, 0);
    let mut state = manager.subscribe_state();
    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == ConnectionState::Disconnected),
    )
    .await
    .unwrap()
    .unwrap();
}

#[tokio::test]
async fn leave_stops_pushes_for_that_group() {
    let (url, hub) = start_hub().await;
    let other = TaskId::new(43);
    let (manager, mut events) = ConnectionManager::new(WsConnector::new(url), fast_policy(), 64);

    manager.start("dave", None).await;
    manager.join(TASK).await.unwrap();
    manager.join(other).await.unwrap();
    next_push(&mut events).await;
    next_push(&mut events).await;

    manager.leave(TASK);
    wait_group_size(&hub, TASK, 0).await;

    assert_eq!(hub.broadcast(TASK, HubEvent::JoinedGroup(TASK)).await, 0);
    assert_eq!(hub.broadcast(other, HubEvent::JoinedGroup(other)).await, 1);
    assert_eq!(next_push(&mut events).await.0, other);

    manager.stop();
}
