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

//! Full round trips: sync driver, REST write path, and WebSocket pushes
//! against a real hub on a loopback port.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tasksync::error::SyncError;
use tasksync::http::HttpWriteApi;
use tasksync::model::{EntityKind, EntryId};
use tasksync::net::{self, SyncCommand, SyncConfig, SyncHandle, ViewSnapshot};
use tasksync::session::SyncNotice;
use tasksync::transport::ws::WsConnector;
use tasksync_hub::hub::HubState;
use tasksync_proto::comment::{Author, ServerId};
use tasksync_proto::task::{TaskId, TaskStatus};
use tokio::sync::oneshot;
use url::Url;

const TASK: TaskId = TaskId::new(100);
const WAIT: Duration = Duration::from_secs(5);

struct Client {
    user: String,
    handle: SyncHandle<WsConnector>,
}

impl Client {
    fn spawn(addr: SocketAddr, user: &str) -> Self {
        let connector = WsConnector::new(format!("ws://{addr}/hub"));
        let api = HttpWriteApi::new(Url::parse(&format!("http://{addr}/")).unwrap(), user);
        let config = SyncConfig::new(user, Author::new(user, user));
        Self {
            user: user.to_string(),
            handle: net::spawn_sync(connector, api, config),
        }
    }

    async fn send(&self, command: SyncCommand) {
        self.handle.commands.send(command).await.unwrap();
    }

    async fn snapshot(&self) -> ViewSnapshot {
        let (reply, rx) = oneshot::channel();
        self.send(SyncCommand::Snapshot { task_id: TASK, reply }).await;
        rx.await.unwrap().expect("view not open")
    }

    /// Receives notices until `pred` matches one.
    async fn expect_notice(&mut self, what: &str, mut pred: impl FnMut(&SyncNotice) -> bool) -> SyncNotice {
        let user = self.user.clone();
        tokio::time::timeout(WAIT, async {
            loop {
                let notice = self.handle.notices.recv().await.expect("driver stopped");
                if pred(&notice) {
                    return notice;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("{user}: no {what} notice"))
    }

    /// Opens the view and waits until the thread is loaded and the group
    /// join is acknowledged, so no later push can be missed.
    async fn open(&mut self, status: Option<TaskStatus>) {
        self.send(SyncCommand::OpenView { task_id: TASK, status }).await;
        let mut loaded = false;
        let mut joined = false;
        self.expect_notice("open", |n| {
            match n {
                SyncNotice::ThreadLoaded(t) if *t == TASK => loaded = true,
                SyncNotice::GroupJoined(t) if *t == TASK => joined = true,
                _ => {}
            }
            loaded && joined
        })
        .await;
    }

    async fn confirmed(&mut self, kind: EntityKind) -> ServerId {
        match self
            .expect_notice("write confirmation", |n| {
                matches!(n, SyncNotice::WriteConfirmed { kind: k, .. } if *k == kind)
            })
            .await
        {
            SyncNotice::WriteConfirmed { id, .. } => id,
            _ => unreachable!(),
        }
    }

    /// Re-reads the view after each notice until `pred` holds.
    async fn wait_view(&mut self, what: &str, pred: impl Fn(&ViewSnapshot) -> bool) -> ViewSnapshot {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let view = self.snapshot().await;
            if pred(&view) {
                return view;
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, self.handle.notices.recv())
                .await
                .is_err()
            {
                panic!("{}: view never showed {what}: {view:?}", self.user);
            }
        }
    }

    async fn shutdown(self) {
        let _ = self.handle.commands.send(SyncCommand::Shutdown).await;
    }
}

async fn start_hub() -> (SocketAddr, Arc<HubState>) {
    let state = Arc::new(HubState::new());
    let (addr, _handle) = tasksync_hub::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .unwrap();
    (addr, state)
}

fn comment_ids(view: &ViewSnapshot) -> Vec<EntryId> {
    view.comments.iter().map(|c| c.id).collect()
}

#[tokio::test]
async fn comments_reach_other_clients_without_echo_duplicates() {
    let (addr, _hub) = start_hub().await;
    let mut alice = Client::spawn(addr, "alice");
    let mut bob = Client::spawn(addr, "bob");
    alice.open(None).await;
    bob.open(None).await;

    alice
        .send(SyncCommand::SubmitComment {
            task_id: TASK,
            content: "first".to_string(),
        })
        .await;
    let id = alice.confirmed(EntityKind::Comment).await;
    let confirmed = EntryId::Confirmed(id);

    let seen = bob
        .wait_view("alice's comment", |v| comment_ids(v) == vec![confirmed])
        .await;
    assert_eq!(seen.comments[0].content, "first");
    assert_eq!(seen.comments[0].author.user_id, "alice");

    // Give alice's own echo time to land, then check it was not re-added.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(comment_ids(&alice.snapshot().await), vec![confirmed]);

    bob.send(SyncCommand::SubmitReply {
        task_id: TASK,
        comment: confirmed,
        parent: None,
        content: "welcome".to_string(),
    })
    .await;
    let reply = EntryId::Confirmed(bob.confirmed(EntityKind::Reply).await);

    let seen = alice
        .wait_view("bob's reply", |v| {
            v.comments
                .first()
                .is_some_and(|c| c.replies.iter().map(|r| r.id).eq([reply]))
        })
        .await;
    assert_eq!(seen.comments[0].replies[0].content, "welcome");

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test]
async fn nested_reply_and_deletions_propagate() {
    let (addr, _hub) = start_hub().await;
    let mut alice = Client::spawn(addr, "alice");
    let mut bob = Client::spawn(addr, "bob");
    alice.open(None).await;
    bob.open(None).await;

    alice
        .send(SyncCommand::SubmitComment {
            task_id: TASK,
            content: "root".to_string(),
        })
        .await;
    let comment = EntryId::Confirmed(alice.confirmed(EntityKind::Comment).await);
    bob.wait_view("root comment", |v| comment_ids(v) == vec![comment])
        .await;

    bob.send(SyncCommand::SubmitReply {
        task_id: TASK,
        comment,
        parent: None,
        content: "outer".to_string(),
    })
    .await;
    let outer = EntryId::Confirmed(bob.confirmed(EntityKind::Reply).await);
    alice
        .wait_view("outer reply", |v| {
            v.comments.first().is_some_and(|c| c.replies.len() == 1)
        })
        .await;

    alice
        .send(SyncCommand::SubmitReply {
            task_id: TASK,
            comment,
            parent: Some(outer),
            content: "inner".to_string(),
        })
        .await;
    let inner = EntryId::Confirmed(alice.confirmed(EntityKind::Reply).await);
    bob.wait_view("inner reply under outer", |v| {
        v.comments
            .first()
            .and_then(|c| c.replies.first())
            .is_some_and(|r| r.replies.iter().map(|n| n.id).eq([inner]))
    })
    .await;

    // Bob cannot delete alice's comment; refused before any network call.
    bob.send(SyncCommand::DeleteComment {
        task_id: TASK,
        id: comment,
    })
    .await;
    let rejected = bob
        .expect_notice("rejection", |n| matches!(n, SyncNotice::ActionRejected { .. }))
        .await;
    assert!(matches!(
        rejected,
        SyncNotice::ActionRejected {
            error: SyncError::PermissionDenied { .. },
            ..
        }
    ));

    // Deleting the outer reply takes the nested one with it everywhere.
    bob.send(SyncCommand::DeleteReply {
        task_id: TASK,
        id: outer,
    })
    .await;
    bob.confirmed(EntityKind::Reply).await;
    alice
        .wait_view("reply subtree removed", |v| {
            v.comments.first().is_some_and(|c| c.replies.is_empty())
        })
        .await;

    alice
        .send(SyncCommand::DeleteComment {
            task_id: TASK,
            id: comment,
        })
        .await;
    alice.confirmed(EntityKind::Comment).await;
    bob.wait_view("empty thread", |v| v.comments.is_empty()).await;

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test]
async fn edits_from_the_rest_api_update_open_views() {
    let (addr, _hub) = start_hub().await;
    let mut alice = Client::spawn(addr, "alice");
    let mut bob = Client::spawn(addr, "bob");
    alice.open(None).await;
    bob.open(None).await;

    alice
        .send(SyncCommand::SubmitComment {
            task_id: TASK,
            content: "draft".to_string(),
        })
        .await;
    let id = alice.confirmed(EntityKind::Comment).await;

    let response = reqwest::Client::new()
        .put(format!("http://{addr}/api/comments/{id}"))
        .bearer_auth("alice")
        .json(&serde_json::json!({ "content": "final" }))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    let view = bob
        .wait_view("edited content", |v| {
            v.comments.first().is_some_and(|c| c.content == "final")
        })
        .await;
    assert!(view.comments[0].updated_at_ms.is_some());
    alice
        .wait_view("edited content", |v| {
            v.comments.first().is_some_and(|c| c.content == "final")
        })
        .await;

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test]
async fn late_joiner_loads_existing_thread() {
    let (addr, _hub) = start_hub().await;
    let mut alice = Client::spawn(addr, "alice");
    alice.open(None).await;
    for text in ["one", "two"] {
        alice
            .send(SyncCommand::SubmitComment {
                task_id: TASK,
                content: text.to_string(),
            })
            .await;
        alice.confirmed(EntityKind::Comment).await;
    }

    let mut carol = Client::spawn(addr, "carol");
    carol.open(None).await;
    let view = carol.snapshot().await;
    let contents: Vec<_> = view.comments.iter().map(|c| c.content.as_str()).collect();
    assert_eq!(contents, ["one", "two"]);
    assert!(view.comments.iter().all(|c| !c.id.is_pending()));

    alice.shutdown().await;
    carol.shutdown().await;
}

#[tokio::test]
async fn status_advances_one_step_at_a_time() {
    let (addr, hub) = start_hub().await;
    let mut alice = Client::spawn(addr, "alice");
    alice.open(Some(TaskStatus::Pending)).await;

    alice
        .send(SyncCommand::ChangeStatus {
            task_id: TASK,
            status: TaskStatus::Completed,
        })
        .await;
    let rejected = alice
        .expect_notice("skip rejection", |n| matches!(n, SyncNotice::ActionRejected { .. }))
        .await;
    assert!(matches!(
        rejected,
        SyncNotice::ActionRejected {
            error: SyncError::InvalidTransition(_),
            ..
        }
    ));
    assert_eq!(hub.store.status(TASK).await, TaskStatus::Pending);

    alice
        .send(SyncCommand::ChangeStatus {
            task_id: TASK,
            status: TaskStatus::InProgress,
        })
        .await;
    alice
        .expect_notice("status change", |n| {
            matches!(n, SyncNotice::StatusChanged { status: TaskStatus::InProgress, .. })
        })
        .await;
    assert_eq!(hub.store.status(TASK).await, TaskStatus::InProgress);
    assert_eq!(alice.snapshot().await.status, Some(TaskStatus::InProgress));

    alice.shutdown().await;
}

#[tokio::test]
async fn closing_a_view_leaves_the_hub_group() {
    let (addr, hub) = start_hub().await;
    let mut alice = Client::spawn(addr, "alice");
    alice.open(None).await;
    assert_eq!(hub.group_size(TASK).await, 1);

    alice.send(SyncCommand::CloseView(TASK)).await;
    for _ in 0..250 {
        if hub.group_size(TASK).await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(hub.group_size(TASK).await, 0);

    let (reply, rx) = oneshot::channel();
    alice
        .send(SyncCommand::Snapshot { task_id: TASK, reply })
        .await;
    assert!(rx.await.unwrap().is_none());

    alice.shutdown().await;
}
