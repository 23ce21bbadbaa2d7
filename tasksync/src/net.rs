//! Async driver wiring a [`SyncSession`] to the hub and the write path.
//!
//! The session itself does no I/O. This module owns it inside one tokio
//! task and feeds it three inputs: [`SyncCommand`]s from the UI, pushes and
//! state changes from the [`ConnectionManager`], and [`Completion`]s of the
//! write calls it spawned. Everything the UI needs to know comes back as
//! [`SyncNotice`]s.
//!
//! ```text
//! UI  ─── SyncCommand ──→  driver task  ←── ConnectionEvent ─── hub
//!     ←── SyncNotice ───   (SyncSession) ── WriteRequest ──→ WriteApi
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use tasksync_proto::comment::Author;
use tasksync_proto::task::{TaskId, TaskStatus};

use crate::connection::{ConnectionEvent, ConnectionManager, ReconnectPolicy};
use crate::model::{CommentEntry, EntityKind, EntryId};
use crate::pending::DEFAULT_OWNED_GRACE;
use crate::session::{Completion, Effect, SyncNotice, SyncSession, WriteRequest};
use crate::transport::Connector;
use crate::write::{WriteApi, WriteError, with_timeout};

/// Default channel capacity for commands, notices and connection events.
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Default bound on a single write call.
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(15);

/// Commands sent from the UI to the driver.
#[derive(Debug)]
pub enum SyncCommand {
    /// Open a task's view, load its thread and join its group.
    OpenView {
        /// Task to show.
        task_id: TaskId,
        /// Status the UI already knows, if any.
        status: Option<TaskStatus>,
    },
    /// Close a view and leave its group.
    CloseView(TaskId),
    /// Post a comment.
    SubmitComment {
        /// Target view.
        task_id: TaskId,
        /// Comment text.
        content: String,
    },
    /// Post a reply to a comment or to another reply.
    SubmitReply {
        /// Target view.
        task_id: TaskId,
        /// Comment the thread hangs off.
        comment: EntryId,
        /// Reply being answered, `None` for a direct reply.
        parent: Option<EntryId>,
        /// Reply text.
        content: String,
    },
    /// Delete one of the user's comments.
    DeleteComment {
        /// Target view.
        task_id: TaskId,
        /// Comment to delete.
        id: EntryId,
    },
    /// Delete one of the user's replies.
    DeleteReply {
        /// Target view.
        task_id: TaskId,
        /// Reply to delete.
        id: EntryId,
    },
    /// Move a task to its next status.
    ChangeStatus {
        /// Task to change.
        task_id: TaskId,
        /// Requested status.
        status: TaskStatus,
    },
    /// Read a view's current contents. `None` if the view is not open.
    Snapshot {
        /// View to read.
        task_id: TaskId,
        /// Where to send the copy.
        reply: oneshot::Sender<Option<ViewSnapshot>>,
    },
    /// Leave every group, close the connection and stop the driver.
    Shutdown,
}

/// Owned copy of one view, for rendering outside the driver task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewSnapshot {
    /// Comments in display order.
    pub comments: Vec<CommentEntry>,
    /// Last known status.
    pub status: Option<TaskStatus>,
}

/// Configuration for the driver.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Credential presented to the hub.
    pub credential: String,
    /// Identity used for optimistic entries and ownership checks.
    pub author: Author,
    /// Bound on each write call.
    pub write_timeout: Duration,
    /// How long an own write's echo is suppressed.
    pub owned_grace: Duration,
    /// Reconnect delays.
    pub backoff: ReconnectPolicy,
    /// Capacity of the command, notice and event channels.
    pub channel_capacity: usize,
}

impl SyncConfig {
    /// Creates a config with default timeouts, backoff and capacities.
    #[must_use]
    pub fn new(credential: impl Into<String>, author: Author) -> Self {
        Self {
            credential: credential.into(),
            author,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            owned_grace: DEFAULT_OWNED_GRACE,
            backoff: ReconnectPolicy::default(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Channels and connection handle returned by [`spawn_sync`].
#[derive(Debug)]
pub struct SyncHandle<C: Connector> {
    /// Send commands here.
    pub commands: mpsc::Sender<SyncCommand>,
    /// Drain notices from here.
    pub notices: mpsc::Receiver<SyncNotice>,
    /// The shared connection, for state observation.
    pub connection: ConnectionManager<C>,
}

/// Spawns the driver task and starts connecting in the background.
///
/// The driver runs until [`SyncCommand::Shutdown`] or until every command
/// sender is dropped. Connecting never blocks command handling: views can be
/// opened and written to while the hub is still unreachable.
pub fn spawn_sync<C, W>(connector: C, api: W, config: SyncConfig) -> SyncHandle<C>
where
    C: Connector,
    W: WriteApi,
{
    let capacity = config.channel_capacity.max(1);
    let (connection, connection_events) = ConnectionManager::new(connector, config.backoff.clone(), capacity);
    let (cmd_tx, cmd_rx) = mpsc::channel(capacity);
    let (notice_tx, notice_rx) = mpsc::channel(capacity);
    let (done_tx, done_rx) = mpsc::channel(capacity);

    connection.launch(&config.credential);

    let driver = Driver {
        session: SyncSession::with_grace(config.author, config.owned_grace),
        connection: connection.clone(),
        api: Arc::new(api),
        write_timeout: config.write_timeout,
        notices: notice_tx,
        completions: done_tx,
    };
    tokio::spawn(driver.run(cmd_rx, connection_events, done_rx));

    SyncHandle {
        commands: cmd_tx,
        notices: notice_rx,
        connection,
    }
}

struct Driver<C: Connector, W> {
    session: SyncSession,
    connection: ConnectionManager<C>,
    api: Arc<W>,
    write_timeout: Duration,
    notices: mpsc::Sender<SyncNotice>,
    completions: mpsc::Sender<Completion>,
}

impl<C: Connector, W: WriteApi> Driver<C, W> {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<SyncCommand>,
        mut connection_events: mpsc::Receiver<ConnectionEvent>,
        mut completions: mpsc::Receiver<Completion>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    None | Some(SyncCommand::Shutdown) => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some(event) = connection_events.recv() => match event {
                    ConnectionEvent::StateChanged(state) => {
                        self.notify(SyncNotice::ConnectionChanged(state)).await;
                    }
                    ConnectionEvent::Push { task_id, event } => {
                        let effects = self.session.handle_push(task_id, &event);
                        self.run_effects(effects).await;
                    }
                },
                Some(done) = completions.recv() => {
                    let effects = self.session.complete(done);
                    self.run_effects(effects).await;
                }
            }
        }

        self.connection.stop();
        tracing::info!("sync driver stopped");
    }

    async fn handle_command(&mut self, command: SyncCommand) {
        let (task_id, result) = match command {
            SyncCommand::OpenView { task_id, status } => {
                let connection = self.connection.clone();
                tokio::spawn(async move {
                    if let Err(e) = connection.join(task_id).await {
                        tracing::warn!(task_id = %task_id, err = %e, "group join abandoned");
                    }
                });
                (task_id, Ok(self.session.open_view(task_id, status)))
            }
            SyncCommand::CloseView(task_id) => {
                self.session.close_view(task_id);
                self.connection.leave(task_id);
                return;
            }
            SyncCommand::SubmitComment { task_id, content } => {
                (task_id, self.session.submit_comment(task_id, &content))
            }
            SyncCommand::SubmitReply {
                task_id,
                comment,
                parent,
                content,
            } => (
                task_id,
                self.session.submit_reply(task_id, comment, parent, &content),
            ),
            SyncCommand::DeleteComment { task_id, id } => (task_id, self.session.delete_comment(task_id, id)),
            SyncCommand::DeleteReply { task_id, id } => (task_id, self.session.delete_reply(task_id, id)),
            SyncCommand::ChangeStatus { task_id, status } => {
                (task_id, self.session.request_status_change(task_id, status))
            }
            SyncCommand::Snapshot { task_id, reply } => {
                let snapshot = self.session.view(task_id).map(|view| ViewSnapshot {
                    comments: view.comments().to_vec(),
                    status: view.status(),
                });
                let _ = reply.send(snapshot);
                return;
            }
            SyncCommand::Shutdown => return,
        };

        match result {
            Ok(effects) => self.run_effects(effects).await,
            Err(error) => {
                tracing::debug!(task_id = %task_id, err = %error, "action rejected");
                self.notify(SyncNotice::ActionRejected { task_id, error }).await;
            }
        }
    }

    async fn run_effects(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Notice(notice) => self.notify(notice).await,
                Effect::Write(request) => self.spawn_write(request),
            }
        }
    }

    fn spawn_write(&self, request: WriteRequest) {
        let api = Arc::clone(&self.api);
        let done = self.completions.clone();
        let limit = self.write_timeout;
        tokio::spawn(async move {
            let completion = execute(api.as_ref(), request, limit).await;
            let _ = done.send(completion).await;
        });
    }

    async fn notify(&self, notice: SyncNotice) {
        if self.notices.send(notice).await.is_err() {
            tracing::trace!("notice receiver dropped");
        }
    }
}

/// Performs one write call and packages its outcome.
async fn execute<W: WriteApi>(api: &W, request: WriteRequest, limit: Duration) -> Completion {
    match request {
        WriteRequest::CreateComment { task_id, temp_id, body } => Completion::Created {
            task_id,
            temp_id,
            kind: EntityKind::Comment,
            result: with_timeout(limit, api.create_comment(&body))
                .await
                .map(|created| created.id),
        },
        WriteRequest::CreateReply { task_id, temp_id, body } => Completion::Created {
            task_id,
            temp_id,
            kind: EntityKind::Reply,
            result: with_timeout(limit, api.create_reply(&body))
                .await
                .map(|created| created.id),
        },
        WriteRequest::Delete { task_id, kind, id } => {
            let outcome = match kind {
                EntityKind::Comment => with_timeout(limit, api.delete_comment(id)).await,
                EntityKind::Reply => with_timeout(limit, api.delete_reply(id)).await,
            };
            Completion::Deleted {
                task_id,
                kind,
                id,
                result: outcome.and_then(|deleted| {
                    if deleted.success {
                        Ok(())
                    } else {
                        Err(WriteError::NotApplied)
                    }
                }),
            }
        }
        WriteRequest::FetchReply { task_id, id } => Completion::ReplyFetched {
            task_id,
            id,
            result: with_timeout(limit, api.fetch_reply(id)).await,
        },
        WriteRequest::LoadComments { task_id } => Completion::CommentsLoaded {
            task_id,
            result: with_timeout(limit, api.list_comments(task_id)).await,
        },
        WriteRequest::UpdateStatus { task_id, status } => Completion::StatusUpdated {
            task_id,
            status,
            result: with_timeout(limit, api.update_task_status(task_id, status)).await,
        },
    }
}
