//! Sans-I/O sync session.
//!
//! [`SyncSession`] owns every open [`TaskView`] and the one
//! [`EventDispatcher`] shared by all of them. Its operations never touch the
//! network: they mutate local state and return [`Effect`]s that the driver
//! in [`crate::net`] carries out, feeding the results back as
//! [`Completion`]s.

use std::collections::HashMap;
use std::time::Duration;

use tasksync_proto::comment::{Author, CommentDto, NewComment, NewReply, ReplyDto, ServerId};
use tasksync_proto::hub::{EventKind, HubEvent};
use tasksync_proto::task::{TaskId, TaskStatus};

use crate::connection::ConnectionState;
use crate::dispatch::EventDispatcher;
use crate::error::SyncError;
use crate::model::{CommentEntry, EntityKind, EntryId, TempId};
use crate::pending::{CreatePayload, DEFAULT_OWNED_GRACE};
use crate::reconcile::{Applied, ReconciliationEngine, Removed};
use crate::status::{self, Transition};
use crate::write::WriteError;

/// Per-task state: the reconciled thread and the last known status.
#[derive(Debug)]
pub struct TaskView {
    engine: ReconciliationEngine,
    status: Option<TaskStatus>,
}

impl TaskView {
    fn new(task_id: TaskId, status: Option<TaskStatus>, grace: Duration) -> Self {
        Self {
            engine: ReconciliationEngine::with_grace(task_id, grace),
            status,
        }
    }

    /// The task this view shows.
    #[must_use]
    pub const fn task_id(&self) -> TaskId {
        self.engine.task_id()
    }

    /// Comments in display order.
    #[must_use]
    pub fn comments(&self) -> &[CommentEntry] {
        self.engine.comments()
    }

    /// Last known status, if any.
    #[must_use]
    pub const fn status(&self) -> Option<TaskStatus> {
        self.status
    }

    /// The reconciliation engine behind this view.
    #[must_use]
    pub const fn engine(&self) -> &ReconciliationEngine {
        &self.engine
    }
}

/// A call the driver must make on the write path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteRequest {
    /// Create a comment for a pending optimistic entry.
    CreateComment {
        /// Owning view.
        task_id: TaskId,
        /// Optimistic entry to confirm or roll back.
        temp_id: TempId,
        /// Request body.
        body: NewComment,
    },
    /// Create a reply for a pending optimistic entry.
    CreateReply {
        /// Owning view.
        task_id: TaskId,
        /// Optimistic entry to confirm or roll back.
        temp_id: TempId,
        /// Request body.
        body: NewReply,
    },
    /// Delete a comment or reply already removed from the view.
    Delete {
        /// Owning view.
        task_id: TaskId,
        /// What is deleted.
        kind: EntityKind,
        /// Authoritative id.
        id: ServerId,
    },
    /// Fetch a reply whose push lacked linkage.
    FetchReply {
        /// Owning view.
        task_id: TaskId,
        /// Reply id.
        id: ServerId,
    },
    /// Load the initial thread of a view.
    LoadComments {
        /// View to seed.
        task_id: TaskId,
    },
    /// Submit a locally validated status change.
    UpdateStatus {
        /// Task to change.
        task_id: TaskId,
        /// New status.
        status: TaskStatus,
    },
}

/// Result of a [`WriteRequest`], fed back into the session.
#[derive(Debug, Clone)]
pub enum Completion {
    /// A create finished.
    Created {
        /// Owning view.
        task_id: TaskId,
        /// Optimistic entry.
        temp_id: TempId,
        /// What was created.
        kind: EntityKind,
        /// Authoritative id or failure.
        result: Result<ServerId, WriteError>,
    },
    /// A delete finished.
    Deleted {
        /// Owning view.
        task_id: TaskId,
        /// What was deleted.
        kind: EntityKind,
        /// Authoritative id.
        id: ServerId,
        /// Outcome.
        result: Result<(), WriteError>,
    },
    /// A fallback reply fetch finished.
    ReplyFetched {
        /// Owning view.
        task_id: TaskId,
        /// Reply id that was fetched.
        id: ServerId,
        /// Fetched payload or failure.
        result: Result<ReplyDto, WriteError>,
    },
    /// The initial thread load finished.
    CommentsLoaded {
        /// View to seed.
        task_id: TaskId,
        /// Snapshot or failure.
        result: Result<Vec<CommentDto>, WriteError>,
    },
    /// A status change finished.
    StatusUpdated {
        /// Task that changed.
        task_id: TaskId,
        /// Requested status.
        status: TaskStatus,
        /// Outcome.
        result: Result<(), WriteError>,
    },
}

/// What the UI is told.
#[derive(Debug, Clone)]
pub enum SyncNotice {
    /// The view's thread changed; re-render it.
    ViewUpdated(TaskId),
    /// A user action failed; its optimistic effect was undone.
    WriteFailed {
        /// Affected view.
        task_id: TaskId,
        /// What failed.
        error: SyncError,
    },
    /// The shared connection changed state.
    ConnectionChanged(ConnectionState),
    /// A push could not be applied and was dropped.
    EventDropped {
        /// Group the event arrived on.
        task_id: TaskId,
        /// Event name.
        event: EventKind,
        /// Why it was dropped.
        reason: String,
    },
    /// The initial thread of a view arrived.
    ThreadLoaded(TaskId),
    /// A create or delete was accepted by the write path.
    WriteConfirmed {
        /// Affected view.
        task_id: TaskId,
        /// What was written.
        kind: EntityKind,
        /// Authoritative id of the created or deleted entity.
        id: ServerId,
    },
    /// A user action was refused before reaching the network.
    ActionRejected {
        /// View the action targeted.
        task_id: TaskId,
        /// Why it was refused.
        error: SyncError,
    },
    /// The hub acknowledged a group join.
    GroupJoined(TaskId),
    /// A status change was accepted.
    StatusChanged {
        /// Task that changed.
        task_id: TaskId,
        /// Its new status.
        status: TaskStatus,
    },
}

/// Work produced by a session operation.
#[derive(Debug, Clone)]
pub enum Effect {
    /// Perform this call and report back with [`SyncSession::complete`].
    Write(WriteRequest),
    /// Forward this notice to the UI.
    Notice(SyncNotice),
}

/// Dispatcher context: everything a push handler may touch.
#[derive(Debug, Default)]
struct Views {
    views: HashMap<TaskId, TaskView>,
    effects: Vec<Effect>,
}

impl Views {
    fn view_mut(&mut self, task_id: TaskId) -> Result<&mut TaskView, SyncError> {
        self.views
            .get_mut(&task_id)
            .ok_or(SyncError::UnknownView(task_id))
    }

    fn apply_event(&mut self, task_id: TaskId, event: &HubEvent) {
        let Some(view) = self.views.get_mut(&task_id) else {
            tracing::debug!(task_id = %task_id, event = %event.kind(), "push for closed view");
            return;
        };
        match view.engine.apply_remote_event(event) {
            Applied::NeedsFetch(id) => {
                tracing::debug!(task_id = %task_id, id = %id, "reply parent unknown, fetching");
                self.effects
                    .push(Effect::Write(WriteRequest::FetchReply { task_id, id }));
            }
            applied if applied.changed() => {
                self.effects
                    .push(Effect::Notice(SyncNotice::ViewUpdated(task_id)));
            }
            _ => {}
        }
    }
}

/// All open views of one user on one connection.
#[derive(Debug)]
pub struct SyncSession {
    author: Author,
    owned_grace: Duration,
    state: Views,
    dispatcher: EventDispatcher<Views>,
    deleting: HashMap<(TaskId, EntityKind, ServerId), Removed>,
}

impl SyncSession {
    /// Creates a session acting as `author`.
    #[must_use]
    pub fn new(author: Author) -> Self {
        Self::with_grace(author, DEFAULT_OWNED_GRACE)
    }

    /// Creates a session with a custom echo-suppression window.
    #[must_use]
    pub fn with_grace(author: Author, owned_grace: Duration) -> Self {
        Self {
            author,
            owned_grace,
            state: Views::default(),
            dispatcher: EventDispatcher::new(),
            deleting: HashMap::new(),
        }
    }

    /// The acting user.
    #[must_use]
    pub const fn author(&self) -> &Author {
        &self.author
    }

    /// Replaces the acting user, e.g. with the id the hub authenticated.
    pub fn set_author(&mut self, author: Author) {
        self.author = author;
    }

    /// An open view.
    #[must_use]
    pub fn view(&self, task_id: TaskId) -> Option<&TaskView> {
        self.state.views.get(&task_id)
    }

    /// Ids of all open views.
    pub fn open_views(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.state.views.keys().copied()
    }

    /// Whether push handlers are registered.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        EventKind::ALL
            .iter()
            .all(|kind| self.dispatcher.is_registered(*kind))
    }

    /// Opens a view and requests its initial thread.
    ///
    /// Opening a view that is already open only updates its status.
    pub fn open_view(&mut self, task_id: TaskId, status: Option<TaskStatus>) -> Vec<Effect> {
        if self.state.views.is_empty() {
            self.register_handlers();
        }
        if let Some(view) = self.state.views.get_mut(&task_id) {
            if status.is_some() {
                view.status = status;
            }
            return Vec::new();
        }
        self.state
            .views
            .insert(task_id, TaskView::new(task_id, status, self.owned_grace));
        tracing::debug!(task_id = %task_id, "view opened");
        vec![Effect::Write(WriteRequest::LoadComments { task_id })]
    }

    /// Closes a view. In-flight results for it are dropped on arrival.
    ///
    /// Returns `false` if the view was not open.
    pub fn close_view(&mut self, task_id: TaskId) -> bool {
        if self.state.views.remove(&task_id).is_none() {
            return false;
        }
        self.deleting.retain(|(task, _, _), _| *task != task_id);
        if self.state.views.is_empty() {
            self.dispatcher.clear();
        }
        tracing::debug!(task_id = %task_id, "view closed");
        true
    }

    /// Adds a comment optimistically and requests its creation.
    ///
    /// # Errors
    ///
    /// [`SyncError::EmptyContent`] or [`SyncError::UnknownView`].
    pub fn submit_comment(&mut self, task_id: TaskId, content: &str) -> Result<Vec<Effect>, SyncError> {
        let content = non_empty(content)?;
        let body = NewComment {
            task_id,
            content: content.to_string(),
        };
        let view = self.state.view_mut(task_id)?;
        let temp_id = view
            .engine
            .begin_create(CreatePayload::Comment(body.clone()), &self.author)?;
        Ok(vec![
            Effect::Notice(SyncNotice::ViewUpdated(task_id)),
            Effect::Write(WriteRequest::CreateComment {
                task_id,
                temp_id,
                body,
            }),
        ])
    }

    /// Adds a reply optimistically and requests its creation.
    ///
    /// `parent` is `None` for a direct reply to the comment.
    ///
    /// # Errors
    ///
    /// [`SyncError::Unconfirmed`] if the comment or parent is still pending,
    /// [`SyncError::UnknownTarget`] if either is not in the view,
    /// [`SyncError::EmptyContent`], or [`SyncError::UnknownView`].
    pub fn submit_reply(
        &mut self,
        task_id: TaskId,
        comment: EntryId,
        parent: Option<EntryId>,
        content: &str,
    ) -> Result<Vec<Effect>, SyncError> {
        let content = non_empty(content)?;
        let comment_id = confirmed(comment)?;
        let parent_id = parent.map(confirmed).transpose()?;
        let body = NewReply::new(task_id, comment_id, parent_id, content);
        let view = self.state.view_mut(task_id)?;
        let temp_id = view
            .engine
            .begin_create(CreatePayload::Reply(body.clone()), &self.author)?;
        Ok(vec![
            Effect::Notice(SyncNotice::ViewUpdated(task_id)),
            Effect::Write(WriteRequest::CreateReply {
                task_id,
                temp_id,
                body,
            }),
        ])
    }

    /// Removes a comment the acting user wrote and requests its deletion.
    ///
    /// # Errors
    ///
    /// [`SyncError::Unconfirmed`], [`SyncError::UnknownTarget`],
    /// [`SyncError::PermissionDenied`], or [`SyncError::UnknownView`].
    pub fn delete_comment(&mut self, task_id: TaskId, id: EntryId) -> Result<Vec<Effect>, SyncError> {
        self.delete(task_id, EntityKind::Comment, id)
    }

    /// Removes a reply the acting user wrote and requests its deletion.
    ///
    /// # Errors
    ///
    /// Same as [`Self::delete_comment`].
    pub fn delete_reply(&mut self, task_id: TaskId, id: EntryId) -> Result<Vec<Effect>, SyncError> {
        self.delete(task_id, EntityKind::Reply, id)
    }

    /// Validates a status change locally and requests it.
    ///
    /// A request for the current status yields no effects.
    ///
    /// # Errors
    ///
    /// [`SyncError::InvalidTransition`] naming the next legal status,
    /// [`SyncError::UnknownStatus`], or [`SyncError::UnknownView`].
    pub fn request_status_change(
        &mut self,
        task_id: TaskId,
        requested: TaskStatus,
    ) -> Result<Vec<Effect>, SyncError> {
        let view = self.state.view_mut(task_id)?;
        let current = view.status.ok_or(SyncError::UnknownStatus(task_id))?;
        match status::validate(current, requested)? {
            Transition::Unchanged => Ok(Vec::new()),
            Transition::Advance(status) => Ok(vec![Effect::Write(WriteRequest::UpdateStatus {
                task_id,
                status,
            })]),
        }
    }

    /// Routes a push through the dispatcher.
    pub fn handle_push(&mut self, task_id: TaskId, event: &HubEvent) -> Vec<Effect> {
        self.dispatcher.dispatch(&mut self.state, task_id, event);
        std::mem::take(&mut self.state.effects)
    }

    /// Applies the result of a [`WriteRequest`].
    pub fn complete(&mut self, completion: Completion) -> Vec<Effect> {
        match completion {
            Completion::Created {
                task_id,
                temp_id,
                kind,
                result,
            } => self.complete_create(task_id, temp_id, kind, result),
            Completion::Deleted {
                task_id,
                kind,
                id,
                result,
            } => self.complete_delete(task_id, kind, id, result),
            Completion::ReplyFetched {
                task_id,
                id,
                result,
            } => self.complete_fetch(task_id, id, result),
            Completion::CommentsLoaded { task_id, result } => self.complete_load(task_id, result),
            Completion::StatusUpdated {
                task_id,
                status,
                result,
            } => self.complete_status(task_id, status, result),
        }
    }

    fn register_handlers(&mut self) {
        for kind in EventKind::ALL {
            if kind == EventKind::JoinedGroup {
                self.dispatcher.on(kind, |views: &mut Views, task_id, _| {
                    views
                        .effects
                        .push(Effect::Notice(SyncNotice::GroupJoined(task_id)));
                });
            } else {
                self.dispatcher.on(kind, Views::apply_event);
            }
        }
    }

    fn delete(&mut self, task_id: TaskId, kind: EntityKind, id: EntryId) -> Result<Vec<Effect>, SyncError> {
        let id = confirmed(id)?;
        let user_id = self.author.user_id.clone();
        let view = self.state.view_mut(task_id)?;
        let owner = match kind {
            EntityKind::Comment => view.engine.comment(EntryId::Confirmed(id)).map(|c| &c.author),
            EntityKind::Reply => view.engine.reply(EntryId::Confirmed(id)).map(|r| &r.author),
        }
        .ok_or(SyncError::UnknownTarget { kind, id })?;
        if owner.user_id != user_id {
            return Err(SyncError::PermissionDenied {
                kind,
                id,
                user_id,
                owner_id: owner.user_id.clone(),
            });
        }
        let removed = view
            .engine
            .take(kind, id)
            .ok_or(SyncError::UnknownTarget { kind, id })?;
        self.deleting.insert((task_id, kind, id), removed);
        Ok(vec![
            Effect::Notice(SyncNotice::ViewUpdated(task_id)),
            Effect::Write(WriteRequest::Delete { task_id, kind, id }),
        ])
    }

    fn complete_create(
        &mut self,
        task_id: TaskId,
        temp_id: TempId,
        kind: EntityKind,
        result: Result<ServerId, WriteError>,
    ) -> Vec<Effect> {
        let Some(view) = self.state.views.get_mut(&task_id) else {
            return Vec::new();
        };
        match result {
            Ok(id) => {
                let confirmation = view.engine.confirm_local(temp_id, id);
                tracing::debug!(task_id = %task_id, %kind, id = %id, ?confirmation, "create confirmed");
                vec![
                    Effect::Notice(SyncNotice::ViewUpdated(task_id)),
                    Effect::Notice(SyncNotice::WriteConfirmed { task_id, kind, id }),
                ]
            }
            Err(source) => {
                tracing::warn!(task_id = %task_id, %kind, err = %source, "create failed, rolling back");
                view.engine.rollback_local(temp_id);
                vec![
                    Effect::Notice(SyncNotice::ViewUpdated(task_id)),
                    Effect::Notice(SyncNotice::WriteFailed {
                        task_id,
                        error: SyncError::WriteFailed { kind, source },
                    }),
                ]
            }
        }
    }

    fn complete_delete(
        &mut self,
        task_id: TaskId,
        kind: EntityKind,
        id: ServerId,
        result: Result<(), WriteError>,
    ) -> Vec<Effect> {
        let removed = self.deleting.remove(&(task_id, kind, id));
        let Err(source) = result else {
            return vec![Effect::Notice(SyncNotice::WriteConfirmed { task_id, kind, id })];
        };
        tracing::warn!(task_id = %task_id, %kind, id = %id, err = %source, "delete failed, restoring");
        let mut effects = Vec::new();
        if let (Some(removed), Some(view)) = (removed, self.state.views.get_mut(&task_id))
            && view.engine.restore(removed)
        {
            effects.push(Effect::Notice(SyncNotice::ViewUpdated(task_id)));
        }
        effects.push(Effect::Notice(SyncNotice::WriteFailed {
            task_id,
            error: SyncError::WriteFailed { kind, source },
        }));
        effects
    }

    fn complete_fetch(
        &mut self,
        task_id: TaskId,
        id: ServerId,
        result: Result<ReplyDto, WriteError>,
    ) -> Vec<Effect> {
        let Some(view) = self.state.views.get_mut(&task_id) else {
            return Vec::new();
        };
        let applied = result
            .map_err(|e| SyncError::MalformedEvent {
                event: EventKind::NewReply,
                reason: format!("fetch of reply {id} failed: {e}"),
            })
            .and_then(|dto| view.engine.apply_fetched_reply(&dto));
        match applied {
            Ok(applied) if applied.changed() => {
                vec![Effect::Notice(SyncNotice::ViewUpdated(task_id))]
            }
            Ok(_) => Vec::new(),
            Err(e) => {
                tracing::warn!(task_id = %task_id, id = %id, err = %e, "dropping reply event");
                vec![Effect::Notice(SyncNotice::EventDropped {
                    task_id,
                    event: EventKind::NewReply,
                    reason: e.to_string(),
                })]
            }
        }
    }

    fn complete_load(&mut self, task_id: TaskId, result: Result<Vec<CommentDto>, WriteError>) -> Vec<Effect> {
        let Some(view) = self.state.views.get_mut(&task_id) else {
            return Vec::new();
        };
        match result {
            Ok(snapshot) => {
                let added = view.engine.seed(&snapshot);
                tracing::debug!(task_id = %task_id, added, "thread loaded");
                vec![
                    Effect::Notice(SyncNotice::ViewUpdated(task_id)),
                    Effect::Notice(SyncNotice::ThreadLoaded(task_id)),
                ]
            }
            Err(source) => {
                tracing::warn!(task_id = %task_id, err = %source, "thread load failed");
                vec![Effect::Notice(SyncNotice::WriteFailed {
                    task_id,
                    error: SyncError::WriteFailed {
                        kind: EntityKind::Comment,
                        source,
                    },
                })]
            }
        }
    }

    fn complete_status(
        &mut self,
        task_id: TaskId,
        status: TaskStatus,
        result: Result<(), WriteError>,
    ) -> Vec<Effect> {
        match result {
            Ok(()) => {
                if let Some(view) = self.state.views.get_mut(&task_id) {
                    view.status = Some(status);
                }
                vec![Effect::Notice(SyncNotice::StatusChanged { task_id, status })]
            }
            Err(source) => {
                tracing::warn!(task_id = %task_id, %status, err = %source, "status change failed");
                vec![Effect::Notice(SyncNotice::WriteFailed {
                    task_id,
                    error: SyncError::StatusFailed { status, source },
                })]
            }
        }
    }
}

fn non_empty(content: &str) -> Result<&str, SyncError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        Err(SyncError::EmptyContent)
    } else {
        Ok(trimmed)
    }
}

fn confirmed(id: EntryId) -> Result<ServerId, SyncError> {
    match id {
        EntryId::Confirmed(id) => Ok(id),
        EntryId::Pending(temp) => Err(SyncError::Unconfirmed(temp)),
    }
}
