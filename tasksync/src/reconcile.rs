//! Merge of local optimistic mutations and remote push events.
//!
//! The engine owns the comment thread of one task. Every path is
//! idempotent on authoritative id, so the result does not depend on how
//! local write responses and remote pushes interleave:
//!
//! - a push whose id the client just created is an echo and is ignored;
//! - a push whose id is already present is a redelivery and is ignored;
//! - a confirmation whose id already arrived by push only drops the
//!   temporary entry.

use std::time::Duration;

use tasksync_proto::comment::{Author, CommentDto, ReplyDto, ServerId};
use tasksync_proto::hub::{EventKind, HubEvent};
use tasksync_proto::task::TaskId;

use crate::error::SyncError;
use crate::model::{CommentEntry, EntityKind, EntryId, ReplyEntry, TempId};
use crate::pending::{
    CreatePayload, DEFAULT_OWNED_GRACE, Optimistic, PendingMutationTracker, RecentlyOwned,
};

/// Why an event left state untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Echo of a create this client just made.
    OwnEcho,
    /// An entity with this id is already present.
    Duplicate,
    /// The update or deletion targets an id that is not present.
    MissingTarget,
    /// The payload belongs to another task.
    OtherTask,
    /// The event carries no entity state.
    NotApplicable,
}

/// Result of applying one remote event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// A new entity was added.
    Inserted,
    /// An existing entity was changed in place.
    Updated,
    /// An entity was removed.
    Removed,
    /// Nothing changed.
    Ignored(IgnoreReason),
    /// The reply's parent is unknown; fetch the full reply and retry with
    /// [`ReconciliationEngine::apply_fetched_reply`].
    NeedsFetch(ServerId),
}

impl Applied {
    /// Whether visible state changed.
    #[must_use]
    pub const fn changed(self) -> bool {
        matches!(self, Self::Inserted | Self::Updated | Self::Removed)
    }
}

/// Result of confirming an optimistic create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// The temporary entry now carries the authoritative id.
    Spliced,
    /// A push for the same id won the race; the temporary entry was dropped.
    AlreadyPresent,
    /// No such pending create (already rolled back or never started).
    Unknown,
}

/// Holder of a reply list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    /// Direct replies of a comment.
    Comment(EntryId),
    /// Nested replies of a reply.
    Reply(EntryId),
}

/// Snapshot of a removed entity, enough to put it back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removed {
    /// A comment and its former position.
    Comment {
        /// Position in the thread.
        index: usize,
        /// The entry, with its replies.
        entry: CommentEntry,
    },
    /// A reply, its former holder, and its position there.
    Reply {
        /// Holder of the reply list.
        container: Container,
        /// Position in the holder's list.
        index: usize,
        /// The entry, with its nested replies.
        entry: ReplyEntry,
    },
}

/// Owner of one task's comment thread.
#[derive(Debug)]
pub struct ReconciliationEngine {
    task_id: TaskId,
    comments: Vec<CommentEntry>,
    tracker: PendingMutationTracker,
    owned: RecentlyOwned,
}

impl ReconciliationEngine {
    /// Creates an empty thread for `task_id` with the default echo window.
    #[must_use]
    pub fn new(task_id: TaskId) -> Self {
        Self::with_grace(task_id, DEFAULT_OWNED_GRACE)
    }

    /// Creates an empty thread with a custom echo window.
    #[must_use]
    pub fn with_grace(task_id: TaskId, grace: Duration) -> Self {
        Self {
            task_id,
            comments: Vec::new(),
            tracker: PendingMutationTracker::new(),
            owned: RecentlyOwned::new(grace),
        }
    }

    /// The task this thread belongs to.
    #[must_use]
    pub const fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Comments in display order.
    #[must_use]
    pub fn comments(&self) -> &[CommentEntry] {
        &self.comments
    }

    /// In-flight creates.
    #[must_use]
    pub const fn tracker(&self) -> &PendingMutationTracker {
        &self.tracker
    }

    /// Finds a comment by local id.
    #[must_use]
    pub fn comment(&self, id: EntryId) -> Option<&CommentEntry> {
        self.comments.iter().find(|c| c.id == id)
    }

    /// Finds a reply at any depth by local id.
    #[must_use]
    pub fn reply(&self, id: EntryId) -> Option<&ReplyEntry> {
        self.comments
            .iter()
            .find_map(|c| find_reply_in(&c.replies, id))
    }

    /// Whether an entity with the authoritative id is present.
    #[must_use]
    pub fn contains(&self, kind: EntityKind, id: ServerId) -> bool {
        let id = EntryId::Confirmed(id);
        match kind {
            EntityKind::Comment => self.comment(id).is_some(),
            EntityKind::Reply => self.reply(id).is_some(),
        }
    }

    /// Merges an initial snapshot, skipping ids already present.
    ///
    /// Returns how many comments were added.
    pub fn seed(&mut self, snapshot: &[CommentDto]) -> usize {
        let mut added = 0;
        for dto in snapshot {
            if self.insert_remote_comment(dto) == Applied::Inserted {
                added += 1;
            }
        }
        added
    }

    /// Starts an optimistic create and inserts its entity.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UnknownTarget`] if a reply's comment or parent
    /// reply is not in the thread.
    pub fn begin_create(
        &mut self,
        payload: CreatePayload,
        author: &Author,
    ) -> Result<TempId, SyncError> {
        if let CreatePayload::Reply(body) = &payload {
            if self.comment(EntryId::Confirmed(body.comment_id)).is_none() {
                return Err(SyncError::UnknownTarget {
                    kind: EntityKind::Comment,
                    id: body.comment_id,
                });
            }
            if let Some(parent) = body.parent()
                && self.reply(EntryId::Confirmed(parent)).is_none()
            {
                return Err(SyncError::UnknownTarget {
                    kind: EntityKind::Reply,
                    id: parent,
                });
            }
        }
        let (temp_id, optimistic) = self.tracker.begin_create(payload, author);
        self.apply_local_optimistic(optimistic);
        Ok(temp_id)
    }

    /// Inserts an optimistic entity. Returns `false` if it had nowhere to go.
    pub fn apply_local_optimistic(&mut self, entity: Optimistic) -> bool {
        match entity {
            Optimistic::Comment(entry) => {
                if self.comment(entry.id).is_some() {
                    return false;
                }
                self.comments.push(entry);
                true
            }
            Optimistic::Reply(entry) => self.attach_reply(entry).is_ok(),
        }
    }

    /// Swaps a temporary entity for its authoritative id.
    ///
    /// The id is registered as recently owned either way, so a late echo
    /// is ignored.
    pub fn confirm_local(&mut self, temp_id: TempId, id: ServerId) -> Confirmation {
        let Some(mutation) = self.tracker.complete_create(temp_id, id) else {
            tracing::debug!(temp_id = %temp_id, id = %id, "confirmation for unknown pending create");
            return Confirmation::Unknown;
        };
        let kind = mutation.kind;
        self.owned.insert(kind, id);

        let pending = EntryId::Pending(temp_id);
        if self.contains(kind, id) {
            self.remove_entry(kind, pending);
            tracing::debug!(task_id = %self.task_id, %kind, id = %id, "push arrived before write response");
            return Confirmation::AlreadyPresent;
        }
        if self.rekey(kind, pending, EntryId::Confirmed(id)) {
            Confirmation::Spliced
        } else {
            Confirmation::Unknown
        }
    }

    /// Drops a failed optimistic create. Returns `true` if anything was removed.
    pub fn rollback_local(&mut self, temp_id: TempId) -> bool {
        let Some(mutation) = self.tracker.fail_create(temp_id) else {
            return false;
        };
        self.remove_entry(mutation.kind, EntryId::Pending(temp_id))
            .is_some()
    }

    /// Applies one push event.
    pub fn apply_remote_event(&mut self, event: &HubEvent) -> Applied {
        let applied = match event {
            HubEvent::ReceiveNewComment(dto) => self.insert_remote_comment(dto),
            HubEvent::ReceiveNewReply(dto) => self.insert_remote_reply(dto),
            HubEvent::ReceiveCommentUpdate(dto) => self.update_comment(dto),
            HubEvent::ReceiveReplyUpdate(dto) => self.update_reply(dto),
            HubEvent::ReceiveCommentDeletion(deletion) => {
                self.apply_remote_deletion(EntityKind::Comment, deletion.id)
            }
            HubEvent::ReceiveReplyDeletion(deletion) => {
                self.apply_remote_deletion(EntityKind::Reply, deletion.id)
            }
            HubEvent::JoinedGroup(_) => Applied::Ignored(IgnoreReason::NotApplicable),
        };
        if let Applied::Ignored(reason) = applied {
            tracing::debug!(task_id = %self.task_id, event = %event.kind(), ?reason, "push ignored");
        }
        applied
    }

    /// Retries a reply insert with a fetched full payload.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::MalformedEvent`] if the reply still cannot be
    /// attached to a parent in this thread.
    pub fn apply_fetched_reply(&mut self, dto: &ReplyDto) -> Result<Applied, SyncError> {
        if let Some(ignored) = self.screen_create(EntityKind::Reply, dto.id, dto.task_id) {
            return Ok(ignored);
        }
        let Some(comment_id) = dto.comment_id else {
            return Err(SyncError::MalformedEvent {
                event: EventKind::NewReply,
                reason: format!("reply {} has no comment linkage", dto.id),
            });
        };
        let entry = ReplyEntry::from_dto(dto, comment_id);
        if self.reply_container(comment_id, entry.parent_reply_id).is_none() {
            return Err(SyncError::MalformedEvent {
                event: EventKind::NewReply,
                reason: format!("parent of reply {} is not in the thread", dto.id),
            });
        }
        match self.attach_reply(entry) {
            Ok(()) => Ok(Applied::Inserted),
            Err(_) => Err(SyncError::MalformedEvent {
                event: EventKind::NewReply,
                reason: format!("reply {} could not be attached", dto.id),
            }),
        }
    }

    /// Removes an entity by authoritative id. Absent ids are a no-op.
    pub fn apply_remote_deletion(&mut self, kind: EntityKind, id: ServerId) -> Applied {
        if self.remove_entry(kind, EntryId::Confirmed(id)).is_some() {
            Applied::Removed
        } else {
            Applied::Ignored(IgnoreReason::MissingTarget)
        }
    }

    /// Removes an entity for a local delete, keeping a snapshot for rollback.
    pub fn take(&mut self, kind: EntityKind, id: ServerId) -> Option<Removed> {
        self.remove_entry(kind, EntryId::Confirmed(id))
    }

    /// Puts a removed entity back where it was.
    ///
    /// Returns `false` if its holder is gone or the id is present again.
    pub fn restore(&mut self, removed: Removed) -> bool {
        match removed {
            Removed::Comment { index, entry } => {
                if self.comment(entry.id).is_some() {
                    return false;
                }
                let index = index.min(self.comments.len());
                self.comments.insert(index, entry);
                true
            }
            Removed::Reply {
                container,
                index,
                entry,
            } => {
                if self.reply(entry.id).is_some() {
                    return false;
                }
                let Some(list) = self.container_replies_mut(container) else {
                    tracing::debug!(id = %entry.id, "holder of restored reply is gone");
                    return false;
                };
                let index = index.min(list.len());
                list.insert(index, entry);
                true
            }
        }
    }

    /// Common gate for remote creates: wrong task, own echo, redelivery.
    fn screen_create(&mut self, kind: EntityKind, id: ServerId, task_id: TaskId) -> Option<Applied> {
        if task_id != self.task_id {
            return Some(Applied::Ignored(IgnoreReason::OtherTask));
        }
        if self.owned.contains(kind, id) {
            return Some(Applied::Ignored(IgnoreReason::OwnEcho));
        }
        if self.contains(kind, id) {
            return Some(Applied::Ignored(IgnoreReason::Duplicate));
        }
        None
    }

    fn insert_remote_comment(&mut self, dto: &CommentDto) -> Applied {
        if let Some(ignored) = self.screen_create(EntityKind::Comment, dto.id, dto.task_id) {
            return ignored;
        }
        self.comments.push(CommentEntry::from(dto));
        Applied::Inserted
    }

    fn insert_remote_reply(&mut self, dto: &ReplyDto) -> Applied {
        if let Some(ignored) = self.screen_create(EntityKind::Reply, dto.id, dto.task_id) {
            return ignored;
        }
        let Some(comment_id) = dto.comment_id else {
            return Applied::NeedsFetch(dto.id);
        };
        match self.attach_reply(ReplyEntry::from_dto(dto, comment_id)) {
            Ok(()) => Applied::Inserted,
            Err(_) => Applied::NeedsFetch(dto.id),
        }
    }

    fn update_comment(&mut self, dto: &CommentDto) -> Applied {
        let Some(comment) = self
            .comments
            .iter_mut()
            .find(|c| c.id == EntryId::Confirmed(dto.id))
        else {
            return Applied::Ignored(IgnoreReason::MissingTarget);
        };
        comment.content.clone_from(&dto.content);
        comment.author.clone_from(&dto.author);
        comment.updated_at_ms = dto.updated_at_ms;
        if let Some(replies) = &dto.replies {
            merge_reply_list(&mut comment.replies, replies, dto.id);
        }
        Applied::Updated
    }

    fn update_reply(&mut self, dto: &ReplyDto) -> Applied {
        let id = EntryId::Confirmed(dto.id);
        let Some(reply) = self
            .comments
            .iter_mut()
            .find_map(|c| find_reply_in_mut(&mut c.replies, id))
        else {
            return Applied::Ignored(IgnoreReason::MissingTarget);
        };
        update_reply_fields(reply, dto);
        Applied::Updated
    }

    /// Where a reply to `comment_id` (optionally under `parent`) belongs.
    fn reply_container(&self, comment_id: ServerId, parent: Option<ServerId>) -> Option<Container> {
        let comment = self.comment(EntryId::Confirmed(comment_id))?;
        match parent {
            None => Some(Container::Comment(comment.id)),
            Some(parent) => find_reply_in(&comment.replies, EntryId::Confirmed(parent))
                .map(|r| Container::Reply(r.id)),
        }
    }

    /// Appends a reply under its parent; hands it back if the parent is absent.
    fn attach_reply(&mut self, entry: ReplyEntry) -> Result<(), ReplyEntry> {
        let Some(container) = self.reply_container(entry.comment_id, entry.parent_reply_id) else {
            return Err(entry);
        };
        if self.reply(entry.id).is_some() {
            return Err(entry);
        }
        match self.container_replies_mut(container) {
            Some(list) => {
                list.push(entry);
                Ok(())
            }
            None => Err(entry),
        }
    }

    fn container_replies_mut(&mut self, container: Container) -> Option<&mut Vec<ReplyEntry>> {
        match container {
            Container::Comment(id) => self
                .comments
                .iter_mut()
                .find(|c| c.id == id)
                .map(|c| &mut c.replies),
            Container::Reply(id) => self
                .comments
                .iter_mut()
                .find_map(|c| find_reply_in_mut(&mut c.replies, id))
                .map(|r| &mut r.replies),
        }
    }

    fn rekey(&mut self, kind: EntityKind, from: EntryId, to: EntryId) -> bool {
        match kind {
            EntityKind::Comment => match self.comments.iter_mut().find(|c| c.id == from) {
                Some(comment) => {
                    comment.id = to;
                    true
                }
                None => false,
            },
            EntityKind::Reply => match self
                .comments
                .iter_mut()
                .find_map(|c| find_reply_in_mut(&mut c.replies, from))
            {
                Some(reply) => {
                    reply.id = to;
                    true
                }
                None => false,
            },
        }
    }

    fn remove_entry(&mut self, kind: EntityKind, id: EntryId) -> Option<Removed> {
        match kind {
            EntityKind::Comment => {
                let index = self.comments.iter().position(|c| c.id == id)?;
                Some(Removed::Comment {
                    index,
                    entry: self.comments.remove(index),
                })
            }
            EntityKind::Reply => self.comments.iter_mut().find_map(|c| {
                let container = Container::Comment(c.id);
                remove_reply_in(&mut c.replies, id, container).map(|(container, index, entry)| {
                    Removed::Reply {
                        container,
                        index,
                        entry,
                    }
                })
            }),
        }
    }
}

fn find_reply_in(replies: &[ReplyEntry], id: EntryId) -> Option<&ReplyEntry> {
    replies.iter().find_map(|r| {
        if r.id == id {
            Some(r)
        } else {
            find_reply_in(&r.replies, id)
        }
    })
}

fn find_reply_in_mut(replies: &mut [ReplyEntry], id: EntryId) -> Option<&mut ReplyEntry> {
    for reply in replies {
        if reply.id == id {
            return Some(reply);
        }
        if let Some(found) = find_reply_in_mut(&mut reply.replies, id) {
            return Some(found);
        }
    }
    None
}

fn remove_reply_in(
    replies: &mut Vec<ReplyEntry>,
    id: EntryId,
    container: Container,
) -> Option<(Container, usize, ReplyEntry)> {
    if let Some(index) = replies.iter().position(|r| r.id == id) {
        return Some((container, index, replies.remove(index)));
    }
    replies.iter_mut().find_map(|r| {
        let holder = Container::Reply(r.id);
        remove_reply_in(&mut r.replies, id, holder)
    })
}

/// Replaces mutable fields; nested replies merge only when carried.
fn update_reply_fields(reply: &mut ReplyEntry, dto: &ReplyDto) {
    reply.content.clone_from(&dto.content);
    reply.author.clone_from(&dto.author);
    reply.updated_at_ms = dto.updated_at_ms;
    if let Some(nested) = &dto.replies {
        merge_reply_list(&mut reply.replies, nested, reply.comment_id);
    }
}

/// Upserts carried replies by id. Local entries absent from the payload stay.
fn merge_reply_list(local: &mut Vec<ReplyEntry>, incoming: &[ReplyDto], comment_id: ServerId) {
    for dto in incoming {
        let id = EntryId::Confirmed(dto.id);
        if let Some(existing) = local.iter_mut().find(|r| r.id == id) {
            update_reply_fields(existing, dto);
        } else if find_reply_in(local, id).is_none() {
            local.push(ReplyEntry::from_dto(dto, comment_id));
        }
    }
}
