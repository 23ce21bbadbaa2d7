//! In-memory comment, reply and task status store backing the REST routes.
//!
//! Replies are stored flat and nested on read, so a reply's children are
//! always derived from `parent_reply_id` links and never drift out of sync.
//! Deleting a comment removes its replies; deleting a reply removes its
//! descendants.

use std::collections::{BTreeMap, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};

use tasksync_proto::comment::{Author, CommentDto, NewComment, NewReply, ReplyDto, ServerId};
use tasksync_proto::task::{TaskId, TaskStatus};
use tokio::sync::RwLock;

/// Why a store operation was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The comment or reply does not exist.
    #[error("{kind} {id} not found")]
    NotFound {
        /// `"comment"` or `"reply"`.
        kind: &'static str,
        /// Requested id.
        id: ServerId,
    },
    /// The caller does not own the entity.
    #[error("{user_id} may not modify {kind} {id}")]
    Forbidden {
        /// `"comment"` or `"reply"`.
        kind: &'static str,
        /// Target id.
        id: ServerId,
        /// Caller.
        user_id: String,
    },
    /// The request contradicts stored state.
    #[error("invalid request: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone)]
struct StoredComment {
    task_id: TaskId,
    content: String,
    author: Author,
    created_at_ms: u64,
    updated_at_ms: Option<u64>,
}

#[derive(Debug, Clone)]
struct StoredReply {
    task_id: TaskId,
    comment_id: ServerId,
    parent_reply_id: Option<ServerId>,
    content: String,
    author: Author,
    created_at_ms: u64,
    updated_at_ms: Option<u64>,
}

#[derive(Debug, Default)]
struct Tables {
    next_id: u64,
    comments: BTreeMap<ServerId, StoredComment>,
    replies: BTreeMap<ServerId, StoredReply>,
    statuses: HashMap<TaskId, TaskStatus>,
}

impl Tables {
    fn allocate(&mut self) -> ServerId {
        self.next_id += 1;
        ServerId::new(self.next_id)
    }

    fn comment_dto(&self, id: ServerId, comment: &StoredComment) -> CommentDto {
        CommentDto {
            id,
            task_id: comment.task_id,
            content: comment.content.clone(),
            author: comment.author.clone(),
            created_at_ms: comment.created_at_ms,
            updated_at_ms: comment.updated_at_ms,
            replies: Some(self.children(id, None)),
        }
    }

    fn reply_dto(&self, id: ServerId, reply: &StoredReply) -> ReplyDto {
        ReplyDto {
            id,
            task_id: reply.task_id,
            comment_id: Some(reply.comment_id),
            parent_reply_id: reply.parent_reply_id,
            content: reply.content.clone(),
            author: reply.author.clone(),
            created_at_ms: reply.created_at_ms,
            updated_at_ms: reply.updated_at_ms,
            replies: Some(self.children(reply.comment_id, Some(id))),
        }
    }

    fn children(&self, comment_id: ServerId, parent: Option<ServerId>) -> Vec<ReplyDto> {
        self.replies
            .iter()
            .filter(|(_, r)| r.comment_id == comment_id && r.parent_reply_id == parent)
            .map(|(id, r)| self.reply_dto(*id, r))
            .collect()
    }

    /// `root` and every reply beneath it.
    fn subtree(&self, root: ServerId) -> Vec<ServerId> {
        let mut out = vec![root];
        let mut i = 0;
        while let Some(&current) = out.get(i) {
            out.extend(
                self.replies
                    .iter()
                    .filter(|(_, r)| r.parent_reply_id == Some(current))
                    .map(|(id, _)| *id),
            );
            i += 1;
        }
        out
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

fn check_owner(kind: &'static str, id: ServerId, owner: &Author, user_id: &str) -> Result<(), StoreError> {
    if owner.user_id == user_id {
        Ok(())
    } else {
        Err(StoreError::Forbidden {
            kind,
            id,
            user_id: user_id.to_string(),
        })
    }
}

/// Thread-safe in-memory store. Ids are allocated from one counter shared by
/// comments and replies, starting at 1.
#[derive(Debug, Default)]
pub struct CommentStore {
    tables: RwLock<Tables>,
}

impl CommentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a comment.
    ///
    /// # Errors
    ///
    /// [`StoreError::Invalid`] if the content is blank.
    pub async fn create_comment(&self, author: Author, body: &NewComment) -> Result<CommentDto, StoreError> {
        if body.content.trim().is_empty() {
            return Err(StoreError::Invalid("empty content".to_string()));
        }
        let mut tables = self.tables.write().await;
        let id = tables.allocate();
        let stored = StoredComment {
            task_id: body.task_id,
            content: body.content.clone(),
            author,
            created_at_ms: now_ms(),
            updated_at_ms: None,
        };
        let dto = tables.comment_dto(id, &stored);
        tables.comments.insert(id, stored);
        drop(tables);
        Ok(dto)
    }

    /// Creates a reply to a comment, or to a reply of the same comment.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if the comment or parent is missing,
    /// [`StoreError::Invalid`] if they belong elsewhere or the content is
    /// blank.
    pub async fn create_reply(&self, author: Author, body: &NewReply) -> Result<ReplyDto, StoreError> {
        if body.content.trim().is_empty() {
            return Err(StoreError::Invalid("empty content".to_string()));
        }
        let mut tables = self.tables.write().await;
        let comment = tables.comments.get(&body.comment_id).ok_or(StoreError::NotFound {
            kind: "comment",
            id: body.comment_id,
        })?;
        if comment.task_id != body.task_id {
            return Err(StoreError::Invalid(format!(
                "comment {} is not on task {}",
                body.comment_id, body.task_id
            )));
        }
        if let Some(parent) = body.parent() {
            let parent_reply = tables.replies.get(&parent).ok_or(StoreError::NotFound {
                kind: "reply",
                id: parent,
            })?;
            if parent_reply.comment_id != body.comment_id {
                return Err(StoreError::Invalid(format!(
                    "reply {parent} is not under comment {}",
                    body.comment_id
                )));
            }
        }
        let id = tables.allocate();
        let stored = StoredReply {
            task_id: body.task_id,
            comment_id: body.comment_id,
            parent_reply_id: body.parent(),
            content: body.content.clone(),
            author,
            created_at_ms: now_ms(),
            updated_at_ms: None,
        };
        tables.replies.insert(id, stored.clone());
        let dto = tables.reply_dto(id, &stored);
        drop(tables);
        Ok(dto)
    }

    /// Replaces a comment's content. Returns the comment without replies.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`], [`StoreError::Forbidden`] or
    /// [`StoreError::Invalid`] for blank content.
    pub async fn edit_comment(&self, id: ServerId, user_id: &str, content: &str) -> Result<CommentDto, StoreError> {
        if content.trim().is_empty() {
            return Err(StoreError::Invalid("empty content".to_string()));
        }
        let mut tables = self.tables.write().await;
        let comment = tables
            .comments
            .get_mut(&id)
            .ok_or(StoreError::NotFound { kind: "comment", id })?;
        check_owner("comment", id, &comment.author, user_id)?;
        comment.content = content.to_string();
        comment.updated_at_ms = Some(now_ms());
        Ok(CommentDto {
            id,
            task_id: comment.task_id,
            content: comment.content.clone(),
            author: comment.author.clone(),
            created_at_ms: comment.created_at_ms,
            updated_at_ms: comment.updated_at_ms,
            replies: None,
        })
    }

    /// Replaces a reply's content. Returns the reply without children.
    ///
    /// # Errors
    ///
    /// Same as [`Self::edit_comment`].
    pub async fn edit_reply(&self, id: ServerId, user_id: &str, content: &str) -> Result<ReplyDto, StoreError> {
        if content.trim().is_empty() {
            return Err(StoreError::Invalid("empty content".to_string()));
        }
        let mut tables = self.tables.write().await;
        let reply = tables
            .replies
            .get_mut(&id)
            .ok_or(StoreError::NotFound { kind: "reply", id })?;
        check_owner("reply", id, &reply.author, user_id)?;
        reply.content = content.to_string();
        reply.updated_at_ms = Some(now_ms());
        Ok(ReplyDto {
            id,
            task_id: reply.task_id,
            comment_id: Some(reply.comment_id),
            parent_reply_id: reply.parent_reply_id,
            content: reply.content.clone(),
            author: reply.author.clone(),
            created_at_ms: reply.created_at_ms,
            updated_at_ms: reply.updated_at_ms,
            replies: None,
        })
    }

    /// Deletes a comment and its replies. Returns its task, or `None` if it
    /// did not exist.
    ///
    /// # Errors
    ///
    /// [`StoreError::Forbidden`] if `user_id` is not the author.
    pub async fn delete_comment(&self, id: ServerId, user_id: &str) -> Result<Option<TaskId>, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(comment) = tables.comments.get(&id) else {
            return Ok(None);
        };
        check_owner("comment", id, &comment.author, user_id)?;
        let task_id = comment.task_id;
        tables.comments.remove(&id);
        tables.replies.retain(|_, r| r.comment_id != id);
        Ok(Some(task_id))
    }

    /// Deletes a reply and its descendants. Returns its task and comment, or
    /// `None` if it did not exist.
    ///
    /// # Errors
    ///
    /// [`StoreError::Forbidden`] if `user_id` is not the author.
    pub async fn delete_reply(&self, id: ServerId, user_id: &str) -> Result<Option<(TaskId, ServerId)>, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(reply) = tables.replies.get(&id) else {
            return Ok(None);
        };
        check_owner("reply", id, &reply.author, user_id)?;
        let found = (reply.task_id, reply.comment_id);
        let doomed = tables.subtree(id);
        for reply_id in doomed {
            tables.replies.remove(&reply_id);
        }
        Ok(Some(found))
    }

    /// One comment with its reply tree.
    pub async fn comment(&self, id: ServerId) -> Option<CommentDto> {
        let tables = self.tables.read().await;
        tables.comments.get(&id).map(|c| tables.comment_dto(id, c))
    }

    /// One reply with full linkage and its children.
    pub async fn reply(&self, id: ServerId) -> Option<ReplyDto> {
        let tables = self.tables.read().await;
        tables.replies.get(&id).map(|r| tables.reply_dto(id, r))
    }

    /// A task's comments, oldest first, each with its reply tree.
    pub async fn list(&self, task_id: TaskId) -> Vec<CommentDto> {
        let tables = self.tables.read().await;
        tables
            .comments
            .iter()
            .filter(|(_, c)| c.task_id == task_id)
            .map(|(id, c)| tables.comment_dto(*id, c))
            .collect()
    }

    /// A task's status. Unknown tasks are pending.
    pub async fn status(&self, task_id: TaskId) -> TaskStatus {
        self.tables
            .read()
            .await
            .statuses
            .get(&task_id)
            .copied()
            .unwrap_or(TaskStatus::Pending)
    }

    /// Sets a task's status. Only the same status or the next one is
    /// accepted.
    ///
    /// # Errors
    ///
    /// [`StoreError::Invalid`] for any other move.
    pub async fn set_status(&self, task_id: TaskId, status: TaskStatus) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let current = tables.statuses.get(&task_id).copied().unwrap_or(TaskStatus::Pending);
        if status != current && current.next() != Some(status) {
            return Err(StoreError::Invalid(format!(
                "task {task_id} cannot move from {current} to {status}"
            )));
        }
        tables.statuses.insert(task_id, status);
        Ok(())
    }
}
