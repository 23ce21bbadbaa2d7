//! Local view model for a task's comment thread.
//!
//! Every entry carries an [`EntryId`] that is either a client-generated
//! temporary id or the authoritative server id, so code that needs an
//! authoritative id has to match on it explicitly.

use std::fmt;

use tasksync_proto::comment::{Author, CommentDto, ReplyDto, ServerId};
use tasksync_proto::task::TaskId;
use uuid::Uuid;

/// Prefix that keeps temporary ids visually distinct from server ids.
pub const TEMP_ID_PREFIX: &str = "tmp-";

/// Client-generated identifier for an unconfirmed entity.
///
/// Backed by a UUID v7, so it can never collide with a numeric
/// [`ServerId`] and sorts by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TempId(Uuid);

impl TempId {
    /// Generates a fresh temporary id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{TEMP_ID_PREFIX}{}", self.0)
    }
}

/// Identity of a comment or reply in local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryId {
    /// Optimistic entry awaiting its write response.
    Pending(TempId),
    /// Entry known to the server.
    Confirmed(ServerId),
}

impl EntryId {
    /// The authoritative id, or `None` while pending.
    #[must_use]
    pub const fn confirmed(self) -> Option<ServerId> {
        match self {
            Self::Confirmed(id) => Some(id),
            Self::Pending(_) => None,
        }
    }

    /// Whether this entry is still awaiting confirmation.
    #[must_use]
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::Pending(_))
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending(temp) => temp.fmt(f),
            Self::Confirmed(id) => id.fmt(f),
        }
    }
}

/// Which kind of entity a mutation creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// Top-level comment.
    Comment,
    /// Reply to a comment or reply.
    Reply,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Comment => write!(f, "comment"),
            Self::Reply => write!(f, "reply"),
        }
    }
}

/// A reply in local state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyEntry {
    /// Local identity.
    pub id: EntryId,
    /// Owning comment.
    pub comment_id: ServerId,
    /// Parent reply, when nested.
    pub parent_reply_id: Option<ServerId>,
    /// Reply body.
    pub content: String,
    /// Who wrote it.
    pub author: Author,
    /// Creation time, milliseconds since epoch.
    pub created_at_ms: u64,
    /// Last edit time.
    pub updated_at_ms: Option<u64>,
    /// Nested replies. Never holds two entries with the same id.
    pub replies: Vec<ReplyEntry>,
}

impl ReplyEntry {
    /// Converts a wire reply whose owning comment is known.
    ///
    /// `comment_id` wins over the payload's own field so nested replies
    /// inherit linkage from their parents.
    #[must_use]
    pub fn from_dto(dto: &ReplyDto, comment_id: ServerId) -> Self {
        Self {
            id: EntryId::Confirmed(dto.id),
            comment_id,
            parent_reply_id: dto.parent_reply_id.and_then(|p| ServerId::from_parent_ref(p.get())),
            content: dto.content.clone(),
            author: dto.author.clone(),
            created_at_ms: dto.created_at_ms,
            updated_at_ms: dto.updated_at_ms,
            replies: dedup_replies(dto.replies.iter().flatten(), comment_id),
        }
    }
}

/// A top-level comment in local state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentEntry {
    /// Local identity.
    pub id: EntryId,
    /// Task the comment belongs to.
    pub task_id: TaskId,
    /// Comment body.
    pub content: String,
    /// Who wrote it.
    pub author: Author,
    /// Creation time, milliseconds since epoch.
    pub created_at_ms: u64,
    /// Last edit time.
    pub updated_at_ms: Option<u64>,
    /// Direct replies. Never holds two entries with the same id.
    pub replies: Vec<ReplyEntry>,
}

impl From<&CommentDto> for CommentEntry {
    fn from(dto: &CommentDto) -> Self {
        Self {
            id: EntryId::Confirmed(dto.id),
            task_id: dto.task_id,
            content: dto.content.clone(),
            author: dto.author.clone(),
            created_at_ms: dto.created_at_ms,
            updated_at_ms: dto.updated_at_ms,
            replies: dedup_replies(dto.replies.iter().flatten(), dto.id),
        }
    }
}

/// Converts wire replies, keeping only the first occurrence of each id.
fn dedup_replies<'a>(
    replies: impl IntoIterator<Item = &'a ReplyDto>,
    comment_id: ServerId,
) -> Vec<ReplyEntry> {
    let mut out: Vec<ReplyEntry> = Vec::new();
    for dto in replies {
        if out.iter().all(|r| r.id != EntryId::Confirmed(dto.id)) {
            out.push(ReplyEntry::from_dto(dto, comment_id));
        }
    }
    out
}
