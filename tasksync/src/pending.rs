//! Optimistic mutation bookkeeping.
//!
//! [`PendingMutationTracker`] holds locally-initiated creates under a
//! temporary id until the write call answers. [`RecentlyOwned`] remembers
//! the authoritative ids the local client just created so their push
//! echoes can be ignored.

use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tasksync_proto::comment::{Author, NewComment, NewReply, ServerId};

use crate::model::{CommentEntry, EntityKind, EntryId, ReplyEntry, TempId};

/// How long an authoritative id stays in the echo filter.
pub const DEFAULT_OWNED_GRACE: Duration = Duration::from_secs(5);

/// Returns the current wall-clock time in milliseconds since epoch.
pub(crate) fn now_ms() -> u64 {
    u64::try_from(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis(),
    )
    .unwrap_or(u64::MAX)
}

/// The write payload behind a pending create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreatePayload {
    /// A new top-level comment.
    Comment(NewComment),
    /// A new reply.
    Reply(NewReply),
}

impl CreatePayload {
    /// The kind of entity this payload creates.
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::Comment(_) => EntityKind::Comment,
            Self::Reply(_) => EntityKind::Reply,
        }
    }
}

/// Entity to insert into the view immediately, before confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Optimistic {
    /// Optimistic comment.
    Comment(CommentEntry),
    /// Optimistic reply.
    Reply(ReplyEntry),
}

impl Optimistic {
    /// The entity's (temporary) id.
    #[must_use]
    pub const fn id(&self) -> EntryId {
        match self {
            Self::Comment(c) => c.id,
            Self::Reply(r) => r.id,
        }
    }
}

/// A create that has been submitted but not yet answered.
#[derive(Debug, Clone)]
pub struct PendingMutation {
    /// Client-generated id of the optimistic entity.
    pub temp_id: TempId,
    /// What is being created.
    pub kind: EntityKind,
    /// The body sent to the write path.
    pub payload: CreatePayload,
    /// When the mutation was submitted.
    pub created_at: Instant,
}

/// Tracks in-flight creates keyed by temporary id.
#[derive(Debug, Default)]
pub struct PendingMutationTracker {
    pending: HashMap<TempId, PendingMutation>,
}

impl PendingMutationTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a create and builds its optimistic entity.
    ///
    /// The returned entity carries an [`EntryId::Pending`] id and should be
    /// inserted into the view right away.
    pub fn begin_create(&mut self, payload: CreatePayload, author: &Author) -> (TempId, Optimistic) {
        let temp_id = TempId::generate();
        let created_at_ms = now_ms();
        let optimistic = match &payload {
            CreatePayload::Comment(body) => Optimistic::Comment(CommentEntry {
                id: EntryId::Pending(temp_id),
                task_id: body.task_id,
                content: body.content.clone(),
                author: author.clone(),
                created_at_ms,
                updated_at_ms: None,
                replies: Vec::new(),
            }),
            CreatePayload::Reply(body) => Optimistic::Reply(ReplyEntry {
                id: EntryId::Pending(temp_id),
                comment_id: body.comment_id,
                parent_reply_id: body.parent(),
                content: body.content.clone(),
                author: author.clone(),
                created_at_ms,
                updated_at_ms: None,
                replies: Vec::new(),
            }),
        };
        tracing::debug!(temp_id = %temp_id, kind = %payload.kind(), "optimistic create started");
        self.pending.insert(
            temp_id,
            PendingMutation {
                temp_id,
                kind: payload.kind(),
                payload,
                created_at: Instant::now(),
            },
        );
        (temp_id, optimistic)
    }

    /// Marks a create as accepted by the write path.
    ///
    /// Returns the finished mutation, or `None` if the temporary id is
    /// unknown (already completed or rolled back).
    pub fn complete_create(&mut self, temp_id: TempId, authoritative: ServerId) -> Option<PendingMutation> {
        let done = self.pending.remove(&temp_id);
        if done.is_some() {
            tracing::debug!(temp_id = %temp_id, id = %authoritative, "optimistic create confirmed");
        }
        done
    }

    /// Marks a create as failed. The caller removes the optimistic entity.
    pub fn fail_create(&mut self, temp_id: TempId) -> Option<PendingMutation> {
        let failed = self.pending.remove(&temp_id);
        if failed.is_some() {
            tracing::debug!(temp_id = %temp_id, "optimistic create rolled back");
        }
        failed
    }

    /// Looks up an in-flight create.
    #[must_use]
    pub fn get(&self, temp_id: TempId) -> Option<&PendingMutation> {
        self.pending.get(&temp_id)
    }

    /// Number of in-flight creates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Time-boxed set of ids created by the local client.
///
/// Comments and replies may be numbered independently by other write paths,
/// so entries are keyed by kind as well as id. Each id expires a fixed grace
/// period after insertion, regardless of how often it is queried. Expired
/// entries are swept lazily on access.
#[derive(Debug)]
pub struct RecentlyOwned {
    grace: Duration,
    expiries: HashMap<(EntityKind, ServerId), Instant>,
}

impl Default for RecentlyOwned {
    fn default() -> Self {
        Self::new(DEFAULT_OWNED_GRACE)
    }
}

impl RecentlyOwned {
    /// Creates an empty set with the given grace window.
    #[must_use]
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            expiries: HashMap::new(),
        }
    }

    /// Records `id` as just created by this client.
    pub fn insert(&mut self, kind: EntityKind, id: ServerId) {
        self.insert_at(kind, id, Instant::now());
    }

    /// Records `id` as created at `now`.
    pub fn insert_at(&mut self, kind: EntityKind, id: ServerId, now: Instant) {
        self.sweep(now);
        self.expiries.insert((kind, id), now + self.grace);
    }

    /// Whether `id` is still inside its grace window.
    pub fn contains(&mut self, kind: EntityKind, id: ServerId) -> bool {
        self.contains_at(kind, id, Instant::now())
    }

    /// Whether `id` is still inside its grace window at `now`.
    pub fn contains_at(&mut self, kind: EntityKind, id: ServerId, now: Instant) -> bool {
        self.sweep(now);
        self.expiries.contains_key(&(kind, id))
    }

    /// Number of live entries as of the last sweep.
    #[must_use]
    pub fn len(&self) -> usize {
        self.expiries.len()
    }

    /// Whether no entries are live as of the last sweep.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.expiries.is_empty()
    }

    fn sweep(&mut self, now: Instant) {
        self.expiries.retain(|_, expiry| *expiry > now);
    }
}
