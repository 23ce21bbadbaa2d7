//! Hub wire protocol types.
//!
//! A client authenticates once per WebSocket connection, then invokes
//! group methods and receives push events for the groups it has joined.
//! Every frame is one binary WebSocket message encoded with [`crate::codec`].

use serde::{Deserialize, Serialize};

use crate::comment::{CommentDeletion, CommentDto, ReplyDeletion, ReplyDto};
use crate::task::TaskId;

/// Methods a client can invoke on the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HubMethod {
    /// Subscribe this connection to a task group.
    JoinTaskGroup(TaskId),
    /// Unsubscribe this connection from a task group.
    LeaveTaskGroup(TaskId),
}

impl HubMethod {
    /// Wire name of the method.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::JoinTaskGroup(_) => "JoinTaskGroup",
            Self::LeaveTaskGroup(_) => "LeaveTaskGroup",
        }
    }

    /// The task group the method targets.
    #[must_use]
    pub const fn task_id(self) -> TaskId {
        match self {
            Self::JoinTaskGroup(id) | Self::LeaveTaskGroup(id) => id,
        }
    }
}

/// Push events delivered to group members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HubEvent {
    /// A comment was created.
    ReceiveNewComment(CommentDto),
    /// A reply was created.
    ReceiveNewReply(ReplyDto),
    /// A comment was edited.
    ReceiveCommentUpdate(CommentDto),
    /// A reply was edited.
    ReceiveReplyUpdate(ReplyDto),
    /// A comment was deleted.
    ReceiveCommentDeletion(CommentDeletion),
    /// A reply was deleted.
    ReceiveReplyDeletion(ReplyDeletion),
    /// The hub acknowledged a group join.
    JoinedGroup(TaskId),
}

impl HubEvent {
    /// The payload-free name of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::ReceiveNewComment(_) => EventKind::NewComment,
            Self::ReceiveNewReply(_) => EventKind::NewReply,
            Self::ReceiveCommentUpdate(_) => EventKind::CommentUpdated,
            Self::ReceiveReplyUpdate(_) => EventKind::ReplyUpdated,
            Self::ReceiveCommentDeletion(_) => EventKind::CommentDeleted,
            Self::ReceiveReplyDeletion(_) => EventKind::ReplyDeleted,
            Self::JoinedGroup(_) => EventKind::JoinedGroup,
        }
    }
}

/// Names of the push events, used as dispatch keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// `ReceiveNewComment`
    NewComment,
    /// `ReceiveNewReply`
    NewReply,
    /// `ReceiveCommentUpdate`
    CommentUpdated,
    /// `ReceiveReplyUpdate`
    ReplyUpdated,
    /// `ReceiveCommentDeletion`
    CommentDeleted,
    /// `ReceiveReplyDeletion`
    ReplyDeleted,
    /// `JoinedGroup`
    JoinedGroup,
}

impl EventKind {
    /// Every event kind.
    pub const ALL: [Self; 7] = [
        Self::NewComment,
        Self::NewReply,
        Self::CommentUpdated,
        Self::ReplyUpdated,
        Self::CommentDeleted,
        Self::ReplyDeleted,
        Self::JoinedGroup,
    ];

    /// The event name as it appears on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NewComment => "ReceiveNewComment",
            Self::NewReply => "ReceiveNewReply",
            Self::CommentUpdated => "ReceiveCommentUpdate",
            Self::ReplyUpdated => "ReceiveReplyUpdate",
            Self::CommentDeleted => "ReceiveCommentDeletion",
            Self::ReplyDeleted => "ReceiveReplyDeletion",
            Self::JoinedGroup => "JoinedGroup",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown event name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event name: {0}")]
pub struct UnknownEvent(pub String);

impl std::str::FromStr for EventKind {
    type Err = UnknownEvent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownEvent(s.to_string()))
    }
}

/// One frame on the hub connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HubFrame {
    /// First frame from the client. Carries the bearer credential.
    Authenticate {
        /// Opaque credential issued by the auth service.
        credential: String,
    },
    /// Hub accepted the credential.
    Authenticated {
        /// User the credential resolved to.
        user_id: String,
    },
    /// Client invokes a hub method.
    Invoke {
        /// Correlates the [`HubFrame::Completion`].
        invocation_id: u64,
        /// The method being invoked.
        method: HubMethod,
    },
    /// Hub finished an invocation.
    Completion {
        /// Matches [`HubFrame::Invoke::invocation_id`].
        invocation_id: u64,
        /// Failure reason, `None` on success.
        error: Option<String>,
    },
    /// A push event broadcast to a task group.
    Push {
        /// The group the event was broadcast to.
        task_id: TaskId,
        /// The event itself.
        event: HubEvent,
    },
    /// Connection-level error reported by the hub.
    Error {
        /// Human-readable reason.
        reason: String,
    },
}
