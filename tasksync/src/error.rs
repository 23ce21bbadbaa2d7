//! Error taxonomy of the synchronization core.

use tasksync_proto::comment::ServerId;
use tasksync_proto::hub::EventKind;
use tasksync_proto::task::{TaskId, TaskStatus};

use crate::model::{EntityKind, TempId};
use crate::status::InvalidTransition;
use crate::write::WriteError;

/// Errors surfaced by the synchronization core.
///
/// Connection trouble never appears here as a failure of a user action:
/// [`SyncError::TransportUnavailable`] only describes a deferred state.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SyncError {
    /// The shared connection is not established yet. Work is deferred.
    #[error("not connected yet")]
    TransportUnavailable,

    /// A create or delete call was rejected or timed out.
    #[error("{kind} write failed: {source}")]
    WriteFailed {
        /// Entity the write targeted.
        kind: EntityKind,
        /// Underlying write error.
        #[source]
        source: WriteError,
    },

    /// The write path refused a status change.
    #[error("status change to {status} failed: {source}")]
    StatusFailed {
        /// Requested status.
        status: TaskStatus,
        /// Underlying write error.
        #[source]
        source: WriteError,
    },

    /// A status change was rejected locally.
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    /// A push payload lacked linkage and could not be recovered.
    #[error("malformed {event} event: {reason}")]
    MalformedEvent {
        /// Event that was dropped.
        event: EventKind,
        /// What was missing.
        reason: String,
    },

    /// The acting user does not own the entity.
    #[error("user {user_id} may not delete {kind} {id} owned by {owner_id}")]
    PermissionDenied {
        /// Entity kind.
        kind: EntityKind,
        /// Entity id.
        id: ServerId,
        /// Acting user.
        user_id: String,
        /// Author of the entity.
        owner_id: String,
    },

    /// The task's current status is not known, so a change cannot be checked.
    #[error("status of task {0} is unknown")]
    UnknownStatus(TaskId),

    /// No view is open for the task.
    #[error("no open view for task {0}")]
    UnknownView(TaskId),

    /// The target entity is not in the view.
    #[error("{kind} {id} is not in the view")]
    UnknownTarget {
        /// Entity kind.
        kind: EntityKind,
        /// Entity id.
        id: ServerId,
    },

    /// The entity is still optimistic and has no authoritative id.
    #[error("entity {0} is not confirmed yet")]
    Unconfirmed(TempId),

    /// Comment or reply text is blank.
    #[error("content cannot be empty")]
    EmptyContent,
}
