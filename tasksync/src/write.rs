//! Write-path seam: create/delete calls that return authoritative ids.

use std::future::Future;
use std::time::Duration;

use tasksync_proto::comment::{CommentDto, Created, Deleted, NewComment, NewReply, ReplyDto, ServerId};
use tasksync_proto::task::{TaskId, TaskStatus};

/// Errors from the write path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WriteError {
    /// The server answered with a non-success status code.
    #[error("rejected with status {0}")]
    Rejected(u16),

    /// No answer within the write timeout.
    #[error("write timed out")]
    Timeout,

    /// The request could not be sent or the connection broke.
    #[error("transport error: {0}")]
    Transport(String),

    /// The response body did not parse.
    #[error("malformed response: {0}")]
    Decode(String),

    /// The server answered but reported that nothing was changed.
    #[error("write was not applied")]
    NotApplied,
}

/// Persistence primitives consumed by the sync core.
///
/// Implementations must be cheap to clone or share; the driver calls them
/// from spawned tasks.
pub trait WriteApi: Send + Sync + 'static {
    /// Creates a top-level comment.
    fn create_comment(
        &self,
        body: &NewComment,
    ) -> impl Future<Output = Result<Created, WriteError>> + Send;

    /// Creates a reply. `body.parent_reply_id` is `0` for a direct reply.
    fn create_reply(&self, body: &NewReply)
    -> impl Future<Output = Result<Created, WriteError>> + Send;

    /// Deletes a comment and its replies.
    fn delete_comment(&self, id: ServerId)
    -> impl Future<Output = Result<Deleted, WriteError>> + Send;

    /// Deletes a reply and its nested replies.
    fn delete_reply(&self, id: ServerId) -> impl Future<Output = Result<Deleted, WriteError>> + Send;

    /// Fetches one reply with full linkage.
    fn fetch_reply(&self, id: ServerId) -> impl Future<Output = Result<ReplyDto, WriteError>> + Send;

    /// Lists a task's comments with their replies.
    fn list_comments(
        &self,
        task_id: TaskId,
    ) -> impl Future<Output = Result<Vec<CommentDto>, WriteError>> + Send;

    /// Sets a task's status. Validation happens before this is called.
    fn update_task_status(
        &self,
        task_id: TaskId,
        status: TaskStatus,
    ) -> impl Future<Output = Result<(), WriteError>> + Send;
}

/// Bounds a write call, mapping an elapsed timer to [`WriteError::Timeout`].
///
/// # Errors
///
/// Returns the call's own error, or [`WriteError::Timeout`] if `limit`
/// elapses first.
pub async fn with_timeout<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, WriteError>>,
) -> Result<T, WriteError> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| WriteError::Timeout)?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn slow_call_times_out() {
        let result: Result<(), _> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err(WriteError::Timeout));
    }

    #[tokio::test]
    async fn fast_call_passes_through() {
        let result = with_timeout(Duration::from_secs(1), async { Err::<(), _>(WriteError::Rejected(403)) }).await;
        assert_eq!(result, Err(WriteError::Rejected(403)));
    }
}
