//! REST write path. Every accepted write is broadcast to the task's group.
//!
//! Callers identify themselves with `Authorization: Bearer <user id>`.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use serde::{Deserialize, Serialize};
use tasksync_proto::comment::{
    Author, CommentDeletion, CommentDto, Created, Deleted, NewComment, NewReply, ReplyDeletion, ReplyDto, ServerId,
};
use tasksync_proto::hub::HubEvent;
use tasksync_proto::task::{StatusUpdate, TaskId, TaskStatus};

use crate::hub::HubState;
use crate::store::StoreError;

/// Body of an edit request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditBody {
    /// Replacement content.
    pub content: String,
}

/// Error answered by a REST route.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// No usable bearer credential.
    #[error("missing or empty bearer credential")]
    Unauthorized,
    /// Rejected by the store.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The status ordinal is out of range.
    #[error("unknown status ordinal {0}")]
    BadStatus(u8),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Store(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
            Self::Store(StoreError::Forbidden { .. }) => StatusCode::FORBIDDEN,
            Self::Store(StoreError::Invalid(_)) | Self::BadStatus(_) => StatusCode::UNPROCESSABLE_ENTITY,
        };
        tracing::debug!(status = %status, error = %self, "request rejected");
        (status, self.to_string()).into_response()
    }
}

type Hub = State<Arc<HubState>>;

/// Routes under `/api`.
pub fn routes() -> axum::Router<Arc<HubState>> {
    axum::Router::new()
        .route("/api/comments", post(create_comment))
        .route(
            "/api/comments/{id}",
            get(get_comment).put(edit_comment).delete(delete_comment),
        )
        .route("/api/replies", post(create_reply))
        .route(
            "/api/replies/{id}",
            get(get_reply).put(edit_reply).delete(delete_reply),
        )
        .route("/api/tasks/{id}/comments", get(list_comments))
        .route("/api/tasks/{id}/status", put(set_status).get(get_status))
}

fn caller(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .ok_or(ApiError::Unauthorized)
}

async fn create_comment(
    State(hub): Hub,
    headers: HeaderMap,
    Json(body): Json<NewComment>,
) -> Result<Json<Created>, ApiError> {
    let user_id = caller(&headers)?;
    let author = Author::new(user_id.clone(), user_id);
    let dto = hub.store.create_comment(author, &body).await?;
    let id = dto.id;
    tracing::info!(task_id = %dto.task_id, id = %id, "comment created");
    hub.broadcast(dto.task_id, HubEvent::ReceiveNewComment(dto)).await;
    Ok(Json(Created { id }))
}

async fn create_reply(
    State(hub): Hub,
    headers: HeaderMap,
    Json(body): Json<NewReply>,
) -> Result<Json<Created>, ApiError> {
    let user_id = caller(&headers)?;
    let author = Author::new(user_id.clone(), user_id);
    let dto = hub.store.create_reply(author, &body).await?;
    let id = dto.id;
    tracing::info!(task_id = %dto.task_id, id = %id, "reply created");
    hub.broadcast(dto.task_id, HubEvent::ReceiveNewReply(dto)).await;
    Ok(Json(Created { id }))
}

async fn edit_comment(
    State(hub): Hub,
    headers: HeaderMap,
    Path(id): Path<ServerId>,
    Json(body): Json<EditBody>,
) -> Result<Json<CommentDto>, ApiError> {
    let user_id = caller(&headers)?;
    let dto = hub.store.edit_comment(id, &user_id, &body.content).await?;
    hub.broadcast(dto.task_id, HubEvent::ReceiveCommentUpdate(dto.clone()))
        .await;
    Ok(Json(dto))
}

async fn edit_reply(
    State(hub): Hub,
    headers: HeaderMap,
    Path(id): Path<ServerId>,
    Json(body): Json<EditBody>,
) -> Result<Json<ReplyDto>, ApiError> {
    let user_id = caller(&headers)?;
    let dto = hub.store.edit_reply(id, &user_id, &body.content).await?;
    hub.broadcast(dto.task_id, HubEvent::ReceiveReplyUpdate(dto.clone()))
        .await;
    Ok(Json(dto))
}

async fn delete_comment(State(hub): Hub, headers: HeaderMap, Path(id): Path<ServerId>) -> Result<Json<Deleted>, ApiError> {
    let user_id = caller(&headers)?;
    let removed = hub.store.delete_comment(id, &user_id).await?;
    if let Some(task_id) = removed {
        tracing::info!(task_id = %task_id, id = %id, "comment deleted");
        hub.broadcast(task_id, HubEvent::ReceiveCommentDeletion(CommentDeletion { id }))
            .await;
    }
    Ok(Json(Deleted {
        success: removed.is_some(),
    }))
}

async fn delete_reply(State(hub): Hub, headers: HeaderMap, Path(id): Path<ServerId>) -> Result<Json<Deleted>, ApiError> {
    let user_id = caller(&headers)?;
    let removed = hub.store.delete_reply(id, &user_id).await?;
    if let Some((task_id, comment_id)) = removed {
        tracing::info!(task_id = %task_id, id = %id, "reply deleted");
        hub.broadcast(
            task_id,
            HubEvent::ReceiveReplyDeletion(ReplyDeletion {
                id,
                comment_id: Some(comment_id),
            }),
        )
        .await;
    }
    Ok(Json(Deleted {
        success: removed.is_some(),
    }))
}

async fn get_comment(State(hub): Hub, headers: HeaderMap, Path(id): Path<ServerId>) -> Result<Json<CommentDto>, ApiError> {
    caller(&headers)?;
    hub.store
        .comment(id)
        .await
        .map(Json)
        .ok_or(ApiError::Store(StoreError::NotFound { kind: "comment", id }))
}

async fn get_reply(State(hub): Hub, headers: HeaderMap, Path(id): Path<ServerId>) -> Result<Json<ReplyDto>, ApiError> {
    caller(&headers)?;
    hub.store
        .reply(id)
        .await
        .map(Json)
        .ok_or(ApiError::Store(StoreError::NotFound { kind: "reply", id }))
}

async fn list_comments(
    State(hub): Hub,
    headers: HeaderMap,
    Path(task_id): Path<TaskId>,
) -> Result<Json<Vec<CommentDto>>, ApiError> {
    caller(&headers)?;
    Ok(Json(hub.store.list(task_id).await))
}

async fn get_status(State(hub): Hub, headers: HeaderMap, Path(task_id): Path<TaskId>) -> Result<Json<StatusUpdate>, ApiError> {
    caller(&headers)?;
    Ok(Json(StatusUpdate::from(hub.store.status(task_id).await)))
}

async fn set_status(
    State(hub): Hub,
    headers: HeaderMap,
    Path(task_id): Path<TaskId>,
    Json(body): Json<StatusUpdate>,
) -> Result<Json<StatusUpdate>, ApiError> {
    caller(&headers)?;
    let status = TaskStatus::from_ordinal(body.status).ok_or(ApiError::BadStatus(body.status))?;
    hub.store.set_status(task_id, status).await?;
    tracing::info!(task_id = %task_id, status = %status, "status changed");
    Ok(Json(body))
}
