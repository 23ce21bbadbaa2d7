//! REST implementation of [`WriteApi`] over `reqwest`.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tasksync_proto::comment::{CommentDto, Created, Deleted, NewComment, NewReply, ReplyDto, ServerId};
use tasksync_proto::task::{StatusUpdate, TaskId, TaskStatus};
use url::Url;

use crate::write::{WriteApi, WriteError};

/// Write client for the hub's REST routes.
///
/// Cloning is cheap; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct HttpWriteApi {
    client: reqwest::Client,
    base: Url,
    credential: String,
}

impl HttpWriteApi {
    /// Creates a client rooted at `base` (e.g. `http://127.0.0.1:8080/`).
    #[must_use]
    pub fn new(base: Url, credential: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base,
            credential: credential.into(),
        }
    }

    /// The base URL requests are resolved against.
    #[must_use]
    pub const fn base(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url, WriteError> {
        self.base
            .join(path)
            .map_err(|e| WriteError::Transport(format!("bad endpoint {path}: {e}")))
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T, WriteError> {
        let response = request
            .bearer_auth(&self.credential)
            .send()
            .await
            .map_err(map_request_error)?;
        let status = response.status();
        if !status.is_success() {
            tracing::debug!(status = %status, url = %response.url(), "write call rejected");
            return Err(WriteError::Rejected(status.as_u16()));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| WriteError::Decode(e.to_string()))
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, WriteError> {
        let url = self.endpoint(path)?;
        self.send(self.client.post(url).json(body)).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, WriteError> {
        let url = self.endpoint(path)?;
        self.send(self.client.get(url)).await
    }

    async fn delete(&self, path: &str) -> Result<Deleted, WriteError> {
        let url = self.endpoint(path)?;
        self.send(self.client.delete(url)).await
    }
}

fn map_request_error(err: reqwest::Error) -> WriteError {
    if err.is_timeout() {
        WriteError::Timeout
    } else if err.is_decode() {
        WriteError::Decode(err.to_string())
    } else {
        WriteError::Transport(err.to_string())
    }
}

impl WriteApi for HttpWriteApi {
    async fn create_comment(&self, body: &NewComment) -> Result<Created, WriteError> {
        self.post("api/comments", body).await
    }

    async fn create_reply(&self, body: &NewReply) -> Result<Created, WriteError> {
        self.post("api/replies", body).await
    }

    async fn delete_comment(&self, id: ServerId) -> Result<Deleted, WriteError> {
        self.delete(&format!("api/comments/{id}")).await
    }

    async fn delete_reply(&self, id: ServerId) -> Result<Deleted, WriteError> {
        self.delete(&format!("api/replies/{id}")).await
    }

    async fn fetch_reply(&self, id: ServerId) -> Result<ReplyDto, WriteError> {
        self.get(&format!("api/replies/{id}")).await
    }

    async fn list_comments(&self, task_id: TaskId) -> Result<Vec<CommentDto>, WriteError> {
        self.get(&format!("api/tasks/{task_id}/comments")).await
    }

    async fn update_task_status(&self, task_id: TaskId, status: TaskStatus) -> Result<(), WriteError> {
        let url = self.endpoint(&format!("api/tasks/{task_id}/status"))?;
        let response = self
            .client
            .put(url)
            .bearer_auth(&self.credential)
            .json(&StatusUpdate::from(status))
            .send()
            .await
            .map_err(map_request_error)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(WriteError::Rejected(response.status().as_u16()))
        }
    }
}
