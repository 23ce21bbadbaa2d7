//! Hub transport abstraction.
//!
//! A [`Connector`] produces one [`HubSession`] per connection attempt. The
//! session carries group invocations out and push events in; it never
//! reconnects by itself. Reconnection lives in
//! [`crate::connection::ConnectionManager`].
//!
//! Implementations:
//! - [`ws::WsConnector`] for a real hub over WebSocket
//! - [`loopback::LoopbackHub`] for in-process tests

pub mod loopback;
pub mod ws;

use std::future::Future;

use tasksync_proto::hub::{HubEvent, HubMethod};
use tasksync_proto::task::TaskId;

/// Errors that can occur on a hub session.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The session has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The operation timed out before completing.
    #[error("transport operation timed out")]
    Timeout,

    /// The hub could not be reached.
    #[error("hub {0} is unreachable")]
    Unreachable(String),

    /// The hub refused the credential or an invocation.
    #[error("rejected by hub: {0}")]
    Rejected(String),

    /// An underlying I/O error occurred.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One live, authenticated connection to the hub.
pub trait HubSession: Send + Sync + 'static {
    /// Invokes a group method and waits for its completion.
    ///
    /// # Errors
    ///
    /// [`TransportError::Rejected`] if the hub answered with an error,
    /// [`TransportError::Timeout`] if no completion arrived in time, or
    /// [`TransportError::ConnectionClosed`] if the session is gone.
    fn invoke(
        &self,
        method: HubMethod,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receives the next push event, in hub delivery order.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] once the session ends.
    fn recv(&self) -> impl Future<Output = Result<(TaskId, HubEvent), TransportError>> + Send;

    /// Closes the session. Idempotent.
    fn close(&self) -> impl Future<Output = ()> + Send;

    /// Whether the session is still usable.
    fn is_connected(&self) -> bool;

    /// User id the hub authenticated this session as.
    fn user_id(&self) -> &str;
}

/// Factory for hub sessions. Called once per (re)connection attempt.
pub trait Connector: Send + Sync + 'static {
    /// Session type produced on success.
    type Session: HubSession;

    /// Opens and authenticates a new session.
    ///
    /// # Errors
    ///
    /// Any [`TransportError`]; the caller retries with backoff.
    fn connect(
        &self,
        credential: &str,
    ) -> impl Future<Output = Result<Self::Session, TransportError>> + Send;
}
