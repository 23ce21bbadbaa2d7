//! Shared hub connection with automatic reconnect.
//!
//! [`ConnectionManager`] is a cloneable handle to one supervisor task. The
//! supervisor owns the live [`HubSession`] and the
//! [`GroupSubscriptionManager`]; handles talk to it over a command channel
//! and observe its state through a `watch` channel. Connection failures are
//! retried forever on the [`ReconnectPolicy`] schedule and never reach the
//! caller as errors.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};

use tasksync_proto::hub::{HubEvent, HubMethod};
use tasksync_proto::task::TaskId;

use crate::error::SyncError;
use crate::groups::GroupSubscriptionManager;
use crate::transport::{Connector, HubSession};

/// Default reconnect delays in seconds. The last value repeats.
pub const DEFAULT_BACKOFF_SECS: [u64; 6] = [0, 2, 5, 10, 15, 30];

/// Lifecycle of the shared connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not started, or stopped.
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    /// A session is live.
    Connected,
    /// The session dropped; retrying.
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// What the supervisor reports, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The connection state changed.
    StateChanged(ConnectionState),
    /// A push event arrived on a joined group.
    Push {
        /// Group the event was broadcast to.
        task_id: TaskId,
        /// The event.
        event: HubEvent,
    },
}

/// Delay schedule between reconnect attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    schedule: Vec<Duration>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_secs(&DEFAULT_BACKOFF_SECS)
    }
}

impl ReconnectPolicy {
    /// Creates a policy. An empty schedule retries without delay.
    #[must_use]
    pub const fn new(schedule: Vec<Duration>) -> Self {
        Self { schedule }
    }

    /// Creates a policy from whole seconds.
    #[must_use]
    pub fn from_secs(secs: &[u64]) -> Self {
        Self::new(secs.iter().copied().map(Duration::from_secs).collect())
    }

    /// Delay before attempt number `attempt` (zero-based), capped at the
    /// last entry.
    #[must_use]
    pub fn delay(&self, attempt: usize) -> Duration {
        self.schedule
            .get(attempt)
            .or_else(|| self.schedule.last())
            .copied()
            .unwrap_or_default()
    }
}

enum Command {
    Join {
        task_id: TaskId,
        issued: Option<oneshot::Sender<()>>,
    },
    Leave(TaskId),
    Stop,
}

/// The running supervisor, if any. `generation` increases with every
/// launch; only the supervisor holding the current value may publish state.
#[derive(Default)]
struct Slot {
    generation: u64,
    commands: Option<mpsc::UnboundedSender<Command>>,
}

struct Inner<C> {
    connector: C,
    policy: ReconnectPolicy,
    state: watch::Sender<ConnectionState>,
    events: mpsc::Sender<ConnectionEvent>,
    slot: parking_lot::Mutex<Slot>,
}

impl<C> Inner<C> {
    async fn set_state(&self, generation: u64, next: ConnectionState) {
        let previous = {
            let slot = self.slot.lock();
            if slot.generation != generation {
                tracing::debug!(generation, to = %next, "superseded supervisor state ignored");
                return;
            }
            self.state.send_replace(next)
        };
        if previous != next {
            tracing::debug!(from = %previous, to = %next, "connection state changed");
            let _ = self.events.send(ConnectionEvent::StateChanged(next)).await;
        }
    }
}

/// Handle to the process-wide hub connection.
pub struct ConnectionManager<C: Connector> {
    inner: Arc<Inner<C>>,
}

impl<C: Connector> Clone for ConnectionManager<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> fmt::Debug for ConnectionManager<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<C: Connector> ConnectionManager<C> {
    /// Creates a stopped manager and the receiver for its events.
    ///
    /// The receiver must be drained; the supervisor waits when it is full.
    pub fn new(
        connector: C,
        policy: ReconnectPolicy,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<ConnectionEvent>) {
        let (events, events_rx) = mpsc::channel(capacity.max(1));
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let inner = Arc::new(Inner {
            connector,
            policy,
            state,
            events,
            slot: parking_lot::Mutex::new(Slot::default()),
        });
        (Self { inner }, events_rx)
    }

    /// Starts the supervisor if it is not running and waits for Connected.
    ///
    /// Calls while already connecting or connected only wait. If
    /// `initial_group` is given it is joined as soon as a session is live.
    pub async fn start(&self, credential: &str, initial_group: Option<TaskId>) {
        self.launch(credential);
        if let Some(task_id) = initial_group {
            let _ = self.send(Command::Join {
                task_id,
                issued: None,
            });
        }
        self.wait_connected().await;
    }

    /// Spawns the supervisor if it is not running, without waiting.
    ///
    /// A supervisor still winding down after [`Self::stop`] is superseded:
    /// its remaining state changes are dropped.
    pub fn launch(&self, credential: &str) {
        let mut slot = self.inner.slot.lock();
        if slot.commands.is_none() {
            slot.generation += 1;
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(supervise(
                Arc::clone(&self.inner),
                slot.generation,
                credential.to_string(),
                rx,
            ));
            slot.commands = Some(tx);
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// A receiver that observes every state change.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Waits until the state is Connected. Never resolves after [`Self::stop`].
    pub async fn wait_connected(&self) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(|s| *s == ConnectionState::Connected).await;
    }

    /// Joins `task_id`'s group, waiting until the join is issued on a live
    /// session. The group is rejoined after every reconnect until
    /// [`Self::leave`].
    ///
    /// # Errors
    ///
    /// [`SyncError::TransportUnavailable`] if the manager is not started or
    /// stops before the join is issued.
    pub async fn join(&self, task_id: TaskId) -> Result<(), SyncError> {
        let (issued, done) = oneshot::channel();
        self.send(Command::Join {
            task_id,
            issued: Some(issued),
        })?;
        done.await.map_err(|_| SyncError::TransportUnavailable)
    }

    /// Leaves `task_id`'s group without waiting on the network.
    pub fn leave(&self, task_id: TaskId) {
        let _ = self.send(Command::Leave(task_id));
    }

    /// Leaves all groups, closes the session, and resets to Disconnected.
    /// Returns immediately.
    pub fn stop(&self) {
        if let Some(tx) = self.inner.slot.lock().commands.take() {
            let _ = tx.send(Command::Stop);
        }
    }

    fn send(&self, command: Command) -> Result<(), SyncError> {
        self.inner
            .slot
            .lock()
            .commands
            .as_ref()
            .ok_or(SyncError::TransportUnavailable)?
            .send(command)
            .map_err(|_| SyncError::TransportUnavailable)
    }
}

/// Join requests waiting for their group to be issued on a live session.
type Waiters = HashMap<TaskId, Vec<oneshot::Sender<()>>>;

enum SessionEnd {
    Dropped,
    Stopped,
}

async fn supervise<C: Connector>(
    inner: Arc<Inner<C>>,
    generation: u64,
    credential: String,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let mut groups = GroupSubscriptionManager::new();
    let mut waiters = Waiters::new();
    inner.set_state(generation, ConnectionState::Connecting).await;

    loop {
        let Some(session) = establish(&inner, &credential, &mut commands, &mut groups, &mut waiters).await else {
            break;
        };
        tracing::info!(user_id = session.user_id(), "hub session established");
        let session = Arc::new(session);
        match run_session(&inner, generation, session, &mut commands, &mut groups, &mut waiters).await {
            SessionEnd::Stopped => break,
            SessionEnd::Dropped => {
                groups.on_disconnected();
                inner.set_state(generation, ConnectionState::Reconnecting).await;
            }
        }
    }

    inner.set_state(generation, ConnectionState::Disconnected).await;
    tracing::info!(generation, "connection supervisor exiting");
}

/// Connects with backoff, serving commands meanwhile. `None` means stop.
async fn establish<C: Connector>(
    inner: &Inner<C>,
    credential: &str,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    groups: &mut GroupSubscriptionManager,
    waiters: &mut Waiters,
) -> Option<C::Session> {
    let mut attempt = 0usize;
    loop {
        let delay = inner.policy.delay(attempt);
        let connector = &inner.connector;
        let connecting = async move {
            tokio::time::sleep(delay).await;
            connector.connect(credential).await
        };
        tokio::pin!(connecting);

        let result = loop {
            tokio::select! {
                result = &mut connecting => break result,
                command = commands.recv() => match command {
                    None | Some(Command::Stop) => return None,
                    Some(Command::Join { task_id, issued }) => {
                        groups.request_join(task_id);
                        if let Some(issued) = issued {
                            waiters.entry(task_id).or_default().push(issued);
                        }
                    }
                    Some(Command::Leave(task_id)) => {
                        groups.request_leave(task_id);
                        waiters.remove(&task_id);
                    }
                },
            }
        };

        match result {
            Ok(session) => return Some(session),
            Err(e) => {
                attempt += 1;
                tracing::warn!(
                    attempt,
                    err = %e,
                    retry_in_ms = u64::try_from(inner.policy.delay(attempt).as_millis()).unwrap_or(u64::MAX),
                    "hub connect failed"
                );
            }
        }
    }
}

async fn run_session<C: Connector>(
    inner: &Inner<C>,
    generation: u64,
    session: Arc<C::Session>,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    groups: &mut GroupSubscriptionManager,
    waiters: &mut Waiters,
) -> SessionEnd {
    inner.set_state(generation, ConnectionState::Connected).await;
    for task_id in groups.on_connected() {
        spawn_invoke(&session, HubMethod::JoinTaskGroup(task_id));
        release(waiters, task_id);
    }

    loop {
        tokio::select! {
            incoming = session.recv() => match incoming {
                Ok((task_id, event)) => {
                    if let HubEvent::JoinedGroup(joined) = &event {
                        groups.acknowledge(*joined);
                    }
                    let _ = inner.events.send(ConnectionEvent::Push { task_id, event }).await;
                }
                Err(e) => {
                    tracing::info!(err = %e, "hub session ended");
                    return SessionEnd::Dropped;
                }
            },
            command = commands.recv() => match command {
                None | Some(Command::Stop) => {
                    let to_leave = groups.leave_all();
                    tokio::spawn(async move {
                        for task_id in to_leave {
                            let _ = session.invoke(HubMethod::LeaveTaskGroup(task_id)).await;
                        }
                        session.close().await;
                    });
                    return SessionEnd::Stopped;
                }
                Some(Command::Join { task_id, issued }) => {
                    if groups.request_join(task_id) {
                        spawn_invoke(&session, HubMethod::JoinTaskGroup(task_id));
                    }
                    if let Some(issued) = issued {
                        let _ = issued.send(());
                    }
                }
                Some(Command::Leave(task_id)) => {
                    if groups.request_leave(task_id) {
                        spawn_invoke(&session, HubMethod::LeaveTaskGroup(task_id));
                    }
                }
            },
        }
    }
}

fn release(waiters: &mut Waiters, task_id: TaskId) {
    for issued in waiters.remove(&task_id).into_iter().flatten() {
        let _ = issued.send(());
    }
}

fn spawn_invoke<S: HubSession>(session: &Arc<S>, method: HubMethod) {
    let session = Arc::clone(session);
    tokio::spawn(async move {
        if let Err(e) = session.invoke(method).await {
            tracing::warn!(method = method.name(), task_id = %method.task_id(), err = %e, "group invocation failed");
        }
    });
}
