//! In-process hub for tests.
//!
//! [`LoopbackHub`] is a [`Connector`] whose sessions live in memory. Tests
//! can script connect failures, sever every session at once, inspect the
//! invocation log, and inject push events into a group.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::{Mutex, mpsc};

use tasksync_proto::hub::{HubEvent, HubMethod};
use tasksync_proto::task::TaskId;

use super::{Connector, HubSession, TransportError};

struct SessionLink {
    id: u64,
    tx: mpsc::UnboundedSender<(TaskId, HubEvent)>,
    groups: HashSet<TaskId>,
    alive: Arc<AtomicBool>,
}

#[derive(Default)]
struct HubState {
    failures_left: usize,
    connects: usize,
    invocations: Vec<HubMethod>,
    sessions: Vec<SessionLink>,
}

/// Shared handle to an in-memory hub. Clones observe the same hub.
#[derive(Clone, Default)]
pub struct LoopbackHub {
    state: Arc<parking_lot::Mutex<HubState>>,
    next_session: Arc<AtomicU64>,
}

impl std::fmt::Debug for LoopbackHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("LoopbackHub")
            .field("sessions", &state.sessions.len())
            .field("connects", &state.connects)
            .finish_non_exhaustive()
    }
}

impl LoopbackHub {
    /// Creates a hub that accepts every connection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` connection attempts fail as unreachable.
    pub fn fail_next_connects(&self, count: usize) {
        self.state.lock().failures_left = count;
    }

    /// Number of successful connections so far.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.state.lock().connects
    }

    /// Every invocation received, in order, across all sessions.
    #[must_use]
    pub fn invocations(&self) -> Vec<HubMethod> {
        self.state.lock().invocations.clone()
    }

    /// Clears the invocation log.
    pub fn clear_invocations(&self) {
        self.state.lock().invocations.clear();
    }

    /// Groups joined by any live session.
    #[must_use]
    pub fn joined_groups(&self) -> BTreeSet<TaskId> {
        self.state
            .lock()
            .sessions
            .iter()
            .flat_map(|s| s.groups.iter().copied())
            .collect()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Delivers `event` to every session joined to `task_id`.
    ///
    /// Returns how many sessions received it.
    pub fn push(&self, task_id: TaskId, event: &HubEvent) -> usize {
        let state = self.state.lock();
        state
            .sessions
            .iter()
            .filter(|s| s.groups.contains(&task_id))
            .filter(|s| s.tx.send((task_id, event.clone())).is_ok())
            .count()
    }

    /// Severs every live session, as a network drop would.
    pub fn disconnect_all(&self) {
        let dropped = std::mem::take(&mut self.state.lock().sessions);
        for link in &dropped {
            link.alive.store(false, Ordering::Relaxed);
        }
        tracing::debug!(count = dropped.len(), "loopback hub dropped sessions");
    }

    fn invoke(&self, session_id: u64, method: HubMethod) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.invocations.push(method);
        let link = state
            .sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or(TransportError::ConnectionClosed)?;
        match method {
            HubMethod::JoinTaskGroup(task_id) => {
                link.groups.insert(task_id);
                let _ = link.tx.send((task_id, HubEvent::JoinedGroup(task_id)));
            }
            HubMethod::LeaveTaskGroup(task_id) => {
                link.groups.remove(&task_id);
            }
        }
        Ok(())
    }

    fn detach(&self, session_id: u64) {
        self.state.lock().sessions.retain(|s| s.id != session_id);
    }
}

impl Connector for LoopbackHub {
    type Session = LoopbackSession;

    async fn connect(&self, credential: &str) -> Result<LoopbackSession, TransportError> {
        if credential.is_empty() {
            return Err(TransportError::Rejected("empty credential".to_string()));
        }
        let mut state = self.state.lock();
        if state.failures_left > 0 {
            state.failures_left -= 1;
            return Err(TransportError::Unreachable("loopback".to_string()));
        }
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let alive = Arc::new(AtomicBool::new(true));
        state.connects += 1;
        state.sessions.push(SessionLink {
            id,
            tx,
            groups: HashSet::new(),
            alive: Arc::clone(&alive),
        });
        Ok(LoopbackSession {
            id,
            user_id: credential.to_string(),
            hub: self.clone(),
            rx: Mutex::new(rx),
            alive,
        })
    }
}

/// Session handed out by [`LoopbackHub`]. The credential doubles as user id.
pub struct LoopbackSession {
    id: u64,
    user_id: String,
    hub: LoopbackHub,
    rx: Mutex<mpsc::UnboundedReceiver<(TaskId, HubEvent)>>,
    alive: Arc<AtomicBool>,
}

impl HubSession for LoopbackSession {
    async fn invoke(&self, method: HubMethod) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::ConnectionClosed);
        }
        self.hub.invoke(self.id, method)
    }

    async fn recv(&self) -> Result<(TaskId, HubEvent), TransportError> {
        let mut rx = self.rx.lock().await;
        rx.recv().await.ok_or(TransportError::ConnectionClosed)
    }

    async fn close(&self) {
        self.alive.store(false, Ordering::Relaxed);
        self.hub.detach(self.id);
    }

    fn is_connected(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    fn user_id(&self) -> &str {
        &self.user_id
    }
}
