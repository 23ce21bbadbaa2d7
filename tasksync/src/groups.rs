//! Group membership bookkeeping across reconnects.
//!
//! The desired set is the only thing that survives a disconnect. What the
//! hub thinks we are subscribed to is discarded with the session and
//! rebuilt from the desired set on every reconnect.

use std::collections::BTreeSet;

use tasksync_proto::task::TaskId;

/// Tracks which task groups should be joined and which have been issued on
/// the current session.
#[derive(Debug, Default)]
pub struct GroupSubscriptionManager {
    desired: BTreeSet<TaskId>,
    joined: BTreeSet<TaskId>,
    acknowledged: BTreeSet<TaskId>,
    connected: bool,
}

impl GroupSubscriptionManager {
    /// Creates an empty manager in the disconnected state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `task_id` as wanted.
    ///
    /// Returns `true` if a join should be issued now. While disconnected the
    /// join is deferred to [`Self::on_connected`].
    pub fn request_join(&mut self, task_id: TaskId) -> bool {
        self.desired.insert(task_id);
        if self.connected && self.joined.insert(task_id) {
            return true;
        }
        tracing::debug!(task_id = %task_id, connected = self.connected, "join recorded");
        false
    }

    /// Forgets `task_id` so no future reconnect rejoins it.
    ///
    /// Returns `true` if a leave should be issued on the live session.
    pub fn request_leave(&mut self, task_id: TaskId) -> bool {
        self.desired.remove(&task_id);
        self.acknowledged.remove(&task_id);
        self.connected && self.joined.remove(&task_id)
    }

    /// Records a fresh session. Returns every group to (re)join, once each.
    pub fn on_connected(&mut self) -> Vec<TaskId> {
        self.connected = true;
        self.joined.clone_from(&self.desired);
        self.acknowledged.clear();
        self.desired.iter().copied().collect()
    }

    /// Drops all per-session state. The desired set is kept.
    pub fn on_disconnected(&mut self) {
        self.connected = false;
        self.joined.clear();
        self.acknowledged.clear();
    }

    /// Records the hub's `JoinedGroup` acknowledgment.
    ///
    /// Returns `false` for acks of groups no longer wanted.
    pub fn acknowledge(&mut self, task_id: TaskId) -> bool {
        if self.desired.contains(&task_id) {
            self.acknowledged.insert(task_id);
            true
        } else {
            false
        }
    }

    /// Clears everything for shutdown, returning the groups to leave.
    pub fn leave_all(&mut self) -> Vec<TaskId> {
        let to_leave = if self.connected {
            std::mem::take(&mut self.joined).into_iter().collect()
        } else {
            Vec::new()
        };
        self.desired.clear();
        self.acknowledged.clear();
        self.joined.clear();
        to_leave
    }

    /// Whether `task_id` should be joined.
    #[must_use]
    pub fn is_desired(&self, task_id: TaskId) -> bool {
        self.desired.contains(&task_id)
    }

    /// Whether a join for `task_id` was issued on the current session.
    #[must_use]
    pub fn is_joined(&self, task_id: TaskId) -> bool {
        self.joined.contains(&task_id)
    }

    /// Whether the hub acknowledged `task_id` on the current session.
    #[must_use]
    pub fn is_acknowledged(&self, task_id: TaskId) -> bool {
        self.acknowledged.contains(&task_id)
    }

    /// Groups that should be joined, in id order.
    pub fn desired(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.desired.iter().copied()
    }

    /// Whether a session is live.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(id: u64) -> TaskId {
        TaskId::new(id)
    }

    #[test]
    fn join_while_disconnected_is_deferred() {
        let mut groups = GroupSubscriptionManager::new();
        assert!(!groups.request_join(t(1)));
        assert!(!groups.is_joined(t(1)));
        assert_eq!(groups.on_connected(), vec![t(1)]);
        assert!(groups.is_joined(t(1)));
    }

    #[test]
    fn join_while_connected_is_immediate_and_once() {
        let mut groups = GroupSubscriptionManager::new();
        groups.on_connected();
        assert!(groups.request_join(t(1)));
        assert!(!groups.request_join(t(1)));
    }

    #[test]
    fn reconnect_rejoins_each_desired_group_exactly_once() {
        let mut groups = GroupSubscriptionManager::new();
        groups.on_connected();
        for id in [3, 1, 2] {
            groups.request_join(t(id));
        }
        groups.request_join(t(1));
        assert!(groups.request_leave(t(2)));

        groups.on_disconnected();
        assert!(!groups.is_joined(t(1)));
        let rejoin = groups.on_connected();
        assert_eq!(rejoin, vec![t(1), t(3)]);
    }

    #[test]
    fn leave_while_disconnected_prevents_rejoin() {
        let mut groups = GroupSubscriptionManager::new();
        groups.request_join(t(5));
        assert!(!groups.request_leave(t(5)));
        assert!(groups.on_connected().is_empty());
    }

    #[test]
    fn acknowledgments_reset_on_disconnect() {
        let mut groups = GroupSubscriptionManager::new();
        groups.request_join(t(1));
        groups.on_connected();
        assert!(groups.acknowledge(t(1)));
        assert!(groups.is_acknowledged(t(1)));
        groups.on_disconnected();
        assert!(!groups.is_acknowledged(t(1)));
        assert!(groups.is_desired(t(1)));
    }

    #[test]
    fn stale_ack_after_leave_is_rejected() {
        let mut groups = GroupSubscriptionManager::new();
        groups.on_connected();
        groups.request_join(t(1));
        groups.request_leave(t(1));
        assert!(!groups.acknowledge(t(1)));
    }

    #[test]
    fn leave_all_returns_live_groups_and_forgets_everything() {
        let mut groups = GroupSubscriptionManager::new();
        groups.on_connected();
        groups.request_join(t(1));
        groups.request_join(t(2));
        assert_eq!(groups.leave_all(), vec![t(1), t(2)]);
        assert_eq!(groups.desired().count(), 0);
        groups.on_disconnected();
        assert!(groups.on_connected().is_empty());
    }
}
