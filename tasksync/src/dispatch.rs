//! Named-event routing with single-slot handlers.
//!
//! Registering a handler for an event that already has one replaces it
//! (last registration wins), so re-registering after a reconnect can never
//! cause double delivery.

use std::collections::HashMap;

use tasksync_proto::hub::{EventKind, HubEvent};
use tasksync_proto::task::TaskId;

/// Handler invoked with the dispatcher's context, the group the event
/// arrived on, and the event itself.
pub type Handler<Ctx> = Box<dyn FnMut(&mut Ctx, TaskId, &HubEvent) + Send + Sync>;

/// Routes events to at most one handler per [`EventKind`].
pub struct EventDispatcher<Ctx> {
    handlers: HashMap<EventKind, Handler<Ctx>>,
}

impl<Ctx> Default for EventDispatcher<Ctx> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<Ctx> std::fmt::Debug for EventDispatcher<Ctx> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("registered", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<Ctx> EventDispatcher<Ctx> {
    /// Creates a dispatcher with no handlers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `kind`. Returns `true` if a previous handler
    /// was replaced.
    pub fn on<F>(&mut self, kind: EventKind, handler: F) -> bool
    where
        F: FnMut(&mut Ctx, TaskId, &HubEvent) + Send + Sync + 'static,
    {
        let replaced = self.handlers.insert(kind, Box::new(handler)).is_some();
        if replaced {
            tracing::debug!(event = %kind, "handler replaced");
        }
        replaced
    }

    /// Removes the handler for `kind`. Returns `true` if one was registered.
    pub fn off(&mut self, kind: EventKind) -> bool {
        self.handlers.remove(&kind).is_some()
    }

    /// Removes every handler.
    pub fn clear(&mut self) {
        self.handlers.clear();
    }

    /// Whether a handler is registered for `kind`.
    #[must_use]
    pub fn is_registered(&self, kind: EventKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Delivers `event` to its handler, synchronously.
    ///
    /// Returns `false` if no handler is registered for the event's kind.
    pub fn dispatch(&mut self, ctx: &mut Ctx, task_id: TaskId, event: &HubEvent) -> bool {
        let kind = event.kind();
        match self.handlers.get_mut(&kind) {
            Some(handler) => {
                handler(ctx, task_id, event);
                true
            }
            None => {
                tracing::trace!(event = %kind, task_id = %task_id, "no handler registered");
                false
            }
        }
    }
}
