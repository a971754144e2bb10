//! Notifications for the embedding application.

use crate::config::ClientOptions;
use crate::state::{ConnectionStates, DerivedState};
use parking_lot::Mutex;
use rtlink_protocol::EventRecord;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Context of a failed HTTP request.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorReport {
    /// API path.
    pub path: String,
    /// HTTP method.
    pub method: String,
    /// Resolved URL, if one could be built.
    pub url: Option<String>,
    /// Response status, for status errors.
    pub status: Option<u16>,
    /// Decoded error body, `Null` if absent or not JSON.
    pub body: Value,
}

/// Something the application may want to observe.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// The `connect()` that started an attempt settled.
    Connected {
        /// States at that moment.
        states: ConnectionStates,
        /// Options passed to that `connect()`.
        options: Option<ClientOptions>,
    },
    /// `disconnect()` completed.
    Disconnected {
        /// States at that moment (both offline).
        states: ConnectionStates,
        /// Options passed to that `disconnect()`.
        options: Option<ClientOptions>,
    },
    /// The derived state changed.
    State {
        /// New derived state.
        current: DerivedState,
        /// Previous derived state.
        previous: DerivedState,
    },
    /// A new event was admitted.
    Event(EventRecord),
    /// Polling delivered an event push should have delivered.
    Missed(EventRecord),
    /// The room set changed.
    Rooms {
        /// All joined rooms.
        rooms: Vec<String>,
    },
    /// Analytics payload pushed by the server.
    Analytics(Value),
    /// No event for the configured timeout.
    Inactivity {
        /// The configured timeout.
        timeout: Duration,
    },
    /// The push transport connected.
    PushUp,
    /// The push transport went down.
    PushDown,
    /// Reply to `ping()`.
    Pong(Value),
    /// An HTTP request failed.
    Error(ErrorReport),
    /// Application defined notification.
    Custom {
        /// Notification name.
        name: String,
        /// Payload.
        payload: Value,
    },
}

impl Notification {
    /// Name listeners subscribe to.
    pub fn name(&self) -> &str {
        match self {
            Notification::Connected { .. } => "connected",
            Notification::Disconnected { .. } => "disconnected",
            Notification::State { .. } => "state",
            Notification::Event(_) => "event",
            Notification::Missed(_) => "missed",
            Notification::Rooms { .. } => "rooms",
            Notification::Analytics(_) => "analytics",
            Notification::Inactivity { .. } => "inactivity",
            Notification::PushUp => "pushUp",
            Notification::PushDown => "pushDown",
            Notification::Pong(_) => "pong",
            Notification::Error(_) => "error",
            Notification::Custom { name, .. } => name,
        }
    }
}

/// Identifies a registered listener, for [`EventBus::off`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Handler = Arc<dyn Fn(&Notification) + Send + Sync>;

struct Listener {
    id: ListenerId,
    handler: Handler,
    once: bool,
}

/// Named publish/subscribe dispatch.
///
/// Handlers run synchronously, in registration order, with no internal lock
/// held, so a handler may register listeners or trigger notifications itself.
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<String, Vec<Listener>>>,
}

impl EventBus {
    /// Creates a bus without listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener.
    pub fn on<F>(&self, name: &str, handler: F) -> ListenerId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.register(name, Arc::new(handler), false)
    }

    /// Registers a listener removed after its first call.
    pub fn once<F>(&self, name: &str, handler: F) -> ListenerId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.register(name, Arc::new(handler), true)
    }

    /// Removes a listener. Returns false if it was not registered.
    pub fn off(&self, name: &str, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let Some(list) = listeners.get_mut(name) else {
            return false;
        };
        let before = list.len();
        list.retain(|listener| listener.id != id);
        before != list.len()
    }

    /// Dispatches a notification to the listeners of its name.
    pub fn trigger(&self, notification: &Notification) {
        let handlers: Vec<Handler> = {
            let mut listeners = self.listeners.lock();
            let Some(list) = listeners.get_mut(notification.name()) else {
                return;
            };
            let handlers = list.iter().map(|l| Arc::clone(&l.handler)).collect();
            // once listeners go before any handler runs
            list.retain(|listener| !listener.once);
            handlers
        };
        for handler in handlers {
            handler(notification);
        }
    }

    /// Number of listeners registered under `name`.
    pub fn listener_count(&self, name: &str) -> usize {
        self.listeners.lock().get(name).map_or(0, Vec::len)
    }

    fn register(&self, name: &str, handler: Handler, once: bool) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .entry(name.to_string())
            .or_default()
            .push(Listener { id, handler, once });
        id
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.listeners.lock();
        let counts: HashMap<&str, usize> = listeners
            .iter()
            .map(|(name, list)| (name.as_str(), list.len()))
            .collect();
        f.debug_struct("EventBus").field("listeners", &counts).finish()
    }
}
