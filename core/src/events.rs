//! Lifecycle event broadcasting.
//!
//! # Design
//! Listeners observe every request a client makes, independent of whoever
//! awaits the result; UI code uses them for spinners and progress bars.
//!
//! Delivery is synchronous: `notify` invokes every listener, in registration
//! order, before returning. The listener list is snapshotted before dispatch,
//! so a listener may add or remove listeners (including itself) from inside
//! its callback without affecting the event being delivered. A panicking
//! listener is logged and skipped; it never reaches the request.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;

use crate::handle::{RequestHandle, RequestId};

/// The kinds of event a request goes through.
///
/// A request emits `LoadStart`, then any number of `Progress` and
/// `ReadyStateChange`, then exactly one of `Load`, `Error`, `Timeout` or
/// `Abort`, then `LoadEnd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Load,
    Error,
    Timeout,
    Abort,
    LoadStart,
    LoadEnd,
    Progress,
    ReadyStateChange,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Load => "load",
            EventKind::Error => "error",
            EventKind::Timeout => "timeout",
            EventKind::Abort => "abort",
            EventKind::LoadStart => "loadstart",
            EventKind::LoadEnd => "loadend",
            EventKind::Progress => "progress",
            EventKind::ReadyStateChange => "readystatechange",
        }
    }

    /// Load, error, timeout and abort end a request's life.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EventKind::Load | EventKind::Error | EventKind::Timeout | EventKind::Abort
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fine-grained transport state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadyState {
    Opened,
    HeadersReceived,
    Loading,
    Done,
}

/// Transport-specific detail attached to an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEvent {
    Progress { loaded: u64, total: Option<u64> },
    ReadyState(ReadyState),
    Failure(String),
}

/// One notification delivered to listeners.
#[derive(Debug, Clone)]
pub struct ClientEvent {
    pub request_id: RequestId,
    pub kind: EventKind,
    /// Requests in flight when the event was dispatched. Terminal events are
    /// dispatched after the request has left the registry, so the finishing
    /// request is not counted.
    pub running: usize,
    pub request: Option<RequestHandle>,
    pub raw: Option<RawEvent>,
}

pub type Listener = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

type ListenerList = Mutex<Vec<(u64, Listener)>>;

/// Fans events out to registered listeners.
pub struct EventBroadcaster {
    next_id: AtomicU64,
    listeners: Arc<ListenerList>,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn listen<F>(&self, listener: F) -> ListenerRegistration
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, Arc::new(listener)));
        ListenerRegistration {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }

    pub fn notify(&self, event: &ClientEvent) {
        let snapshot: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        tracing::trace!(
            request = %event.request_id,
            kind = %event.kind,
            running = event.running,
            listeners = snapshot.len(),
            "notifying listeners"
        );
        for listener in snapshot {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(event))) {
                tracing::warn!(
                    request = %event.request_id,
                    kind = %event.kind,
                    reason = panic_message(&*panic),
                    "listener panicked while being notified"
                );
            }
        }
    }
}

impl fmt::Debug for EventBroadcaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBroadcaster")
            .field("listeners", &self.len())
            .finish()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

/// Returned by `listen`; removes the listener it was issued for.
#[derive(Debug, Clone)]
pub struct ListenerRegistration {
    id: u64,
    listeners: Weak<ListenerList>,
}

impl ListenerRegistration {
    /// Remove the listener. Returns false if it was already removed.
    pub fn remove(&self) -> bool {
        let Some(listeners) = self.listeners.upgrade() else {
            return false;
        };
        let mut listeners = listeners.lock();
        match listeners.iter().position(|(id, _)| *id == self.id) {
            Some(index) => {
                listeners.remove(index);
                true
            }
            None => false,
        }
    }
}
