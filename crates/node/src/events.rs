//! Per-instance publish/subscribe of output and exit events.
//!
//! Listeners are dispatched synchronously, in the order in which they subscribed. A panicking
//! listener is isolated: the panic is logged and the remaining listeners still observe the event.

use std::{
    any::Any,
    collections::HashMap,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use strum::{AsRefStr, Display};
use tracing::warn;

/// The kinds of events that an instance emits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    /// Every sanitized line, regardless of the stream it was written to.
    Message,
    Stdout,
    Stderr,
    /// The end of a run, emitted exactly once per run.
    Exit,
}

/// An event emitted by an instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstanceEvent<'a> {
    Message(&'a str),
    Stdout(&'a str),
    Stderr(&'a str),
    /// The exit code of the process, `None` when it was terminated by a signal.
    Exit(Option<i32>),
}

impl<'a> InstanceEvent<'a> {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Message(_) => EventKind::Message,
            Self::Stdout(_) => EventKind::Stdout,
            Self::Stderr(_) => EventKind::Stderr,
            Self::Exit(_) => EventKind::Exit,
        }
    }

    /// The output line carried by the event, if any.
    pub fn line(&self) -> Option<&'a str> {
        match self {
            Self::Message(line) | Self::Stdout(line) | Self::Stderr(line) => Some(*line),
            Self::Exit(_) => None,
        }
    }

    /// The exit code carried by an [`InstanceEvent::Exit`] event.
    pub fn exit_code(&self) -> Option<Option<i32>> {
        match self {
            Self::Exit(code) => Some(*code),
            _ => None,
        }
    }
}

/// Identifies a subscription so that it can be removed again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

pub type Listener = Arc<dyn Fn(&InstanceEvent<'_>) + Send + Sync>;

/// The listeners of a single instance, keyed by event kind.
#[derive(Default)]
pub struct Listeners {
    next_id: AtomicU64,
    registry: Mutex<HashMap<EventKind, Vec<(ListenerId, Listener)>>>,
}

impl Listeners {
    pub fn subscribe(&self, kind: EventKind, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push((id, listener));
        id
    }

    /// Removes a subscription, returning whether it existed.
    pub fn unsubscribe(&self, kind: EventKind, id: ListenerId) -> bool {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(listeners) = registry.get_mut(&kind) else {
            return false;
        };
        let count = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        count != listeners.len()
    }

    pub fn len(&self, kind: EventKind) -> usize {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Dispatches the event to the listeners of its kind.
    ///
    /// The registry lock is released before the listeners run so that they can subscribe,
    /// unsubscribe or query the instance themselves.
    pub fn emit(&self, event: &InstanceEvent<'_>) {
        let listeners = self
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event.kind())
            .map(|listeners| {
                listeners
                    .iter()
                    .map(|(id, listener)| (*id, listener.clone()))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        for (id, listener) in listeners {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| listener(event))) {
                warn!(
                    kind = %event.kind(),
                    listener = ?id,
                    panic = panic_message(payload.as_ref()),
                    "Event listener panicked"
                );
            }
        }
    }
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        let mut map = f.debug_map();
        for (kind, listeners) in registry.iter() {
            map.entry(kind, &listeners.len());
        }
        map.finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
