//! Typed listener table: event type → ordered registrations.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use shared::types::sse::{EventEnvelope, EventType};
use tracing::error;

/// Callback invoked with each envelope of the type it was registered for.
pub type Listener = Arc<dyn Fn(&EventEnvelope) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Table {
    next_id: u64,
    listeners: HashMap<EventType, Vec<(ListenerId, Listener)>>,
}

impl Table {
    fn remove(&mut self, event_type: EventType, id: ListenerId) -> bool {
        let Some(list) = self.listeners.get_mut(&event_type) else {
            return false;
        };
        let before = list.len();
        list.retain(|(lid, _)| *lid != id);
        let removed = list.len() != before;
        if list.is_empty() {
            self.listeners.remove(&event_type);
        }
        removed
    }
}

/// Registrations are dispatched in the order they were made. Registering
/// the same callback twice yields two independent registrations.
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    table: Arc<Mutex<Table>>,
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.table.lock();
        f.debug_struct("ListenerRegistry")
            .field("event_types", &table.listeners.len())
            .finish()
    }
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, event_type: EventType, listener: F) -> Subscription
    where
        F: Fn(&EventEnvelope) + Send + Sync + 'static,
    {
        self.on_listener(event_type, Arc::new(listener))
    }

    pub fn on_listener(&self, event_type: EventType, listener: Listener) -> Subscription {
        let mut table = self.table.lock();
        table.next_id += 1;
        let id = ListenerId(table.next_id);
        table
            .listeners
            .entry(event_type)
            .or_default()
            .push((id, listener));

        Subscription {
            table: Arc::downgrade(&self.table),
            event_type,
            id,
        }
    }

    /// Remove one registration. Returns `false` if it was already gone.
    pub fn off(&self, event_type: EventType, id: ListenerId) -> bool {
        self.table.lock().remove(event_type, id)
    }

    /// Remove every registration of `listener` (same `Arc`) for `event_type`.
    pub fn off_listener(&self, event_type: EventType, listener: &Listener) -> usize {
        let mut table = self.table.lock();
        let Some(list) = table.listeners.get_mut(&event_type) else {
            return 0;
        };
        let before = list.len();
        list.retain(|(_, l)| !Arc::ptr_eq(l, listener));
        let removed = before - list.len();
        if list.is_empty() {
            table.listeners.remove(&event_type);
        }
        removed
    }

    pub fn listener_count(&self, event_type: EventType) -> usize {
        self.table
            .lock()
            .listeners
            .get(&event_type)
            .map_or(0, Vec::len)
    }

    /// Call every listener for the envelope's type, in registration order.
    ///
    /// Runs on a snapshot, so listeners may (un)register from inside a
    /// callback. A panicking listener is logged and skipped; the rest still
    /// run. Returns how many listeners completed.
    pub fn dispatch(&self, envelope: &EventEnvelope) -> usize {
        let snapshot: Vec<Listener> = match self.table.lock().listeners.get(&envelope.event_type()) {
            Some(list) => list.iter().map(|(_, l)| Arc::clone(l)).collect(),
            None => return 0,
        };

        let mut completed = 0;
        for listener in snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener(envelope))) {
                Ok(()) => completed += 1,
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!(
                        "Listener for {} panicked: {}",
                        envelope.event_type(),
                        reason
                    );
                }
            }
        }
        completed
    }
}

/// Handle returned by [`ListenerRegistry::on`]; removes exactly that
/// registration. Does not unsubscribe on drop.
#[derive(Debug, Clone)]
pub struct Subscription {
    table: Weak<Mutex<Table>>,
    event_type: EventType,
    id: ListenerId,
}

impl Subscription {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    /// Returns `false` if already unsubscribed (or the registry is gone).
    pub fn unsubscribe(&self) -> bool {
        match self.table.upgrade() {
            Some(table) => table.lock().remove(self.event_type, self.id),
            None => false,
        }
    }
}
