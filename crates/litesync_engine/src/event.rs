//! Change events and listener fan-out.

use crate::error::ReplicationError;
use crate::state::Transition;
use litesync_protocol::Direction;
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// An immutable snapshot of an observable replication change.
///
/// Produced fresh for every state transition and every counter update;
/// never mutated after construction. Counter-only updates carry no
/// transition.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    /// Session ID of the replication that produced the event.
    pub source: String,
    /// Direction of that replication.
    pub direction: Direction,
    /// The state change, if this event reports one.
    pub transition: Option<Transition>,
    /// Total changes discovered so far.
    pub changes_count: u64,
    /// Changes applied so far.
    pub completed_changes_count: u64,
    /// The error that caused this event, if any.
    pub error: Option<Arc<ReplicationError>>,
}

/// A callback invoked on every replication change.
pub trait ChangeListener: Send + Sync {
    /// Called with each event, in registration order, on whichever
    /// execution context produced the event.
    fn changed(&self, event: &ChangeEvent);
}

impl<F> ChangeListener for F
where
    F: Fn(&ChangeEvent) + Send + Sync,
{
    fn changed(&self, event: &ChangeEvent) {
        self(event)
    }
}

/// Handle for removing a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerToken(u64);

/// Fans events out to registered listeners.
///
/// The listener list is copy-on-write: fan-out iterates an immutable
/// snapshot, and registration or removal publishes a new snapshot without
/// blocking an in-progress fan-out. A listener added mid-fan-out sees the
/// next event; a listener removed mid-fan-out still receives the current
/// one.
pub struct ChangeNotifier {
    listeners: RwLock<Arc<Vec<(u64, Arc<dyn ChangeListener>)>>>,
    next_token: AtomicU64,
}

impl ChangeNotifier {
    /// Creates an empty notifier.
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Arc::new(Vec::new())),
            next_token: AtomicU64::new(1),
        }
    }

    /// Registers a listener; returns a token for later removal.
    pub fn add(&self, listener: Arc<dyn ChangeListener>) -> ListenerToken {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.listeners.write();
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push((token, listener));
        *guard = Arc::new(next);
        ListenerToken(token)
    }

    /// Removes a listener. Unknown tokens are ignored.
    pub fn remove(&self, token: ListenerToken) {
        let mut guard = self.listeners.write();
        let next: Vec<_> = guard
            .iter()
            .filter(|(id, _)| *id != token.0)
            .cloned()
            .collect();
        *guard = Arc::new(next);
    }

    /// Returns the number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// Returns true if no listeners are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers an event to every listener, in registration order.
    ///
    /// Each invocation is isolated: a panicking listener is logged and the
    /// remaining listeners still receive the event.
    pub fn notify(&self, event: &ChangeEvent) {
        let snapshot = self.listeners.read().clone();
        for (id, listener) in snapshot.iter() {
            let result = catch_unwind(AssertUnwindSafe(|| listener.changed(event)));
            if result.is_err() {
                tracing::warn!(listener = id, "change listener panicked; continuing fan-out");
            }
        }
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use litesync_protocol::Direction;
    use parking_lot::Mutex;

    fn event() -> ChangeEvent {
        ChangeEvent {
            source: "session".into(),
            direction: Direction::Pull,
            transition: None,
            changes_count: 0,
            completed_changes_count: 0,
            error: None,
        }
    }

    #[test]
    fn delivery_in_registration_order() {
        let notifier = ChangeNotifier::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            notifier.add(Arc::new(move |_: &ChangeEvent| order.lock().push(tag)));
        }

        notifier.notify(&event());
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn panicking_listener_does_not_break_fan_out() {
        let notifier = ChangeNotifier::new();
        let delivered = Arc::new(Mutex::new(0u32));

        notifier.add(Arc::new(|_: &ChangeEvent| panic!("listener bug")));
        {
            let delivered = Arc::clone(&delivered);
            notifier.add(Arc::new(move |_: &ChangeEvent| *delivered.lock() += 1));
        }

        notifier.notify(&event());
        assert_eq!(*delivered.lock(), 1);
    }

    #[test]
    fn removal_by_token() {
        let notifier = ChangeNotifier::new();
        let count = Arc::new(Mutex::new(0u32));

        let token = {
            let count = Arc::clone(&count);
            notifier.add(Arc::new(move |_: &ChangeEvent| *count.lock() += 1))
        };
        notifier.notify(&event());
        notifier.remove(token);
        notifier.notify(&event());

        assert_eq!(*count.lock(), 1);
        // Removing again is harmless.
        notifier.remove(token);
    }

    #[test]
    fn mutation_during_fan_out_does_not_lose_stable_listeners() {
        let notifier = Arc::new(ChangeNotifier::new());
        let stable_hits = Arc::new(Mutex::new(0u32));

        // A listener that registers another listener while fan-out runs.
        {
            let notifier = Arc::clone(&notifier);
            notifier
                .clone()
                .add(Arc::new(move |_: &ChangeEvent| {
                    notifier.add(Arc::new(|_: &ChangeEvent| {}));
                }));
        }
        {
            let stable_hits = Arc::clone(&stable_hits);
            notifier.add(Arc::new(move |_: &ChangeEvent| *stable_hits.lock() += 1));
        }

        notifier.notify(&event());
        notifier.notify(&event());

        // The stable listener saw every event despite concurrent mutation.
        assert_eq!(*stable_hits.lock(), 2);
        // Two extra listeners were registered by the first one.
        assert_eq!(notifier.len(), 4);
    }
}
