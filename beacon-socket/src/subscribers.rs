//! Subscriber registry for decoded realtime messages.
//!
//! Every consumer registers a callback and holds the returned
//! [`Subscription`]; releasing it (explicitly or by drop) removes the
//! callback. The set survives reconnects and lives as long as the router
//! that owns it.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::{debug, warn};

use crate::events::InboundMessage;

type Callback = Arc<dyn Fn(&InboundMessage) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    entries: Mutex<HashMap<u64, Callback>>,
}

impl Registry {
    fn entries(&self) -> MutexGuard<'_, HashMap<u64, Callback>> {
        // Callbacks never run under this lock, so a poisoned guard still
        // holds a consistent map.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Result of delivering one message to the subscriber set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Subscribers that returned normally.
    pub delivered: usize,
    /// Subscribers that panicked.
    pub failed: usize,
}

/// Unordered set of message callbacks.
///
/// Cloning yields another handle to the same set.
#[derive(Clone, Default)]
pub struct SubscriberSet {
    registry: Arc<Registry>,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback. The callback stays registered until the returned
    /// handle is released.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.entries().insert(id, Arc::new(callback));
        debug!(subscriber = id, "subscriber registered");
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
            active: AtomicBool::new(true),
        }
    }

    /// Number of registered subscribers.
    pub fn len(&self) -> usize {
        self.registry.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver a message to every subscriber registered at call time.
    ///
    /// The set is snapshotted before delivery, so callbacks may subscribe or
    /// unsubscribe freely; such changes take effect from the next message.
    /// A panicking callback is contained and does not affect the others.
    pub fn dispatch(&self, message: &InboundMessage) -> DispatchReport {
        let snapshot: Vec<(u64, Callback)> = self
            .registry
            .entries()
            .iter()
            .map(|(id, cb)| (*id, Arc::clone(cb)))
            .collect();

        let mut report = DispatchReport::default();
        for (id, callback) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| callback(message))) {
                Ok(()) => report.delivered += 1,
                Err(panic) => {
                    report.failed += 1;
                    warn!(
                        subscriber = id,
                        "subscriber panicked on {}: {}",
                        message.label(),
                        panic_message(panic.as_ref())
                    );
                }
            }
        }
        report
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Handle to a registered subscriber.
///
/// Dropping the handle unsubscribes. [`Subscription::unsubscribe`] may be
/// called any number of times; only the first call has an effect.
pub struct Subscription {
    id: u64,
    registry: Weak<Registry>,
    active: AtomicBool,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the callback is still registered through this handle.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Remove the callback from the set.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.entries().remove(&self.id);
            debug!(subscriber = self.id, "subscriber removed");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use crate::events::BroadcastEvent;

    fn message() -> InboundMessage {
        InboundMessage::Broadcast(BroadcastEvent {
            event: "ping".into(),
            payload: serde_json::Value::Null,
        })
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&InboundMessage) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, move |_: &InboundMessage| {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_dispatch_reaches_all_subscribers() {
        let set = SubscriberSet::new();
        let (a, cb_a) = counter();
        let (b, cb_b) = counter();
        let _sa = set.subscribe(cb_a);
        let _sb = set.subscribe(cb_b);

        let report = set.dispatch(&message());
        assert_eq!(report, DispatchReport { delivered: 2, failed: 0 });
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_subscriber_is_isolated() {
        let set = SubscriberSet::new();
        let (a, cb_a) = counter();
        let (b, cb_b) = counter();
        let _sa = set.subscribe(cb_a);
        let _bad = set.subscribe(|_| panic!("subscriber failure"));
        let _sb = set.subscribe(cb_b);

        let report = set.dispatch(&message());
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);

        // The panicking subscriber stays registered and the set keeps working.
        assert_eq!(set.len(), 3);
        set.dispatch(&message());
        assert_eq!(a.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let set = SubscriberSet::new();
        let (a, cb_a) = counter();
        let sub = set.subscribe(cb_a);
        assert!(sub.is_active());

        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());
        assert!(set.is_empty());

        set.dispatch(&message());
        assert_eq!(a.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let set = SubscriberSet::new();
        {
            let _sub = set.subscribe(|_| {});
            assert_eq!(set.len(), 1);
        }
        assert!(set.is_empty());
    }

    #[test]
    fn test_unsubscribe_after_set_dropped() {
        let set = SubscriberSet::new();
        let sub = set.subscribe(|_| {});
        drop(set);
        sub.unsubscribe();
        assert!(!sub.is_active());
    }

    #[test]
    fn test_mutation_during_dispatch() {
        let set = SubscriberSet::new();
        let late = Arc::new(Mutex::new(Vec::new()));
        let (late_count, late_cb) = counter();
        let late_cb = Arc::new(late_cb);

        // A subscriber that removes itself and registers another one mid-dispatch.
        let self_handle: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let handle_slot = Arc::clone(&self_handle);
        let inner_set = set.clone();
        let late_slot = Arc::clone(&late);
        let sub = set.subscribe(move |_| {
            if let Some(me) = handle_slot.lock().unwrap().as_ref() {
                me.unsubscribe();
            }
            let cb = Arc::clone(&late_cb);
            let added = inner_set.subscribe(move |m| cb(m));
            late_slot.lock().unwrap().push(added);
        });
        *self_handle.lock().unwrap() = Some(sub);

        let report = set.dispatch(&message());
        assert_eq!(report.delivered, 1);
        assert_eq!(late_count.load(Ordering::SeqCst), 0);

        // Only the subscriber added during the first dispatch remains.
        assert_eq!(set.len(), 1);
        set.dispatch(&message());
        assert_eq!(late_count.load(Ordering::SeqCst), 1);
    }
}
