use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use log::{debug, error};
use parking_lot::Mutex;
use serde::Serialize;

/// Health of the Big Segment store as last observed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct BigSegmentStoreStatus {
    /// False if the store could not be queried at all.
    pub available: bool,
    /// True if the store is reachable but has not been updated recently enough.
    pub stale: bool,
}

impl BigSegmentStoreStatus {
    pub(crate) const UNAVAILABLE: BigSegmentStoreStatus = BigSegmentStoreStatus {
        available: false,
        stale: false,
    };
}

/// Receives store status transitions from a [BigSegmentStoreStatusProvider].
///
/// `old` is `None` for the first status ever broadcast.
pub trait BigSegmentStatusListener: Send + Sync {
    fn status_changed(&self, old: Option<BigSegmentStoreStatus>, new: BigSegmentStoreStatus);
}

impl<F> BigSegmentStatusListener for F
where
    F: Fn(Option<BigSegmentStoreStatus>, BigSegmentStoreStatus) + Send + Sync,
{
    fn status_changed(&self, old: Option<BigSegmentStoreStatus>, new: BigSegmentStoreStatus) {
        self(old, new)
    }
}

/// Handle returned by [BigSegmentStoreStatusProvider::add_listener].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type StatusFn = Box<dyn Fn() -> BigSegmentStoreStatus + Send + Sync>;

#[derive(Default)]
struct Registry {
    last_status: Option<BigSegmentStoreStatus>,
    listeners: Vec<(ListenerId, Arc<dyn BigSegmentStatusListener>)>,
    next_id: u64,
}

/// Tracks the last broadcast store status and the listeners interested in changes to it.
pub struct BigSegmentStoreStatusProvider {
    status_fn: StatusFn,
    registry: Mutex<Registry>,
    // Held for a whole update so transitions reach listeners in the order they were recorded.
    broadcast: Mutex<()>,
}

impl BigSegmentStoreStatusProvider {
    pub(crate) fn new(status_fn: StatusFn) -> Self {
        Self {
            status_fn,
            registry: Mutex::new(Registry::default()),
            broadcast: Mutex::new(()),
        }
    }

    /// Queries the store right away, ignoring the poll interval. The result is not broadcast.
    pub fn status(&self) -> BigSegmentStoreStatus {
        (self.status_fn)()
    }

    /// The status most recently broadcast, if any.
    pub fn last_status(&self) -> Option<BigSegmentStoreStatus> {
        self.registry.lock().last_status
    }

    pub fn add_listener(&self, listener: Arc<dyn BigSegmentStatusListener>) -> ListenerId {
        let mut registry = self.registry.lock();
        let id = ListenerId(registry.next_id);
        registry.next_id += 1;
        registry.listeners.push((id, listener));
        id
    }

    /// Returns false if no listener had this id.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut registry = self.registry.lock();
        let before = registry.listeners.len();
        registry.listeners.retain(|(listener_id, _)| *listener_id != id);
        registry.listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.registry.lock().listeners.len()
    }

    /// Records `new` and, if it differs from the previous status, notifies every listener in
    /// the order they were added.
    ///
    /// Listeners run without the registry lock held, on the listener set as it was when the
    /// change was recorded. A panicking listener is logged and the rest are still notified.
    /// Concurrent updates are broadcast one at a time, so a listener must not call
    /// `update_status` itself.
    pub fn update_status(&self, new: BigSegmentStoreStatus) {
        let _broadcasting = self.broadcast.lock();
        let (old, listeners) = {
            let mut registry = self.registry.lock();
            if registry.last_status == Some(new) {
                return;
            }
            let old = registry.last_status.replace(new);
            let listeners: Vec<_> = registry
                .listeners
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect();
            (old, listeners)
        };

        debug!("big segment store status changed from {:?} to {:?}", old, new);
        for listener in listeners {
            let notified = catch_unwind(AssertUnwindSafe(|| listener.status_changed(old, new)));
            if notified.is_err() {
                error!("big segment status listener panicked while handling a status change");
            }
        }
    }
}
