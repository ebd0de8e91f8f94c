//! Per-key registry of shared in-flight operations.
//!
//! Callers asking for a key that is already running get a clone of the same
//! shared future instead of starting a second operation. The map only holds
//! weak handles; each registration carries a guard that removes its slot
//! when the operation settles or when every caller has dropped it.

use std::future::Future;
use std::sync::{Arc, Mutex, Weak};

use foldhash::{HashMap, HashMapExt};
use futures_util::future::{BoxFuture, FutureExt, Shared, WeakShared};

use crate::lock;

/// Cloneable handle to a coalesced operation.
pub type SharedRequest<T> = Shared<BoxFuture<'static, T>>;

struct Slot<T, X> {
    generation: u64,
    request: WeakShared<BoxFuture<'static, T>>,
    extra: X,
}

struct Slots<T, X> {
    next_generation: u64,
    map: HashMap<String, Slot<T, X>>,
}

/// Registry of in-flight operations keyed by URL.
///
/// `X` carries per-registration data, such as a cancellation handle.
pub(crate) struct InFlight<T, X = ()> {
    slots: Arc<Mutex<Slots<T, X>>>,
}

/// Removes its slot on drop unless a newer registration replaced it.
struct SlotGuard<T, X> {
    slots: Weak<Mutex<Slots<T, X>>>,
    key: String,
    generation: u64,
}

impl<T, X> Drop for SlotGuard<T, X> {
    fn drop(&mut self) {
        let Some(slots) = self.slots.upgrade() else {
            return;
        };
        let mut slots = lock(&slots);
        if slots
            .map
            .get(&self.key)
            .is_some_and(|slot| slot.generation == self.generation)
        {
            slots.map.remove(&self.key);
        }
    }
}

impl<T, X> Default for InFlight<T, X> {
    fn default() -> Self {
        Self {
            slots: Arc::new(Mutex::new(Slots {
                next_generation: 0,
                map: HashMap::new(),
            })),
        }
    }
}

impl<T, X> InFlight<T, X>
where
    T: Clone + Send + Sync + 'static,
    X: Clone + Send + 'static,
{
    /// Return the live operation for `key`, if any.
    pub fn join(&self, key: &str) -> Option<SharedRequest<T>> {
        let mut slots = lock(&self.slots);
        let request = slots.map.get(key)?.request.upgrade();
        if request.is_none() {
            slots.map.remove(key);
        }
        request
    }

    /// Register `future` under `key`, replacing any previous registration.
    pub fn register<F>(&self, key: &str, future: F, extra: X) -> SharedRequest<T>
    where
        F: Future<Output = T> + Send + 'static,
    {
        let mut slots = lock(&self.slots);
        self.insert(&mut slots, key, future, extra)
    }

    /// Join the live operation for `key` or register a new one built by
    /// `make`. The boolean is true when a new operation was registered.
    ///
    /// The check and the insert happen under one lock.
    pub fn join_or_register<F, M>(&self, key: &str, make: M) -> (SharedRequest<T>, bool)
    where
        F: Future<Output = T> + Send + 'static,
        M: FnOnce() -> (F, X),
    {
        let mut slots = lock(&self.slots);
        if let Some(request) = slots.map.get(key).and_then(|slot| slot.request.upgrade()) {
            return (request, false);
        }
        let (future, extra) = make();
        (self.insert(&mut slots, key, future, extra), true)
    }

    /// Per-registration data for the live operation under `key`.
    pub fn extra(&self, key: &str) -> Option<X> {
        lock(&self.slots).map.get(key).map(|slot| slot.extra.clone())
    }

    /// Number of registered operations.
    pub fn len(&self) -> usize {
        lock(&self.slots).map.len()
    }

    fn insert<F>(&self, slots: &mut Slots<T, X>, key: &str, future: F, extra: X) -> SharedRequest<T>
    where
        F: Future<Output = T> + Send + 'static,
    {
        let generation = slots.next_generation;
        slots.next_generation += 1;

        let guard = SlotGuard {
            slots: Arc::downgrade(&self.slots),
            key: key.to_string(),
            generation,
        };
        let request = async move {
            let _guard = guard;
            future.await
        }
        .boxed()
        .shared();

        if let Some(weak) = request.downgrade() {
            slots.map.insert(
                key.to_string(),
                Slot {
                    generation,
                    request: weak,
                    extra,
                },
            );
        }
        request
    }
}
