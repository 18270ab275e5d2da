//
// registry.rs
//
// Two-way id<->target maps (spec §4.B/C). Registration is idempotent on
// target identity: the same target always yields the same id, and the
// registry grows by exactly one entry no matter how many times it is
// registered (spec invariant 1).
//

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use rand::Rng;

/// Mints ids for targets the marshal pipeline discovers mid-graph-walk
/// (futures, generic objects, callbacks) that were never explicitly
/// registered by name. Explicitly-named registrations (e.g.
/// `register_host_object("calc", ...)`) bypass this.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

/// Default generator: a monotonic counter with a prefix, in the style of
/// `cli::rpc`'s `next_message_id`/`MESSAGE_ID_COUNTER`.
pub struct CounterIdGenerator {
    prefix: &'static str,
    counter: AtomicU64,
}

impl CounterIdGenerator {
    pub fn new(prefix: &'static str) -> Self {
        Self { prefix, counter: AtomicU64::new(0) }
    }
}

impl Default for CounterIdGenerator {
    fn default() -> Self {
        Self::new("obj")
    }
}

impl IdGenerator for CounterIdGenerator {
    fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("{}-{}", self.prefix, n)
    }
}

/// Non-sequential id generator for callers who don't want monotonic ids
/// to leak ordering information across the wire.
pub struct RandomIdGenerator {
    prefix: &'static str,
}

impl RandomIdGenerator {
    pub fn new(prefix: &'static str) -> Self {
        Self { prefix }
    }
}

impl IdGenerator for RandomIdGenerator {
    fn next_id(&self) -> String {
        let suffix: String = rand::thread_rng()
            .sample_iter(rand::distributions::Alphanumeric)
            .take(12)
            .map(char::from)
            .collect();
        format!("{}-{}", self.prefix, suffix)
    }
}

/// A generic id<->target registry. `T` is the target handle (typically
/// `Arc<dyn SomeHostTrait>`, cheap to clone), `D` its descriptor.
pub struct Registry<T, D> {
    id_gen: Box<dyn IdGenerator>,
    entries: Mutex<HashMap<String, (T, D)>>,
    by_identity: Mutex<HashMap<usize, String>>,
}

impl<T: Clone, D: Clone> Registry<T, D> {
    pub fn new(id_gen: Box<dyn IdGenerator>) -> Self {
        Self {
            id_gen,
            entries: Mutex::new(HashMap::new()),
            by_identity: Mutex::new(HashMap::new()),
        }
    }

    /// Registers `target` under the caller-supplied `id`, unless it is
    /// already registered (by identity), in which case the existing id
    /// is returned unchanged.
    pub fn register(&self, id: impl Into<String>, identity: usize, target: T, desc: D) -> String {
        let mut by_identity = self.by_identity.lock().unwrap();
        if let Some(existing) = by_identity.get(&identity) {
            return existing.clone();
        }
        let id = id.into();
        by_identity.insert(identity, id.clone());
        self.entries.lock().unwrap().insert(id.clone(), (target, desc));
        id
    }

    /// Registers `target` under a freshly-minted id if it isn't already
    /// registered; used by the marshal pipeline for values discovered
    /// mid-graph-walk rather than registered ahead of time by name.
    pub fn mint(&self, identity: usize, target: T, desc: D) -> String {
        let mut by_identity = self.by_identity.lock().unwrap();
        if let Some(existing) = by_identity.get(&identity) {
            return existing.clone();
        }
        let id = self.id_gen.next_id();
        by_identity.insert(identity, id.clone());
        self.entries.lock().unwrap().insert(id.clone(), (target, desc));
        id
    }

    pub fn lookup(&self, id: &str) -> Option<(T, D)> {
        self.entries.lock().unwrap().get(id).cloned()
    }

    /// Removes the entry for `id`, e.g. on receipt of `ObjectDied`.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.entries.lock().unwrap().remove(id).is_some();
        if removed {
            self.by_identity.lock().unwrap().retain(|_, v| v != id);
        }
        removed
    }
}
