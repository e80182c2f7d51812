use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use engine_rpc_events::Bus;

use crate::handle::Handle;

/// What happened to a cached handle.
///
/// Published whenever a `change`/`close` side-band rides in on a response,
/// or a standalone `change`/`close` notification arrives for a handle this
/// session has a live proxy for.
#[derive(Debug, Clone)]
pub enum CacheEvent {
    Changed { handle: Handle },
    Closed { handle: Handle },
}

/// The current handle a live [`crate::proxy::Proxy`] points at.
///
/// A `resume()` can rewrite the server-side handle a cached object
/// answers to (the same object reattaching under a new server-issued
/// handle) while the proxy a caller is holding stays the same Rust value
/// — sharing this cell between a [`CacheEntry`] and its
/// [`crate::proxy::Proxy`] is what
/// makes that rewrite visible without the caller re-acquiring anything.
pub type HandleSlot = Arc<AtomicI64>;

/// One entry in the API cache: the metadata a [`crate::proxy::Proxy`] was
/// built from, kept around so `resume()` can reattach it without asking
/// the caller to remember what it had open.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub slot: HandleSlot,
    pub type_name: String,
}

impl CacheEntry {
    /// The handle this entry currently answers to. Changes across a
    /// `resume()` that reattaches it to a new server-issued handle.
    pub fn handle(&self) -> Handle {
        Handle(self.slot.load(Ordering::SeqCst))
    }
}

/// The live set of server-object proxies a session has handed out.
///
/// At most one entry exists per handle at any time — a second `get()` for
/// an already-cached handle returns the existing entry rather than
/// minting a new one, matching the "at most one proxy per live handle"
/// rule proxies are built around.
///
/// Entries are kept in insertion order (a `Vec` alongside the lookup map)
/// so `resume()` reconciles handles in the order they were first
/// acquired, which is the order most servers expect reattachment in.
pub struct ApiCache {
    entries: Mutex<CacheState>,
    events: Bus<CacheEvent>,
}

struct CacheState {
    order: Vec<Handle>,
    by_handle: HashMap<Handle, CacheEntry>,
}

impl ApiCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(CacheState {
                order: Vec::new(),
                by_handle: HashMap::new(),
            }),
            events: Bus::new(),
        }
    }

    /// Returns the cached entry for `handle`, or `None` if no proxy has
    /// been created for it yet.
    pub fn get(&self, handle: Handle) -> Option<CacheEntry> {
        self.entries.lock().expect("poisoned").by_handle.get(&handle).cloned()
    }

    /// Returns the [`HandleSlot`] for `handle`, creating a fresh entry of
    /// `type_name` if this is the first proxy acquired for it. An
    /// existing entry's slot is returned unchanged — this is what keeps
    /// "at most one proxy per live handle" true across repeated
    /// [`crate::session::Session::proxy`] calls for the same handle.
    pub fn get_or_insert(&self, handle: Handle, type_name: &str) -> HandleSlot {
        let mut guard = self.entries.lock().expect("poisoned");
        if let Some(entry) = guard.by_handle.get(&handle) {
            return entry.slot.clone();
        }
        let slot: HandleSlot = Arc::new(AtomicI64::new(handle.0));
        guard.order.push(handle);
        guard.by_handle.insert(handle, CacheEntry { slot: slot.clone(), type_name: type_name.to_string() });
        slot
    }

    /// Removes the entry currently keyed at `handle`, if any, and
    /// publishes a `Closed` event regardless (closing a handle this
    /// session never cached is harmless, just a no-op removal).
    pub fn remove(&self, handle: Handle) {
        let mut guard = self.entries.lock().expect("poisoned");
        guard.by_handle.remove(&handle);
        guard.order.retain(|h| *h != handle);
        drop(guard);
        self.events.publish(CacheEvent::Closed { handle });
    }

    /// Rewrites the entry currently keyed at `old` to answer to `new`
    /// instead, preserving its [`HandleSlot`] (and therefore every live
    /// [`crate::proxy::Proxy`] built from it) in place.
    ///
    /// Used by `resume()`'s reattach step, where the server may hand back
    /// a different handle than the one suspended with for the same
    /// underlying object. Returns `false` (a no-op) if `old` isn't
    /// currently cached.
    pub fn rekey(&self, old: Handle, new: Handle) -> bool {
        if old == new {
            return self.entries.lock().expect("poisoned").by_handle.contains_key(&old);
        }
        let mut guard = self.entries.lock().expect("poisoned");
        let Some(entry) = guard.by_handle.remove(&old) else {
            return false;
        };
        entry.slot.store(new.0, Ordering::SeqCst);
        if let Some(slot) = guard.order.iter_mut().find(|h| **h == old) {
            *slot = new;
        }
        guard.by_handle.insert(new, entry);
        true
    }

    /// Publishes a change for `handle` without altering the cache
    /// contents — the entry's `type_name` doesn't change, only the
    /// server-side object it names.
    pub fn notify_changed(&self, handle: Handle) {
        self.events.publish(CacheEvent::Changed { handle });
    }

    /// Entries in the order they were first inserted, for `resume()` to
    /// walk when reconciling.
    pub fn entries_in_order(&self) -> Vec<CacheEntry> {
        let guard = self.entries.lock().expect("poisoned");
        guard
            .order
            .iter()
            .filter_map(|handle| guard.by_handle.get(handle).cloned())
            .collect()
    }

    pub fn events(&self) -> &Bus<CacheEvent> {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("poisoned").order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ApiCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn second_get_for_the_same_handle_returns_the_same_slot() {
        let cache = ApiCache::new();
        let first = cache.get_or_insert(Handle(1), "Sheet");
        let second = cache.get_or_insert(Handle(1), "Book");

        assert_eq!(cache.get(Handle(1)).unwrap().type_name, "Sheet");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn entries_preserve_insertion_order() {
        let cache = ApiCache::new();
        cache.get_or_insert(Handle(3), "A");
        cache.get_or_insert(Handle(1), "B");
        cache.get_or_insert(Handle(2), "C");

        let handles: Vec<_> = cache.entries_in_order().into_iter().map(|e| e.handle()).collect();
        assert_eq!(handles, vec![Handle(3), Handle(1), Handle(2)]);
    }

    #[test]
    fn remove_drops_the_entry() {
        let cache = ApiCache::new();
        cache.get_or_insert(Handle(1), "Sheet");
        cache.remove(Handle(1));
        assert!(cache.get(Handle(1)).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn rekey_moves_the_entry_and_updates_its_slot_in_place() {
        let cache = ApiCache::new();
        let slot = cache.get_or_insert(Handle(2), "Sheet");

        assert!(cache.rekey(Handle(2), Handle(22)));

        assert!(cache.get(Handle(2)).is_none());
        let moved = cache.get(Handle(22)).expect("entry now lives at the new handle");
        assert_eq!(moved.handle(), Handle(22));
        assert!(Arc::ptr_eq(&moved.slot, &slot));
        assert_eq!(slot.load(Ordering::SeqCst), 22);

        let order: Vec<_> = cache.entries_in_order().into_iter().map(|e| e.handle()).collect();
        assert_eq!(order, vec![Handle(22)]);
    }

    #[test]
    fn rekey_of_an_uncached_handle_is_a_no_op() {
        let cache = ApiCache::new();
        assert!(!cache.rekey(Handle(9), Handle(90)));
    }
}
