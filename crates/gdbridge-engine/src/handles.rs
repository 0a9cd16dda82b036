//! Handle table for native-to-managed callbacks
//!
//! Maps opaque integers the host stores (instance ids, method userdata,
//! callable userdata, virtual-call tokens) to managed values. Integers come
//! from a single monotonically increasing counter and are never reused.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

/// Opaque key into a [`HandleTable`]. Zero is never issued.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u64);

impl Handle {
    /// Handle for a raw integer received from the host.
    pub fn from_raw(raw: u64) -> Self {
        Handle(raw)
    }

    /// Raw integer to hand to the host.
    pub fn raw(self) -> u64 {
        self.0
    }

    /// True for the zero value the host uses for "no handle".
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

type Entry = Arc<dyn Any + Send + Sync>;

/// Concurrent handle → managed value map.
pub struct HandleTable {
    next_id: AtomicU64,
    entries: DashMap<u64, Entry>,
}

impl HandleTable {
    /// Empty table; the first handle issued is 1.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: DashMap::new(),
        }
    }

    /// Store `value` under a fresh handle.
    pub fn insert<T: Any + Send + Sync>(&self, value: T) -> Handle {
        self.insert_arc(Arc::new(value))
    }

    /// Store an already shared value under a fresh handle.
    pub fn insert_arc(&self, value: Entry) -> Handle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(id, value);
        Handle(id)
    }

    /// Value behind `handle`. An invalid handle is a fault.
    pub fn value(&self, handle: Handle) -> Entry {
        match self.entries.get(&handle.0) {
            Some(entry) => entry.value().clone(),
            None => panic!("invalid handle {}", handle),
        }
    }

    /// Value behind `handle`, downcast to `T`. An invalid handle or a value of
    /// another type is a fault.
    pub fn get<T: Any + Send + Sync>(&self, handle: Handle) -> Arc<T> {
        match self.value(handle).downcast::<T>() {
            Ok(value) => value,
            Err(_) => panic!(
                "handle {} does not hold a {}",
                handle,
                std::any::type_name::<T>()
            ),
        }
    }

    /// Value behind `handle`, or `None` if it is invalid or of another type.
    pub fn try_get<T: Any + Send + Sync>(&self, handle: Handle) -> Option<Arc<T>> {
        let entry = self.entries.get(&handle.0)?.value().clone();
        entry.downcast::<T>().ok()
    }

    /// Invalidate `handle` and return its value. Deleting an invalid handle
    /// is a fault.
    pub fn delete(&self, handle: Handle) -> Entry {
        match self.entries.remove(&handle.0) {
            Some((_, value)) => value,
            None => panic!("delete of invalid handle {}", handle),
        }
    }

    /// True if `handle` is live.
    pub fn contains(&self, handle: Handle) -> bool {
        self.entries.contains_key(&handle.0)
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no handle is live.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HandleTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleTable")
            .field("live", &self.entries.len())
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish()
    }
}
