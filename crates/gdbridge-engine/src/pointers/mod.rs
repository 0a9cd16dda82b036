//! Pointer lifetime registry
//!
//! Tracks every host-owned value that crosses into managed code:
//!
//! - each value gets a slot in a generation-tagged table and keeps one
//!   [`Ownership`] for its whole life
//! - a [`Pointer`] is the managed reference to a slot; dropping it marks the
//!   slot unreferenced (or frees it outright for borrowed views)
//! - [`PointerRegistry::cycle`] destroys unreferenced owned values in a batch,
//!   calling the host destructor for their kind outside the table lock
//! - pinned values never take part in a sweep; they are released by
//!   [`PointerRegistry::unpin`] / [`PointerRegistry::unpin_all`]
//!
//! Using a pointer whose slot has been destroyed is a programming error and
//! panics.

mod pin;
mod slots;

pub use pin::PinScope;
pub use slots::SlotKey;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use gdbridge_sdk::VariantType;
use parking_lot::Mutex;

use crate::symbols;
use crate::transport::{Address, NativeOp, Resolver};
use slots::{Released, SlotTable};

/// Ownership class of a boundary-crossing value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ownership {
    /// The bridge destroys it exactly once
    Owned,
    /// The host owns it; the bridge never destroys it
    Borrowed,
    /// Shared; destruction releases one reference
    RefCounted,
    /// Exempt from sweeps until explicitly unpinned
    Pinned,
}

/// Registry counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Live slots
    pub live: usize,
    /// Live pinned slots
    pub pinned: usize,
    /// Live slots waiting for the next sweep
    pub unreferenced: usize,
    /// Slots ever created
    pub created: u64,
    /// Values handed to a host destructor
    pub destroyed: u64,
    /// Sweeps run
    pub sweeps: u64,
}

/// Outcome of [`PointerRegistry::shutdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Values destroyed by the shutdown sweeps
    pub destroyed: usize,
    /// Unreferenced values still waiting after the last sweep
    pub leftover: usize,
}

/// Slot table plus the destructor plumbing.
pub struct PointerRegistry {
    table: Mutex<SlotTable>,
    resolver: Arc<Resolver>,
    created: AtomicU64,
    destroyed: AtomicU64,
    sweeps: AtomicU64,
}

impl PointerRegistry {
    /// Registry that destroys values through `resolver`.
    pub fn new(resolver: Arc<Resolver>) -> Arc<Self> {
        Arc::new(PointerRegistry {
            table: Mutex::new(SlotTable::default()),
            resolver,
            created: AtomicU64::new(0),
            destroyed: AtomicU64::new(0),
            sweeps: AtomicU64::new(0),
        })
    }

    /// Adopt raw words as an owned value.
    pub fn adopt(self: &Arc<Self>, kind: VariantType, words: [u64; 3]) -> Pointer {
        self.adopt_as(kind, Ownership::Owned, words)
    }

    /// Adopt raw words with an explicit ownership class.
    pub fn adopt_as(
        self: &Arc<Self>,
        kind: VariantType,
        ownership: Ownership,
        words: [u64; 3],
    ) -> Pointer {
        let key = self.table.lock().insert(kind, ownership, words);
        self.created.fetch_add(1, Ordering::Relaxed);
        Pointer {
            registry: self.clone(),
            key,
            released: false,
        }
    }

    /// Read-only view of a value the host keeps ownership of.
    pub fn borrow(self: &Arc<Self>, kind: VariantType, words: [u64; 3]) -> Pointer {
        self.adopt_as(kind, Ownership::Borrowed, words)
    }

    /// Adopt raw words as a pinned value.
    pub fn pin(self: &Arc<Self>, kind: VariantType, words: [u64; 3]) -> Pointer {
        self.adopt_as(kind, Ownership::Pinned, words)
    }

    fn with_slot<R>(&self, key: SlotKey, f: impl FnOnce(&mut slots::Slot) -> R) -> R {
        let mut table = self.table.lock();
        if let Some(slot) = table.get_mut(key) {
            return f(slot);
        }
        drop(table);
        panic!(
            "use of a destroyed engine pointer (slot {}, generation {})",
            key.index, key.generation
        )
    }

    /// Keep `child` alive until the value behind `parent` is destroyed.
    pub fn attach(&self, parent: &Pointer, child: Pointer) {
        self.with_slot(parent.key, |slot| slot.dependents.push(child));
    }

    /// Destroy a pinned value now.
    pub fn unpin(&self, mut pointer: Pointer) {
        pointer.released = true;
        let released = {
            let mut table = self.table.lock();
            match table.get(pointer.key).map(|slot| slot.ownership) {
                Some(Ownership::Pinned) => table.remove(pointer.key),
                Some(_) => {
                    drop(table);
                    panic!("unpin of a value that is not pinned")
                }
                None => None,
            }
        };
        if let Some(released) = released {
            self.destroy(released);
        }
    }

    /// Destroy every pinned value. Returns how many were released.
    pub fn unpin_all(&self) -> usize {
        let released: Vec<Released> = {
            let mut table = self.table.lock();
            let keys = table.keys_where(|slot| slot.ownership == Ownership::Pinned);
            keys.into_iter().filter_map(|key| table.remove(key)).collect()
        };
        let count = released.len();
        for r in released {
            self.destroy(r);
        }
        if count > 0 {
            tracing::debug!(count, "released pinned values");
        }
        count
    }

    /// Batch reclamation sweep. Destroys every unreferenced, non-pinned value
    /// and returns how many were destroyed.
    ///
    /// Values kept alive only by a destroyed container become unreferenced
    /// during this sweep and are destroyed by the next one.
    pub fn cycle(&self) -> usize {
        let released: Vec<Released> = {
            let mut table = self.table.lock();
            let keys = table.keys_where(|slot| {
                !slot.referenced && slot.ownership != Ownership::Pinned
            });
            keys.into_iter().filter_map(|key| table.remove(key)).collect()
        };
        self.sweeps.fetch_add(1, Ordering::Relaxed);
        let count = released.len();
        for r in released {
            self.destroy(r);
        }
        tracing::debug!(destroyed = count, "pointer sweep");
        count
    }

    /// Run `sweeps` sweeps back to back and report what is left.
    pub fn shutdown(&self, sweeps: usize) -> ShutdownReport {
        let destroyed = (0..sweeps).map(|_| self.cycle()).sum();
        let leftover = self.stats().unreferenced;
        if leftover > 0 {
            tracing::warn!(leftover, sweeps, "unreferenced values survived shutdown sweeps");
        }
        ShutdownReport {
            destroyed,
            leftover,
        }
    }

    /// Current counters.
    pub fn stats(&self) -> RegistryStats {
        let table = self.table.lock();
        let pinned = table
            .keys_where(|slot| slot.ownership == Ownership::Pinned)
            .len();
        let unreferenced = table
            .keys_where(|slot| !slot.referenced && slot.ownership != Ownership::Pinned)
            .len();
        RegistryStats {
            live: table.live(),
            pinned,
            unreferenced,
            created: self.created.load(Ordering::Relaxed),
            destroyed: self.destroyed.load(Ordering::Relaxed),
            sweeps: self.sweeps.load(Ordering::Relaxed),
        }
    }

    fn destructor(&self, kind: VariantType) -> Address {
        self.resolver.memoize(NativeOp::Destructor(kind), || {
            let frame = self.resolver.frame();
            frame.arg(kind.id() as i64);
            let ret = frame.ret::<Address>();
            // SAFETY: (kind: i64) -> address
            unsafe { self.resolver.call(symbols::GET_PTR_DESTRUCTOR, &frame) };
            ret.get()
        })
    }

    fn destroy(&self, released: Released) {
        // dependents go first so they are unreferenced for the next sweep
        drop(released.dependents);
        if matches!(released.ownership, Ownership::Borrowed) {
            return;
        }
        let kind = released.kind;
        if kind == VariantType::Object {
            if released.words[0] == 0 {
                return;
            }
            let frame = self.resolver.frame();
            frame.arg(released.words[0]);
            // SAFETY: (object)
            unsafe { self.resolver.call(symbols::OBJECT_DESTROY, &frame) };
        } else if kind.has_native_payload() {
            let destructor = self.destructor(kind);
            if destructor.is_null() {
                tracing::warn!(%kind, "host has no destructor for kind");
                return;
            }
            let frame = self.resolver.frame();
            frame.arg_words(&released.words[..kind.payload_words()]);
            // SAFETY: destructor shape (payload)
            unsafe { self.resolver.invoke(destructor, &frame) };
        } else {
            return;
        }
        self.destroyed.fetch_add(1, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for PointerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PointerRegistry")
            .field("stats", &self.stats())
            .finish()
    }
}

/// Managed reference to a registry slot.
pub struct Pointer {
    registry: Arc<PointerRegistry>,
    key: SlotKey,
    released: bool,
}

impl Pointer {
    /// Backing words, borrowed for the duration of the current native call.
    pub fn get(&self) -> [u64; 3] {
        self.registry.with_slot(self.key, |slot| slot.words)
    }

    /// First backing word.
    pub fn word(&self) -> u64 {
        self.get()[0]
    }

    /// Replace the backing words in place (after a mutating native call).
    pub fn set(&self, words: [u64; 3]) {
        self.registry.with_slot(self.key, |slot| slot.words = words)
    }

    /// Take the backing words and forget the slot without destroying the
    /// value. `ok` is false if the slot was already gone.
    pub fn end(mut self) -> ([u64; 3], bool) {
        self.released = true;
        let released = self.registry.table.lock().remove(self.key);
        match released {
            Some(released) => {
                drop(released.dependents);
                (released.words, true)
            }
            None => ([0; 3], false),
        }
    }

    /// Kind of the value.
    pub fn kind(&self) -> VariantType {
        self.registry.with_slot(self.key, |slot| slot.kind)
    }

    /// Ownership class of the value.
    pub fn ownership(&self) -> Ownership {
        self.registry.with_slot(self.key, |slot| slot.ownership)
    }

    /// True while the slot has not been destroyed.
    pub fn is_alive(&self) -> bool {
        self.registry.table.lock().get(self.key).is_some()
    }

    /// Registry key.
    pub fn key(&self) -> SlotKey {
        self.key
    }

    /// Registry this pointer belongs to.
    pub fn registry(&self) -> &Arc<PointerRegistry> {
        &self.registry
    }
}

impl Drop for Pointer {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let mut table = self.registry.table.lock();
        let Some(slot) = table.get_mut(self.key) else {
            return;
        };
        match slot.ownership {
            Ownership::Owned | Ownership::RefCounted => slot.referenced = false,
            Ownership::Borrowed => {
                let released = table.remove(self.key);
                drop(table);
                drop(released);
            }
            Ownership::Pinned => {}
        }
    }
}

impl std::fmt::Debug for Pointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pointer").field("key", &self.key).finish()
    }
}
