//! Scoped pins for data the host reads through raw pointers

use std::mem::size_of;

use gdbridge_sdk::{words_for, Pod};

use super::Pointer;

/// Keeps memory at stable addresses, and registry values alive, until the
/// scope is dropped.
///
/// Used for metadata records handed to the host: the scope lives exactly as
/// long as the host may read through the pointers it produced.
#[derive(Default)]
pub struct PinScope {
    buffers: Vec<Box<[u64]>>,
    values: Vec<Pointer>,
}

impl PinScope {
    /// Empty scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy `items` to pinned memory and return a pointer to the first one
    /// (null for an empty slice).
    pub fn slice<T: Pod>(&mut self, items: &[T]) -> *const T {
        if items.is_empty() {
            return std::ptr::null();
        }
        let mut buffer = vec![0u64; words_for::<T>() * items.len()].into_boxed_slice();
        // SAFETY: buffer is 8-aligned and holds items.len() * size_of::<T>() bytes
        unsafe {
            std::ptr::copy_nonoverlapping(
                items.as_ptr() as *const u8,
                buffer.as_mut_ptr() as *mut u8,
                size_of::<T>() * items.len(),
            );
        }
        let ptr = buffer.as_ptr() as *const T;
        self.buffers.push(buffer);
        ptr
    }

    /// Pin one value.
    pub fn one<T: Pod>(&mut self, item: T) -> *const T {
        self.slice(std::slice::from_ref(&item))
    }

    /// Pin the first word of `pointer` and keep the value alive; returns the
    /// address of the pinned word (what the host expects for a StringName or
    /// String argument passed by pointer).
    pub fn value(&mut self, pointer: Pointer) -> *const u64 {
        let word = self.one(pointer.word());
        self.values.push(pointer);
        word
    }

    /// Keep `pointer` alive without pinning any memory.
    pub fn keep(&mut self, pointer: Pointer) {
        self.values.push(pointer);
    }

    /// Number of registry values kept alive.
    pub fn values(&self) -> usize {
        self.values.len()
    }

    /// Number of pinned buffers.
    pub fn buffers(&self) -> usize {
        self.buffers.len()
    }
}

impl std::fmt::Debug for PinScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinScope")
            .field("buffers", &self.buffers.len())
            .field("values", &self.values.len())
            .finish()
    }
}
