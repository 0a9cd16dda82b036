//! Dynamic values crossing the boundary
//!
//! A [`Variant`] is a registry [`Pointer`] to a 3-word payload plus its kind
//! tag. [`VariantCodec`] converts between variants and managed [`Value`]s
//! and exposes the host's generic variant operations (construct, call,
//! evaluate, indexed/keyed/named access, ...).
//!
//! Encoding strategy per kind:
//!
//! | kinds | how |
//! |---|---|
//! | nil, bool, int, float, RID, inline math | word packing, no native call |
//! | Basis, Transform3D, Projection | from/to-type constructors (host boxes them) |
//! | String, StringName | UTF-8 buffer plus explicit length |
//! | NodePath | constructed from a String |
//! | Array, Dictionary, packed arrays | construct, then `append`/`set`; read back with `size`/`keys` plus indexed/keyed get |
//! | Callable, Signal | copied, never deep-decoded |
//! | Object | borrowed pointer plus instance id |
//!
//! [`Value`]: gdbridge_sdk::Value

mod codec;
mod convert;

pub use codec::VariantCodec;

use std::fmt;
use std::mem::size_of;

use gdbridge_sdk::{Pod, VariantType};

use crate::abi::RawVariant;
use crate::pointers::{Ownership, Pointer};

/// Ownership class the codec gives a value of `kind` it adopts from the host.
pub fn ownership_for(kind: VariantType) -> Ownership {
    if kind == VariantType::Object {
        Ownership::Borrowed
    } else if kind.is_ref_counted() {
        Ownership::RefCounted
    } else {
        Ownership::Owned
    }
}

/// A dynamic value held by the bridge.
pub struct Variant {
    kind: VariantType,
    ptr: Pointer,
}

impl Variant {
    /// Wrap a registry pointer.
    pub fn from_pointer(ptr: Pointer) -> Self {
        Variant {
            kind: ptr.kind(),
            ptr,
        }
    }

    /// Kind tag.
    pub fn kind(&self) -> VariantType {
        self.kind
    }

    /// True for the nil value.
    pub fn is_nil(&self) -> bool {
        self.kind == VariantType::Nil
    }

    /// Payload words.
    pub fn payload(&self) -> [u64; 3] {
        self.ptr.get()
    }

    /// Wire form, valid while `self` is alive.
    pub fn raw(&self) -> RawVariant {
        RawVariant::new(self.kind, self.payload())
    }

    /// Backing pointer.
    pub fn pointer(&self) -> &Pointer {
        &self.ptr
    }

    /// Hand the value to the host: the bridge forgets it without destroying
    /// it.
    pub fn into_raw(self) -> RawVariant {
        let kind = self.kind;
        let (payload, _) = self.ptr.end();
        RawVariant::new(kind, payload)
    }

    /// The backing pointer, consuming the variant.
    pub fn into_pointer(self) -> Pointer {
        self.ptr
    }
}

impl fmt::Debug for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Variant")
            .field("kind", &self.kind)
            .field("key", &self.ptr.key())
            .finish()
    }
}

/// Copy an inline value into payload words.
pub(crate) fn pack<T: Pod>(value: &T) -> [u64; 3] {
    assert!(size_of::<T>() <= 24, "inline payload wider than 3 words");
    let mut words = [0u64; 3];
    // SAFETY: T is Pod and fits into the 24-byte buffer
    unsafe {
        std::ptr::copy_nonoverlapping(
            value as *const T as *const u8,
            words.as_mut_ptr() as *mut u8,
            size_of::<T>(),
        )
    };
    words
}

/// Read an inline value back from payload words.
pub(crate) fn unpack<T: Pod>(words: &[u64; 3]) -> T {
    assert!(size_of::<T>() <= 24, "inline payload wider than 3 words");
    // SAFETY: the buffer holds at least size_of::<T>() bytes; Pod accepts any bits
    unsafe { (words.as_ptr() as *const T).read_unaligned() }
}
