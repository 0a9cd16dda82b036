//! Host objects and method binds
//!
//! An [`Object`] is a registry pointer to a host object word plus the
//! object's instance id. Objects the bridge instantiated are owned and
//! destroyed through `object_destroy` by the sweep; objects received from
//! the host are borrowed.
//!
//! A [`MethodBind`] is the host's handle for one engine method, resolved
//! once per (class, method, hash) and cached by the resolver.

use std::sync::Arc;

use gdbridge_sdk::{ObjectRef, VariantType};

use crate::callframe::Frame;
use crate::pointers::{Ownership, Pointer, PointerRegistry};
use crate::symbols;
use crate::transport::{Address, NativeOp};
use crate::variant::VariantCodec;

/// Host object reference.
#[derive(Debug)]
pub struct Object {
    ptr: Pointer,
    instance_id: u64,
}

impl Object {
    /// Take ownership of a host object.
    pub fn owned(pointers: &Arc<PointerRegistry>, object: u64, instance_id: u64) -> Self {
        Object {
            ptr: pointers.adopt_as(VariantType::Object, Ownership::Owned, [object, instance_id, 0]),
            instance_id,
        }
    }

    /// View of an object the host keeps ownership of.
    pub fn borrowed(pointers: &Arc<PointerRegistry>, object: u64, instance_id: u64) -> Self {
        Object {
            ptr: pointers.borrow(VariantType::Object, [object, instance_id, 0]),
            instance_id,
        }
    }

    /// View of the object behind a decoded reference.
    pub fn from_ref(pointers: &Arc<PointerRegistry>, object: ObjectRef) -> Self {
        Self::borrowed(pointers, object.pointer, object.instance_id)
    }

    /// Host object word, 0 for null.
    pub fn as_ptr(&self) -> u64 {
        self.ptr.word()
    }

    /// Host instance id.
    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    /// True for the null object.
    pub fn is_null(&self) -> bool {
        self.as_ptr() == 0
    }

    /// Owned or borrowed.
    pub fn ownership(&self) -> Ownership {
        self.ptr.ownership()
    }

    /// Decoded reference, valid while this object is.
    pub fn to_ref(&self) -> ObjectRef {
        ObjectRef {
            pointer: self.as_ptr(),
            instance_id: self.instance_id,
        }
    }

    /// Give the object back to the host without destroying it.
    pub fn release(self) -> u64 {
        let (words, _) = self.ptr.end();
        words[0]
    }
}

/// Resolved host method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodBind(Address);

impl MethodBind {
    /// Resolve `class.method` with the given API hash. `None` if the host
    /// does not know the method.
    pub fn resolve(codec: &VariantCodec, class: &str, method: &str, hash: i64) -> Option<Self> {
        let resolver = codec.resolver();
        let op = NativeOp::MethodBind(class.to_string(), method.to_string(), hash);
        let address = resolver.memoize(op, || {
            let class = codec.string_name(class);
            let method = codec.string_name(method);
            let frame = resolver.frame();
            frame.arg(class.word());
            frame.arg(method.word());
            frame.arg(hash);
            let ret = frame.ret::<Address>();
            // SAFETY: (class: sn, method: sn, hash: i64) -> bind
            unsafe { resolver.call(symbols::CLASSDB_GET_METHOD_BIND, &frame) };
            ret.get()
        });
        match address.is_null() {
            true => None,
            false => Some(MethodBind(address)),
        }
    }

    /// Host address of the bind.
    pub fn address(&self) -> Address {
        self.0
    }

    /// Call the bound method on `object`. `args` carries one slot per
    /// argument and, if the method returns, the return slot.
    ///
    /// Panics on a null object or one whose instance id no longer resolves.
    ///
    /// # Safety
    ///
    /// `args` must match the method's argument and return layout.
    pub unsafe fn ptrcall(&self, codec: &VariantCodec, object: &Object, args: &Frame) {
        if object.is_null() {
            panic!("nil object dereference");
        }
        let resolver = codec.resolver();
        let live = {
            let frame = resolver.frame();
            frame.arg(object.instance_id());
            let ret = frame.ret::<u64>();
            resolver.call(symbols::OBJECT_GET_INSTANCE_FROM_ID, &frame);
            ret.get()
        };
        if live == 0 {
            panic!("use after free of object #{}", object.instance_id());
        }

        let slots = args.args();
        let list: Vec<u64> = (0..slots.len())
            .map(|i| slots.slot(i).as_ptr() as u64)
            .collect();
        let ret = args.ret_slot().map_or(0, |slot| slot.ptr as u64);
        let frame = resolver.frame();
        frame.arg(self.0);
        frame.arg(object.as_ptr());
        frame.arg_list(&list);
        frame.arg(ret);
        resolver.call(symbols::OBJECT_METHOD_BIND_PTRCALL, &frame);
    }
}
