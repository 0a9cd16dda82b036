//! Raw records exchanged with the host
//!
//! Everything here is `#[repr(C)]` and crosses the boundary by pointer or by
//! value inside a call-frame slot. Field order is part of the wire contract.

use gdbridge_sdk::{Pod, VariantType};

/// Wire form of a dynamic value: three payload words, tag alongside.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawVariant {
    /// Payload words; only the first `kind.payload_words()` are meaningful
    pub payload: [u64; 3],
    /// [`VariantType`] id
    pub kind: u64,
}

unsafe impl Pod for RawVariant {}

impl RawVariant {
    /// The nil value.
    pub const NIL: RawVariant = RawVariant {
        payload: [0; 3],
        kind: 0,
    };

    /// Value of `kind` with the given payload.
    pub fn new(kind: VariantType, payload: [u64; 3]) -> Self {
        RawVariant {
            payload,
            kind: kind.id() as u64,
        }
    }

    /// Decoded tag. An out-of-range tag is a fault.
    pub fn kind(&self) -> VariantType {
        match VariantType::from_id(self.kind) {
            Some(kind) => kind,
            None => panic!("invalid variant tag {}", self.kind),
        }
    }

    /// Payload with the words the kind does not use cleared.
    pub fn masked(&self) -> [u64; 3] {
        let mut payload = [0u64; 3];
        let n = self.kind().payload_words();
        payload[..n].copy_from_slice(&self.payload[..n]);
        payload
    }
}

/// Property metadata record.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawPropertyInfo {
    /// [`VariantType`] id
    pub kind: i32,
    /// StringName pointer
    pub name: *const u64,
    /// StringName pointer
    pub class_name: *const u64,
    /// Editor hint
    pub hint: u32,
    /// String pointer
    pub hint_string: *const u64,
    /// Usage flags
    pub usage: u32,
}

unsafe impl Pod for RawPropertyInfo {}
unsafe impl Send for RawPropertyInfo {}
unsafe impl Sync for RawPropertyInfo {}

/// Method registration record.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawMethodInfo {
    /// StringName pointer
    pub name: *const u64,
    /// Handle of the managed method
    pub method_userdata: u64,
    /// Varcall callback address
    pub call_func: u64,
    /// Ptrcall callback address
    pub ptrcall_func: u64,
    /// Method flags
    pub method_flags: u32,
    /// Non-zero when `return_value_info` is meaningful
    pub has_return_value: u8,
    /// Return value description
    pub return_value_info: *const RawPropertyInfo,
    /// Return precision metadata
    pub return_value_metadata: u32,
    /// Number of entries in the argument arrays
    pub argument_count: u32,
    /// Argument descriptions
    pub arguments_info: *const RawPropertyInfo,
    /// Per-argument precision metadata
    pub arguments_metadata: *const u32,
    /// Number of default arguments
    pub default_argument_count: u32,
    /// Default argument values
    pub default_arguments: *const *const RawVariant,
}

unsafe impl Pod for RawMethodInfo {}
unsafe impl Send for RawMethodInfo {}
unsafe impl Sync for RawMethodInfo {}

/// Class registration record: flags, the creation vtable and the class handle.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RawClassCreationInfo {
    /// Not instantiable, only inheritable by scripts
    pub is_virtual: u8,
    /// Not instantiable
    pub is_abstract: u8,
    /// Visible in the editor
    pub is_exposed: u8,
    /// Instance vtable
    pub callbacks: InstanceCallbacks,
    /// Handle of the registered class
    pub class_userdata: u64,
}

unsafe impl Pod for RawClassCreationInfo {}

/// Custom callable record.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCallableCustomInfo {
    /// Handle of the managed closure
    pub callable_userdata: u64,
    /// Extension token
    pub token: u64,
    /// Owning object id, 0 for none
    pub object_id: u64,
    /// Callback addresses
    pub callbacks: CallableCallbacks,
}

unsafe impl Pod for RawCallableCustomInfo {}

/// Addresses of the instance callbacks the host calls for managed classes.
///
/// All zero in tests, where the fake host calls the dispatcher directly; the
/// FFI crate fills it with its `extern "C"` trampolines.
#[repr(C)]
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstanceCallbacks {
    pub set: u64,
    pub get: u64,
    pub get_property_list: u64,
    pub free_property_list: u64,
    pub property_can_revert: u64,
    pub property_get_revert: u64,
    pub validate_property: u64,
    pub notification: u64,
    pub to_string: u64,
    pub reference: u64,
    pub unreference: u64,
    pub create_instance: u64,
    pub free_instance: u64,
    pub get_virtual_call_data: u64,
    pub call_virtual_with_data: u64,
    pub get_rid: u64,
}

/// Addresses of the custom callable callbacks.
#[repr(C)]
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallableCallbacks {
    pub call: u64,
    pub is_valid: u64,
    pub free: u64,
    pub hash: u64,
    pub equal: u64,
    pub less_than: u64,
    pub to_string: u64,
}

/// Every callback address the bridge hands to the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallbackTable {
    /// Instance vtable for registered classes
    pub instance: InstanceCallbacks,
    /// Method varcall callback
    pub method_call: u64,
    /// Method ptrcall callback
    pub method_ptrcall: u64,
    /// Custom callable vtable
    pub callable: CallableCallbacks,
}
