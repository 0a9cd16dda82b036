//! Names and slot layouts of the host entry points the bridge uses
//!
//! Layouts are written `(arg, arg, ...) -> ret`; every argument is one frame
//! slot and every slot is passed by pointer, so slots marked `inout` or
//! `out` are written by the host. `sn` is a 1-word StringName, `str` a
//! 1-word String, `var` a [`crate::abi::RawVariant`], `list` the address of
//! an array of pointers (see [`crate::callframe::Frame::arg_list`]) and `err`
//! a [`gdbridge_sdk::CallError`].

// ============================================================================
// Strings
// ============================================================================

/// `(bytes: ptr, len: i64) -> str`
pub const STRING_NEW_UTF8: &str = "string_new_with_utf8_chars_and_len";
/// `(bytes: ptr, len: i64) -> sn`
pub const STRING_NAME_NEW_UTF8: &str = "string_name_new_with_utf8_chars_and_len";
/// `(self: str, buf: ptr, cap: i64) -> len: i64`; writes at most `cap` bytes
pub const STRING_TO_UTF8: &str = "string_to_utf8_chars";
/// `(self: inout str, other: str)`
pub const STRING_APPEND: &str = "string_operator_plus_eq_string";

// ============================================================================
// Per-kind factories (memoized)
// ============================================================================

/// `(kind: i64) -> address`; destructor shape `(payload)`
pub const GET_PTR_DESTRUCTOR: &str = "variant_get_ptr_destructor";
/// `(kind: i64, index: i64) -> address`; constructor shape `(args...) -> payload`
pub const GET_PTR_CONSTRUCTOR: &str = "variant_get_ptr_constructor";
/// `(kind: i64) -> address`; shape `(value bytes) -> payload`
pub const GET_FROM_TYPE_CONSTRUCTOR: &str = "get_variant_from_type_constructor";
/// `(kind: i64) -> address`; shape `(payload) -> value bytes`
pub const GET_TO_TYPE_CONSTRUCTOR: &str = "get_variant_to_type_constructor";
/// `(kind: i64, method: sn, hash: i64) -> address`;
/// shape `(self: inout payload, args: list, argc: i64) -> payload`
pub const GET_PTR_BUILTIN_METHOD: &str = "variant_get_ptr_builtin_method";
/// `(op: i64, left: i64, right: i64) -> address`; shape `(left, right) -> payload`
pub const GET_PTR_OPERATOR_EVALUATOR: &str = "variant_get_ptr_operator_evaluator";
/// `(name: sn, hash: i64) -> address`; shape `(args: list, argc: i64) -> var`
pub const GET_PTR_UTILITY_FUNCTION: &str = "variant_get_ptr_utility_function";

// ============================================================================
// Generic variant operations
// ============================================================================

/// `(kind: i64, args: list, argc: i64, error: out err) -> var`
pub const VARIANT_CONSTRUCT: &str = "variant_construct";
/// `(self: inout var, method: sn, args: list, argc: i64, error: out err) -> var`
pub const VARIANT_CALL: &str = "variant_call";
/// `(kind: i64, method: sn, args: list, argc: i64, error: out err) -> var`
pub const VARIANT_CALL_STATIC: &str = "variant_call_static";
/// `(op: i64, left: var, right: var, valid: out u8) -> var`
pub const VARIANT_EVALUATE: &str = "variant_evaluate";
/// `(self: var, index: i64, valid: out u8, oob: out u8) -> var`
pub const VARIANT_GET_INDEXED: &str = "variant_get_indexed";
/// `(self: inout var, index: i64, value: var, valid: out u8, oob: out u8)`
pub const VARIANT_SET_INDEXED: &str = "variant_set_indexed";
/// `(self: var, key: var, valid: out u8) -> var`
pub const VARIANT_GET_KEYED: &str = "variant_get_keyed";
/// `(self: inout var, key: var, value: var, valid: out u8)`
pub const VARIANT_SET_KEYED: &str = "variant_set_keyed";
/// `(self: var, name: sn, valid: out u8) -> var`
pub const VARIANT_GET_NAMED: &str = "variant_get_named";
/// `(self: inout var, name: sn, value: var, valid: out u8)`
pub const VARIANT_SET_NAMED: &str = "variant_set_named";
/// `(self: var) -> str`
pub const VARIANT_STRINGIFY: &str = "variant_stringify";
/// `(self: var) -> i64`
pub const VARIANT_HASH: &str = "variant_hash";
/// `(self: var) -> u8`
pub const VARIANT_BOOLEANIZE: &str = "variant_booleanize";

// ============================================================================
// Objects
// ============================================================================

/// `(class: sn) -> object`
pub const CLASSDB_CONSTRUCT_OBJECT: &str = "classdb_construct_object";
/// `(object, class: sn, instance: handle)`
pub const OBJECT_SET_INSTANCE: &str = "object_set_instance";
/// `(object)`
pub const OBJECT_DESTROY: &str = "object_destroy";
/// `(object) -> id: u64`
pub const OBJECT_GET_INSTANCE_ID: &str = "object_get_instance_id";
/// `(id: u64) -> object`
pub const OBJECT_GET_INSTANCE_FROM_ID: &str = "object_get_instance_from_id";
/// `(class: sn, method: sn, hash: i64) -> bind`
pub const CLASSDB_GET_METHOD_BIND: &str = "classdb_get_method_bind";
/// `(bind, object, args: list, ret: ptr)`
pub const OBJECT_METHOD_BIND_PTRCALL: &str = "object_method_bind_ptrcall";

// ============================================================================
// Class registration
// ============================================================================

/// `(token, class: sn, parent: sn, info: ptr RawClassCreationInfo)`
pub const REGISTER_CLASS: &str = "classdb_register_extension_class2";
/// `(token, class: sn, info: ptr RawMethodInfo)`
pub const REGISTER_METHOD: &str = "classdb_register_extension_class_method";
/// `(token, class: sn, enum: sn, name: sn, value: i64, bitfield: u8)`
pub const REGISTER_INTEGER_CONSTANT: &str = "classdb_register_extension_class_integer_constant";
/// `(token, class: sn, info: ptr RawPropertyInfo, setter: sn, getter: sn)`
pub const REGISTER_PROPERTY: &str = "classdb_register_extension_class_property";
/// `(token, class: sn, info: ptr RawPropertyInfo, setter: sn, getter: sn, index: i64)`
pub const REGISTER_PROPERTY_INDEXED: &str = "classdb_register_extension_class_property_indexed";
/// `(token, class: sn, group: str, prefix: str)`
pub const REGISTER_PROPERTY_GROUP: &str = "classdb_register_extension_class_property_group";
/// `(token, class: sn, subgroup: str, prefix: str)`
pub const REGISTER_PROPERTY_SUBGROUP: &str =
    "classdb_register_extension_class_property_subgroup";
/// `(token, class: sn, signal: sn, args: ptr RawPropertyInfo, argc: i64)`
pub const REGISTER_SIGNAL: &str = "classdb_register_extension_class_signal";
/// `(token, class: sn)`
pub const UNREGISTER_CLASS: &str = "classdb_unregister_extension_class";

// ============================================================================
// Misc
// ============================================================================

/// `(token) -> str`
pub const GET_LIBRARY_PATH: &str = "get_library_path";
/// `(info: ptr RawCallableCustomInfo) -> callable payload (2 words)`
pub const CALLABLE_CUSTOM_CREATE: &str = "callable_custom_create";
