//! C entry point for gdbridge extensions
//!
//! The host loads the extension library, calls its entry symbol once and
//! drives everything afterwards through function pointers. This crate owns
//! both sides of that:
//!
//! - [`library_init`] builds the process-wide [`BridgeContext`] from the
//!   host's `get_proc_address` and fills the host's initialization record
//! - [`gdbridge_entry!`] exports a named entry symbol that calls it
//! - the `extern "C"` trampolines below are the addresses written into every
//!   registration record; each one forwards to the context
//!
//! Principles:
//! 1. Null pointers from the host are checked before anything is touched
//! 2. Handles cross the boundary as plain `u64`; 0 means "none"
//! 3. Faults inside a trampoline are panics, which abort at the boundary
//!
//! Callback shapes (`h` is a handle, `name` points at a StringName word):
//!
//! ```text
//! create_instance(class h) -> object
//! free_instance(class h, instance h)
//! set(instance h, name, *const variant) -> bool
//! get(instance h, name, *mut variant) -> bool
//! call_virtual_with_data(instance h, token, args, argc, ret)
//! method_call(method h, instance h | 0, *const *const variant, argc, *mut variant, *mut CallError)
//! method_ptrcall(method h, instance h | 0, args, argc, ret)
//! callable_call(callable h, *const *const variant, argc, *mut variant, *mut CallError)
//! ```

#![allow(clippy::missing_safety_doc)]

use std::ffi::c_void;
use std::ptr;
use std::sync::Arc;

use gdbridge_engine::abi::{CallableCallbacks, InstanceCallbacks, RawPropertyInfo};
use gdbridge_engine::callframe::{PtrArgs, PtrRet};
use gdbridge_engine::transport::{ProcTable, Transport};
use gdbridge_engine::{
    BridgeContext, BridgeOptions, CallbackTable, ExtensionToken, Handle, RawVariant,
};
use gdbridge_sdk::{CallError, InitializationLevel};
use once_cell::sync::OnceCell;

pub use gdbridge_engine::transport::GetProcAddressFn;

// ============================================================================
// Entry point
// ============================================================================

/// Level callback in the host's initialization record.
pub type LevelCallback = unsafe extern "C" fn(userdata: *mut c_void, level: u32);

/// Record the extension fills during [`library_init`].
#[repr(C)]
#[derive(Debug)]
pub struct Initialization {
    /// Lowest level the host should report
    pub minimum_initialization_level: u32,
    /// Passed back to both callbacks
    pub userdata: *mut c_void,
    /// Called once per level, ascending
    pub initialize: Option<LevelCallback>,
    /// Called once per level, descending
    pub deinitialize: Option<LevelCallback>,
}

static CONTEXT: OnceCell<Arc<BridgeContext>> = OnceCell::new();

/// The process-wide context, once [`library_init`] has succeeded.
pub fn context() -> Option<&'static Arc<BridgeContext>> {
    CONTEXT.get()
}

fn ctx() -> &'static BridgeContext {
    match CONTEXT.get() {
        Some(ctx) => ctx,
        None => panic!("host callback before library initialization"),
    }
}

/// Initialize the extension.
///
/// Reads [`BridgeOptions`] from the environment, builds the context over
/// the host's `get_proc_address`, runs `setup` (where extension code
/// registers its level callbacks) and fills `r_initialization`.
///
/// # Arguments
/// * `get_proc_address` - Host lookup function
/// * `library` - Opaque library token, passed back on registration calls
/// * `r_initialization` - Record to fill (must not be NULL)
/// * `setup` - Extension setup, run once
///
/// # Returns
/// * 1 on success
/// * 0 on a NULL argument, a bad config file or a second initialization
///
/// # Safety
/// `get_proc_address` must resolve host entry points with the uniform
/// pointer-array calling shape, and `r_initialization` must be writable.
pub unsafe fn library_init<F>(
    get_proc_address: Option<GetProcAddressFn>,
    library: *mut c_void,
    r_initialization: *mut Initialization,
    setup: F,
) -> u8
where
    F: FnOnce(&Arc<BridgeContext>),
{
    let Some(get_proc_address) = get_proc_address else {
        tracing::error!("library_init: get_proc_address is NULL");
        return 0;
    };
    if r_initialization.is_null() {
        tracing::error!("library_init: initialization record is NULL");
        return 0;
    }
    let options = match BridgeOptions::from_env() {
        Ok(options) => options,
        Err(err) => {
            tracing::error!(%err, "library_init: could not load options");
            return 0;
        }
    };

    let transport: Arc<dyn Transport> = Arc::new(ProcTable::from_get_proc_address(get_proc_address));
    let minimum = options.minimum_level;
    let ctx = BridgeContext::new(
        transport,
        ExtensionToken(library as u64),
        options,
        callback_table(),
    );
    if CONTEXT.set(ctx.clone()).is_err() {
        tracing::error!("library_init: extension already initialized");
        return 0;
    }
    setup(&ctx);

    *r_initialization = Initialization {
        minimum_initialization_level: minimum.id(),
        userdata: ptr::null_mut(),
        initialize: Some(initialize_level),
        deinitialize: Some(deinitialize_level),
    };
    tracing::info!(?minimum, "extension initialized");
    1
}

/// Export an entry symbol that calls [`library_init`] with `setup`.
///
/// ```rust,ignore
/// gdbridge_ffi::gdbridge_entry!(my_extension_init, |ctx| {
///     ctx.on_initialize(InitializationLevel::Scene, register_classes);
/// });
/// ```
#[macro_export]
macro_rules! gdbridge_entry {
    ($name:ident, $setup:expr) => {
        #[no_mangle]
        pub unsafe extern "C" fn $name(
            get_proc_address: Option<$crate::GetProcAddressFn>,
            library: *mut ::std::ffi::c_void,
            r_initialization: *mut $crate::Initialization,
        ) -> u8 {
            $crate::library_init(get_proc_address, library, r_initialization, $setup)
        }
    };
}

fn level(raw: u32) -> InitializationLevel {
    match InitializationLevel::from_id(raw) {
        Some(level) => level,
        None => panic!("unknown initialization level {}", raw),
    }
}

unsafe extern "C" fn initialize_level(_userdata: *mut c_void, raw: u32) {
    ctx().initialize(level(raw));
}

unsafe extern "C" fn deinitialize_level(_userdata: *mut c_void, raw: u32) {
    if let Some(report) = ctx().deinitialize(level(raw)) {
        if report.leftover > 0 {
            tracing::warn!(leftover = report.leftover, "values still live after shutdown");
        }
    }
}

/// Addresses of every trampoline in this crate.
pub fn callback_table() -> CallbackTable {
    CallbackTable {
        instance: InstanceCallbacks {
            set: instance_set as usize as u64,
            get: instance_get as usize as u64,
            get_property_list: instance_get_property_list as usize as u64,
            free_property_list: instance_free_property_list as usize as u64,
            property_can_revert: instance_property_can_revert as usize as u64,
            property_get_revert: instance_property_get_revert as usize as u64,
            validate_property: instance_validate_property as usize as u64,
            notification: instance_notification as usize as u64,
            to_string: instance_to_string as usize as u64,
            reference: instance_reference as usize as u64,
            unreference: instance_unreference as usize as u64,
            create_instance: class_create_instance as usize as u64,
            free_instance: class_free_instance as usize as u64,
            get_virtual_call_data: class_get_virtual_call_data as usize as u64,
            call_virtual_with_data: instance_call_virtual_with_data as usize as u64,
            get_rid: instance_get_rid as usize as u64,
        },
        method_call: method_call as usize as u64,
        method_ptrcall: method_ptrcall as usize as u64,
        callable: CallableCallbacks {
            call: callable_call as usize as u64,
            is_valid: callable_is_valid as usize as u64,
            free: callable_free as usize as u64,
            hash: callable_hash as usize as u64,
            equal: callable_equal as usize as u64,
            less_than: callable_less_than as usize as u64,
            to_string: callable_to_string as usize as u64,
        },
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn handle(raw: u64) -> Handle {
    Handle::from_raw(raw)
}

fn optional_handle(raw: u64) -> Option<Handle> {
    (raw != 0).then(|| Handle::from_raw(raw))
}

fn flag(value: bool) -> u8 {
    value as u8
}

/// Copy `count` variant pointers into a vector.
unsafe fn read_variants(args: *const *const RawVariant, count: i64) -> Vec<RawVariant> {
    if args.is_null() || count <= 0 {
        return Vec::new();
    }
    (0..count as usize).map(|i| **args.add(i)).collect()
}

/// Write a varcall result through the host's out-parameters.
unsafe fn write_result(
    result: Result<RawVariant, CallError>,
    r_return: *mut RawVariant,
    r_error: *mut CallError,
) {
    match result {
        Ok(value) => {
            if !r_return.is_null() {
                *r_return = value;
            }
            if !r_error.is_null() {
                *r_error = CallError::OK;
            }
        }
        Err(err) => {
            if !r_error.is_null() {
                *r_error = err;
            }
        }
    }
}

unsafe fn write_string(value: Option<u64>, r_is_valid: *mut u8, r_out: *mut u64) {
    if !r_is_valid.is_null() {
        *r_is_valid = flag(value.is_some());
    }
    if let (Some(word), false) = (value, r_out.is_null()) {
        *r_out = word;
    }
}

// ============================================================================
// Class callbacks
// ============================================================================

unsafe extern "C" fn class_create_instance(class_userdata: u64) -> u64 {
    ctx().dispatcher().create_instance(handle(class_userdata))
}

unsafe extern "C" fn class_free_instance(_class_userdata: u64, instance: u64) {
    ctx().dispatcher().free_instance(handle(instance));
}

unsafe extern "C" fn class_get_virtual_call_data(class_userdata: u64, name: *const u64) -> u64 {
    if name.is_null() {
        return 0;
    }
    ctx()
        .dispatcher()
        .get_virtual_call_data(handle(class_userdata), *name)
}

// ============================================================================
// Instance callbacks
// ============================================================================

unsafe extern "C" fn instance_set(instance: u64, name: *const u64, value: *const RawVariant) -> u8 {
    if name.is_null() || value.is_null() {
        return 0;
    }
    flag(ctx().dispatcher().set(handle(instance), *name, *value))
}

unsafe extern "C" fn instance_get(instance: u64, name: *const u64, r_ret: *mut RawVariant) -> u8 {
    if name.is_null() || r_ret.is_null() {
        return 0;
    }
    match ctx().dispatcher().get(handle(instance), *name) {
        Some(value) => {
            *r_ret = value;
            1
        }
        None => 0,
    }
}

unsafe extern "C" fn instance_get_property_list(
    instance: u64,
    r_count: *mut u32,
) -> *const RawPropertyInfo {
    let (list, count) = ctx().dispatcher().get_property_list(handle(instance));
    if !r_count.is_null() {
        *r_count = count;
    }
    list
}

unsafe extern "C" fn instance_free_property_list(instance: u64, list: *const RawPropertyInfo) {
    if list.is_null() {
        return;
    }
    ctx().dispatcher().free_property_list(handle(instance), list);
}

unsafe extern "C" fn instance_property_can_revert(instance: u64, name: *const u64) -> u8 {
    if name.is_null() {
        return 0;
    }
    flag(ctx().dispatcher().property_can_revert(handle(instance), *name))
}

unsafe extern "C" fn instance_property_get_revert(
    instance: u64,
    name: *const u64,
    r_ret: *mut RawVariant,
) -> u8 {
    if name.is_null() || r_ret.is_null() {
        return 0;
    }
    match ctx().dispatcher().property_get_revert(handle(instance), *name) {
        Some(value) => {
            *r_ret = value;
            1
        }
        None => 0,
    }
}

unsafe extern "C" fn instance_validate_property(instance: u64, info: *mut RawPropertyInfo) -> u8 {
    match info.as_mut() {
        Some(info) => flag(ctx().dispatcher().validate_property(handle(instance), info)),
        None => 0,
    }
}

unsafe extern "C" fn instance_notification(instance: u64, what: i32, reversed: u8) {
    ctx()
        .dispatcher()
        .notification(handle(instance), what, reversed != 0);
}

unsafe extern "C" fn instance_to_string(instance: u64, r_is_valid: *mut u8, r_out: *mut u64) {
    let text = ctx().dispatcher().to_string(handle(instance));
    write_string(text, r_is_valid, r_out);
}

unsafe extern "C" fn instance_reference(instance: u64) {
    ctx().dispatcher().reference(handle(instance));
}

unsafe extern "C" fn instance_unreference(instance: u64) {
    ctx().dispatcher().unreference(handle(instance));
}

unsafe extern "C" fn instance_get_rid(instance: u64) -> u64 {
    ctx().dispatcher().get_rid(handle(instance))
}

unsafe extern "C" fn instance_call_virtual_with_data(
    instance: u64,
    token: u64,
    args: *const *const c_void,
    argc: u32,
    ret: *mut c_void,
) {
    ctx().dispatcher().call_virtual_with_data(
        handle(instance),
        token,
        PtrArgs::from_raw(args, argc as usize),
        PtrRet::from_raw(ret),
    );
}

// ============================================================================
// Method callbacks
// ============================================================================

unsafe extern "C" fn method_call(
    method_userdata: u64,
    instance: u64,
    args: *const *const RawVariant,
    argc: i64,
    r_return: *mut RawVariant,
    r_error: *mut CallError,
) {
    let args = read_variants(args, argc);
    let result = ctx()
        .classdb()
        .call_method(handle(method_userdata), optional_handle(instance), &args);
    write_result(result, r_return, r_error);
}

unsafe extern "C" fn method_ptrcall(
    method_userdata: u64,
    instance: u64,
    args: *const *const c_void,
    argc: u32,
    ret: *mut c_void,
) {
    ctx().classdb().ptrcall_method(
        handle(method_userdata),
        optional_handle(instance),
        PtrArgs::from_raw(args, argc as usize),
        PtrRet::from_raw(ret),
    );
}

// ============================================================================
// Callable callbacks
// ============================================================================

unsafe extern "C" fn callable_call(
    userdata: u64,
    args: *const *const RawVariant,
    argc: i64,
    r_return: *mut RawVariant,
    r_error: *mut CallError,
) {
    let args = read_variants(args, argc);
    let result = ctx().callables().call(handle(userdata), &args);
    write_result(result, r_return, r_error);
}

unsafe extern "C" fn callable_is_valid(userdata: u64) -> u8 {
    flag(ctx().callables().is_valid(handle(userdata)))
}

unsafe extern "C" fn callable_free(userdata: u64) {
    ctx().callables().free(handle(userdata));
}

unsafe extern "C" fn callable_hash(userdata: u64) -> u32 {
    ctx().callables().hash(handle(userdata))
}

unsafe extern "C" fn callable_equal(a: u64, b: u64) -> u8 {
    flag(ctx().callables().equal(handle(a), handle(b)))
}

unsafe extern "C" fn callable_less_than(a: u64, b: u64) -> u8 {
    flag(ctx().callables().less_than(handle(a), handle(b)))
}

unsafe extern "C" fn callable_to_string(userdata: u64, r_is_valid: *mut u8, r_out: *mut u64) {
    let text = ctx().callables().to_string(handle(userdata));
    write_string(Some(text), r_is_valid, r_out);
}
