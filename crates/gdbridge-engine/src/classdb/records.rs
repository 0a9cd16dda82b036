//! Building and reading the raw metadata records handed to the host

use gdbridge_sdk::{
    BridgeResult, MethodInfo, PropertyHint, PropertyInfo, PropertyUsage, VariantType,
};

use crate::abi::{RawMethodInfo, RawPropertyInfo, RawVariant};
use crate::pointers::PinScope;
use crate::variant::VariantCodec;

/// Raw property record whose strings stay alive as long as `scope`.
pub(crate) fn pin_property(
    codec: &VariantCodec,
    scope: &mut PinScope,
    info: &PropertyInfo,
) -> RawPropertyInfo {
    RawPropertyInfo {
        kind: info.kind.id() as i32,
        name: scope.value(codec.string_name(&info.name)),
        class_name: scope.value(codec.string_name(&info.class_name)),
        hint: info.hint.0,
        hint_string: scope.value(codec.string(&info.hint_string)),
        usage: info.usage.0,
    }
}

/// Managed copy of a raw property record.
///
/// # Safety
///
/// The name, class name and hint string pointers must be null or point to
/// live host strings.
pub(crate) unsafe fn read_property(
    codec: &VariantCodec,
    raw: &RawPropertyInfo,
) -> BridgeResult<PropertyInfo> {
    let name = match raw.name.is_null() {
        true => String::new(),
        false => codec.read_string_name(*raw.name)?,
    };
    let class_name = match raw.class_name.is_null() {
        true => String::new(),
        false => codec.read_string_name(*raw.class_name)?,
    };
    let hint_string = match raw.hint_string.is_null() {
        true => String::new(),
        false => codec.read_string(*raw.hint_string),
    };
    Ok(PropertyInfo {
        kind: VariantType::from_id(raw.kind as u64).unwrap_or(VariantType::Nil),
        name,
        class_name,
        hint: PropertyHint(raw.hint),
        hint_string,
        usage: PropertyUsage(raw.usage),
    })
}

/// Raw method record. Default arguments are encoded up front, so a value
/// that cannot be encoded fails before anything reaches the host.
pub(crate) fn pin_method(
    codec: &VariantCodec,
    scope: &mut PinScope,
    info: &MethodInfo,
    userdata: u64,
    call_func: u64,
    ptrcall_func: u64,
) -> BridgeResult<RawMethodInfo> {
    let mut defaults = Vec::with_capacity(info.default_arguments.len());
    for value in &info.default_arguments {
        defaults.push(codec.encode(value)?);
    }

    let return_value_info = match &info.return_value {
        Some(ret) => {
            let raw = pin_property(codec, scope, ret);
            scope.one(raw)
        }
        None => std::ptr::null(),
    };
    let arguments: Vec<RawPropertyInfo> = info
        .arguments
        .iter()
        .map(|arg| pin_property(codec, scope, arg))
        .collect();
    // the host reads exactly one metadata entry per argument
    let metadata: Vec<u32> = (0..arguments.len())
        .map(|i| info.argument_metadata.get(i).map_or(0, |m| *m as u32))
        .collect();

    let raw_defaults: Vec<RawVariant> = defaults.iter().map(|v| v.raw()).collect();
    let default_arguments = if raw_defaults.is_empty() {
        std::ptr::null()
    } else {
        let base = scope.slice(&raw_defaults);
        // SAFETY: base points to raw_defaults.len() pinned records
        let addresses: Vec<u64> = (0..raw_defaults.len())
            .map(|i| unsafe { base.add(i) } as u64)
            .collect();
        scope.slice(&addresses) as *const *const RawVariant
    };
    for value in defaults {
        scope.keep(value.into_pointer());
    }

    Ok(RawMethodInfo {
        name: scope.value(codec.string_name(&info.name)),
        method_userdata: userdata,
        call_func,
        ptrcall_func,
        method_flags: info.flags.0,
        has_return_value: info.return_value.is_some() as u8,
        return_value_info,
        return_value_metadata: info.return_metadata as u32,
        argument_count: arguments.len() as u32,
        arguments_info: scope.slice(&arguments),
        arguments_metadata: scope.slice(&metadata),
        default_argument_count: raw_defaults.len() as u32,
        default_arguments,
    })
}
