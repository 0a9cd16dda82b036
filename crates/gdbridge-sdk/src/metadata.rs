//! Property, method and signal metadata
//!
//! These records describe the surface a managed class exposes to the host.
//! They are built once, handed to the registration protocol and never
//! mutated afterwards.

use std::ops::BitOr;

use crate::types::VariantType;
use crate::value::Value;

macro_rules! flag_set {
    ($(#[$meta:meta])* $name:ident { $($(#[$cmeta:meta])* $cname:ident = $val:expr;)* }) => {
        $(#[$meta])*
        #[repr(transparent)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name(pub u32);

        impl $name {
            $($(#[$cmeta])* pub const $cname: $name = $name($val);)*

            /// True if every bit of `other` is set.
            pub fn contains(self, other: $name) -> bool {
                self.0 & other.0 == other.0
            }
        }

        impl BitOr for $name {
            type Output = $name;

            fn bitor(self, rhs: $name) -> $name {
                $name(self.0 | rhs.0)
            }
        }
    };
}

flag_set!(
    /// Method flags.
    MethodFlags {
        /// Plain method
        NORMAL = 1;
        /// Editor-only
        EDITOR = 2;
        /// Does not mutate the instance
        CONST = 4;
        /// Overridable by scripts
        VIRTUAL = 8;
        /// Accepts any number of arguments
        VARARG = 16;
        /// Called without an instance
        STATIC = 32;
        /// `NORMAL`
        DEFAULT = 1;
    }
);

flag_set!(
    /// Property usage flags.
    PropertyUsage {
        /// Not stored, not shown
        NONE = 0;
        /// Saved with the object
        STORAGE = 2;
        /// Shown in the inspector
        EDITOR = 4;
        /// Inspector group header
        GROUP = 64;
        /// Inspector category header
        CATEGORY = 128;
        /// Inspector subgroup header
        SUBGROUP = 256;
        /// Inspector shows the value read-only
        READ_ONLY = 1 << 27;
        /// `STORAGE | EDITOR`
        DEFAULT = 6;
    }
);

flag_set!(
    /// Editor hint for a property.
    PropertyHint {
        /// No hint
        NONE = 0;
        /// `"min,max,step"` range
        RANGE = 1;
        /// Comma separated enum names
        ENUM = 2;
        /// Enum names that suggest rather than restrict
        ENUM_SUGGESTION = 3;
        /// Exponential easing curve
        EXP_EASING = 4;
        /// Link between components
        LINK = 5;
        /// Comma separated flag names
        FLAGS = 6;
        /// File path
        FILE = 13;
        /// Directory path
        DIR = 14;
        /// Resource type name
        RESOURCE_TYPE = 17;
        /// Multiline text
        MULTILINE_TEXT = 18;
        /// Placeholder text
        PLACEHOLDER_TEXT = 20;
    }
);

/// Precision metadata attached to integer and float arguments.
#[repr(u32)]
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ArgumentMetadata {
    #[default]
    None = 0,
    IntIsInt8,
    IntIsInt16,
    IntIsInt32,
    IntIsInt64,
    IntIsUint8,
    IntIsUint16,
    IntIsUint32,
    IntIsUint64,
    RealIsFloat,
    RealIsDouble,
}

/// Describes one property, argument or return value.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyInfo {
    /// Declared kind
    pub kind: VariantType,
    /// Property name (empty for return values)
    pub name: String,
    /// Class name for object-typed properties
    pub class_name: String,
    /// Editor hint
    pub hint: PropertyHint,
    /// Hint parameters
    pub hint_string: String,
    /// Usage flags
    pub usage: PropertyUsage,
}

impl PropertyInfo {
    /// Property with default usage and no hint.
    pub fn new(kind: VariantType, name: impl Into<String>) -> Self {
        PropertyInfo {
            kind,
            name: name.into(),
            class_name: String::new(),
            hint: PropertyHint::NONE,
            hint_string: String::new(),
            usage: PropertyUsage::DEFAULT,
        }
    }

    /// Set the editor hint.
    pub fn with_hint(mut self, hint: PropertyHint, hint_string: impl Into<String>) -> Self {
        self.hint = hint;
        self.hint_string = hint_string.into();
        self
    }

    /// Set the usage flags.
    pub fn with_usage(mut self, usage: PropertyUsage) -> Self {
        self.usage = usage;
        self
    }

    /// Set the class name of an object-typed property.
    pub fn with_class(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = class_name.into();
        self
    }
}

/// Describes a method exposed to the host.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodInfo {
    /// Method name
    pub name: String,
    /// Flags
    pub flags: MethodFlags,
    /// Return value, `None` for void methods
    pub return_value: Option<PropertyInfo>,
    /// Return precision metadata
    pub return_metadata: ArgumentMetadata,
    /// Declared arguments
    pub arguments: Vec<PropertyInfo>,
    /// Per-argument precision metadata, parallel to `arguments`
    pub argument_metadata: Vec<ArgumentMetadata>,
    /// Defaults for the trailing arguments
    pub default_arguments: Vec<Value>,
}

impl MethodInfo {
    /// Void method without arguments.
    pub fn new(name: impl Into<String>) -> Self {
        MethodInfo {
            name: name.into(),
            flags: MethodFlags::DEFAULT,
            return_value: None,
            return_metadata: ArgumentMetadata::None,
            arguments: Vec::new(),
            argument_metadata: Vec::new(),
            default_arguments: Vec::new(),
        }
    }

    /// Append an argument.
    pub fn arg(mut self, kind: VariantType, name: impl Into<String>) -> Self {
        self.arguments.push(PropertyInfo::new(kind, name));
        self.argument_metadata.push(ArgumentMetadata::None);
        self
    }

    /// Append an argument with precision metadata.
    pub fn arg_with(mut self, info: PropertyInfo, metadata: ArgumentMetadata) -> Self {
        self.arguments.push(info);
        self.argument_metadata.push(metadata);
        self
    }

    /// Set the return kind.
    pub fn returns(mut self, kind: VariantType) -> Self {
        self.return_value = Some(PropertyInfo::new(kind, ""));
        self
    }

    /// Set the flags.
    pub fn flags(mut self, flags: MethodFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Append a default for the trailing arguments.
    pub fn default_arg(mut self, value: Value) -> Self {
        self.default_arguments.push(value);
        self
    }

    /// Smallest argument count a caller may pass.
    pub fn required_arguments(&self) -> usize {
        self.arguments
            .len()
            .saturating_sub(self.default_arguments.len())
    }

    /// True for static methods.
    pub fn is_static(&self) -> bool {
        self.flags.contains(MethodFlags::STATIC)
    }

    /// True for vararg methods.
    pub fn is_vararg(&self) -> bool {
        self.flags.contains(MethodFlags::VARARG)
    }
}

/// Describes a signal.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalInfo {
    /// Signal name
    pub name: String,
    /// Arguments passed to connected callables
    pub arguments: Vec<PropertyInfo>,
}

impl SignalInfo {
    /// Signal without arguments.
    pub fn new(name: impl Into<String>) -> Self {
        SignalInfo {
            name: name.into(),
            arguments: Vec::new(),
        }
    }

    /// Append an argument.
    pub fn arg(mut self, kind: VariantType, name: impl Into<String>) -> Self {
        self.arguments.push(PropertyInfo::new(kind, name));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_arguments() {
        let info = MethodInfo::new("move")
            .arg(VariantType::Int, "x")
            .arg(VariantType::Int, "y")
            .default_arg(Value::Int(0));
        assert_eq!(info.required_arguments(), 1);
        assert_eq!(info.argument_metadata.len(), 2);
    }

    #[test]
    fn test_flags_compose() {
        let flags = MethodFlags::NORMAL | MethodFlags::CONST;
        assert!(flags.contains(MethodFlags::CONST));
        assert!(!flags.contains(MethodFlags::STATIC));
        assert_eq!(PropertyUsage::STORAGE | PropertyUsage::EDITOR, PropertyUsage::DEFAULT);
    }
}
